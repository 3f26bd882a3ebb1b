//! Isochronous video transfer pump
//!
//! The pump turns frames into fragments and feeds them to the endpoint one at
//! a time:
//!
//! ```text
//!  FrameSource ──► Packetizer ──► packet buffer ──► Endpoint ──► host
//!                                       ▲               │
//!                                       │         CompletionSignal
//!                     pump waits ───────┴── busy ◄──────┘
//! ```
//!
//! A fragment is submitted only after the previous one completed. When the
//! stream latch drops, the rest of the frame is abandoned and the next
//! enable starts over with a freshly packetized frame. A submit failure is
//! handled like a closed latch: the frame is abandoned and nothing more is
//! submitted until the next latch transition. A failed completion only drops
//! the current frame.

use super::endpoint::Endpoint;
use super::session::{StreamSession, TransferState};
use super::source::FrameSource;
use common::{AbandonReason, DeviceEvent, EventSender};
use protocol::Packetizer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Busy-wait iterations before the pump starts sleeping between checks
const SPIN_LIMIT: u32 = 64;

/// Pump timing settings
#[derive(Debug, Clone, Copy)]
pub struct PumpConfig {
    /// Sleep between checks once spinning gives up
    pub poll_interval: Duration,
    /// Give up on a fragment that has not completed after this long
    pub completion_timeout: Option<Duration>,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(100),
            completion_timeout: None,
        }
    }
}

/// Pump counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub frames_started: u64,
    pub frames_completed: u64,
    pub frames_abandoned: u64,
    pub fragments_submitted: u64,
    pub bytes_submitted: u64,
    pub cancellations: u64,
    pub submit_failures: u64,
    pub transfer_failures: u64,
    pub completion_timeouts: u64,
    pub packetize_failures: u64,
}

/// Result of one pass over a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Latch was closed; nothing was done
    Idle,
    /// Every fragment completed
    Completed { fragments: usize, bytes: usize },
    /// The frame was dropped after `completed` of `fragments` fragments
    Abandoned {
        completed: usize,
        fragments: usize,
        reason: AbandonReason,
    },
}

enum Wait {
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

/// Drives frames through a single isochronous endpoint
pub struct TransferPump<S, P, E> {
    session: Arc<StreamSession>,
    source: S,
    packetizer: P,
    endpoint: E,
    buffer: Vec<u8>,
    config: PumpConfig,
    stats: PumpStats,
    events: Option<EventSender>,
    next_frame: u64,
}

impl<S, P, E> TransferPump<S, P, E>
where
    S: FrameSource,
    P: Packetizer,
    E: Endpoint,
{
    /// Create a pump with a packet buffer of `buffer_capacity` bytes
    ///
    /// The capacity must cover the worst-case packetized frame
    /// (see [`protocol::packet_buffer_capacity`]).
    pub fn new(
        session: Arc<StreamSession>,
        source: S,
        packetizer: P,
        endpoint: E,
        buffer_capacity: usize,
        config: PumpConfig,
    ) -> Self {
        Self {
            session,
            source,
            packetizer,
            endpoint,
            buffer: vec![0u8; buffer_capacity],
            config,
            stats: PumpStats::default(),
            events: None,
            next_frame: 0,
        }
    }

    /// Report frame outcomes on `events`
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Run until the session is shut down
    pub fn run(&mut self) -> PumpStats {
        info!(
            "Transfer pump started on endpoint {:#04x} ({} byte packet buffer)",
            self.endpoint.address(),
            self.buffer.len()
        );

        while !self.session.is_shutdown() {
            if !self.session.is_enabled() {
                self.wait_for_enable();
                continue;
            }

            let generation = self.session.generation();
            let outcome = self.pump_frame();
            if let FrameOutcome::Abandoned {
                reason: reason @ (AbandonReason::SubmitFailed | AbandonReason::PacketizeFailed),
                ..
            } = outcome
            {
                info!("Stream idle after {:?} until the host reopens it", reason);
                self.wait_for_transition(generation);
            }
        }

        info!("Transfer pump stopped: {:?}", self.stats);
        self.stats.clone()
    }

    /// Send one frame, or return immediately if the latch is closed
    pub fn pump_frame(&mut self) -> FrameOutcome {
        if !self.session.is_enabled() {
            return FrameOutcome::Idle;
        }

        let generation = self.session.generation();
        let frame_id = self.next_frame;
        self.next_frame += 1;
        self.stats.frames_started += 1;

        let frame = self.source.next_frame();
        let layout = match self.packetizer.fill(&frame, &mut self.buffer) {
            Ok(layout) => layout,
            Err(e) => {
                warn!("Failed to packetize frame {}: {}", frame_id, e);
                self.stats.packetize_failures += 1;
                return self.abandon(frame_id, 0, 0, AbandonReason::PacketizeFailed);
            }
        };

        let fragments = layout.fragment_count();
        trace!(
            "Frame {}: {} bytes in {} fragments",
            frame_id,
            layout.total_len(),
            fragments
        );

        for (index, range) in layout.fragments().enumerate() {
            if self.session.generation() != generation
                || !self.session.is_enabled()
                || self.session.is_shutdown()
            {
                self.stats.cancellations += 1;
                return self.abandon(frame_id, index, fragments, AbandonReason::Cancelled);
            }

            let len = range.len();
            self.session.begin_transfer();
            if let Err(e) = self.endpoint.submit(&self.buffer[range]) {
                warn!(
                    "Submit of fragment {}/{} of frame {} failed: {}",
                    index + 1,
                    fragments,
                    frame_id,
                    e
                );
                self.session.abort_transfer();
                self.stats.submit_failures += 1;
                return self.abandon(frame_id, index, fragments, AbandonReason::SubmitFailed);
            }
            self.stats.fragments_submitted += 1;
            self.stats.bytes_submitted += len as u64;

            match self.wait_for_completion(generation) {
                Wait::Completed => {}
                Wait::Failed => {
                    self.stats.transfer_failures += 1;
                    return self.abandon(frame_id, index, fragments, AbandonReason::TransferFailed);
                }
                Wait::Cancelled => {
                    self.endpoint.cancel();
                    self.stats.cancellations += 1;
                    return self.abandon(frame_id, index, fragments, AbandonReason::Cancelled);
                }
                Wait::TimedOut => {
                    warn!(
                        "Fragment {}/{} of frame {} did not complete in {:?}",
                        index + 1,
                        fragments,
                        frame_id,
                        self.config.completion_timeout
                    );
                    self.endpoint.cancel();
                    self.session.abort_transfer();
                    self.stats.completion_timeouts += 1;
                    return self.abandon(
                        frame_id,
                        index,
                        fragments,
                        AbandonReason::CompletionTimeout,
                    );
                }
            }
        }

        self.stats.frames_completed += 1;
        self.emit(DeviceEvent::FrameCompleted {
            frame: frame_id,
            fragments,
            bytes: layout.total_len(),
        });
        FrameOutcome::Completed {
            fragments,
            bytes: layout.total_len(),
        }
    }

    fn abandon(
        &mut self,
        frame_id: u64,
        completed: usize,
        fragments: usize,
        reason: AbandonReason,
    ) -> FrameOutcome {
        debug!(
            "Abandoned frame {} after {}/{} fragments: {:?}",
            frame_id, completed, fragments, reason
        );
        self.stats.frames_abandoned += 1;
        self.emit(DeviceEvent::FrameAbandoned {
            frame: frame_id,
            completed,
            fragments,
            reason,
        });
        FrameOutcome::Abandoned {
            completed,
            fragments,
            reason,
        }
    }

    fn emit(&self, event: DeviceEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    /// Idle until the latch opens or the session shuts down
    fn wait_for_enable(&self) {
        while !self.session.is_enabled() && !self.session.is_shutdown() {
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Idle until the latch leaves `generation` or the session shuts down
    fn wait_for_transition(&self, generation: u64) {
        while self.session.generation() == generation && !self.session.is_shutdown() {
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Wait for the outstanding fragment, watching the latch while doing so
    ///
    /// `generation` is the latch generation the frame started under. An idle
    /// busy flag only counts as a completion if no latch transition happened
    /// since, because every transition clears the flag.
    fn wait_for_completion(&self, generation: u64) -> Wait {
        let started = Instant::now();
        let mut spins = 0u32;

        loop {
            let state = self.session.transfer_state();
            if self.session.generation() != generation {
                return Wait::Cancelled;
            }
            match state {
                TransferState::Idle => return Wait::Completed,
                TransferState::Failed => return Wait::Failed,
                TransferState::Busy => {}
            }

            if !self.session.is_enabled() || self.session.is_shutdown() {
                return Wait::Cancelled;
            }

            if let Some(timeout) = self.config.completion_timeout
                && started.elapsed() >= timeout
            {
                return Wait::TimedOut;
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::sleep(self.config.poll_interval);
            }
        }
    }
}

/// Spawn the pump on a dedicated thread
///
/// The thread runs until [`StreamSession::shutdown`] is called and returns
/// the final counters.
pub fn spawn_transfer_pump<S, P, E>(
    mut pump: TransferPump<S, P, E>,
) -> std::io::Result<std::thread::JoinHandle<PumpStats>>
where
    S: FrameSource + Send + 'static,
    P: Packetizer + Send + 'static,
    E: Endpoint + Send + 'static,
{
    std::thread::Builder::new()
        .name("uvc-pump".to_string())
        .spawn(move || pump.run())
}
