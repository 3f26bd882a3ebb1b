//! Stream session: the state shared by the transfer pump and its drivers
//!
//! Two flags cross execution contexts:
//!
//! - **Stream latch** (`enabled`): written only by class-event handling,
//!   read by the pump. True while the host has the streaming interface open.
//! - **Transfer state** (the busy flag): set to `Busy` only by the pump,
//!   immediately before it submits a fragment; moved out of `Busy` by the
//!   completion signal. Latch transitions force it back to `Idle` so a
//!   completion lost to a disconnect cannot wedge the pump.
//!
//! Each latch transition also bumps a generation counter before clearing the
//! busy flag. The pump compares generations across a wait, so a busy flag
//! cleared by the latch is never mistaken for a completed transfer.
//!
//! Each flag is a single atomic word. There is no lock: every handoff is
//! one store observed by one polling reader.

use protocol::{ClassEvent, LatchAction};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tracing::{debug, info};

const IDLE: u8 = 0;
const BUSY: u8 = 1;
const FAILED: u8 = 2;

/// State of the single outstanding fragment transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No transfer outstanding, or the last one completed successfully
    Idle,
    /// A fragment has been submitted and has not completed
    Busy,
    /// The last fragment completed with an error
    Failed,
}

impl TransferState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            BUSY => Self::Busy,
            FAILED => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// Shared stream state, referenced through `Arc` by the pump, the
/// completion signal and the class-event handler
#[derive(Debug, Default)]
pub struct StreamSession {
    enabled: AtomicBool,
    generation: AtomicU64,
    transfer: AtomicU8,
    shutdown: AtomicBool,
    spurious_completions: AtomicU64,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether streaming is currently permitted
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Open the latch (stream opened by the host)
    pub fn enable(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.transfer.store(IDLE, Ordering::Release);
        self.enabled.store(true, Ordering::Release);
    }

    /// Close the latch (stream closed, bus reset or disconnect)
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.transfer.store(IDLE, Ordering::Release);
    }

    /// Number of latch transitions so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Apply a class lifecycle event to the latch
    ///
    /// Returns the latch state after the event, or `None` when the event
    /// does not affect streaming.
    pub fn apply(&self, event: ClassEvent) -> Option<bool> {
        match event.latch_action() {
            LatchAction::Enable => {
                info!("Stream opened ({:?})", event);
                self.enable();
                Some(true)
            }
            LatchAction::Disable => {
                info!("Stream closed ({:?})", event);
                self.disable();
                Some(false)
            }
            LatchAction::Keep => {
                debug!("Ignoring {:?} for stream latch", event);
                None
            }
        }
    }

    /// Current transfer state
    pub fn transfer_state(&self) -> TransferState {
        TransferState::from_raw(self.transfer.load(Ordering::Acquire))
    }

    /// True strictly between a submit and its completion
    pub fn is_busy(&self) -> bool {
        self.transfer_state() == TransferState::Busy
    }

    /// Mark a fragment as outstanding. Pump side only.
    pub(crate) fn begin_transfer(&self) {
        self.transfer.store(BUSY, Ordering::Release);
    }

    /// Drop the outstanding mark after a submit that never reached the
    /// endpoint, or after the pump gave up waiting. Pump side only.
    pub(crate) fn abort_transfer(&self) {
        self.transfer.store(IDLE, Ordering::Release);
    }

    /// Move an outstanding transfer to its final state. Completion side only.
    ///
    /// Completions that arrive while nothing is outstanding are counted and
    /// otherwise ignored.
    pub(crate) fn finish_transfer(&self, success: bool) -> bool {
        let next = if success { IDLE } else { FAILED };
        let finished = self
            .transfer
            .compare_exchange(BUSY, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !finished {
            self.spurious_completions.fetch_add(1, Ordering::Relaxed);
        }
        finished
    }

    /// Completions received with no transfer outstanding
    pub fn spurious_completions(&self) -> u64 {
        self.spurious_completions.load(Ordering::Relaxed)
    }

    /// Ask the pump to exit; also closes the latch
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.disable();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
