//! Isochronous IN endpoint abstraction
//!
//! The pump drives exactly one endpoint and never has more than one fragment
//! outstanding on it. Completion is reported out of band through a
//! [`CompletionSignal`].

use super::completion::CompletionSignal;
use async_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Endpoint submit errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Fragment is larger than the endpoint's max packet size
    #[error("Fragment of {len} bytes exceeds max packet size {max}")]
    TooLarge { len: usize, max: usize },

    /// A transfer is still queued on the endpoint
    #[error("Endpoint {0:#04x} busy")]
    Busy(u8),

    /// The endpoint has been closed or the bus is gone
    #[error("Endpoint {0:#04x} disconnected")]
    Disconnected(u8),
}

/// A device-side isochronous IN endpoint
pub trait Endpoint {
    /// Endpoint address (direction bit set)
    fn address(&self) -> u8;

    /// Schedule one fragment for transmission
    ///
    /// Returns once the fragment is queued; completion is reported later
    /// through the completion signal.
    fn submit(&mut self, fragment: &[u8]) -> Result<(), EndpointError>;

    /// Discard the outstanding transfer, if any
    ///
    /// Called when the pump abandons a frame while a fragment is in flight.
    /// A completion for the discarded transfer must not be reported after
    /// this returns.
    fn cancel(&mut self) {}
}

/// Counters kept by [`SimulatedEndpoint`]
#[derive(Debug, Default)]
pub struct EndpointStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub bytes: AtomicU64,
}

impl EndpointStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Settings for [`SimulatedEndpoint`]
#[derive(Debug, Clone)]
pub struct SimulatedEndpointConfig {
    /// Endpoint address
    pub address: u8,
    /// Max packet size accepted per transfer
    pub max_packet_size: usize,
    /// Time the simulated host takes to service one transfer
    pub service_interval: Duration,
    /// Probability in [0, 1] that a transfer completes with an error
    pub fault_rate: f64,
}

struct Transfer {
    epoch: u64,
    len: usize,
}

/// Serializes "is this transfer still live?" checks in the host thread
/// against cancellation, so no stale completion escapes after `cancel`.
#[derive(Default)]
struct Gate {
    epoch: Mutex<u64>,
}

impl Gate {
    fn current(&self) -> u64 {
        *self.epoch.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Endpoint whose host side is a thread that services one transfer per
/// interval and reports the result through the completion signal
///
/// Stands in for the device controller when no USB hardware is present.
pub struct SimulatedEndpoint {
    config: SimulatedEndpointConfig,
    tx: Sender<Transfer>,
    rx: Receiver<Transfer>,
    gate: Arc<Gate>,
    stats: Arc<EndpointStats>,
    host: Option<JoinHandle<()>>,
}

impl SimulatedEndpoint {
    /// Create the endpoint and start its host thread
    pub fn spawn(
        config: SimulatedEndpointConfig,
        completion: CompletionSignal,
    ) -> std::io::Result<Self> {
        let (tx, rx) = bounded(1);
        let gate = Arc::new(Gate::default());
        let stats = Arc::new(EndpointStats::default());

        let host = {
            let rx = rx.clone();
            let gate = gate.clone();
            let stats = stats.clone();
            let config = config.clone();
            std::thread::Builder::new()
                .name("iso-host".to_string())
                .spawn(move || run_host(rx, config, gate, stats, completion))?
        };

        Ok(Self {
            config,
            tx,
            rx,
            gate,
            stats,
            host: Some(host),
        })
    }

    pub fn stats(&self) -> Arc<EndpointStats> {
        self.stats.clone()
    }
}

impl Endpoint for SimulatedEndpoint {
    fn address(&self) -> u8 {
        self.config.address
    }

    fn submit(&mut self, fragment: &[u8]) -> Result<(), EndpointError> {
        if fragment.len() > self.config.max_packet_size {
            return Err(EndpointError::TooLarge {
                len: fragment.len(),
                max: self.config.max_packet_size,
            });
        }

        let transfer = Transfer {
            epoch: self.gate.current(),
            len: fragment.len(),
        };
        match self.tx.try_send(transfer) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Submitted {} bytes on endpoint {:#04x}",
                    fragment.len(),
                    self.config.address
                );
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(EndpointError::Busy(self.config.address)),
            Err(TrySendError::Closed(_)) => {
                Err(EndpointError::Disconnected(self.config.address))
            }
        }
    }

    fn cancel(&mut self) {
        {
            let mut epoch = self.gate.epoch.lock().unwrap_or_else(|e| e.into_inner());
            *epoch += 1;
        }
        // Drop a transfer the host has not picked up yet
        while self.rx.try_recv().is_ok() {}
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!("Cancelled transfers on endpoint {:#04x}", self.config.address);
    }
}

impl Drop for SimulatedEndpoint {
    fn drop(&mut self) {
        self.tx.close();
        if let Some(host) = self.host.take() {
            if host.join().is_err() {
                warn!("Simulated host thread panicked");
            }
        }
    }
}

fn run_host(
    rx: Receiver<Transfer>,
    config: SimulatedEndpointConfig,
    gate: Arc<Gate>,
    stats: Arc<EndpointStats>,
    completion: CompletionSignal,
) {
    debug!("Simulated host servicing endpoint {:#04x}", config.address);

    while let Ok(transfer) = rx.recv_blocking() {
        std::thread::sleep(config.service_interval);

        let epoch = gate.epoch.lock().unwrap_or_else(|e| e.into_inner());
        if transfer.epoch != *epoch {
            // Cancelled while in flight
            continue;
        }

        if config.fault_rate > 0.0 && rand::random::<f64>() < config.fault_rate {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            completion.fail();
        } else {
            stats.completed.fetch_add(1, Ordering::Relaxed);
            stats.bytes.fetch_add(transfer.len as u64, Ordering::Relaxed);
            completion.complete();
        }
        drop(epoch);
    }

    debug!("Simulated host for endpoint {:#04x} stopped", config.address);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::session::{StreamSession, TransferState};
    use common::test_utils::poll_until;

    fn spawn_endpoint(
        service_interval: Duration,
        fault_rate: f64,
    ) -> (SimulatedEndpoint, Arc<StreamSession>) {
        let session = Arc::new(StreamSession::new());
        let endpoint = SimulatedEndpoint::spawn(
            SimulatedEndpointConfig {
                address: 0x81,
                max_packet_size: 16,
                service_interval,
                fault_rate,
            },
            CompletionSignal::new(session.clone()),
        )
        .unwrap();
        (endpoint, session)
    }

    #[test]
    fn test_submit_completes() {
        let (mut endpoint, session) = spawn_endpoint(Duration::from_millis(1), 0.0);

        session.begin_transfer();
        endpoint.submit(&[0u8; 16]).unwrap();
        assert!(poll_until(Duration::from_secs(2), || !session.is_busy()));

        let stats = endpoint.stats();
        assert_eq!(stats.submitted(), 1);
        assert!(poll_until(Duration::from_secs(1), || stats.completed() == 1));
        assert_eq!(stats.bytes(), 16);
    }

    #[test]
    fn test_submit_rejects_oversized_fragment() {
        let (mut endpoint, _session) = spawn_endpoint(Duration::from_millis(1), 0.0);
        assert_eq!(
            endpoint.submit(&[0u8; 17]),
            Err(EndpointError::TooLarge { len: 17, max: 16 })
        );
        assert_eq!(endpoint.address(), 0x81);
    }

    #[test]
    fn test_fault_injection_reports_failure() {
        let (mut endpoint, session) = spawn_endpoint(Duration::from_millis(1), 1.0);

        session.begin_transfer();
        endpoint.submit(&[1, 2, 3]).unwrap();
        assert!(poll_until(Duration::from_secs(2), || {
            session.transfer_state() == TransferState::Failed
        }));
        assert_eq!(endpoint.stats().failed(), 1);
    }

    #[test]
    fn test_cancel_suppresses_completion() {
        let (mut endpoint, session) = spawn_endpoint(Duration::from_millis(50), 0.0);

        session.begin_transfer();
        endpoint.submit(&[0u8; 8]).unwrap();
        endpoint.cancel();

        std::thread::sleep(Duration::from_millis(120));
        // Nobody cleared the busy mark: the cancelled transfer never completed
        assert!(session.is_busy());
        assert_eq!(endpoint.stats().completed(), 0);
        assert_eq!(endpoint.stats().cancelled(), 1);
    }
}
