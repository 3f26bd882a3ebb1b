//! Async channel bridge between the Tokio runtime and the device threads

use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::{ClassEvent, ControlSetup, ControlStatus};

/// Commands from the Tokio runtime to the device control thread
#[derive(Debug)]
pub enum DeviceCommand {
    /// Lifecycle event reported by the USB device stack
    ClassEvent(ClassEvent),

    /// Class-specific control request addressed to a unit or terminal
    Control {
        /// Decoded setup stage
        setup: ControlSetup,
        /// Data stage: host data for SET requests, ignored for GET requests
        data: Vec<u8>,
        /// Channel to send the response back
        response: tokio::sync::oneshot::Sender<ControlReply>,
    },

    /// Shutdown the device threads gracefully
    Shutdown,
}

/// Answer to a [`DeviceCommand::Control`] request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    /// Whether a handler claimed the request
    pub status: ControlStatus,
    /// Data stage for GET requests, truncated to the reported length
    pub data: Vec<u8>,
}

/// Why the transfer pump gave up on the rest of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// Stream latch dropped while fragments were pending
    Cancelled,
    /// Endpoint rejected a submit
    SubmitFailed,
    /// A submitted fragment completed with an error
    TransferFailed,
    /// No completion arrived within the configured timeout
    CompletionTimeout,
    /// The frame could not be packetized into the packet buffer
    PacketizeFailed,
}

/// Events from the device threads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Stream latch changed in response to a class event
    LatchChanged {
        /// New latch state
        enabled: bool,
        /// Event that caused the change
        event: ClassEvent,
    },

    /// Every fragment of a frame completed successfully
    FrameCompleted {
        /// Pump-local frame sequence number
        frame: u64,
        /// Fragments submitted
        fragments: usize,
        /// Packetized bytes submitted
        bytes: usize,
    },

    /// The pump stopped submitting a frame part way through
    FrameAbandoned {
        /// Pump-local frame sequence number
        frame: u64,
        /// Fragments that completed before the frame was abandoned
        completed: usize,
        /// Fragments in the frame
        fragments: usize,
        /// Why the frame was abandoned
        reason: AbandonReason,
    },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct DeviceBridge {
    cmd_tx: Sender<DeviceCommand>,
    event_rx: Receiver<DeviceEvent>,
}

impl DeviceBridge {
    /// Send a command to the device control thread
    pub async fn send_command(&self, cmd: DeviceCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Deliver a class event
    pub async fn class_event(&self, event: ClassEvent) -> crate::Result<()> {
        self.send_command(DeviceCommand::ClassEvent(event)).await
    }

    /// Issue a control request and wait for its reply
    pub async fn control(&self, setup: ControlSetup, data: Vec<u8>) -> crate::Result<ControlReply> {
        let (response, rx) = tokio::sync::oneshot::channel();
        self.send_command(DeviceCommand::Control {
            setup,
            data,
            response,
        })
        .await?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the device threads
    pub async fn recv_event(&self) -> crate::Result<DeviceEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for the device control thread (blocking)
pub struct DeviceWorker {
    pub(crate) cmd_rx: Receiver<DeviceCommand>,
    pub(crate) event_tx: Sender<DeviceEvent>,
}

impl DeviceWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<DeviceCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Non-blocking sender for threads that must never wait on the runtime
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.event_tx.clone(),
        }
    }
}

/// Lossy, non-blocking event sender used by the transfer pump
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<DeviceEvent>,
}

impl EventSender {
    /// Send an event, dropping it when the channel is full or closed
    ///
    /// Returns true if the event was queued.
    pub fn send(&self, event: DeviceEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::trace!("Event channel full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Create the channel bridge between Tokio and the device threads
///
/// Returns (DeviceBridge for Tokio, DeviceWorker for the device side)
pub fn create_device_bridge() -> (DeviceBridge, DeviceWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        DeviceBridge { cmd_tx, event_rx },
        DeviceWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_device_bridge();

        // Spawn a thread to simulate the device control thread
        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            matches!(cmd, DeviceCommand::ClassEvent(ClassEvent::Configured))
        });

        bridge.class_event(ClassEvent::Configured).await.unwrap();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_event_sender_drops_when_full() {
        let (_bridge, worker) = create_device_bridge();
        let sender = worker.event_sender();
        let event = DeviceEvent::LatchChanged {
            enabled: true,
            event: ClassEvent::StreamOpened { interface: 1 },
        };

        for _ in 0..256 {
            assert!(sender.send(event.clone()));
        }
        assert!(!sender.send(event));
    }

    #[test]
    fn test_event_sender_closed() {
        let (bridge, worker) = create_device_bridge();
        let sender = worker.event_sender();
        drop(bridge);

        assert!(!sender.send(DeviceEvent::LatchChanged {
            enabled: false,
            event: ClassEvent::Reset,
        }));
    }
}
