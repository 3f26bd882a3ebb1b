//! Device control thread
//!
//! Dedicated thread that owns the extension unit controls and applies class
//! events to the stream latch. It communicates with the Tokio runtime via
//! async channels, the same way the USB stack would hand it setup packets
//! and lifecycle notifications.

use crate::control::ControlDispatcher;
use crate::stream::StreamSession;
use common::{ControlReply, DeviceCommand, DeviceEvent, DeviceWorker};
use protocol::{ControlSetup, GET_LEN_RESPONSE_SIZE};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Device control thread
///
/// Processes commands until a Shutdown command is received or the bridge is
/// dropped. Shutdown also stops the transfer pump through the session.
pub struct DeviceControlThread {
    session: Arc<StreamSession>,
    dispatcher: ControlDispatcher,
    worker: DeviceWorker,
}

impl DeviceControlThread {
    pub fn new(
        session: Arc<StreamSession>,
        dispatcher: ControlDispatcher,
        worker: DeviceWorker,
    ) -> Self {
        Self {
            session,
            dispatcher,
            worker,
        }
    }

    /// Run the command loop, returning the dispatcher with its final values
    pub fn run(mut self) -> ControlDispatcher {
        info!(
            "Device control thread started ({} extension unit controls)",
            self.dispatcher.len()
        );

        loop {
            match self.worker.recv_command() {
                Ok(DeviceCommand::Shutdown) => {
                    info!("Device control thread shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Command channel closed: {}", e);
                    break;
                }
            }
        }

        self.session.shutdown();
        info!("Device control thread stopped");
        self.dispatcher
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: DeviceCommand) {
        // A panicking handler must not take the control endpoint down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in device command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: DeviceCommand) {
        match cmd {
            DeviceCommand::ClassEvent(event) => {
                if let Some(enabled) = self.session.apply(event) {
                    // Pump and host may be gone; the event is informational
                    let _ = self
                        .worker
                        .event_sender()
                        .send(DeviceEvent::LatchChanged { enabled, event });
                }
            }

            DeviceCommand::Control {
                setup,
                data,
                response,
            } => {
                let reply = self.handle_control(&setup, &data);
                let _ = response.send(reply);
            }

            DeviceCommand::Shutdown => {
                // Already handled in run loop
            }
        }
    }

    /// Run one control request through the dispatcher
    ///
    /// The data-stage buffer is sized like the gadget driver's: large enough
    /// for the host's wLength, the widest control and a GET_LEN reply.
    fn handle_control(&mut self, setup: &ControlSetup, host_data: &[u8]) -> ControlReply {
        let capacity = (setup.length as usize)
            .max(self.dispatcher.max_width())
            .max(GET_LEN_RESPONSE_SIZE)
            .max(host_data.len());
        let mut data = vec![0u8; capacity];
        data[..host_data.len()].copy_from_slice(host_data);
        let mut len = host_data.len();

        let status = self.dispatcher.handle(setup, &mut data, &mut len);
        data.truncate(len);

        ControlReply { status, data }
    }
}

/// Spawn the device control thread
///
/// The thread runs until a Shutdown command is received and returns the
/// dispatcher so callers can inspect the final control values.
pub fn spawn_device_control(
    session: Arc<StreamSession>,
    dispatcher: ControlDispatcher,
    worker: DeviceWorker,
) -> std::io::Result<std::thread::JoinHandle<ControlDispatcher>> {
    std::thread::Builder::new()
        .name("device-control".to_string())
        .spawn(move || DeviceControlThread::new(session, dispatcher, worker).run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ExtensionControl;
    use common::create_device_bridge;
    use common::test_utils::create_xu_setup;
    use protocol::{ClassEvent, ControlKey, ControlStatus, RequestCode};

    fn spawn() -> (
        common::DeviceBridge,
        Arc<StreamSession>,
        std::thread::JoinHandle<ControlDispatcher>,
    ) {
        let (bridge, worker) = create_device_bridge();
        let session = Arc::new(StreamSession::new());
        let dispatcher = ControlDispatcher::with_controls([
            ExtensionControl::new(ControlKey::new(7, 1), 60).unwrap(),
        ]);
        let handle = spawn_device_control(session.clone(), dispatcher, worker).unwrap();
        (bridge, session, handle)
    }

    #[tokio::test]
    async fn test_class_events_drive_latch() {
        let (bridge, session, handle) = spawn();

        bridge
            .class_event(ClassEvent::StreamOpened { interface: 1 })
            .await
            .unwrap();
        let event = bridge.recv_event().await.unwrap();
        assert_eq!(
            event,
            DeviceEvent::LatchChanged {
                enabled: true,
                event: ClassEvent::StreamOpened { interface: 1 },
            }
        );
        assert!(session.is_enabled());

        bridge.class_event(ClassEvent::Reset).await.unwrap();
        let event = bridge.recv_event().await.unwrap();
        assert!(matches!(
            event,
            DeviceEvent::LatchChanged { enabled: false, .. }
        ));
        assert!(!session.is_enabled());

        bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
        handle.join().unwrap();
        assert!(session.is_shutdown());
    }

    #[tokio::test]
    async fn test_control_round_trip() {
        let (bridge, _session, handle) = spawn();

        let reply = bridge
            .control(create_xu_setup(RequestCode::SetCur, 7, 1, 4), vec![1, 2, 3, 4])
            .await
            .unwrap();
        assert_eq!(reply.status, ControlStatus::Handled);

        let reply = bridge
            .control(create_xu_setup(RequestCode::GetCur, 7, 1, 60), Vec::new())
            .await
            .unwrap();
        assert_eq!(reply.data.len(), 60);
        assert_eq!(&reply.data[..4], &[1, 2, 3, 4]);

        let reply = bridge
            .control(create_xu_setup(RequestCode::GetCur, 9, 1, 60), Vec::new())
            .await
            .unwrap();
        assert_eq!(reply.status, ControlStatus::NotHandled);
        assert!(reply.data.is_empty());

        bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
        let dispatcher = handle.join().unwrap();
        assert_eq!(
            &dispatcher.control(ControlKey::new(7, 1)).unwrap().current()[..4],
            &[1, 2, 3, 4]
        );
    }

    #[test]
    fn test_dropped_bridge_stops_thread() {
        let (bridge, session, handle) = spawn();
        drop(bridge);
        handle.join().unwrap();
        assert!(session.is_shutdown());
    }
}
