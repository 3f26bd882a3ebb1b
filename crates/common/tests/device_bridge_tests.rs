//! Device Bridge Integration Tests
//!
//! Tests for the async channel bridge between Tokio runtime and the device
//! control thread.
//!
//! # Test Scenarios
//! - Class event delivery and ordering
//! - Control request/reply round trip through a worker thread
//! - Event flow from the device side
//! - Worker shutdown
//!
//! Run with: `cargo test -p common --test device_bridge_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_xu_setup, wait_for_event, with_timeout};
use common::{ControlReply, DeviceCommand, DeviceEvent, create_device_bridge};
use protocol::{ClassEvent, ControlStatus, RequestCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

// ============================================================================
// Class Event Tests
// ============================================================================

#[tokio::test]
async fn test_class_events_arrive_in_order() {
    let (bridge, worker) = create_device_bridge();

    let handle = thread::spawn(move || {
        let mut events = Vec::new();
        while let Ok(cmd) = worker.recv_command() {
            match cmd {
                DeviceCommand::ClassEvent(event) => events.push(event),
                DeviceCommand::Shutdown => break,
                DeviceCommand::Control { .. } => {}
            }
        }
        events
    });

    let sequence = [
        ClassEvent::Configured,
        ClassEvent::StreamOpened { interface: 1 },
        ClassEvent::StreamClosed { interface: 1 },
        ClassEvent::Disconnected,
    ];
    for event in sequence {
        bridge.class_event(event).await.expect("Failed to send event");
    }
    bridge
        .send_command(DeviceCommand::Shutdown)
        .await
        .expect("Failed to send shutdown");

    let received = handle.join().expect("Worker thread panicked");
    assert_eq!(received, sequence.to_vec());
}

// ============================================================================
// Control Request Tests
// ============================================================================

#[tokio::test]
async fn test_control_round_trip() {
    let (bridge, worker) = create_device_bridge();

    let handle = thread::spawn(move || {
        if let Ok(DeviceCommand::Control {
            setup, response, ..
        }) = worker.recv_command()
        {
            let reply = if setup.key.entity_id == 7 {
                ControlReply {
                    status: ControlStatus::Handled,
                    data: vec![60, 0],
                }
            } else {
                ControlReply {
                    status: ControlStatus::NotHandled,
                    data: Vec::new(),
                }
            };
            let _ = response.send(reply);
        }
    });

    let reply = with_timeout(
        DEFAULT_TEST_TIMEOUT,
        bridge.control(create_xu_setup(RequestCode::GetLen, 7, 1, 2), Vec::new()),
    )
    .await
    .expect("Timed out")
    .expect("Control request failed");

    assert_eq!(reply.status, ControlStatus::Handled);
    assert_eq!(reply.data, vec![60, 0]);

    handle.join().expect("Worker thread panicked");
}

#[tokio::test]
async fn test_control_fails_when_worker_drops_response() {
    let (bridge, worker) = create_device_bridge();

    let handle = thread::spawn(move || {
        // Receive and drop without answering
        let _ = worker.recv_command();
    });

    let result = bridge
        .control(create_xu_setup(RequestCode::GetCur, 7, 1, 60), Vec::new())
        .await;
    assert!(result.is_err());

    handle.join().expect("Worker thread panicked");
}

#[tokio::test]
async fn test_send_fails_after_worker_dropped() {
    let (bridge, worker) = create_device_bridge();
    drop(worker);

    assert!(bridge.class_event(ClassEvent::Reset).await.is_err());
}

// ============================================================================
// Event Flow Tests
// ============================================================================

#[tokio::test]
async fn test_events_from_device_side() {
    let (bridge, worker) = create_device_bridge();
    let control_events = worker.event_sender();
    let pump_events = worker.event_sender();
    drop(worker);

    let handle = thread::spawn(move || {
        assert!(control_events.send(DeviceEvent::LatchChanged {
            enabled: true,
            event: ClassEvent::StreamOpened { interface: 1 },
        }));
        pump_events.send(DeviceEvent::FrameCompleted {
            frame: 0,
            fragments: 3,
            bytes: 3000,
        });
    });

    let event = wait_for_event(&bridge, DEFAULT_TEST_TIMEOUT, |e| {
        matches!(e, DeviceEvent::FrameCompleted { .. })
    })
    .await
    .expect("No frame event");

    assert_eq!(
        event,
        DeviceEvent::FrameCompleted {
            frame: 0,
            fragments: 3,
            bytes: 3000
        }
    );
    handle.join().expect("Worker thread panicked");
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_worker_stops_when_bridge_dropped() {
    let (bridge, worker) = create_device_bridge();
    let stopped = Arc::new(AtomicBool::new(false));
    let stopped_clone = stopped.clone();

    let handle = thread::spawn(move || {
        let mut handled = 0;
        while worker.recv_command().is_ok() {
            handled += 1;
        }
        stopped_clone.store(true, Ordering::SeqCst);
        handled
    });

    bridge
        .class_event(ClassEvent::Reset)
        .await
        .expect("Failed to send event");
    drop(bridge);

    let handled = handle.join().expect("Worker thread panicked");
    assert_eq!(handled, 1);
    assert!(stopped.load(Ordering::SeqCst));
}
