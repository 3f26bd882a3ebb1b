//! End-to-end tests: control thread, transfer pump and simulated endpoint
//! driven through the command bridge

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_xu_setup, wait_for_event, with_timeout};
use common::{DeviceBridge, DeviceCommand, DeviceEvent, create_device_bridge};
use device::ControlDispatcher;
use device::config::DeviceConfig;
use device::simulator::HostSimulator;
use device::spawn_device_control;
use device::stream::{
    CompletionSignal, PumpStats, SimulatedEndpoint, StreamSession, SyntheticFrameSource,
    TransferPump, spawn_transfer_pump,
};
use protocol::{ClassEvent, ControlKey, ControlStatus, RequestCode, UvcPayloadPacketizer};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

struct Harness {
    bridge: DeviceBridge,
    session: Arc<StreamSession>,
    control: JoinHandle<ControlDispatcher>,
    pump: JoinHandle<PumpStats>,
}

impl Harness {
    fn start(config: &DeviceConfig) -> Self {
        let session = Arc::new(StreamSession::new());
        let (bridge, worker) = create_device_bridge();
        let events = worker.event_sender();

        let control = spawn_device_control(
            session.clone(),
            config.build_dispatcher().unwrap(),
            worker,
        )
        .unwrap();

        let endpoint = SimulatedEndpoint::spawn(
            config.endpoint_config(),
            CompletionSignal::new(session.clone()),
        )
        .unwrap();
        let pump = TransferPump::new(
            session.clone(),
            SyntheticFrameSource::new(config.stream.max_frame_size),
            UvcPayloadPacketizer::new(config.stream.max_payload_size).unwrap(),
            endpoint,
            config.packet_buffer_capacity().unwrap(),
            config.pump_config(),
        )
        .with_events(events);
        let pump = spawn_transfer_pump(pump).unwrap();

        Self {
            bridge,
            session,
            control,
            pump,
        }
    }

    async fn stop(self) -> (ControlDispatcher, PumpStats) {
        self.bridge.send_command(DeviceCommand::Shutdown).await.unwrap();
        let dispatcher = self.control.join().unwrap();
        let stats = self.pump.join().unwrap();
        assert!(self.session.is_shutdown());
        (dispatcher, stats)
    }
}

fn small_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.stream.max_frame_size = 8 * 1024;
    config.stream.max_payload_size = 1024;
    config.endpoint.service_interval_us = 50;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_host_session() {
    let harness = Harness::start(&small_config());
    let simulator = HostSimulator::new(harness.bridge.clone(), ControlKey::new(7, 1));

    let report = with_timeout(
        DEFAULT_TEST_TIMEOUT,
        simulator.run(Duration::from_secs(4), Some(5)),
    )
    .await
    .unwrap()
    .unwrap();

    let control = report.control.clone().unwrap();
    assert_eq!(control.width, 60);
    assert_eq!(control.info, 0x03);
    assert!(control.readback_ok);

    assert_eq!(report.frames_completed, 5);
    assert_eq!(report.transfer_errors, 0);
    // 8192 bytes at 1022 per fragment
    assert_eq!(report.fragments, 5 * 9);

    let (dispatcher, stats) = harness.stop().await;
    assert!(stats.frames_completed >= 5);
    assert_eq!(stats.submit_failures, 0);

    let value = dispatcher.control(ControlKey::new(7, 1)).unwrap().current();
    assert_eq!(value[0], 1);
    assert_eq!(value[59], 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_close_stops_frames() {
    let harness = Harness::start(&small_config());
    let bridge = harness.bridge.clone();

    bridge
        .class_event(ClassEvent::StreamOpened { interface: 1 })
        .await
        .unwrap();
    wait_for_event(&bridge, DEFAULT_TEST_TIMEOUT, |e| {
        matches!(e, DeviceEvent::FrameCompleted { .. })
    })
    .await
    .unwrap();

    bridge.class_event(ClassEvent::Disconnected).await.unwrap();
    wait_for_event(&bridge, DEFAULT_TEST_TIMEOUT, |e| {
        matches!(e, DeviceEvent::LatchChanged { enabled: false, .. })
    })
    .await
    .unwrap();
    assert!(!harness.session.is_enabled());

    // Drain whatever the pump reported around the disconnect, then expect silence
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(Ok(_)) =
        tokio::time::timeout(Duration::from_millis(10), bridge.recv_event()).await
    {}
    let quiet = tokio::time::timeout(Duration::from_millis(200), bridge.recv_event()).await;
    assert!(quiet.is_err(), "pump kept streaming after disconnect");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fault_injection_abandons_frames() {
    let mut config = small_config();
    config.endpoint.fault_rate = 0.2;
    let harness = Harness::start(&config);
    let simulator =
        HostSimulator::new(harness.bridge.clone(), ControlKey::new(7, 1)).with_interface(2);

    let report = simulator.run(Duration::from_millis(500), None).await.unwrap();
    assert!(report.transfer_errors > 0);

    let (_, stats) = harness.stop().await;
    assert!(stats.transfer_failures > 0);
    assert!(stats.frames_abandoned >= stats.transfer_failures);
}

#[tokio::test]
async fn test_unknown_control_through_bridge() {
    let harness = Harness::start(&small_config());

    let reply = harness
        .bridge
        .control(create_xu_setup(RequestCode::GetCur, 3, 3, 60), Vec::new())
        .await
        .unwrap();
    assert_eq!(reply.status, ControlStatus::NotHandled);

    harness.stop().await;
}
