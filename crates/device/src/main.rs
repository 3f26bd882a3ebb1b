//! uvc-xu-device
//!
//! UVC camera device runtime. Streams video frames over an isochronous
//! endpoint and serves extension unit controls. Without attached hardware it
//! runs against a simulated endpoint and an in-process host.

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::{DeviceBridge, DeviceCommand, create_device_bridge, setup_logging};
use device::config::{DeviceConfig, load_config};
use device::simulator::HostSimulator;
use device::spawn_device_control;
use device::stream::{
    CompletionSignal, FrameSource, SimulatedEndpoint, StaticFrameSource, StreamSession,
    SyntheticFrameSource, TransferPump, spawn_transfer_pump,
};
use protocol::UvcPayloadPacketizer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "uvc-xu-device")]
#[command(
    author,
    version,
    about = "UVC device runtime - isochronous video streaming and extension unit controls"
)]
#[command(long_about = "
Device side of a USB Video Class camera. Fragments encoded frames into UVC
payloads, pumps them through an isochronous IN endpoint one transfer at a
time, and answers extension unit control requests.

EXAMPLES:
    # Run a simulated host session with default config
    uvc-xu-device --simulate

    # Stream a JPEG for 10 seconds
    uvc-xu-device --simulate --frame-file ~/test.jpg --duration 10

    # Wait for class events until Ctrl+C
    uvc-xu-device --config /path/to/device.toml

CONFIGURATION:
    The device looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/uvc-xu-device/device.toml
    3. /etc/uvc-xu-device/device.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Drive the device from the built-in host simulator
    #[arg(long)]
    simulate: bool,

    /// Streaming time for the simulated host
    #[arg(short, long, value_name = "SECS", default_value_t = 5)]
    duration: u64,

    /// Stop the simulated session after this many frames
    #[arg(long, value_name = "COUNT")]
    frames: Option<u64>,

    /// Encoded image to stream instead of synthetic frames
    #[arg(long, value_name = "PATH")]
    frame_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DeviceConfig::default();
        let path = DeviceConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        load_config(path).context("Failed to load configuration")?
    } else {
        DeviceConfig::load_or_default()
    };
    if args.frame_file.is_some() {
        config.stream.frame_file = args.frame_file.clone();
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.device.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("uvc-xu-device v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let session = Arc::new(StreamSession::new());
    let (bridge, worker) = create_device_bridge();
    let events = worker.event_sender();

    let dispatcher = config.build_dispatcher()?;
    let control_handle = spawn_device_control(session.clone(), dispatcher, worker)
        .context("Failed to spawn device control thread")?;

    let endpoint = SimulatedEndpoint::spawn(
        config.endpoint_config(),
        CompletionSignal::new(session.clone()),
    )
    .context("Failed to start simulated endpoint")?;
    let endpoint_stats = endpoint.stats();

    let packetizer = UvcPayloadPacketizer::new(config.stream.max_payload_size)
        .context("Invalid max_payload_size")?;
    let pump = TransferPump::new(
        session.clone(),
        build_source(&config)?,
        packetizer,
        endpoint,
        config.packet_buffer_capacity()?,
        config.pump_config(),
    )
    .with_events(events);
    let pump_handle = spawn_transfer_pump(pump).context("Failed to spawn transfer pump")?;

    let result = if args.simulate || config.device.simulate {
        run_simulation(&config, bridge.clone(), &args).await
    } else {
        run_service(bridge.clone()).await
    };

    info!("Shutting down device threads...");
    if let Err(e) = bridge.send_command(DeviceCommand::Shutdown).await {
        error!("Error shutting down device control thread: {:#}", e);
        // Stop the pump directly so its join below cannot hang
        session.shutdown();
    }
    if let Err(e) = control_handle.join() {
        error!("Device control thread panicked: {:?}", e);
    }
    match pump_handle.join() {
        Ok(stats) => info!("Pump statistics: {:?}", stats),
        Err(e) => error!("Transfer pump panicked: {:?}", e),
    }
    info!(
        "Endpoint statistics: {} submitted, {} completed, {} failed, {} cancelled, {} bytes",
        endpoint_stats.submitted(),
        endpoint_stats.completed(),
        endpoint_stats.failed(),
        endpoint_stats.cancelled(),
        endpoint_stats.bytes()
    );
    if session.spurious_completions() > 0 {
        warn!(
            "{} completions arrived with no transfer outstanding",
            session.spurious_completions()
        );
    }

    result
}

/// Pick the frame source from the configuration
fn build_source(config: &DeviceConfig) -> Result<Box<dyn FrameSource + Send>> {
    let max_frame = config.stream.max_frame_size;

    if let Some(path) = &config.stream.frame_file {
        let path = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
        let source = StaticFrameSource::from_file(&path)
            .with_context(|| format!("Failed to read frame file: {}", path.display()))?;
        if source.frame_len() > max_frame {
            bail!(
                "Frame file is {} bytes, larger than max_frame_size {}",
                source.frame_len(),
                max_frame
            );
        }
        return Ok(Box::new(source));
    }

    if max_frame < SyntheticFrameSource::MIN_FRAME_SIZE {
        bail!(
            "max_frame_size {} is too small for synthetic frames (minimum {})",
            max_frame,
            SyntheticFrameSource::MIN_FRAME_SIZE
        );
    }
    info!("Streaming synthetic {} byte frames", max_frame);
    Ok(Box::new(SyntheticFrameSource::new(max_frame)))
}

/// Run one simulated host session, or until Ctrl+C
async fn run_simulation(config: &DeviceConfig, bridge: DeviceBridge, args: &Args) -> Result<()> {
    let Some(control) = config.controls.first() else {
        bail!("Simulation needs at least one extension unit control");
    };

    let simulator = HostSimulator::new(bridge, control.key());
    let duration = Duration::from_secs(args.duration);

    tokio::select! {
        report = simulator.run(duration, args.frames) => {
            let report = report.context("Host simulation failed")?;
            info!("Simulation report: {:?}", report);
            if report.control.as_ref().is_some_and(|c| !c.readback_ok) {
                bail!("Extension unit readback mismatch");
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping simulation");
        }
    }

    Ok(())
}

/// Wait for class events from the device stack until Ctrl+C
async fn run_service(bridge: DeviceBridge) -> Result<()> {
    info!("Waiting for the host; press Ctrl+C to shutdown");

    loop {
        tokio::select! {
            event = bridge.recv_event() => match event {
                Ok(event) => debug!("Device event: {:?}", event),
                Err(e) => {
                    warn!("Device event channel closed: {}", e);
                    break;
                }
            },
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                break;
            }
        }
    }

    Ok(())
}
