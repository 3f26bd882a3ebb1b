//! Host simulator
//!
//! Plays the host side of an enumeration and streaming session against the
//! device threads: configures the device, queries and writes an extension
//! unit control, opens the video stream, watches frames go by and closes
//! the stream again.

use anyhow::{Context, Result, anyhow, bail};
use common::{AbandonReason, ControlReply, DeviceBridge, DeviceEvent};
use protocol::{ClassEvent, ControlKey, ControlSetup, ControlStatus, RequestCode};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What the host learned about the extension unit control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReport {
    /// Width reported by GET_LEN
    pub width: usize,
    /// GET_INFO capability byte
    pub info: u8,
    /// GET_CUR returned exactly what SET_CUR wrote
    pub readback_ok: bool,
}

/// Outcome of a simulated session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub control: Option<ControlReport>,
    pub frames_completed: u64,
    pub frames_abandoned: u64,
    pub fragments: u64,
    pub bytes: u64,
    /// Abandons caused by endpoint errors rather than stream close
    pub transfer_errors: u64,
}

/// Drives the device through the command bridge as a host would
pub struct HostSimulator {
    bridge: DeviceBridge,
    control: ControlKey,
    interface: u8,
}

impl HostSimulator {
    pub fn new(bridge: DeviceBridge, control: ControlKey) -> Self {
        Self {
            bridge,
            control,
            interface: 1,
        }
    }

    /// Streaming interface number used in open/close events
    pub fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }

    /// Run a full session
    ///
    /// Streams until `frame_limit` frames completed or `duration` elapsed,
    /// whichever comes first.
    pub async fn run(
        &self,
        duration: Duration,
        frame_limit: Option<u64>,
    ) -> Result<SimulationReport> {
        info!("Host simulator: configuring device");
        self.bridge
            .class_event(ClassEvent::Configured)
            .await
            .context("Failed to deliver SET_CONFIGURATION")?;

        let mut report = SimulationReport {
            control: Some(self.exercise_control().await?),
            ..Default::default()
        };

        info!("Host simulator: opening stream on interface {}", self.interface);
        self.bridge
            .class_event(ClassEvent::StreamOpened {
                interface: self.interface,
            })
            .await
            .context("Failed to open stream")?;

        self.watch_stream(duration, frame_limit, &mut report).await;

        info!("Host simulator: closing stream");
        self.bridge
            .class_event(ClassEvent::StreamClosed {
                interface: self.interface,
            })
            .await
            .context("Failed to close stream")?;

        info!(
            "Host simulator: {} frames completed, {} abandoned, {} bytes",
            report.frames_completed, report.frames_abandoned, report.bytes
        );
        Ok(report)
    }

    /// Probe the control, write a pattern and read it back
    pub async fn exercise_control(&self) -> Result<ControlReport> {
        let reply = self.request(RequestCode::GetLen, 2, Vec::new()).await?;
        let width = match reply.data.as_slice() {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]) as usize,
            other => bail!("GET_LEN returned {} bytes, expected 2", other.len()),
        };

        let reply = self.request(RequestCode::GetInfo, 1, Vec::new()).await?;
        let info = *reply
            .data
            .first()
            .ok_or_else(|| anyhow!("GET_INFO returned no data"))?;

        let length = u16::try_from(width).context("Control width out of range")?;
        let pattern: Vec<u8> = (0..width).map(|i| (i as u8).wrapping_add(1)).collect();
        self.request(RequestCode::SetCur, length, pattern.clone()).await?;

        let current = self.request(RequestCode::GetCur, length, Vec::new()).await?;
        let readback_ok = current.data == pattern;
        if !readback_ok {
            warn!("GET_CUR on {} did not return the SET_CUR value", self.control);
        }

        for request in [RequestCode::GetMin, RequestCode::GetMax, RequestCode::GetDef] {
            let reply = self.request(request, length, Vec::new()).await?;
            debug!("{} on {}: {} bytes", request.name(), self.control, reply.data.len());
        }

        info!(
            "Host simulator: control {} width {} info {:#04x} readback {}",
            self.control,
            width,
            info,
            if readback_ok { "ok" } else { "mismatch" }
        );
        Ok(ControlReport {
            width,
            info,
            readback_ok,
        })
    }

    async fn request(
        &self,
        request: RequestCode,
        length: u16,
        data: Vec<u8>,
    ) -> Result<ControlReply> {
        let setup = ControlSetup::new(self.control, request.as_raw(), length);
        let reply = self
            .bridge
            .control(setup, data)
            .await
            .with_context(|| format!("{} on {} failed", request.name(), self.control))?;

        if reply.status != ControlStatus::Handled {
            bail!("{} on {} was not handled", request.name(), self.control);
        }
        Ok(reply)
    }

    async fn watch_stream(
        &self,
        duration: Duration,
        frame_limit: Option<u64>,
        report: &mut SimulationReport,
    ) {
        let deadline = Instant::now() + duration;

        while frame_limit.is_none_or(|limit| report.frames_completed < limit) {
            let event = match tokio::time::timeout_at(deadline, self.bridge.recv_event()).await {
                Ok(Ok(event)) => event,
                Ok(Err(e)) => {
                    warn!("Event channel closed: {}", e);
                    break;
                }
                Err(_) => break,
            };

            match event {
                DeviceEvent::FrameCompleted {
                    fragments, bytes, ..
                } => {
                    report.frames_completed += 1;
                    report.fragments += fragments as u64;
                    report.bytes += bytes as u64;
                }
                DeviceEvent::FrameAbandoned { reason, .. } => {
                    report.frames_abandoned += 1;
                    if reason != AbandonReason::Cancelled {
                        report.transfer_errors += 1;
                    }
                }
                DeviceEvent::LatchChanged { enabled, event } => {
                    debug!("Latch {} after {:?}", enabled, event);
                }
            }
        }
    }
}
