//! Device configuration management

use crate::control::{ControlDispatcher, ExtensionControl};
use crate::stream::{PumpConfig, SimulatedEndpointConfig};
use anyhow::{Context, Result, anyhow};
use protocol::ControlKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest payload a high-speed isochronous endpoint can carry per microframe
/// (3 transactions of 1024 bytes)
const MAX_ISO_PAYLOAD: usize = 3 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device: DeviceSettings,
    pub stream: StreamSettings,
    /// Simulated endpoint settings, used when no hardware is attached
    #[serde(default)]
    pub endpoint: EndpointSettings,
    /// Extension unit controls exposed to the host
    #[serde(default = "DeviceConfig::default_controls")]
    pub controls: Vec<ExtensionControlConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub log_level: String,
    /// Drive the device from the built-in host simulator
    #[serde(default = "DeviceSettings::default_simulate")]
    pub simulate: bool,
}

impl DeviceSettings {
    fn default_simulate() -> bool {
        true
    }
}

/// Video stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// dwMaxPayloadTransferSize: bytes per isochronous transfer, header included
    #[serde(default = "StreamSettings::default_max_payload_size")]
    pub max_payload_size: usize,
    /// dwMaxVideoFrameSize: largest encoded frame the source may produce
    #[serde(default = "StreamSettings::default_max_frame_size")]
    pub max_frame_size: usize,
    /// Pump sleep between completion checks
    #[serde(default = "StreamSettings::default_poll_interval_us")]
    pub poll_interval_us: u64,
    /// Abandon a fragment that has not completed after this long (unset = wait forever)
    #[serde(default)]
    pub completion_timeout_ms: Option<u64>,
    /// Encoded image streamed repeatedly instead of synthetic frames
    #[serde(default)]
    pub frame_file: Option<PathBuf>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_payload_size: Self::default_max_payload_size(),
            max_frame_size: Self::default_max_frame_size(),
            poll_interval_us: Self::default_poll_interval_us(),
            completion_timeout_ms: None,
            frame_file: None,
        }
    }
}

impl StreamSettings {
    fn default_max_payload_size() -> usize {
        1020
    }

    fn default_max_frame_size() -> usize {
        640 * 480 * 2 // VGA YUY2
    }

    fn default_poll_interval_us() -> u64 {
        100
    }
}

/// Simulated isochronous endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Endpoint address (IN, so bit 7 set)
    #[serde(default = "EndpointSettings::default_address")]
    pub address: u8,
    /// Time the simulated host takes per transfer
    #[serde(default = "EndpointSettings::default_service_interval_us")]
    pub service_interval_us: u64,
    /// Probability in [0, 1] of a failed completion
    #[serde(default)]
    pub fault_rate: f64,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            service_interval_us: Self::default_service_interval_us(),
            fault_rate: 0.0,
        }
    }
}

impl EndpointSettings {
    fn default_address() -> u8 {
        0x81
    }

    fn default_service_interval_us() -> u64 {
        125 // one high-speed microframe
    }
}

/// One extension unit control
///
/// # Example Configuration
/// ```toml
/// [[controls]]
/// entity_id = 7
/// selector = 1
/// width = 60
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionControlConfig {
    /// bUnitID of the extension unit
    pub entity_id: u8,
    /// Control selector within the unit
    pub selector: u8,
    /// Value width in bytes, reported through GET_LEN
    pub width: usize,
}

impl ExtensionControlConfig {
    pub fn key(&self) -> ControlKey {
        ControlKey::new(self.entity_id, self.selector)
    }
}

impl Default for ExtensionControlConfig {
    fn default() -> Self {
        Self {
            entity_id: 7,
            selector: 1,
            width: 60,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: DeviceSettings {
                log_level: "info".to_string(),
                simulate: DeviceSettings::default_simulate(),
            },
            stream: StreamSettings::default(),
            endpoint: EndpointSettings::default(),
            controls: Self::default_controls(),
        }
    }
}

impl DeviceConfig {
    fn default_controls() -> Vec<ExtensionControlConfig> {
        vec![ExtensionControlConfig::default()]
    }

    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/uvc-xu-device/device.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DeviceConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("uvc-xu-device").join("device.toml")
        } else {
            PathBuf::from(".config/uvc-xu-device/device.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.device.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.device.log_level,
                valid_levels.join(", ")
            ));
        }

        let payload = self.stream.max_payload_size;
        if !(protocol::PAYLOAD_HEADER_SIZE + 1..=MAX_ISO_PAYLOAD).contains(&payload) {
            return Err(anyhow!(
                "Invalid max_payload_size {}, must be between {} and {}",
                payload,
                protocol::PAYLOAD_HEADER_SIZE + 1,
                MAX_ISO_PAYLOAD
            ));
        }

        if self.stream.max_frame_size == 0 {
            return Err(anyhow!("max_frame_size must be greater than 0"));
        }

        if self.stream.poll_interval_us == 0 {
            return Err(anyhow!("poll_interval_us must be greater than 0"));
        }

        if self.stream.completion_timeout_ms == Some(0) {
            return Err(anyhow!(
                "completion_timeout_ms must be greater than 0 (omit it to disable)"
            ));
        }

        if !(0.0..=1.0).contains(&self.endpoint.fault_rate) {
            return Err(anyhow!(
                "Invalid fault_rate {}, must be between 0 and 1",
                self.endpoint.fault_rate
            ));
        }

        if self.endpoint.address & 0x80 == 0 {
            return Err(anyhow!(
                "Invalid endpoint address {:#04x}, video data needs an IN endpoint",
                self.endpoint.address
            ));
        }

        let mut keys = HashSet::new();
        for control in &self.controls {
            Self::validate_control(control)?;
            if !keys.insert(control.key()) {
                return Err(anyhow!("Duplicate extension unit control: {}", control.key()));
            }
        }

        Ok(())
    }

    fn validate_control(control: &ExtensionControlConfig) -> Result<()> {
        if control.width == 0 || control.width > u16::MAX as usize {
            return Err(anyhow!(
                "Invalid width {} for {}, must be between 1 and {}",
                control.width,
                control.key(),
                u16::MAX
            ));
        }
        Ok(())
    }

    /// Pump timing derived from the stream settings
    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            poll_interval: Duration::from_micros(self.stream.poll_interval_us),
            completion_timeout: self.stream.completion_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Packet buffer size covering the worst-case packetized frame
    pub fn packet_buffer_capacity(&self) -> Result<usize> {
        protocol::packet_buffer_capacity(self.stream.max_frame_size, self.stream.max_payload_size)
            .context("Invalid stream geometry")
    }

    /// Simulated endpoint settings
    pub fn endpoint_config(&self) -> SimulatedEndpointConfig {
        SimulatedEndpointConfig {
            address: self.endpoint.address,
            max_packet_size: self.stream.max_payload_size,
            service_interval: Duration::from_micros(self.endpoint.service_interval_us),
            fault_rate: self.endpoint.fault_rate,
        }
    }

    /// Build the control dispatcher holding every configured control
    pub fn build_dispatcher(&self) -> Result<ControlDispatcher> {
        let mut dispatcher = ControlDispatcher::new();
        for control in &self.controls {
            let xu = ExtensionControl::new(control.key(), control.width)
                .with_context(|| format!("Invalid control {}", control.key()))?;
            dispatcher.register(xu);
        }
        Ok(dispatcher)
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<DeviceConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    DeviceConfig::load(Some(path_buf))
}
