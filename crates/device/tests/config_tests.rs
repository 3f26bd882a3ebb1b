//! Configuration file tests

use device::config::{DeviceConfig, ExtensionControlConfig, load_config};
use protocol::ControlKey;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("device.toml");

    let mut config = DeviceConfig::default();
    config.device.log_level = "debug".to_string();
    config.stream.max_payload_size = 3072;
    config.stream.completion_timeout_ms = Some(40);
    config.stream.frame_file = Some(PathBuf::from("/tmp/frame.jpg"));
    config.endpoint.fault_rate = 0.1;
    config.controls.push(ExtensionControlConfig {
        entity_id: 7,
        selector: 2,
        width: 4,
    });
    config.save(&path).unwrap();

    let loaded = DeviceConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.device.log_level, "debug");
    assert_eq!(loaded.stream.max_payload_size, 3072);
    assert_eq!(loaded.stream.completion_timeout_ms, Some(40));
    assert_eq!(loaded.stream.frame_file, Some(PathBuf::from("/tmp/frame.jpg")));
    assert_eq!(loaded.endpoint.fault_rate, 0.1);
    assert_eq!(loaded.controls, config.controls);

    let dispatcher = loaded.build_dispatcher().unwrap();
    assert!(dispatcher.owns(ControlKey::new(7, 1)));
    assert!(dispatcher.owns(ControlKey::new(7, 2)));
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("device.toml");
    std::fs::write(
        &path,
        r#"
[device]
log_level = "info"

[stream]
max_payload_size = 1020

[[controls]]
entity_id = 7
selector = 1
width = 60

[[controls]]
entity_id = 7
selector = 1
width = 8
"#,
    )
    .unwrap();

    let err = DeviceConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("Duplicate"));
}

#[test]
fn test_load_reports_parse_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("device.toml");
    std::fs::write(&path, "[device\nlog_level = ").unwrap();

    let err = DeviceConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    assert!(DeviceConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_load_config_accepts_plain_paths() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("device.toml");
    DeviceConfig::default().save(&path).unwrap();

    let loaded = load_config(path.to_str().unwrap()).unwrap();
    assert_eq!(loaded.stream.max_payload_size, 1020);
}
