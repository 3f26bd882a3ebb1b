//! Common utilities for uvc-xu-device
//!
//! This crate provides functionality shared by the device runtime and its
//! tests: error handling, logging setup, and the channel bridge between the
//! async host-facing side and the blocking device threads.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    AbandonReason, ControlReply, DeviceBridge, DeviceCommand, DeviceEvent, DeviceWorker,
    EventSender, create_device_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
