//! uvc-xu-device
//!
//! Device side of a UVC camera: streams encoded frames over an isochronous
//! IN endpoint and answers extension unit control requests.
//!
//! The runtime is split across dedicated threads, bridged to the Tokio
//! runtime with async channels:
//!
//! - `uvc-pump` runs the [`stream::TransferPump`], one fragment in flight
//! - `device-control` runs the [`worker::DeviceControlThread`], applying
//!   class events to the stream latch and answering control requests
//! - the endpoint's completion context reports transfer results through a
//!   [`stream::CompletionSignal`]
//!
//! Without hardware, [`stream::SimulatedEndpoint`] stands in for the device
//! controller and [`simulator::HostSimulator`] for the host.

pub mod config;
pub mod control;
pub mod simulator;
pub mod stream;
pub mod worker;

pub use config::DeviceConfig;
pub use control::{ControlDispatcher, ExtensionControl};
pub use simulator::{ControlReport, HostSimulator, SimulationReport};
pub use worker::{DeviceControlThread, spawn_device_control};
