//! Video streaming subsystem
//!
//! Moves encoded frames to the host over a single isochronous IN endpoint.
//!
//! This module implements:
//! - The stream session (enable latch and busy flag shared across contexts)
//! - The completion signal handed to the endpoint's completion context
//! - The transfer pump that fragments frames and submits them one at a time
//! - Frame sources and a simulated endpoint for running without hardware
//!
//! The pump runs in a dedicated thread; completions arrive from whatever
//! context the endpoint reports them in, and class events from the device
//! control thread.

pub mod completion;
pub mod endpoint;
pub mod pump;
pub mod session;
pub mod source;

pub use completion::CompletionSignal;
pub use endpoint::{
    Endpoint, EndpointError, EndpointStats, SimulatedEndpoint, SimulatedEndpointConfig,
};
pub use pump::{FrameOutcome, PumpConfig, PumpStats, TransferPump, spawn_transfer_pump};
pub use session::{StreamSession, TransferState};
pub use source::{FrameSource, StaticFrameSource, SyntheticFrameSource};
