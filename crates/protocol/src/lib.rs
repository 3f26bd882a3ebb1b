//! Protocol library for uvc-xu-device
//!
//! This crate defines the USB Video Class vocabulary shared by the device
//! crate: class-specific control request codes and addressing, video payload
//! fragmentation, and device lifecycle events.
//!
//! # Example
//!
//! ```
//! use protocol::{Packetizer, UvcPayloadPacketizer, packet_buffer_capacity};
//!
//! let mut packetizer = UvcPayloadPacketizer::new(1020).unwrap();
//! let mut buffer = vec![0u8; packet_buffer_capacity(4096, 1020).unwrap()];
//!
//! let frame = vec![0u8; 3000];
//! let layout = packetizer.fill(&frame, &mut buffer).unwrap();
//! assert_eq!(layout.fragment_count(), 3);
//! ```
//!
//! # Control requests
//!
//! ```
//! use protocol::{ControlSetup, RequestCode, encode_control_len};
//!
//! let setup = ControlSetup::from_setup_packet(0x85, 0x0100, 0x0700, 2);
//! assert_eq!(setup.request_code(), Some(RequestCode::GetLen));
//! assert_eq!(encode_control_len(60), [60, 0]);
//! ```

pub mod error;
pub mod events;
pub mod payload;
pub mod uvc;

pub use error::{ProtocolError, Result};
pub use events::{ClassEvent, LatchAction};
pub use payload::{
    HEADER_EOF, HEADER_EOH, HEADER_FID, PAYLOAD_HEADER_SIZE, PacketLayout, Packetizer,
    UvcPayloadPacketizer, fragment_count, packet_buffer_capacity,
};
pub use uvc::{
    ControlKey, ControlSetup, ControlStatus, GET_LEN_RESPONSE_SIZE, INFO_SUPPORTS_GET,
    INFO_SUPPORTS_SET, RequestCode, encode_control_len,
};
