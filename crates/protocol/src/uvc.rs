//! USB Video Class control vocabulary
//!
//! Request codes, control addressing and capability bits used by
//! class-specific control requests (UVC 1.5, section 4.2).

use byteorder::{ByteOrder, LittleEndian};

/// GET_INFO capability bit: control supports GET requests
pub const INFO_SUPPORTS_GET: u8 = 0x01;
/// GET_INFO capability bit: control supports SET requests
pub const INFO_SUPPORTS_SET: u8 = 0x02;

/// Number of bytes in a GET_LEN response (fixed by UVC 4.2.2.4)
pub const GET_LEN_RESPONSE_SIZE: usize = 2;

/// Class-specific request codes answered by an extension unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestCode {
    SetCur = 0x01,
    GetCur = 0x81,
    GetMin = 0x82,
    GetMax = 0x83,
    GetLen = 0x85,
    GetInfo = 0x86,
    GetDef = 0x87,
}

impl RequestCode {
    /// Decode a raw `bRequest` value
    ///
    /// Returns `None` for request codes outside the extension-unit verb set
    /// (including GET_RES, which extension units here do not answer).
    pub fn from_raw(b_request: u8) -> Option<Self> {
        match b_request {
            0x01 => Some(Self::SetCur),
            0x81 => Some(Self::GetCur),
            0x82 => Some(Self::GetMin),
            0x83 => Some(Self::GetMax),
            0x85 => Some(Self::GetLen),
            0x86 => Some(Self::GetInfo),
            0x87 => Some(Self::GetDef),
            _ => None,
        }
    }

    /// Raw `bRequest` value
    pub fn as_raw(self) -> u8 {
        self as u8
    }

    /// True for device-to-host (GET_*) requests
    pub fn is_get(self) -> bool {
        self.as_raw() & 0x80 != 0
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::SetCur => "SET_CUR",
            Self::GetCur => "GET_CUR",
            Self::GetMin => "GET_MIN",
            Self::GetMax => "GET_MAX",
            Self::GetLen => "GET_LEN",
            Self::GetInfo => "GET_INFO",
            Self::GetDef => "GET_DEF",
        }
    }
}

/// Address of a single control: (entity id, control selector)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlKey {
    /// Unit or terminal id (bUnitID of the extension unit descriptor)
    pub entity_id: u8,
    /// Control selector within the entity
    pub selector: u8,
}

impl ControlKey {
    pub const fn new(entity_id: u8, selector: u8) -> Self {
        Self {
            entity_id,
            selector,
        }
    }
}

impl std::fmt::Display for ControlKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity {} selector {}", self.entity_id, self.selector)
    }
}

/// Decoded setup stage of a class-specific control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    /// Addressed control
    pub key: ControlKey,
    /// Raw `bRequest`
    pub request: u8,
    /// Interface number (low byte of `wIndex`)
    pub interface: u8,
    /// Host-requested data stage length (`wLength`)
    pub length: u16,
}

impl ControlSetup {
    pub fn new(key: ControlKey, request: u8, length: u16) -> Self {
        Self {
            key,
            request,
            interface: 0,
            length,
        }
    }

    /// Decode from raw setup packet fields
    ///
    /// UVC places the control selector in the high byte of `wValue` and
    /// the entity id in the high byte of `wIndex`.
    pub fn from_setup_packet(b_request: u8, w_value: u16, w_index: u16, w_length: u16) -> Self {
        Self {
            key: ControlKey::new((w_index >> 8) as u8, (w_value >> 8) as u8),
            request: b_request,
            interface: (w_index & 0xff) as u8,
            length: w_length,
        }
    }

    /// Decoded request code, if it is one of the extension-unit verbs
    pub fn request_code(&self) -> Option<RequestCode> {
        RequestCode::from_raw(self.request)
    }
}

/// Outcome of offering a control request to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    /// The handler owns the addressed control and answered the request
    Handled,
    /// The request belongs to someone else; other handlers may claim it
    NotHandled,
}

impl ControlStatus {
    pub fn is_handled(self) -> bool {
        matches!(self, Self::Handled)
    }
}

/// Encode a control width as a GET_LEN response
pub fn encode_control_len(width: u16) -> [u8; GET_LEN_RESPONSE_SIZE] {
    let mut out = [0u8; GET_LEN_RESPONSE_SIZE];
    LittleEndian::write_u16(&mut out, width);
    out
}
