//! Extension unit controls
//!
//! Each control holds a fixed-width opaque value. The verbs behave as
//! follows for a control of width W:
//!
//! | Request                     | Response                                   |
//! |-----------------------------|--------------------------------------------|
//! | GET_CUR                     | current value, W bytes                     |
//! | SET_CUR                     | value zeroed, then up to W bytes copied in |
//! | GET_MIN / GET_MAX / GET_DEF | W zero bytes                               |
//! | GET_INFO                    | 1 byte: GET and SET supported              |
//! | GET_LEN                     | 2 bytes: W little-endian                   |
//!
//! GET_LEN always answers with two bytes whatever `wLength` the host sent
//! (UVC 1.5, 4.2.2.4).

use protocol::{
    ControlKey, GET_LEN_RESPONSE_SIZE, INFO_SUPPORTS_GET, INFO_SUPPORTS_SET, ProtocolError,
    RequestCode, encode_control_len,
};
use tracing::{trace, warn};

/// A single extension unit control and its persistent value
#[derive(Debug, Clone)]
pub struct ExtensionControl {
    key: ControlKey,
    current: Vec<u8>,
}

impl ExtensionControl {
    /// Create a control of `width` bytes, initially all zero
    pub fn new(key: ControlKey, width: usize) -> Result<Self, ProtocolError> {
        if width == 0 || width > u16::MAX as usize {
            return Err(ProtocolError::InvalidControlWidth {
                width,
                max: u16::MAX as usize,
            });
        }
        Ok(Self {
            key,
            current: vec![0u8; width],
        })
    }

    pub fn key(&self) -> ControlKey {
        self.key
    }

    /// Width advertised through GET_LEN
    pub fn width(&self) -> usize {
        self.current.len()
    }

    /// Current value
    pub fn current(&self) -> &[u8] {
        &self.current
    }

    /// GET_INFO capability byte
    pub fn info(&self) -> u8 {
        INFO_SUPPORTS_GET | INFO_SUPPORTS_SET
    }

    /// Answer one request
    ///
    /// For SET_CUR, `len` is the number of valid bytes in `data` and is left
    /// unchanged. For GET requests the response is written to `data` and
    /// `len` is set to its length.
    pub fn handle(&mut self, request: RequestCode, data: &mut [u8], len: &mut usize) {
        match request {
            RequestCode::GetCur => {
                let current = &self.current;
                *len = self.respond(data, |out, width| out.copy_from_slice(&current[..width]));
            }
            RequestCode::SetCur => self.set_current(&data[..(*len).min(data.len())]),
            RequestCode::GetMin | RequestCode::GetMax | RequestCode::GetDef => {
                *len = self.respond(data, |out, _| out.fill(0));
            }
            RequestCode::GetInfo => {
                if let Some(first) = data.first_mut() {
                    *first = self.info();
                    *len = 1;
                }
            }
            RequestCode::GetLen => {
                let encoded = encode_control_len(self.width() as u16);
                let n = GET_LEN_RESPONSE_SIZE.min(data.len());
                data[..n].copy_from_slice(&encoded[..n]);
                *len = n;
            }
        }
    }

    fn set_current(&mut self, input: &[u8]) {
        trace!("SET_CUR {}: {:02x?}", self.key, input);
        if input.len() > self.width() {
            warn!(
                "SET_CUR on {} with {} bytes, truncating to {}",
                self.key,
                input.len(),
                self.width()
            );
        }
        self.current.fill(0);
        let n = input.len().min(self.width());
        self.current[..n].copy_from_slice(&input[..n]);
    }

    /// Write a W-byte response into `data`, clamped to the buffer
    fn respond<F>(&self, data: &mut [u8], write: F) -> usize
    where
        F: FnOnce(&mut [u8], usize),
    {
        let n = self.width().min(data.len());
        if n < self.width() {
            warn!(
                "Response buffer of {} bytes too small for {} byte control {}",
                data.len(),
                self.width(),
                self.key
            );
        }
        write(&mut data[..n], n);
        n
    }
}
