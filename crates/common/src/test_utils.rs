//! Test utilities for uvc-xu-device
//!
//! Provides mock frames, control setups and timing helpers for testing
//! across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{create_mock_frame, create_xu_setup};
//! use protocol::RequestCode;
//!
//! let frame = create_mock_frame(1024, 7);
//! assert_eq!(frame.len(), 1024);
//! assert_eq!(&frame[..2], &[0xFF, 0xD8]);
//!
//! let setup = create_xu_setup(RequestCode::GetLen, 7, 1, 2);
//! assert_eq!(setup.length, 2);
//! ```

use crate::channel::{DeviceBridge, DeviceEvent};
use protocol::{ControlKey, ControlSetup, RequestCode};
use std::future::Future;
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock encoded frame of `size` bytes
///
/// Starts with a JPEG SOI marker and ends with EOI (when large enough), with
/// a body derived from `seed` so consecutive frames differ.
pub fn create_mock_frame(size: usize, seed: u8) -> Vec<u8> {
    let mut frame: Vec<u8> = (0..size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    if size >= 2 {
        frame[0] = 0xFF;
        frame[1] = 0xD8;
    }
    if size >= 4 {
        frame[size - 2] = 0xFF;
        frame[size - 1] = 0xD9;
    }
    frame
}

/// Create a control setup addressed to an extension unit control
///
/// # Arguments
/// * `request` - Request code
/// * `entity_id` - Extension unit id
/// * `selector` - Control selector
/// * `length` - wLength requested by the host
pub fn create_xu_setup(
    request: RequestCode,
    entity_id: u8,
    selector: u8,
    length: u16,
) -> ControlSetup {
    ControlSetup::new(ControlKey::new(entity_id, selector), request.as_raw(), length)
}

/// Create a raw class-specific interface setup packet
///
/// # Arguments
/// * `request` - bRequest
/// * `selector` - control selector (high byte of wValue)
/// * `entity_id` - unit id (high byte of wIndex)
/// * `interface` - interface number (low byte of wIndex)
/// * `length` - wLength
pub fn create_mock_setup_packet(
    request: u8,
    selector: u8,
    entity_id: u8,
    interface: u8,
    length: u16,
) -> [u8; 8] {
    let request_type = if request & 0x80 != 0 { 0xA1 } else { 0x21 };
    [
        request_type,
        request,
        0x00,
        selector,
        interface,
        entity_id,
        (length & 0xFF) as u8,
        ((length >> 8) & 0xFF) as u8,
    ]
}

/// Run a future with a timeout
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Wait until the bridge delivers an event matching `predicate`
///
/// Events that do not match are discarded.
pub async fn wait_for_event<P>(
    bridge: &DeviceBridge,
    duration: Duration,
    mut predicate: P,
) -> Result<DeviceEvent, TimeoutError>
where
    P: FnMut(&DeviceEvent) -> bool,
{
    with_timeout(duration, async {
        loop {
            match bridge.recv_event().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await?
    .ok_or(TimeoutError { duration })
}

/// Block the current thread until `condition` holds or `duration` elapses
///
/// Returns whether the condition was observed.
pub fn poll_until<F>(duration: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
