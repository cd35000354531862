//! Test utilities for the usbip-vhci workspace
//!
//! Provides mock device requests and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_get_descriptor;
//!
//! let urb = create_mock_get_descriptor(1);
//! assert_eq!(urb.transfer_buffer_length, 18);
//! ```

use bytes::Bytes;
use protocol::{Recipient, RequestKind, SetupPacket, Urb, request};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Device id used by the mock builders (bus 1, device 2)
pub const MOCK_DEVID: u32 = 0x0001_0002;

/// GET_DESCRIPTOR(Device) control request for `devid`
pub fn create_mock_get_descriptor(devid: u32) -> Urb {
    let setup = SetupPacket::build(
        true,
        RequestKind::Standard,
        Recipient::Device,
        request::GET_DESCRIPTOR,
    )
    .with_value(0x0100)
    .with_length(18);
    Urb::control(devid, setup, Bytes::new())
}

/// SET_CONFIGURATION(1) control request for `devid`
pub fn create_mock_set_configuration(devid: u32) -> Urb {
    let setup = SetupPacket::build(
        false,
        RequestKind::Standard,
        Recipient::Device,
        request::SET_CONFIGURATION,
    )
    .with_value(1);
    Urb::control(devid, setup, Bytes::new())
}

/// Bulk OUT request whose payload is `len` bytes of `fill`
pub fn create_mock_bulk_out(devid: u32, endpoint: u8, len: usize, fill: u8) -> Urb {
    Urb::bulk_out(devid, endpoint, Bytes::from(vec![fill; len]))
}

/// A list of distinguishable bulk IN requests (endpoint 1, lengths 1..=count)
pub fn create_mock_urb_list(count: usize) -> Vec<Urb> {
    (1..=count)
        .map(|i| Urb::bulk_in(MOCK_DEVID, 0x81, i as u32))
        .collect()
}

/// Run a future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
/// assert_eq!(result.unwrap(), 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
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
