//! USB/IP wire types for the vhci request-pairing core
//!
//! This crate defines the pieces of the USB/IP protocol that the virtual
//! host controller touches directly: the setup-packet bit layout, the
//! 48-byte `CMD_SUBMIT` / `RET_SUBMIT` headers, and the [`Urb`] description
//! of a device request awaiting transport.
//!
//! # Example
//!
//! ```
//! use protocol::{Recipient, RequestKind, SetupPacket, request};
//!
//! // GET_DESCRIPTOR(Device), device-to-host
//! let setup = SetupPacket::build(true, RequestKind::Standard, Recipient::Device, request::GET_DESCRIPTOR)
//!     .with_value(0x0100)
//!     .with_length(18);
//!
//! assert_eq!(setup.request_type, 0x80);
//! assert_eq!(setup.to_bytes(), [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
//! ```

pub mod error;
pub mod setup;
pub mod types;
pub mod usbip;

pub use error::{ProtocolError, Result};
pub use setup::{Recipient, RequestKind, SetupPacket, request, request_type_byte};
pub use types::{Direction, Urb, UrbReply};
pub use usbip::{
    USBIP_HEADER_SIZE, UsbIpCmdSubmit, UsbIpCommand, UsbIpHeader, UsbIpRetSubmit, read_reply,
    write_reply,
};
