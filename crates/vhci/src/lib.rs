//! Request-pairing core of a USB/IP virtual host controller
//!
//! Device requests (URBs) are submitted to a [`VirtualController`], which
//! pairs each one with a reader that transports it to the remote host. A
//! request stays outstanding, keyed by its sequence number, until the reply
//! comes back through [`VirtualController::complete_response`], it is
//! unlinked, or its originator cancels it.
//!
//! Request objects come from a fixed-size [`RequestPool`], and every
//! operation the controller may finish later is represented by an
//! [`IoFuture`] that resolves exactly once.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use protocol::{Urb, UrbReply};
//! use vhci::{DeviceRequest, ReadRequest, RequestPool, Submitted, VirtualController};
//!
//! let devid = 0x0001_0002;
//! let vc = VirtualController::with_usbip(devid, RequestPool::new(16));
//!
//! // A reader waits for work
//! let (reader, mut frame) = ReadRequest::new(64 * 1024);
//! vc.read(reader).unwrap();
//!
//! // A device request pairs with it immediately
//! let (request, mut reply) = DeviceRequest::new(Urb::bulk_in(devid, 1, 64));
//! assert_eq!(vc.submit(request), Ok(Submitted::Dispatched { seqnum: 1 }));
//! assert!(frame.try_result().unwrap().is_ok());
//!
//! // The remote answers seq 1
//! vc.complete_response(UrbReply::success(1, Bytes::from_static(b"data"))).unwrap();
//! assert_eq!(reply.try_result().unwrap().unwrap().data, Bytes::from_static(b"data"));
//! ```

pub mod controller;
pub mod encoder;
pub mod error;
pub mod io;
pub mod pool;
mod queue;
pub mod request;
pub mod stats;

pub use controller::{ReadStatus, Submitted, VirtualController};
pub use encoder::{EncodeError, ReadBuffer, UrbEncoder, UsbIpEncoder};
pub use error::{Result, VhciError};
pub use io::{IoCanceller, IoFuture, IoHandle, IoId, io_channel};
pub use pool::{PoolSlot, RequestPool, SlotId};
pub use request::{DeviceRequest, PendingUrb, ReadRequest, UrbRequest};
pub use stats::{ControllerStats, ControllerStatsSnapshot};
