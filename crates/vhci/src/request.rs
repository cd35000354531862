//! Request objects and the operations that create them
//!
//! - [`DeviceRequest`]: a URB arriving from the device side, with the
//!   handle its originator is waiting on
//! - [`ReadRequest`]: the consumer asking for the next frame to transport
//! - [`UrbRequest`]: the pooled object the controller tracks for one
//!   outstanding device request

use bytes::Bytes;
use std::fmt;
use tracing::error;

use common::ControllerSettings;
use protocol::{Urb, UrbReply};

use crate::error::Result;
use crate::io::{Armed, CancelRoutine, IoFuture, IoHandle, IoId, io_channel};
use crate::pool::{PoolSlot, SlotId};

/// A device-originated USB request awaiting transport
#[derive(Debug)]
pub struct DeviceRequest {
    urb: Urb,
    io: IoHandle<UrbReply>,
}

impl DeviceRequest {
    /// Wrap `urb`; the future resolves with the remote reply
    pub fn new(urb: Urb) -> (Self, IoFuture<UrbReply>) {
        let (io, future) = io_channel();
        (Self { urb, io }, future)
    }

    pub fn id(&self) -> IoId {
        self.io.id()
    }

    pub fn urb(&self) -> &Urb {
        &self.urb
    }

    pub(crate) fn complete(self, result: Result<UrbReply>) {
        self.io.complete(result);
    }
}

/// The consumer's request for the next encoded frame
#[derive(Debug)]
pub struct ReadRequest {
    capacity: usize,
    io: IoHandle<Bytes>,
}

impl ReadRequest {
    /// Ask for one frame of at most `capacity` bytes
    pub fn new(capacity: usize) -> (Self, IoFuture<Bytes>) {
        let (io, future) = io_channel();
        (Self { capacity, io }, future)
    }

    pub fn with_settings(settings: &ControllerSettings) -> (Self, IoFuture<Bytes>) {
        Self::new(settings.read_buffer_size)
    }

    pub fn id(&self) -> IoId {
        self.io.id()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.io.is_cancelled()
    }

    pub(crate) fn arm_cancel(&self, routine: CancelRoutine) -> Armed {
        self.io.arm_cancel(routine)
    }

    pub(crate) fn disarm_cancel(&self) -> bool {
        self.io.disarm_cancel()
    }

    pub(crate) fn complete(self, result: Result<Bytes>) {
        self.io.complete(result);
    }
}

/// Snapshot of a request handed to the consumer
///
/// The request itself stays queued until its reply or cancellation; this
/// is what the encoder needs, taken while the controller lock was held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUrb {
    pub seqnum: u32,
    pub urb: Urb,
}

/// One outstanding device request tracked by a controller
///
/// `seqnum == 0` means no sequence number has been assigned yet, and such an
/// object is never marked sent.
pub struct UrbRequest {
    slot: PoolSlot,
    owner: u32,
    urb: Urb,
    io: IoHandle<UrbReply>,
    seqnum: u32,
    sent: bool,
}

impl UrbRequest {
    pub(crate) fn new(slot: PoolSlot, owner: u32, request: DeviceRequest) -> Self {
        let DeviceRequest { urb, io } = request;
        Self {
            slot,
            owner,
            urb,
            io,
            seqnum: 0,
            sent: false,
        }
    }

    pub fn seqnum(&self) -> u32 {
        self.seqnum
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn urb(&self) -> &Urb {
        &self.urb
    }

    /// Device id of the controller that owns this request
    pub fn owner(&self) -> u32 {
        self.owner
    }

    pub fn io_id(&self) -> IoId {
        self.io.id()
    }

    pub fn slot_id(&self) -> SlotId {
        self.slot.id()
    }

    pub(crate) fn assign_seqnum(&mut self, seqnum: u32) {
        if self.seqnum != 0 {
            error!("non-zero seqnum: {} (reassigning {})", self.seqnum, seqnum);
        }
        self.seqnum = seqnum;
    }

    pub(crate) fn mark_sent(&mut self) {
        debug_assert!(self.seqnum != 0, "urb {} sent without a seqnum", self.slot.id());
        self.sent = true;
    }

    pub(crate) fn arm_cancel(&self, routine: CancelRoutine) -> Armed {
        self.io.arm_cancel(routine)
    }

    pub(crate) fn disarm_cancel(&self) -> bool {
        self.io.disarm_cancel()
    }

    /// Resolve the originator's future and give the slot back to the pool
    pub fn complete(self, result: Result<UrbReply>) {
        let Self { slot, io, .. } = self;
        drop(slot);
        io.complete(result);
    }

    /// Snapshot for the encoder
    pub(crate) fn pending(&self) -> PendingUrb {
        PendingUrb {
            seqnum: self.seqnum,
            urb: self.urb.clone(),
        }
    }
}

impl fmt::Display for UrbRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}seq:{}]",
            if self.sent { "sent," } else { "" },
            self.seqnum
        )
    }
}

impl fmt::Debug for UrbRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrbRequest")
            .field("slot", &self.slot.id())
            .field("owner", &format_args!("{:#x}", self.owner))
            .field("io", &self.io.id())
            .field("seqnum", &self.seqnum)
            .field("sent", &self.sent)
            .finish()
    }
}
