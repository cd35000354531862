//! Virtual host controller: pairs device requests with readers
//!
//! A [`VirtualController`] owns one queue of outstanding device requests,
//! one sequence counter and one slot for a waiting reader, all behind a
//! single short-held lock. The encoder is never called under that lock.
//!
//! Device requests reach a reader in one of two ways:
//!
//! - **Immediate pairing**: `submit` finds a reader parked in the slot,
//!   numbers the request, encodes it into the reader's buffer and completes
//!   the reader. The request is then queued as sent.
//! - **Deferred pairing**: `submit` finds no reader and queues the request
//!   unsent. The next `read` takes the oldest unsent request instead of
//!   parking.
//!
//! Either way the request stays queued until `complete_response`,
//! `complete_unlink`, cancellation or `shutdown` removes it, and completing
//! it gives its pool slot back.

use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, trace, warn};

use protocol::{Urb, UrbReply};

use crate::encoder::{EncodeError, ReadBuffer, UrbEncoder, UsbIpEncoder};
use crate::error::{Result, VhciError};
use crate::io::{Armed, CancelRoutine, IoId};
use crate::pool::RequestPool;
use crate::queue::{ControllerState, Detach};
use crate::request::{DeviceRequest, PendingUrb, ReadRequest, UrbRequest};
use crate::stats::{ControllerStats, ControllerStatsSnapshot};

/// How `submit` disposed of a device request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// No reader was waiting; the request is queued for the next read
    Queued,
    /// A waiting reader received the request's frame
    Dispatched { seqnum: u32 },
}

/// How `read` disposed of a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Nothing was pending; the reader is parked until a request arrives
    Pending,
    /// The reader received the frame for request `seqnum`
    Completed { seqnum: u32, len: usize },
}

struct ControllerInner {
    devid: u32,
    pool: RequestPool,
    encoder: Arc<dyn UrbEncoder>,
    state: Mutex<ControllerState>,
    stats: ControllerStats,
}

impl ControllerInner {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn encode(
        &self,
        capacity: usize,
        seqnum: u32,
        urb: &Urb,
    ) -> std::result::Result<Bytes, EncodeError> {
        let mut buf = ReadBuffer::new(capacity);
        self.encoder.encode(&mut buf, seqnum, urb)?;
        Ok(buf.freeze())
    }

    fn cancel_urb(&self, id: IoId) {
        let removed = self.lock().remove_by_io(id);
        match removed {
            Some(request) => {
                debug!("Cancelled urb {} ({})", request, id);
                self.stats.record_cancelled();
                request.complete(Err(VhciError::Cancelled));
            }
            None => warn!("Cancel {}: no matching urb req", id),
        }
    }

    fn cancel_reader(&self, id: IoId) {
        let reader = self.lock().take_reader_if(id);
        match reader {
            Some(reader) => {
                debug!("Cancelled waiting reader {}", id);
                reader.complete(Err(VhciError::Cancelled));
            }
            // Displaced by a newer read or by shutdown, which completed it
            None => debug!("Cancel {}: reader already gone", id),
        }
    }
}

fn urb_cancel_routine(inner: &Arc<ControllerInner>) -> CancelRoutine {
    let inner: Weak<ControllerInner> = Arc::downgrade(inner);
    Box::new(move |id| {
        if let Some(inner) = inner.upgrade() {
            inner.cancel_urb(id);
        }
    })
}

fn reader_cancel_routine(inner: &Arc<ControllerInner>) -> CancelRoutine {
    let inner: Weak<ControllerInner> = Arc::downgrade(inner);
    Box::new(move |id| {
        if let Some(inner) = inner.upgrade() {
            inner.cancel_reader(id);
        }
    })
}

/// One virtual host controller attached to remote device `devid`
///
/// All methods take `&self`; share the controller across threads with an
/// `Arc`. Dropping it cancels everything still outstanding.
pub struct VirtualController {
    inner: Arc<ControllerInner>,
}

impl VirtualController {
    pub fn new(devid: u32, pool: RequestPool, encoder: Arc<dyn UrbEncoder>) -> Self {
        debug!("Creating virtual controller for device {:#010x}", devid);
        Self {
            inner: Arc::new(ControllerInner {
                devid,
                pool,
                encoder,
                state: Mutex::new(ControllerState::new()),
                stats: ControllerStats::new(),
            }),
        }
    }

    /// Controller that frames requests as USB/IP `CMD_SUBMIT` messages
    pub fn with_usbip(devid: u32, pool: RequestPool) -> Self {
        Self::new(devid, pool, Arc::new(UsbIpEncoder))
    }

    /// Accept a device request
    ///
    /// The request's future is completed exactly once whatever this
    /// returns: later by a reply, unlink or cancellation on success, or
    /// right away with the returned error.
    pub fn submit(&self, request: DeviceRequest) -> Result<Submitted> {
        let inner = &self.inner;
        inner.stats.record_submitted();

        let Some(slot) = inner.pool.allocate() else {
            inner.stats.record_exhausted();
            warn!(
                "Request pool exhausted ({} slots), rejecting {}",
                inner.pool.capacity(),
                request.id()
            );
            request.complete(Err(VhciError::ResourceExhausted));
            return Err(VhciError::ResourceExhausted);
        };
        let mut urbr = UrbRequest::new(slot, inner.devid, request);

        let mut state = inner.lock();
        let Some(reader) = state.claim_reader() else {
            return match urbr.arm_cancel(urb_cancel_routine(inner)) {
                Armed::Registered => {
                    trace!("Queued urb {} ({})", urbr, urbr.io_id());
                    state.push_back(urbr);
                    drop(state);
                    inner.stats.record_queued();
                    Ok(Submitted::Queued)
                }
                Armed::CancelInFlight => {
                    // The routine is blocked on the lock and will find it
                    state.push_back(urbr);
                    Err(VhciError::Cancelled)
                }
                Armed::Cancelled => {
                    drop(state);
                    debug!("Urb {} cancelled before it was queued", urbr.io_id());
                    inner.stats.record_cancelled();
                    urbr.complete(Err(VhciError::Cancelled));
                    Err(VhciError::Cancelled)
                }
            };
        };

        let seqnum = state.next_seqnum();
        urbr.assign_seqnum(seqnum);
        drop(state);

        let frame = match inner.encode(reader.capacity(), seqnum, urbr.urb()) {
            Ok(frame) => frame,
            Err(e) => {
                inner.stats.record_encode_failure();
                warn!("Failed to encode urb {}: {}", urbr, e);
                reader.complete(Err(VhciError::InvalidRequest));
                inner.stats.record_completed();
                urbr.complete(Err(VhciError::InvalidRequest));
                return Err(VhciError::InvalidRequest);
            }
        };

        let mut state = inner.lock();
        urbr.mark_sent();
        let refused = match urbr.arm_cancel(urb_cancel_routine(inner)) {
            Armed::Registered | Armed::CancelInFlight => {
                trace!("Dispatched urb {} to reader {}", urbr, reader.id());
                state.push_back(urbr);
                None
            }
            Armed::Cancelled => Some(urbr),
        };
        drop(state);

        inner.stats.record_paired();
        inner.stats.record_dispatched();
        reader.complete(Ok(frame));

        if let Some(urbr) = refused {
            debug!("Urb {} cancelled while it was being encoded", urbr);
            inner.stats.record_cancelled();
            urbr.complete(Err(VhciError::Cancelled));
        }
        Ok(Submitted::Dispatched { seqnum })
    }

    /// Hand a reader the next unsent request, or park it until one arrives
    ///
    /// Only one reader may wait at a time; a second one fails with
    /// [`VhciError::ReaderBusy`] unless the parked one is being cancelled.
    pub fn read(&self, reader: ReadRequest) -> Result<ReadStatus> {
        let inner = &self.inner;
        if reader.is_cancelled() {
            reader.complete(Err(VhciError::Cancelled));
            return Err(VhciError::Cancelled);
        }

        let mut state = inner.lock();
        let mut displaced = None;
        if state.has_reader() {
            if !state.reader_is_cancelled() {
                drop(state);
                warn!("Reader {} rejected: another reader is waiting", reader.id());
                reader.complete(Err(VhciError::ReaderBusy));
                return Err(VhciError::ReaderBusy);
            }
            displaced = state.take_reader();
            if let Some(old) = &displaced {
                old.disarm_cancel();
            }
        }

        let status = match state.take_next_pending() {
            Some(pending) => {
                drop(state);
                self.deliver(reader, pending)
            }
            None => match reader.arm_cancel(reader_cancel_routine(inner)) {
                Armed::Registered => {
                    trace!("Reader {} parked", reader.id());
                    state.park_reader(reader);
                    drop(state);
                    Ok(ReadStatus::Pending)
                }
                Armed::CancelInFlight => {
                    state.park_reader(reader);
                    drop(state);
                    Err(VhciError::Cancelled)
                }
                Armed::Cancelled => {
                    drop(state);
                    reader.complete(Err(VhciError::Cancelled));
                    Err(VhciError::Cancelled)
                }
            },
        };

        if let Some(old) = displaced {
            debug!("Displaced cancelled reader {}", old.id());
            old.complete(Err(VhciError::Cancelled));
        }
        status
    }

    fn deliver(&self, reader: ReadRequest, pending: PendingUrb) -> Result<ReadStatus> {
        let inner = &self.inner;
        let PendingUrb { seqnum, urb } = pending;

        match inner.encode(reader.capacity(), seqnum, &urb) {
            Ok(frame) => {
                let len = frame.len();
                trace!("Reader {} took urb seq:{} ({} bytes)", reader.id(), seqnum, len);
                inner.stats.record_dispatched();
                reader.complete(Ok(frame));
                Ok(ReadStatus::Completed { seqnum, len })
            }
            Err(e) => {
                inner.stats.record_encode_failure();
                warn!("Failed to encode urb seq:{}: {}", seqnum, e);
                let detached = inner.lock().detach_by_seqnum(seqnum);
                if let Detach::Detached(urbr) = detached {
                    inner.stats.record_completed();
                    urbr.complete(Err(VhciError::InvalidRequest));
                }
                reader.complete(Err(VhciError::InvalidRequest));
                Err(VhciError::InvalidRequest)
            }
        }
    }

    /// Number the oldest unsent request and mark it sent
    ///
    /// The request stays queued; the snapshot is what a reader would have
    /// been handed.
    pub fn take_next_pending(&self) -> Option<PendingUrb> {
        let pending = self.inner.lock().take_next_pending();
        if let Some(pending) = &pending {
            trace!("Took pending urb seq:{}", pending.seqnum);
        }
        pending
    }

    /// Detach the request numbered `seqnum`; the caller must complete it
    ///
    /// Fails with [`VhciError::Cancelled`] when that request's cancellation
    /// is already in flight, leaving it for the cancel routine.
    pub fn find_by_sequence(&self, seqnum: u32) -> Result<UrbRequest> {
        let detached = self.inner.lock().detach_by_seqnum(seqnum);
        match detached {
            Detach::Detached(urbr) => {
                trace!("Found urb {}", urbr);
                Ok(urbr)
            }
            Detach::CancelInFlight => {
                debug!("Urb seq:{} lost the race to its cancellation", seqnum);
                Err(VhciError::Cancelled)
            }
            Detach::Missing => {
                self.inner.stats.record_not_found();
                Err(VhciError::NotFound { seqnum })
            }
        }
    }

    /// Complete the request a `RET_SUBMIT` answers
    pub fn complete_response(&self, reply: UrbReply) -> Result<()> {
        match self.find_by_sequence(reply.seqnum) {
            Ok(urbr) => {
                if !reply.is_success() {
                    debug!("Urb {} failed with status {}", urbr, reply.status);
                }
                self.inner.stats.record_completed();
                urbr.complete(Ok(reply));
                Ok(())
            }
            Err(VhciError::NotFound { seqnum }) => {
                warn!(
                    "Reply for unknown seq:{} on device {:#010x}",
                    seqnum, self.inner.devid
                );
                Err(VhciError::NotFound { seqnum })
            }
            Err(e) => Err(e),
        }
    }

    /// Complete the request a `RET_UNLINK` confirms as unlinked
    pub fn complete_unlink(&self, seqnum: u32) -> Result<()> {
        let urbr = self.find_by_sequence(seqnum)?;
        debug!("Unlinked urb {}", urbr);
        self.inner.stats.record_cancelled();
        urbr.complete(Err(VhciError::Cancelled));
        Ok(())
    }

    /// Cancel every outstanding request and the waiting reader
    ///
    /// Returns how many requests were cancelled here. Requests whose
    /// cancellation is already in flight are left to their routines.
    pub fn shutdown(&self) -> usize {
        let (requests, reader) = {
            let mut state = self.inner.lock();
            (state.detach_all(), state.take_reader())
        };

        if let Some(reader) = reader {
            reader.disarm_cancel();
            reader.complete(Err(VhciError::Cancelled));
        }

        let count = requests.len();
        for urbr in requests {
            self.inner.stats.record_cancelled();
            urbr.complete(Err(VhciError::Cancelled));
        }

        if count > 0 {
            info!(
                "Controller {:#010x} shut down with {} outstanding requests",
                self.inner.devid, count
            );
        }
        count
    }

    pub fn devid(&self) -> u32 {
        self.inner.devid
    }

    pub fn pool(&self) -> &RequestPool {
        &self.inner.pool
    }

    /// Requests in the queue, sent or not
    pub fn queued_len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Requests still waiting for a reader
    pub fn unsent_len(&self) -> usize {
        self.inner.lock().unsent_len()
    }

    pub fn has_waiting_reader(&self) -> bool {
        self.inner.lock().has_reader()
    }

    pub fn stats(&self) -> ControllerStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl Drop for VirtualController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for VirtualController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("VirtualController")
            .field("devid", &format_args!("{:#010x}", self.inner.devid))
            .field("queued", &state.len())
            .field("unsent", &state.unsent_len())
            .field("reader", &state.has_reader())
            .finish()
    }
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use common::test_utils::{MOCK_DEVID, create_mock_urb_list};
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Submit,
        Read,
        Reply,
        CancelOldest,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Submit),
            2 => Just(Op::Read),
            2 => Just(Op::Reply),
            1 => Just(Op::CancelOldest),
        ]
    }

    proptest! {
        /// Property: every submitter is completed, sequence numbers handed
        /// to readers strictly increase, and shutdown restores the pool
        #[test]
        fn prop_engine_invariants(ops in proptest::collection::vec(op_strategy(), 1..64)) {
            let pool = RequestPool::new(8);
            let vc = VirtualController::with_usbip(MOCK_DEVID, pool.clone());
            let mut futures = Vec::new();
            let mut sent = Vec::new();
            let mut last_seqnum = 0u32;
            let mut urbs = create_mock_urb_list(64).into_iter();

            for op in ops {
                match op {
                    Op::Submit => {
                        let Some(urb) = urbs.next() else { continue };
                        let (request, future) = DeviceRequest::new(urb);
                        if let Ok(Submitted::Dispatched { seqnum }) = vc.submit(request) {
                            prop_assert!(seqnum > last_seqnum);
                            last_seqnum = seqnum;
                            sent.push(seqnum);
                        }
                        futures.push(future);
                    }
                    Op::Read => {
                        let (reader, _reader_future) = ReadRequest::new(1024);
                        if let Ok(ReadStatus::Completed { seqnum, .. }) = vc.read(reader) {
                            prop_assert!(seqnum > last_seqnum);
                            last_seqnum = seqnum;
                            sent.push(seqnum);
                        }
                    }
                    Op::Reply => {
                        if !sent.is_empty() {
                            let seqnum = sent.remove(0);
                            let _ = vc.complete_response(UrbReply::success(seqnum, Bytes::new()));
                        }
                    }
                    Op::CancelOldest => {
                        if let Some(future) = futures.first() {
                            future.cancel();
                        }
                    }
                }
            }

            vc.shutdown();
            prop_assert_eq!(vc.queued_len(), 0);
            prop_assert_eq!(pool.available(), pool.capacity());

            for mut future in futures {
                prop_assert!(future.try_result().is_some());
            }
        }
    }
}
