//! Per-controller state guarded by the controller lock
//!
//! Nothing in here locks or completes anything. Callers hold the lock while
//! they mutate the state and complete detached operations after dropping it.

use std::collections::VecDeque;

use crate::io::IoId;
use crate::request::{PendingUrb, ReadRequest, UrbRequest};

/// Outcome of detaching a queued request by sequence number
#[derive(Debug)]
pub(crate) enum Detach {
    /// Removed from the queue; the caller owns it
    Detached(UrbRequest),
    /// Matched, but its cancel routine is already running and owns it
    CancelInFlight,
    /// Nothing queued under that sequence number
    Missing,
}

#[derive(Debug, Default)]
pub(crate) struct ControllerState {
    queue: VecDeque<UrbRequest>,
    seqnum: u32,
    reader: Option<ReadRequest>,
}

impl ControllerState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pre-increment the sequence counter; 0 is never handed out
    pub(crate) fn next_seqnum(&mut self) -> u32 {
        self.seqnum = self.seqnum.wrapping_add(1);
        if self.seqnum == 0 {
            self.seqnum = 1;
        }
        self.seqnum
    }

    pub(crate) fn push_back(&mut self, request: UrbRequest) {
        self.queue.push_back(request);
    }

    /// Number the oldest unsent request, mark it sent and snapshot it
    ///
    /// The request stays queued.
    pub(crate) fn take_next_pending(&mut self) -> Option<PendingUrb> {
        let position = self.queue.iter().position(|r| !r.is_sent())?;
        let seqnum = self.next_seqnum();
        let request = &mut self.queue[position];
        request.assign_seqnum(seqnum);
        request.mark_sent();
        Some(request.pending())
    }

    pub(crate) fn detach_by_seqnum(&mut self, seqnum: u32) -> Detach {
        if seqnum == 0 {
            return Detach::Missing;
        }
        let Some(position) = self.queue.iter().position(|r| r.seqnum() == seqnum) else {
            return Detach::Missing;
        };
        if !self.queue[position].disarm_cancel() {
            return Detach::CancelInFlight;
        }
        match self.queue.remove(position) {
            Some(request) => Detach::Detached(request),
            None => Detach::Missing,
        }
    }

    /// Remove the request belonging to operation `id`
    ///
    /// Only for cancel routines, which already own the request's teardown.
    pub(crate) fn remove_by_io(&mut self, id: IoId) -> Option<UrbRequest> {
        let position = self.queue.iter().position(|r| r.io_id() == id)?;
        self.queue.remove(position)
    }

    /// Detach every request whose cancel routine can still be disarmed
    ///
    /// Requests with a cancellation in flight stay queued, in order, for
    /// their routines to find.
    pub(crate) fn detach_all(&mut self) -> Vec<UrbRequest> {
        let mut detached = Vec::with_capacity(self.queue.len());
        let mut in_flight = VecDeque::new();
        for request in self.queue.drain(..) {
            if request.disarm_cancel() {
                detached.push(request);
            } else {
                in_flight.push_back(request);
            }
        }
        self.queue = in_flight;
        detached
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn unsent_len(&self) -> usize {
        self.queue.iter().filter(|r| !r.is_sent()).count()
    }

    pub(crate) fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    pub(crate) fn reader_is_cancelled(&self) -> bool {
        self.reader.as_ref().is_some_and(ReadRequest::is_cancelled)
    }

    /// Empty the reader slot unconditionally
    pub(crate) fn take_reader(&mut self) -> Option<ReadRequest> {
        self.reader.take()
    }

    /// Take the parked reader for pairing
    ///
    /// A reader whose cancel routine cannot be disarmed is left in the slot
    /// for that routine.
    pub(crate) fn claim_reader(&mut self) -> Option<ReadRequest> {
        if self.reader.as_ref()?.disarm_cancel() {
            self.reader.take()
        } else {
            None
        }
    }

    pub(crate) fn park_reader(&mut self, reader: ReadRequest) {
        debug_assert!(self.reader.is_none(), "reader slot already occupied");
        self.reader = Some(reader);
    }

    pub(crate) fn take_reader_if(&mut self, id: IoId) -> Option<ReadRequest> {
        if self.reader.as_ref()?.id() == id {
            self.reader.take()
        } else {
            None
        }
    }
}
