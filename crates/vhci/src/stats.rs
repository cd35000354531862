//! Lock-free controller counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals for one controller
#[derive(Debug, Default)]
pub struct ControllerStats {
    /// Device requests accepted by `submit`
    submitted: AtomicU64,
    /// Requests paired with a waiting reader inside `submit`
    paired: AtomicU64,
    /// Requests enqueued to wait for a reader
    queued: AtomicU64,
    /// Frames handed to readers, either path
    dispatched: AtomicU64,
    /// Device requests completed with a reply or an encode error
    completed: AtomicU64,
    /// Device requests completed as cancelled
    cancelled: AtomicU64,
    /// Response lookups with no matching request
    not_found: AtomicU64,
    encode_failures: AtomicU64,
    /// Submits refused because the pool was empty
    exhausted: AtomicU64,
}

impl ControllerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_paired(&self) {
        self.paired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ControllerStatsSnapshot {
        ControllerStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            paired: self.paired.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.submitted,
            &self.paired,
            &self.queued,
            &self.dispatched,
            &self.completed,
            &self.cancelled,
            &self.not_found,
            &self.encode_failures,
            &self.exhausted,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`ControllerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStatsSnapshot {
    pub submitted: u64,
    pub paired: u64,
    pub queued: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub not_found: u64,
    pub encode_failures: u64,
    pub exhausted: u64,
}
