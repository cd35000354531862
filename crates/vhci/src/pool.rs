//! Fixed-capacity request object pool
//!
//! The pool hands out [`PoolSlot`] tokens, one per outstanding request
//! object. Allocation and release are O(1), lock-free, and never grow the
//! pool. A slot goes back to the pool when it is dropped, so a request
//! object cannot leak its slot or release it twice.
//!
//! Every slot index carries a generation that is bumped on release; a
//! [`SlotId`] therefore names one incarnation of a request object and is
//! never reused while the pool lives (short of 2^32 reuses of one index).

use crossbeam_queue::ArrayQueue;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::error;

use common::PoolSettings;

struct PoolInner {
    capacity: usize,
    free: ArrayQueue<u32>,
    generations: Box<[AtomicU32]>,
}

/// Shared handle to a request object pool
///
/// Cloning is cheap; all clones draw from the same slots.
#[derive(Clone)]
pub struct RequestPool {
    inner: Arc<PoolInner>,
}

impl RequestPool {
    /// Create a pool with room for `capacity` outstanding request objects
    ///
    /// Capacity is clamped to `u32::MAX`. A zero-capacity pool is valid and
    /// always exhausted.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        let free = ArrayQueue::new(capacity.max(1));
        for index in 0..capacity as u32 {
            // Cannot fail: the queue was sized for every index
            let _ = free.push(index);
        }
        let generations = (0..capacity).map(|_| AtomicU32::new(0)).collect();

        Self {
            inner: Arc::new(PoolInner {
                capacity,
                free,
                generations,
            }),
        }
    }

    pub fn from_settings(settings: &PoolSettings) -> Self {
        Self::new(settings.capacity)
    }

    /// Take a free slot, or `None` if every slot is in use
    pub fn allocate(&self) -> Option<PoolSlot> {
        let index = self.inner.free.pop()?;
        let generation = self.inner.generations[index as usize].load(Ordering::Acquire);
        Some(PoolSlot {
            pool: self.inner.clone(),
            index,
            generation,
        })
    }

    /// Return a slot to the pool
    ///
    /// Equivalent to dropping it; spelled out for call sites where the
    /// release is the point.
    pub fn release(&self, slot: PoolSlot) {
        debug_assert!(
            Arc::ptr_eq(&self.inner, &slot.pool),
            "slot {} released to a different pool",
            slot.id()
        );
        drop(slot);
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of free slots right now
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    pub fn in_use(&self) -> usize {
        self.inner.capacity - self.available()
    }
}

impl fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

/// Identity of one incarnation of a pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Exclusive ownership of one pool slot
pub struct PoolSlot {
    pool: Arc<PoolInner>,
    index: u32,
    generation: u32,
}

impl PoolSlot {
    pub fn id(&self) -> SlotId {
        SlotId {
            index: self.index,
            generation: self.generation,
        }
    }
}

impl fmt::Debug for PoolSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolSlot({})", self.id())
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.generations[self.index as usize].fetch_add(1, Ordering::AcqRel);
        if self.pool.free.push(self.index).is_err() {
            error!("request pool free list overflow releasing slot {}", self.id());
        }
    }
}
