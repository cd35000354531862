//! Asynchronous operation handles
//!
//! An operation that the core may finish later, on another thread, is
//! split into two halves by [`io_channel`]:
//!
//! - [`IoHandle`] stays with the core. It is consumed by
//!   [`IoHandle::complete`], so each operation is completed at most once.
//!   Dropping it without completing resolves the caller's future with
//!   [`VhciError::Cancelled`].
//! - [`IoFuture`] goes back to the caller, who awaits it (or blocks on it)
//!   and may abort it through [`IoFuture::cancel`].
//!
//! # Cancellation
//!
//! While the core keeps an operation in shared state it arms a cancel
//! routine on the handle. Cancelling sets the operation's cancelled flag and
//! then takes the routine, running it on the cancelling thread. Whoever takes
//! the routine out of the handle owns the operation's teardown:
//!
//! ```text
//!   core thread                      cancelling thread
//!   ───────────                      ─────────────────
//!   arm_cancel(routine)
//!                                    cancelled = true
//!                                    take routine ──► run routine
//!   disarm_cancel() == false
//!   (routine owns it, hands off)
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::{Result, VhciError};

static NEXT_IO_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one asynchronous operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IoId(pub u64);

impl fmt::Display for IoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "io#{}", self.0)
    }
}

/// Teardown to run when an operation is cancelled while armed
pub(crate) type CancelRoutine = Box<dyn FnOnce(IoId) + Send>;

/// Outcome of arming a cancel routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Armed {
    /// No cancellation yet; the routine runs if one arrives later
    Registered,
    /// Already cancelled and the routine was taken back: the caller keeps
    /// ownership and must not publish the operation
    Cancelled,
    /// Already cancelled and the canceller took the routine: the caller must
    /// still publish the operation where the routine looks for it, then
    /// leave it alone
    CancelInFlight,
}

struct IoState {
    id: IoId,
    cancelled: AtomicBool,
    routine: Mutex<Option<CancelRoutine>>,
}

impl IoState {
    fn new() -> Self {
        Self {
            id: IoId(NEXT_IO_ID.fetch_add(1, Ordering::Relaxed)),
            cancelled: AtomicBool::new(false),
            routine: Mutex::new(None),
        }
    }

    fn routine(&self) -> MutexGuard<'_, Option<CancelRoutine>> {
        self.routine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn swap_routine(&self, routine: Option<CancelRoutine>) -> Option<CancelRoutine> {
        std::mem::replace(&mut *self.routine(), routine)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // The guard must be gone before the routine runs: the routine takes
        // the controller lock, and the controller takes this lock under it.
        let routine = self.swap_routine(None);
        if let Some(routine) = routine {
            routine(self.id);
        }
    }
}

/// Create a connected handle/future pair for one operation
pub fn io_channel<T>() -> (IoHandle<T>, IoFuture<T>) {
    let state = Arc::new(IoState::new());
    let (tx, rx) = oneshot::channel();
    (
        IoHandle {
            state: state.clone(),
            tx,
        },
        IoFuture {
            rx,
            canceller: IoCanceller { state },
        },
    )
}

/// Core-side half of an operation
pub struct IoHandle<T> {
    state: Arc<IoState>,
    tx: oneshot::Sender<Result<T>>,
}

impl<T> IoHandle<T> {
    pub fn id(&self) -> IoId {
        self.state.id
    }

    /// True once anyone has asked for this operation to be cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Arm `routine`, then check for a cancellation that raced with arming
    pub(crate) fn arm_cancel(&self, routine: CancelRoutine) -> Armed {
        self.state.swap_routine(Some(routine));
        if !self.state.is_cancelled() {
            return Armed::Registered;
        }
        match self.state.swap_routine(None) {
            Some(_) => Armed::Cancelled,
            None => Armed::CancelInFlight,
        }
    }

    /// Take the armed routine back
    ///
    /// Returns false when a canceller already took it; the routine then owns
    /// the operation and the caller must not complete or move it.
    pub(crate) fn disarm_cancel(&self) -> bool {
        self.state.swap_routine(None).is_some()
    }

    /// Resolve the caller's future
    pub fn complete(self, result: Result<T>) {
        if self.tx.send(result).is_err() {
            tracing::trace!("{} completed after its future was dropped", self.state.id);
        }
    }
}

impl<T> fmt::Debug for IoHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoHandle")
            .field("id", &self.state.id)
            .field("cancelled", &self.state.is_cancelled())
            .finish()
    }
}

/// Caller-side half of an operation
pub struct IoFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
    canceller: IoCanceller,
}

impl<T> IoFuture<T> {
    pub fn id(&self) -> IoId {
        self.canceller.id()
    }

    /// A cloneable handle that can cancel this operation from elsewhere
    pub fn canceller(&self) -> IoCanceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// The result, if the operation has already finished
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(VhciError::Cancelled)),
        }
    }

    /// Block the current thread until the operation finishes
    ///
    /// Must not be called from inside an async runtime; await the future
    /// there instead.
    pub fn blocking_wait(self) -> Result<T> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(VhciError::Cancelled))
    }
}

impl<T> Future for IoFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(VhciError::Cancelled)))
    }
}

impl<T> fmt::Debug for IoFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoFuture")
            .field("id", &self.canceller.id())
            .finish()
    }
}

/// Cancels one operation; cloneable and `Send`
#[derive(Clone)]
pub struct IoCanceller {
    state: Arc<IoState>,
}

impl IoCanceller {
    pub fn id(&self) -> IoId {
        self.state.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Request cancellation
    ///
    /// If the core holds the operation in shared state, its teardown runs
    /// on this thread before `cancel` returns. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        self.state.cancel();
    }
}

impl fmt::Debug for IoCanceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoCanceller")
            .field("id", &self.state.id)
            .field("cancelled", &self.state.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn counting_routine(counter: &Arc<AtomicUsize>) -> CancelRoutine {
        let counter = counter.clone();
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_complete_resolves_future() {
        let (handle, future) = io_channel::<u32>();
        handle.complete(Ok(7));
        assert_eq!(future.await, Ok(7));
    }

    #[tokio::test]
    async fn test_dropped_handle_resolves_cancelled() {
        let (handle, future) = io_channel::<u32>();
        drop(handle);
        assert_eq!(future.await, Err(VhciError::Cancelled));
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _fa) = io_channel::<()>();
        let (b, _fb) = io_channel::<()>();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_try_result() {
        let (handle, mut future) = io_channel::<&'static str>();
        assert!(future.try_result().is_none());
        handle.complete(Ok("done"));
        assert_eq!(future.try_result(), Some(Ok("done")));
    }

    #[test]
    fn test_cancel_runs_armed_routine_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (handle, future) = io_channel::<()>();

        assert_eq!(handle.arm_cancel(counting_routine(&runs)), Armed::Registered);
        future.cancel();
        future.cancel();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(handle.is_cancelled());
        // The routine is gone, so the core has lost the race
        assert!(!handle.disarm_cancel());
    }

    #[test]
    fn test_routine_receives_operation_id() {
        let seen = Arc::new(Mutex::new(None));
        let (handle, future) = io_channel::<()>();

        let sink = seen.clone();
        handle.arm_cancel(Box::new(move |id| {
            *sink.lock().unwrap() = Some(id);
        }));
        future.cancel();

        assert_eq!(*seen.lock().unwrap(), Some(handle.id()));
    }

    #[test]
    fn test_arm_after_cancel_is_refused() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (handle, future) = io_channel::<()>();

        future.cancel();
        assert_eq!(handle.arm_cancel(counting_routine(&runs)), Armed::Cancelled);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disarm_prevents_routine() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (handle, future) = io_channel::<()>();

        handle.arm_cancel(counting_routine(&runs));
        assert!(handle.disarm_cancel());
        future.cancel();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_arm_racing_cancel_has_one_owner() {
        // Whatever the interleaving, exactly one side ends up owning the
        // teardown: either arm reports Cancelled, or the routine runs.
        for _ in 0..500 {
            let runs = Arc::new(AtomicUsize::new(0));
            let (handle, future) = io_channel::<()>();
            let canceller = future.canceller();

            let racer = thread::spawn(move || canceller.cancel());
            let armed = handle.arm_cancel(counting_routine(&runs));
            racer.join().unwrap();

            let refused = usize::from(armed == Armed::Cancelled);
            assert_eq!(runs.load(Ordering::SeqCst) + refused, 1, "armed = {:?}", armed);
        }
    }

    #[test]
    fn test_blocking_wait_across_threads() {
        let (handle, future) = io_channel::<u64>();
        let completer = thread::spawn(move || handle.complete(Ok(99)));
        assert_eq!(future.blocking_wait(), Ok(99));
        completer.join().unwrap();
    }
}
