//! Spawn, join and cancel OS threads.
//!
//! The entry's return value travels through a shared slot rather than the
//! OS exit code, so it survives detach.
//!
//! [`ThreadHandle::spawn`] and [`ThreadHandle::spawn_cancellable`] catch
//! panics and report them on join; such threads only ever stop
//! cooperatively. [`ThreadHandle::spawn_terminable`] keeps no catching frame
//! on the thread's stack, which is what lets
//! [`force_cancel`](ThreadHandle::force_cancel) stop it mid-call.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex as SlotLock;

use crate::error::SyncError;
use crate::sys::{Backend, DefaultBackend, RawThread, Termination, ThreadMain};

type Slot<T> = Arc<SlotLock<Option<std::thread::Result<T>>>>;

/// Fills the slot of a terminable entry that is unwinding from a panic.
/// A slot left empty reads as cancelled on join.
struct PanicMarker<T>(Slot<T>);

impl<T> Drop for PanicMarker<T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut slot = self.0.lock();
            if slot.is_none() {
                *slot = Some(Err(Box::new("thread entry panicked")));
            }
        }
    }
}

/// Cooperative cancellation flag shared between a handle and its thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Owning handle to a spawned thread producing a `T`.
///
/// Consumed by exactly one of [`join`](Self::join), [`cancel`](Self::cancel)
/// or [`force_cancel`](Self::force_cancel). Dropping it detaches the thread.
pub struct ThreadHandle<T, B: Backend = DefaultBackend> {
    raw: Option<B::Thread>,
    slot: Slot<T>,
    token: CancelToken,
    _backend: PhantomData<B>,
}

/// Spawns `entry` on the default backend.
pub fn spawn<F, T>(entry: F) -> Result<ThreadHandle<T>, SyncError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    ThreadHandle::spawn(entry)
}

/// Spawns `entry` on the default backend, handing it the thread's
/// [`CancelToken`].
pub fn spawn_cancellable<F, T>(entry: F) -> Result<ThreadHandle<T>, SyncError>
where
    F: FnOnce(CancelToken) -> T + Send + 'static,
    T: Send + 'static,
{
    ThreadHandle::spawn_cancellable(entry)
}

impl<T: Send + 'static, B: Backend> ThreadHandle<T, B> {
    /// Starts `entry` on a new thread. It may begin running before this
    /// returns.
    pub fn spawn<F>(entry: F) -> Result<Self, SyncError>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::spawn_cancellable(move |_| entry())
    }

    pub fn spawn_cancellable<F>(entry: F) -> Result<Self, SyncError>
    where
        F: FnOnce(CancelToken) -> T + Send + 'static,
    {
        Self::start(entry, Termination::Refused)
    }

    /// Starts `entry` on a thread that [`force_cancel`](Self::force_cancel)
    /// can stop before it returns.
    ///
    /// The entry runs without a panic-catching frame. On the posix backend a
    /// panic escaping it aborts the process, so this is meant for entries
    /// that call into foreign code and cannot panic.
    pub fn spawn_terminable<F>(entry: F) -> Result<Self, SyncError>
    where
        F: FnOnce(CancelToken) -> T + Send + 'static,
    {
        Self::start(entry, Termination::Allowed)
    }

    fn start<F>(entry: F, termination: Termination) -> Result<Self, SyncError>
    where
        F: FnOnce(CancelToken) -> T + Send + 'static,
    {
        let slot: Slot<T> = Arc::new(SlotLock::new(None));
        let token = CancelToken::new();

        let thread_slot = Arc::clone(&slot);
        let thread_token = token.clone();
        let main: ThreadMain = match termination {
            Termination::Refused => Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(move || entry(thread_token)));
                *thread_slot.lock() = Some(outcome);
            }),
            Termination::Allowed => Box::new(move || {
                let marker = PanicMarker(thread_slot);
                let value = entry(thread_token);
                *marker.0.lock() = Some(Ok(value));
            }),
        };
        let raw = B::Thread::spawn(main, termination)?;
        tracing::trace!(backend = B::NAME, ?termination, "thread spawned");

        Ok(Self {
            raw: Some(raw),
            slot,
            token,
            _backend: PhantomData,
        })
    }

    /// The token passed to a [`spawn_cancellable`] entry.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.token
    }

    /// Whether the entry has returned or panicked.
    pub fn is_finished(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Waits for the entry to finish and returns its value.
    pub fn join(mut self) -> Result<T, SyncError> {
        if let Some(raw) = self.raw.take() {
            raw.join()?;
        }
        match self.slot.lock().take() {
            Some(Ok(value)) => Ok(value),
            Some(Err(payload)) => Err(SyncError::from_panic(payload.as_ref())),
            None => Err(SyncError::ThreadCancelled),
        }
    }

    /// Requests cooperative cancellation and detaches without waiting.
    pub fn cancel(mut self) {
        self.token.cancel();
        if let Some(raw) = self.raw.take() {
            raw.detach();
        }
    }

    /// Like [`cancel`](Self::cancel), and additionally asks the OS to
    /// terminate a thread started with [`spawn_terminable`](Self::spawn_terminable).
    ///
    /// On the posix backend under Linux the thread stops at its next
    /// cancellation point (sleep, semaphore wait, condition wait, join) and
    /// the C library unwinds its stack, running the destructors on it. Other
    /// threads, and every thread on the portable backend, only see the token.
    ///
    /// # Safety
    ///
    /// Locks the target holds stay locked. A condition wait stopped this way
    /// leaves its mutex held by the dead thread.
    pub unsafe fn force_cancel(mut self) {
        self.token.cancel();
        if let Some(raw) = self.raw.take() {
            tracing::debug!(backend = B::NAME, "forcing thread termination");
            // SAFETY: forwarded from the caller.
            unsafe { raw.terminate() };
        }
    }
}

impl<T, B: Backend> Drop for ThreadHandle<T, B> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            raw.detach();
        }
    }
}

impl<T, B: Backend> std::fmt::Debug for ThreadHandle<T, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("backend", &B::NAME)
            .field("finished", &self.slot.lock().is_some())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
