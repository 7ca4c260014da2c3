//! Raw primitive backends.
//!
//! A backend supplies one raw type per primitive plus the clock, sleep and
//! file-time queries. The typed wrappers in the crate root are generic over
//! [`Backend`]; [`DefaultBackend`] is chosen at build time:
//!
//! - [`posix::Posix`]: pthreads, unnamed `sem_t`, `clock_gettime`, `stat`.
//!   Default on Linux and Android.
//! - [`portable::Portable`]: `parking_lot` and `std`. Default everywhere else
//!   and whenever the `portable-backend` feature is enabled.
//!
//! Raw types carry no recursion bookkeeping or logging; that lives in the
//! typed layer so both backends behave identically from the outside.

use std::path::Path;
use std::time::Duration;

use crate::error::SyncError;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod posix;
pub mod portable;

/// Entry point run on a freshly spawned thread.
pub type ThreadMain = Box<dyn FnOnce() + Send + 'static>;

/// Whether [`RawThread::terminate`] may stop a thread before its main returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The main keeps a panic-catching frame on its stack. An OS-driven
    /// unwind must never reach that frame, so termination requests are
    /// ignored and only cooperative cancellation applies.
    Refused,
    /// The main has no catching frame and may be stopped at the next
    /// cancellation point. A panic escaping it aborts the process.
    Allowed,
}

/// Result of a failed destroy: the untouched object and the reason.
///
/// Callers leak the object rather than free memory the OS may still use.
pub type DestroyError<T> = (T, SyncError);

/// A set of interchangeable raw primitives.
pub trait Backend: Send + Sync + 'static {
    /// Short name used in log fields.
    const NAME: &'static str;

    type Mutex: RawMutex;
    type Semaphore: RawSemaphore;
    type Condvar: RawCondvar<Self::Mutex>;
    type Thread: RawThread;

    /// Monotonic seconds from an unspecified epoch.
    fn elapsed_secs() -> f64;

    /// Monotonic milliseconds from the same epoch as [`Backend::elapsed_secs`].
    fn elapsed_millis() -> u64;

    /// Last-modification time of `path` in seconds since the Unix epoch.
    fn file_modified_secs(path: &Path) -> Result<f64, SyncError>;

    /// Suspends the calling thread for at least `dur`.
    fn sleep(dur: Duration) -> Result<(), SyncError>;
}

/// A recursive lock: the owner may re-lock and must unlock as many times.
pub trait RawMutex: Send + Sync + Sized {
    fn new() -> Result<Self, SyncError>;

    fn lock(&self) -> Result<(), SyncError>;

    /// Returns `false` when another thread holds the lock.
    fn try_lock(&self) -> Result<bool, SyncError>;

    /// Releases one level of recursion. Fails with [`SyncError::NotOwner`]
    /// when the calling thread does not hold the lock.
    fn unlock(&self) -> Result<(), SyncError>;

    /// Tears the lock down. Fails while any thread holds it.
    fn destroy(self) -> Result<(), DestroyError<Self>>;
}

/// A counting semaphore bounded by [`crate::SEMA_MAX`].
pub trait RawSemaphore: Send + Sync + Sized {
    /// Creates a semaphore with a count of zero.
    fn new() -> Result<Self, SyncError>;

    fn wait(&self) -> Result<(), SyncError>;

    /// Increments the count. Returns `false` if it was already at the
    /// ceiling, in which case nothing changed.
    fn post(&self) -> Result<bool, SyncError>;

    fn count(&self) -> Result<u32, SyncError>;

    /// Threads currently blocked in [`RawSemaphore::wait`].
    fn waiters(&self) -> u32;

    /// Tears the semaphore down. Fails while any thread is blocked in
    /// [`RawSemaphore::wait`].
    fn destroy(self) -> Result<(), DestroyError<Self>>;
}

/// A condition variable paired with the backend's mutex at wait time.
pub trait RawCondvar<M: RawMutex>: Send + Sync + Sized {
    fn new() -> Result<Self, SyncError>;

    /// Atomically releases `mutex`, blocks until woken, then reacquires it.
    ///
    /// # Safety
    ///
    /// The calling thread must hold `mutex` exactly once.
    unsafe fn wait(&self, mutex: &M) -> Result<(), SyncError>;

    fn signal(&self) -> Result<(), SyncError>;

    fn broadcast(&self) -> Result<(), SyncError>;

    fn destroy(self) -> Result<(), DestroyError<Self>>;
}

/// An OS thread that runs one [`ThreadMain`].
pub trait RawThread: Send + Sized {
    fn spawn(main: ThreadMain, termination: Termination) -> Result<Self, SyncError>;

    /// Blocks until the thread's main returns and releases the thread.
    fn join(self) -> Result<(), SyncError>;

    /// Releases the handle without waiting; the thread keeps running.
    fn detach(self);

    /// Requests forced termination and releases the handle without waiting.
    ///
    /// Only threads spawned with [`Termination::Allowed`] are stopped; the
    /// rest run on as if detached.
    ///
    /// # Safety
    ///
    /// Whatever the target holds (locks, heap, open files) is abandoned.
    /// Backends that cannot terminate a thread fall back to [`RawThread::detach`].
    unsafe fn terminate(self);
}

#[cfg(all(
    any(target_os = "linux", target_os = "android"),
    not(feature = "portable-backend")
))]
pub type DefaultBackend = posix::Posix;

#[cfg(not(all(
    any(target_os = "linux", target_os = "android"),
    not(feature = "portable-backend")
)))]
pub type DefaultBackend = portable::Portable;
