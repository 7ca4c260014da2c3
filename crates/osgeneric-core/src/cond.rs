//! Condition variable, paired with a [`Mutex`] at each wait.

use std::mem::{self, ManuallyDrop};

use crate::error::SyncError;
use crate::mutex::Mutex;
use crate::sys::{Backend, DefaultBackend, RawCondvar};

/// Wait/wake rendezvous point.
///
/// A wait may return without a matching signal. Callers re-check their
/// predicate in a loop, or use [`Condvar::wait_while`].
pub struct Condvar<B: Backend = DefaultBackend> {
    raw: ManuallyDrop<B::Condvar>,
}

impl Condvar {
    pub fn new() -> Result<Self, SyncError> {
        Self::with_backend()
    }
}

impl<B: Backend> Condvar<B> {
    pub fn with_backend() -> Result<Self, SyncError> {
        let raw = B::Condvar::new()?;
        tracing::trace!(backend = B::NAME, "condition variable created");
        Ok(Self {
            raw: ManuallyDrop::new(raw),
        })
    }

    /// Releases `mutex`, sleeps until woken and reacquires `mutex` before
    /// returning.
    ///
    /// The calling thread must hold `mutex` exactly once; otherwise this
    /// fails with [`SyncError::NotOwner`] or [`SyncError::RecursiveWait`]
    /// without releasing anything.
    pub fn wait(&self, mutex: &Mutex<B>) -> Result<(), SyncError> {
        mutex.release_for_wait()?;
        // SAFETY: `release_for_wait` checked that we hold `mutex` once.
        let result = unsafe { self.raw.wait(mutex.raw()) };
        mutex.reacquired_after_wait();
        result
    }

    /// Waits until `condition` returns `false`, re-checking after every wake.
    pub fn wait_while<F>(&self, mutex: &Mutex<B>, mut condition: F) -> Result<(), SyncError>
    where
        F: FnMut() -> bool,
    {
        while condition() {
            self.wait(mutex)?;
        }
        Ok(())
    }

    /// Wakes at least one waiter, if any.
    pub fn signal(&self) -> Result<(), SyncError> {
        self.raw.signal()
    }

    /// Wakes every current waiter.
    pub fn broadcast(&self) -> Result<(), SyncError> {
        self.raw.broadcast()
    }

    /// Destroys the condition variable; one with waiters is leaked and
    /// reported as busy.
    pub fn delete(self) -> Result<(), SyncError> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never touched again and its destructor never runs.
        let raw = unsafe { ManuallyDrop::take(&mut this.raw) };
        teardown::<B>(raw)
    }
}

fn teardown<B: Backend>(raw: B::Condvar) -> Result<(), SyncError> {
    raw.destroy().map_err(|(raw, e)| {
        mem::forget(raw);
        e
    })
}

impl<B: Backend> Drop for Condvar<B> {
    fn drop(&mut self) {
        // SAFETY: taken exactly once, here.
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        if let Err(e) = teardown::<B>(raw) {
            tracing::warn!(backend = B::NAME, error = %e, "condition variable leaked on drop");
        }
    }
}

impl<B: Backend> std::fmt::Debug for Condvar<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condvar").field("backend", &B::NAME).finish()
    }
}
