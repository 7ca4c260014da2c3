//! Recursive mutex.
//!
//! The same thread may lock any number of times and must unlock as many
//! times before another thread can acquire it. Ownership and depth are
//! tracked here rather than trusted to the backend, so non-owner unlocks and
//! busy deletes are reported identically everywhere.

use std::cell::Cell;
use std::mem::{self, ManuallyDrop};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::SyncError;
use crate::sys::{Backend, DefaultBackend, RawMutex};

static NEXT_OWNER_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static OWNER_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Nonzero identifier of the calling thread, stable for its lifetime.
pub(crate) fn current_owner_token() -> u64 {
    OWNER_TOKEN.with(|slot| {
        let existing = slot.get();
        if existing != 0 {
            return existing;
        }
        let fresh = NEXT_OWNER_TOKEN.fetch_add(1, Ordering::Relaxed);
        slot.set(fresh);
        fresh
    })
}

/// A recursive lock backed by `B`.
///
/// Dropping a mutex that is still held leaks the OS object instead of
/// destroying it under its holder.
pub struct Mutex<B: Backend = DefaultBackend> {
    raw: ManuallyDrop<B::Mutex>,
    /// Token of the holding thread, 0 when unlocked.
    owner: AtomicU64,
    /// Recursion depth; only the owner writes it.
    depth: AtomicU32,
}

impl Mutex {
    /// Creates an unlocked mutex on the default backend.
    pub fn new() -> Result<Self, SyncError> {
        Self::with_backend()
    }
}

impl<B: Backend> Mutex<B> {
    /// Creates an unlocked mutex on backend `B`.
    pub fn with_backend() -> Result<Self, SyncError> {
        let raw = B::Mutex::new()?;
        tracing::trace!(backend = B::NAME, "mutex created");
        Ok(Self {
            raw: ManuallyDrop::new(raw),
            owner: AtomicU64::new(0),
            depth: AtomicU32::new(0),
        })
    }

    /// Blocks until the calling thread holds the lock (again).
    pub fn lock(&self) -> Result<(), SyncError> {
        self.raw.lock()?;
        self.note_acquired();
        Ok(())
    }

    /// Takes the lock if it is free or already held by the calling thread.
    pub fn try_lock(&self) -> Result<bool, SyncError> {
        let acquired = self.raw.try_lock()?;
        if acquired {
            self.note_acquired();
        }
        Ok(acquired)
    }

    /// Releases one level of recursion.
    pub fn unlock(&self) -> Result<(), SyncError> {
        if !self.is_held_by_current_thread() {
            return Err(SyncError::NotOwner);
        }
        let remaining = self.depth.load(Ordering::Relaxed).saturating_sub(1);
        self.depth.store(remaining, Ordering::Relaxed);
        if remaining == 0 {
            self.owner.store(0, Ordering::Release);
        }
        if let Err(e) = self.raw.unlock() {
            // The backend still counts us as holder; restore the bookkeeping.
            self.note_acquired();
            return Err(e);
        }
        Ok(())
    }

    /// Locks and returns a guard that unlocks on drop.
    pub fn lock_guard(&self) -> Result<MutexGuard<'_, B>, SyncError> {
        self.lock()?;
        Ok(MutexGuard { mutex: self })
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_owner_token()
    }

    /// Recursion depth as seen by the holding thread; 0 when unlocked.
    pub fn depth(&self) -> u32 {
        if self.is_held_by_current_thread() {
            self.depth.load(Ordering::Relaxed)
        } else if self.owner.load(Ordering::Acquire) == 0 {
            0
        } else {
            // Held elsewhere; the exact count is the owner's business.
            self.depth.load(Ordering::Relaxed).max(1)
        }
    }

    /// Destroys the mutex. A mutex that is still held is leaked and
    /// reported as [`SyncError::Busy`].
    pub fn delete(self) -> Result<(), SyncError> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never touched again and its destructor never runs.
        let raw = unsafe { ManuallyDrop::take(&mut this.raw) };
        teardown::<B>(raw, this.owner.load(Ordering::Acquire) != 0)
    }

    pub(crate) fn raw(&self) -> &B::Mutex {
        &self.raw
    }

    fn note_acquired(&self) {
        self.owner.store(current_owner_token(), Ordering::Release);
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Hands the lock to a condition variable wait: forgets ownership while
    /// the backend releases and reacquires the lock underneath.
    pub(crate) fn release_for_wait(&self) -> Result<(), SyncError> {
        if !self.is_held_by_current_thread() {
            return Err(SyncError::NotOwner);
        }
        let depth = self.depth.load(Ordering::Relaxed);
        if depth != 1 {
            return Err(SyncError::RecursiveWait { depth });
        }
        self.depth.store(0, Ordering::Relaxed);
        self.owner.store(0, Ordering::Release);
        Ok(())
    }

    /// Counterpart of [`Mutex::release_for_wait`] once the wait returns.
    pub(crate) fn reacquired_after_wait(&self) {
        self.note_acquired();
    }
}

fn teardown<B: Backend>(raw: B::Mutex, held: bool) -> Result<(), SyncError> {
    if held {
        mem::forget(raw);
        return Err(SyncError::Busy("mutex"));
    }
    raw.destroy().map_err(|(raw, e)| {
        mem::forget(raw);
        e
    })
}

impl<B: Backend> Drop for Mutex<B> {
    fn drop(&mut self) {
        // SAFETY: `raw` is taken exactly once, here, and never used after.
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        if let Err(e) = teardown::<B>(raw, *self.owner.get_mut() != 0) {
            tracing::warn!(backend = B::NAME, error = %e, "mutex leaked on drop");
        }
    }
}

impl<B: Backend> std::fmt::Debug for Mutex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("backend", &B::NAME)
            .field("locked", &(self.owner.load(Ordering::Relaxed) != 0))
            .finish()
    }
}

/// Holds one level of a [`Mutex`] until dropped.
#[must_use = "the mutex unlocks as soon as the guard is dropped"]
pub struct MutexGuard<'a, B: Backend = DefaultBackend> {
    mutex: &'a Mutex<B>,
}

impl<B: Backend> MutexGuard<'_, B> {
    pub fn mutex(&self) -> &Mutex<B> {
        self.mutex
    }
}

impl<B: Backend> Drop for MutexGuard<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.unlock() {
            tracing::error!(backend = B::NAME, error = %e, "unlock from guard failed");
        }
    }
}
