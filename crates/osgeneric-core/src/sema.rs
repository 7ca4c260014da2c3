//! Counting semaphore, 0 to [`SEMA_MAX`].

use std::mem::{self, ManuallyDrop};

use crate::SEMA_MAX;
use crate::error::SyncError;
use crate::sys::{Backend, DefaultBackend, RawSemaphore};

/// A semaphore that starts at zero.
///
/// There is no timed wait: callers needing a deadline poll [`Semaphore::count`]
/// against [`crate::time::elapsed_time`].
pub struct Semaphore<B: Backend = DefaultBackend> {
    raw: ManuallyDrop<B::Semaphore>,
}

impl Semaphore {
    pub fn new() -> Result<Self, SyncError> {
        Self::with_backend()
    }
}

impl<B: Backend> Semaphore<B> {
    pub fn with_backend() -> Result<Self, SyncError> {
        let raw = B::Semaphore::new()?;
        tracing::trace!(backend = B::NAME, "semaphore created");
        Ok(Self {
            raw: ManuallyDrop::new(raw),
        })
    }

    /// Blocks until the count is positive, then decrements it.
    pub fn wait(&self) -> Result<(), SyncError> {
        self.raw.wait()
    }

    /// Increments the count and wakes at most one waiter. Returns `false`
    /// when the count was already at [`SEMA_MAX`].
    pub fn signal(&self) -> Result<bool, SyncError> {
        let moved = self.raw.post()?;
        if !moved {
            tracing::debug!(backend = B::NAME, ceiling = SEMA_MAX, "semaphore signal dropped at ceiling");
        }
        Ok(moved)
    }

    /// Current count, without blocking.
    pub fn count(&self) -> Result<u32, SyncError> {
        self.raw.count()
    }

    /// Threads currently blocked in [`Semaphore::wait`].
    pub fn waiters(&self) -> u32 {
        self.raw.waiters()
    }

    /// Destroys the semaphore. One that still has waiters is leaked and
    /// reported as busy.
    pub fn delete(self) -> Result<(), SyncError> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never touched again and its destructor never runs.
        let raw = unsafe { ManuallyDrop::take(&mut this.raw) };
        teardown(raw)
    }
}

fn teardown<S: RawSemaphore>(raw: S) -> Result<(), SyncError> {
    raw.destroy().map_err(|(raw, e)| {
        mem::forget(raw);
        e
    })
}

impl<B: Backend> Drop for Semaphore<B> {
    fn drop(&mut self) {
        // SAFETY: taken exactly once, here.
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        if let Err(e) = teardown(raw) {
            tracing::warn!(backend = B::NAME, error = %e, "semaphore leaked on drop");
        }
    }
}

impl<B: Backend> std::fmt::Debug for Semaphore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("backend", &B::NAME)
            .field("count", &self.count().ok())
            .field("waiters", &self.waiters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use proptest::prelude::*;

    use super::*;
    use crate::footprint::Footprint;
    use crate::sys::portable::Portable;

    fn fresh_count_is_zero<B: Backend>() {
        let s = Semaphore::<B>::with_backend().unwrap();
        assert_eq!(s.count().unwrap(), 0);
    }

    fn signal_then_wait_returns_to_zero<B: Backend>() {
        let s = Semaphore::<B>::with_backend().unwrap();
        assert!(s.signal().unwrap());
        assert_eq!(s.count().unwrap(), 1);
        s.wait().unwrap();
        assert_eq!(s.count().unwrap(), 0);
    }

    fn count_saturates_at_ceiling<B: Backend>() {
        let s = Semaphore::<B>::with_backend().unwrap();
        for _ in 0..SEMA_MAX {
            assert!(s.signal().unwrap());
        }
        assert_eq!(s.count().unwrap(), SEMA_MAX);
        assert!(!s.signal().unwrap());
        assert!(!s.signal().unwrap());
        assert_eq!(s.count().unwrap(), SEMA_MAX);
        s.wait().unwrap();
        assert_eq!(s.count().unwrap(), SEMA_MAX - 1);
    }

    fn wait_blocks_until_signal<B: Backend>() {
        let s = Arc::new(Semaphore::<B>::with_backend().unwrap());
        let passed = Arc::new(AtomicBool::new(false));
        let (s2, flag) = (Arc::clone(&s), Arc::clone(&passed));
        let waiter = thread::spawn(move || {
            s2.wait().unwrap();
            flag.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!passed.load(Ordering::SeqCst));
        s.signal().unwrap();
        waiter.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
        assert_eq!(s.count().unwrap(), 0);
    }

    fn blocked_waiter_is_counted<B: Backend>() {
        let s = Arc::new(Semaphore::<B>::with_backend().unwrap());
        assert_eq!(s.waiters(), 0);
        let s2 = Arc::clone(&s);
        let waiter = thread::spawn(move || s2.wait().unwrap());
        let deadline = Instant::now() + Duration::from_secs(5);
        while s.waiters() == 0 {
            assert!(Instant::now() < deadline, "waiter never blocked");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(s.waiters(), 1);
        s.signal().unwrap();
        waiter.join().unwrap();
        assert_eq!(s.waiters(), 0);
        Arc::try_unwrap(s).unwrap().delete().unwrap();
    }

    fn concurrent_signals_respect_ceiling<B: Backend>() {
        let s = Arc::new(Semaphore::<B>::with_backend().unwrap());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&s);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        s.signal().unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(s.count().unwrap(), SEMA_MAX);
    }

    fn create_delete_cycles<B: Backend>() {
        Footprint::assert_bounded("semaphore cycles", || {
            for _ in 0..10_000 {
                let s = Semaphore::<B>::with_backend().unwrap();
                s.signal().unwrap();
                s.wait().unwrap();
                s.delete().unwrap();
            }
        });
    }

    backend_tests!(
        fresh_count_is_zero,
        signal_then_wait_returns_to_zero,
        count_saturates_at_ceiling,
        wait_blocks_until_signal,
        blocked_waiter_is_counted,
        concurrent_signals_respect_ceiling,
        create_delete_cycles,
    );

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_count_is_min_of_signals_and_ceiling(k in 0u32..40_000) {
            let s = Semaphore::<Portable>::with_backend().unwrap();
            for _ in 0..k {
                s.signal().unwrap();
            }
            prop_assert_eq!(s.count().unwrap(), k.min(SEMA_MAX));
        }
    }
}
