//! Pure-Rust backend over `parking_lot` and `std`.
//!
//! Used where the libc primitives are unavailable or unsuitable, and
//! selectable everywhere with the `portable-backend` feature.

use std::path::Path;
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, UNIX_EPOCH};

use parking_lot::lock_api::RawReentrantMutex;
use parking_lot::{Condvar, Mutex, RawMutex as ParkingRawMutex, RawThreadId};

use crate::SEMA_MAX;
use crate::errno;
use crate::error::SyncError;
use crate::sys::{
    Backend, DestroyError, RawCondvar, RawMutex, RawSemaphore, RawThread, Termination,
    ThreadMain,
};

/// `parking_lot` locks, `std` threads and an `Instant`-based clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct Portable;

/// Zero point of the portable clock, fixed by the first query.
fn clock_base() -> Instant {
    static BASE: OnceLock<Instant> = OnceLock::new();
    *BASE.get_or_init(Instant::now)
}

impl Backend for Portable {
    const NAME: &'static str = "portable";

    type Mutex = PortableMutex;
    type Semaphore = PortableSemaphore;
    type Condvar = PortableCondvar;
    type Thread = PortableThread;

    fn elapsed_secs() -> f64 {
        clock_base().elapsed().as_secs_f64()
    }

    fn elapsed_millis() -> u64 {
        u64::try_from(clock_base().elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn file_modified_secs(path: &Path) -> Result<f64, SyncError> {
        let modified = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|e| SyncError::os("metadata", e.raw_os_error().unwrap_or(errno::ENOENT)))?;
        Ok(match modified.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_secs_f64(),
            Err(before) => -before.duration().as_secs_f64(),
        })
    }

    fn sleep(dur: Duration) -> Result<(), SyncError> {
        thread::sleep(dur);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// Reentrant `parking_lot` mutex driven through its raw interface.
pub struct PortableMutex {
    raw: RawReentrantMutex<ParkingRawMutex, RawThreadId>,
}

impl RawMutex for PortableMutex {
    fn new() -> Result<Self, SyncError> {
        Ok(Self {
            raw: RawReentrantMutex::INIT,
        })
    }

    fn lock(&self) -> Result<(), SyncError> {
        self.raw.lock();
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, SyncError> {
        Ok(self.raw.try_lock())
    }

    fn unlock(&self) -> Result<(), SyncError> {
        if !self.raw.is_owned_by_current_thread() {
            return Err(SyncError::NotOwner);
        }
        // SAFETY: ownership by the calling thread was checked above.
        unsafe { self.raw.unlock() };
        Ok(())
    }

    fn destroy(self) -> Result<(), DestroyError<Self>> {
        if self.raw.is_locked() {
            return Err((self, SyncError::Busy("mutex")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SemaState {
    count: u32,
    waiters: u32,
}

pub struct PortableSemaphore {
    state: Mutex<SemaState>,
    available: Condvar,
}

impl RawSemaphore for PortableSemaphore {
    fn new() -> Result<Self, SyncError> {
        Ok(Self {
            state: Mutex::new(SemaState::default()),
            available: Condvar::new(),
        })
    }

    fn wait(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        state.waiters += 1;
        while state.count == 0 {
            self.available.wait(&mut state);
        }
        state.waiters -= 1;
        state.count -= 1;
        Ok(())
    }

    fn post(&self) -> Result<bool, SyncError> {
        let mut state = self.state.lock();
        if state.count >= SEMA_MAX {
            return Ok(false);
        }
        state.count += 1;
        if state.waiters > 0 {
            self.available.notify_one();
        }
        Ok(true)
    }

    fn count(&self) -> Result<u32, SyncError> {
        Ok(self.state.lock().count)
    }

    fn waiters(&self) -> u32 {
        self.state.lock().waiters
    }

    fn destroy(self) -> Result<(), DestroyError<Self>> {
        if self.waiters() > 0 {
            return Err((self, SyncError::Busy("semaphore")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CondState {
    /// Bumped by every signal and broadcast.
    seq: u64,
    waiters: u32,
}

/// Sequence-counter condition variable.
///
/// The caller's mutex is released only while `state` is held, so a signal
/// issued after the release always observes the waiter and bumps `seq`
/// before the waiter can sleep past it.
pub struct PortableCondvar {
    state: Mutex<CondState>,
    wake: Condvar,
}

impl RawCondvar<PortableMutex> for PortableCondvar {
    fn new() -> Result<Self, SyncError> {
        Ok(Self {
            state: Mutex::new(CondState::default()),
            wake: Condvar::new(),
        })
    }

    unsafe fn wait(&self, mutex: &PortableMutex) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        let start = state.seq;
        state.waiters += 1;
        if let Err(e) = mutex.unlock() {
            state.waiters -= 1;
            return Err(e);
        }
        while state.seq == start {
            self.wake.wait(&mut state);
        }
        state.waiters -= 1;
        drop(state);
        mutex.lock()
    }

    fn signal(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        state.seq = state.seq.wrapping_add(1);
        if state.waiters > 0 {
            self.wake.notify_one();
        }
        Ok(())
    }

    fn broadcast(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        state.seq = state.seq.wrapping_add(1);
        if state.waiters > 0 {
            self.wake.notify_all();
        }
        Ok(())
    }

    fn destroy(self) -> Result<(), DestroyError<Self>> {
        if self.state.lock().waiters > 0 {
            return Err((self, SyncError::Busy("condition variable")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

pub struct PortableThread {
    handle: JoinHandle<()>,
}

impl RawThread for PortableThread {
    fn spawn(main: ThreadMain, _termination: Termination) -> Result<Self, SyncError> {
        thread::Builder::new()
            .spawn(main)
            .map(|handle| Self { handle })
            .map_err(|e| SyncError::os("thread spawn", e.raw_os_error().unwrap_or(errno::EAGAIN)))
    }

    fn join(self) -> Result<(), SyncError> {
        self.handle
            .join()
            .map_err(|payload| SyncError::from_panic(payload.as_ref()))
    }

    fn detach(self) {
        drop(self.handle);
    }

    unsafe fn terminate(self) {
        tracing::warn!(
            backend = Portable::NAME,
            "forced termination unsupported, detaching thread instead"
        );
        self.detach();
    }
}
