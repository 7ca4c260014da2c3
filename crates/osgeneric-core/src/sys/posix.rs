//! pthread/`sem_t` backend.
//!
//! Every OS object lives in its own heap cell so it never moves after
//! initialisation, and is only touched through the raw pointer.

use std::cell::UnsafeCell;
use std::ffi::{CString, c_int, c_void};
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::SEMA_MAX;
use crate::errno::{self, last_os_errno};
use crate::error::{SyncError, check_rc};
use crate::sys::{
    Backend, DestroyError, RawCondvar, RawMutex, RawSemaphore, RawThread, Termination,
    ThreadMain,
};
use crate::time::Timespec;

/// `PTHREAD_CANCELED` as glibc and bionic define it: `(void *) -1`.
const PTHREAD_CANCELED: usize = usize::MAX;

/// `PTHREAD_CANCEL_DISABLE` in both glibc and musl.
#[cfg(target_os = "linux")]
const PTHREAD_CANCEL_DISABLE: c_int = 1;

#[cfg(target_os = "linux")]
unsafe extern "C" {
    fn pthread_cancel(thread: libc::pthread_t) -> c_int;
    fn pthread_setcancelstate(state: c_int, oldstate: *mut c_int) -> c_int;
}

/// pthreads, unnamed semaphores and `CLOCK_MONOTONIC`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Posix;

impl Backend for Posix {
    const NAME: &'static str = "posix";

    type Mutex = PosixMutex;
    type Semaphore = PosixSemaphore;
    type Condvar = PosixCondvar;
    type Thread = PosixThread;

    fn elapsed_secs() -> f64 {
        monotonic_now().as_secs_f64()
    }

    fn elapsed_millis() -> u64 {
        monotonic_now().as_millis()
    }

    fn file_modified_secs(path: &Path) -> Result<f64, SyncError> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| SyncError::InvalidPath)?;
        let mut st = MaybeUninit::<libc::stat>::uninit();
        // SAFETY: `c_path` is NUL-terminated and `st` is writable for one `stat`.
        let rc = unsafe { libc::stat(c_path.as_ptr(), st.as_mut_ptr()) };
        if rc != 0 {
            return Err(SyncError::os("stat", last_os_errno(errno::ENOENT)));
        }
        // SAFETY: a successful `stat` filled the buffer.
        let st = unsafe { st.assume_init() };
        let ts = Timespec {
            tv_sec: st.st_mtime as i64,
            tv_nsec: st.st_mtime_nsec as i64,
        };
        Ok(ts.as_secs_f64())
    }

    fn sleep(dur: Duration) -> Result<(), SyncError> {
        let mut req = to_libc(Timespec::from_duration(dur));
        loop {
            let mut rem = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            // SAFETY: both pointers reference live stack values.
            if unsafe { libc::nanosleep(&req, &mut rem) } == 0 {
                return Ok(());
            }
            let e = last_os_errno(errno::EINVAL);
            if e != errno::EINTR {
                return Err(SyncError::os("nanosleep", e));
            }
            req = rem;
        }
    }
}

fn monotonic_now() -> Timespec {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: `ts` is a valid out-pointer.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        tracing::error!(errno = last_os_errno(errno::EINVAL), "clock_gettime(CLOCK_MONOTONIC) failed");
        return Timespec::default();
    }
    Timespec {
        tv_sec: ts.tv_sec as i64,
        tv_nsec: ts.tv_nsec as i64,
    }
}

fn to_libc(ts: Timespec) -> libc::timespec {
    libc::timespec {
        tv_sec: ts.tv_sec as libc::time_t,
        tv_nsec: ts.tv_nsec as libc::c_long,
    }
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// `PTHREAD_MUTEX_RECURSIVE` mutex.
pub struct PosixMutex {
    inner: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

// SAFETY: pthread mutexes are designed to be shared between threads; the
// cell is only accessed through pthread calls.
unsafe impl Send for PosixMutex {}
// SAFETY: as above.
unsafe impl Sync for PosixMutex {}

impl PosixMutex {
    #[inline]
    fn as_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }
}

impl RawMutex for PosixMutex {
    fn new() -> Result<Self, SyncError> {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        // SAFETY: `attr` is writable storage for one attribute object.
        check_rc("pthread_mutexattr_init", unsafe {
            libc::pthread_mutexattr_init(attr.as_mut_ptr())
        })?;
        // SAFETY: `attr` was initialised above and is destroyed exactly once
        // below; `inner` is a stable heap cell.
        let result = unsafe {
            check_rc(
                "pthread_mutexattr_settype",
                libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_RECURSIVE),
            )
            .and_then(|()| {
                check_rc(
                    "pthread_mutex_init",
                    libc::pthread_mutex_init(inner.get(), attr.as_ptr()),
                )
            })
        };
        // SAFETY: initialised above, no longer needed.
        unsafe { libc::pthread_mutexattr_destroy(attr.as_mut_ptr()) };
        result.map(|()| Self { inner })
    }

    fn lock(&self) -> Result<(), SyncError> {
        // SAFETY: initialised in `new`, alive until `destroy`.
        check_rc("pthread_mutex_lock", unsafe { libc::pthread_mutex_lock(self.as_ptr()) })
    }

    fn try_lock(&self) -> Result<bool, SyncError> {
        // SAFETY: as in `lock`.
        match unsafe { libc::pthread_mutex_trylock(self.as_ptr()) } {
            0 => Ok(true),
            libc::EBUSY => Ok(false),
            rc => Err(SyncError::os("pthread_mutex_trylock", rc)),
        }
    }

    fn unlock(&self) -> Result<(), SyncError> {
        // SAFETY: as in `lock`. Recursive mutexes report EPERM for non-owners.
        match unsafe { libc::pthread_mutex_unlock(self.as_ptr()) } {
            0 => Ok(()),
            libc::EPERM => Err(SyncError::NotOwner),
            rc => Err(SyncError::os("pthread_mutex_unlock", rc)),
        }
    }

    fn destroy(self) -> Result<(), DestroyError<Self>> {
        // SAFETY: consumes the mutex; on failure it is handed back untouched.
        match unsafe { libc::pthread_mutex_destroy(self.as_ptr()) } {
            0 => Ok(()),
            libc::EBUSY => Err((self, SyncError::Busy("mutex"))),
            rc => Err((self, SyncError::os("pthread_mutex_destroy", rc))),
        }
    }
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

/// Unnamed process-private `sem_t`.
///
/// `sem_post` has no ceiling of its own, so posts are serialised through
/// `post_lock` and checked against [`SEMA_MAX`]. Waiters only ever lower the
/// count, so the check cannot be invalidated between read and post.
///
/// `sem_destroy` does not detect blocked waiters, so they are counted here.
pub struct PosixSemaphore {
    sem: Box<UnsafeCell<libc::sem_t>>,
    post_lock: parking_lot::Mutex<()>,
    waiters: AtomicU32,
}

/// Holds one slot in a semaphore's waiter count. Released on return and
/// when a cancelled thread is unwound out of `sem_wait`.
struct Waiting<'a>(&'a AtomicU32);

impl<'a> Waiting<'a> {
    fn enter(waiters: &'a AtomicU32) -> Self {
        waiters.fetch_add(1, Ordering::AcqRel);
        Self(waiters)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// SAFETY: `sem_t` is designed for cross-thread use through sem_* calls.
unsafe impl Send for PosixSemaphore {}
// SAFETY: as above.
unsafe impl Sync for PosixSemaphore {}

impl PosixSemaphore {
    #[inline]
    fn as_ptr(&self) -> *mut libc::sem_t {
        self.sem.get()
    }
}

impl RawSemaphore for PosixSemaphore {
    fn new() -> Result<Self, SyncError> {
        // SAFETY: `sem_t` is plain data; all-zero is a valid pre-init state.
        let sem = Box::new(UnsafeCell::new(unsafe { std::mem::zeroed::<libc::sem_t>() }));
        // SAFETY: stable heap cell, not shared across processes.
        if unsafe { libc::sem_init(sem.get(), 0, 0) } != 0 {
            return Err(SyncError::os("sem_init", last_os_errno(errno::ENOSYS)));
        }
        Ok(Self {
            sem,
            post_lock: parking_lot::Mutex::new(()),
            waiters: AtomicU32::new(0),
        })
    }

    fn wait(&self) -> Result<(), SyncError> {
        let _waiting = Waiting::enter(&self.waiters);
        loop {
            // SAFETY: initialised in `new`, alive until `destroy`.
            if unsafe { libc::sem_wait(self.as_ptr()) } == 0 {
                return Ok(());
            }
            let e = last_os_errno(errno::EINVAL);
            if e != errno::EINTR {
                return Err(SyncError::os("sem_wait", e));
            }
        }
    }

    fn post(&self) -> Result<bool, SyncError> {
        let _serial = self.post_lock.lock();
        if self.count()? >= SEMA_MAX {
            return Ok(false);
        }
        // SAFETY: as in `wait`.
        if unsafe { libc::sem_post(self.as_ptr()) } != 0 {
            return Err(SyncError::os("sem_post", last_os_errno(errno::EOVERFLOW)));
        }
        Ok(true)
    }

    fn count(&self) -> Result<u32, SyncError> {
        let mut value: c_int = 0;
        // SAFETY: as in `wait`; `value` is a valid out-pointer.
        if unsafe { libc::sem_getvalue(self.as_ptr(), &mut value) } != 0 {
            return Err(SyncError::os("sem_getvalue", last_os_errno(errno::EINVAL)));
        }
        // Some implementations report blocked waiters as a negative value.
        Ok(value.max(0) as u32)
    }

    fn waiters(&self) -> u32 {
        self.waiters.load(Ordering::Acquire)
    }

    fn destroy(self) -> Result<(), DestroyError<Self>> {
        if self.waiters() > 0 {
            return Err((self, SyncError::Busy("semaphore")));
        }
        // SAFETY: consumes the semaphore; on failure it is handed back.
        if unsafe { libc::sem_destroy(self.as_ptr()) } != 0 {
            let e = last_os_errno(errno::EINVAL);
            return Err((self, SyncError::os("sem_destroy", e)));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

pub struct PosixCondvar {
    inner: Box<UnsafeCell<libc::pthread_cond_t>>,
}

// SAFETY: pthread condition variables are shared through pthread calls only.
unsafe impl Send for PosixCondvar {}
// SAFETY: as above.
unsafe impl Sync for PosixCondvar {}

impl PosixCondvar {
    #[inline]
    fn as_ptr(&self) -> *mut libc::pthread_cond_t {
        self.inner.get()
    }
}

impl RawCondvar<PosixMutex> for PosixCondvar {
    fn new() -> Result<Self, SyncError> {
        let inner = Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER));
        // SAFETY: stable heap cell; null attributes select the defaults.
        check_rc("pthread_cond_init", unsafe {
            libc::pthread_cond_init(inner.get(), ptr::null())
        })?;
        Ok(Self { inner })
    }

    unsafe fn wait(&self, mutex: &PosixMutex) -> Result<(), SyncError> {
        // SAFETY: both objects are initialised; the caller holds `mutex` once.
        check_rc("pthread_cond_wait", unsafe {
            libc::pthread_cond_wait(self.as_ptr(), mutex.as_ptr())
        })
    }

    fn signal(&self) -> Result<(), SyncError> {
        // SAFETY: initialised in `new`.
        check_rc("pthread_cond_signal", unsafe { libc::pthread_cond_signal(self.as_ptr()) })
    }

    fn broadcast(&self) -> Result<(), SyncError> {
        // SAFETY: initialised in `new`.
        check_rc("pthread_cond_broadcast", unsafe {
            libc::pthread_cond_broadcast(self.as_ptr())
        })
    }

    fn destroy(self) -> Result<(), DestroyError<Self>> {
        // SAFETY: consumes the condvar; on failure it is handed back.
        match unsafe { libc::pthread_cond_destroy(self.as_ptr()) } {
            0 => Ok(()),
            libc::EBUSY => Err((self, SyncError::Busy("condition variable"))),
            rc => Err((self, SyncError::os("pthread_cond_destroy", rc))),
        }
    }
}

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// A joinable pthread.
pub struct PosixThread {
    id: libc::pthread_t,
}

struct Start {
    main: ThreadMain,
    termination: Termination,
}

extern "C" fn thread_start(arg: *mut c_void) -> *mut c_void {
    // SAFETY: `arg` is the box leaked by `PosixThread::spawn`, handed over once.
    let start = *unsafe { Box::from_raw(arg.cast::<Start>()) };
    if start.termination == Termination::Refused {
        disable_cancellation();
    }
    // No unwind may be caught on this stack: pthread_cancel ends the thread
    // by unwinding it back to the C library's thread entry.
    (start.main)();
    ptr::null_mut()
}

#[cfg(target_os = "linux")]
fn disable_cancellation() {
    let mut old: c_int = 0;
    // SAFETY: `old` is a valid out-pointer.
    let rc = unsafe { pthread_setcancelstate(PTHREAD_CANCEL_DISABLE, &mut old) };
    if rc != 0 {
        tracing::warn!(errno = rc, "pthread_setcancelstate failed");
    }
}

/// Bionic has no thread cancellation.
#[cfg(not(target_os = "linux"))]
fn disable_cancellation() {}

impl RawThread for PosixThread {
    fn spawn(main: ThreadMain, termination: Termination) -> Result<Self, SyncError> {
        let arg = Box::into_raw(Box::new(Start { main, termination })).cast::<c_void>();
        let mut id = MaybeUninit::<libc::pthread_t>::uninit();
        // SAFETY: `id` is a valid out-pointer and `thread_start` takes
        // ownership of `arg` only if the thread is created.
        let rc = unsafe { libc::pthread_create(id.as_mut_ptr(), ptr::null(), thread_start, arg) };
        if rc != 0 {
            // SAFETY: no thread was created, so `arg` is still ours.
            drop(unsafe { Box::from_raw(arg.cast::<Start>()) });
            return Err(SyncError::os("pthread_create", rc));
        }
        // SAFETY: written by a successful pthread_create.
        Ok(Self { id: unsafe { id.assume_init() } })
    }

    fn join(self) -> Result<(), SyncError> {
        let mut ret: *mut c_void = ptr::null_mut();
        // SAFETY: `self.id` is joinable and consumed here.
        check_rc("pthread_join", unsafe { libc::pthread_join(self.id, &mut ret) })?;
        if ret as usize == PTHREAD_CANCELED {
            return Err(SyncError::ThreadCancelled);
        }
        Ok(())
    }

    fn detach(self) {
        // SAFETY: `self.id` is joinable and consumed here.
        let rc = unsafe { libc::pthread_detach(self.id) };
        if rc != 0 {
            tracing::warn!(errno = rc, "pthread_detach failed");
        }
    }

    #[cfg(target_os = "linux")]
    unsafe fn terminate(self) {
        // SAFETY: `self.id` names a live or finished-but-unjoined thread.
        // Threads spawned with `Termination::Refused` leave it pending.
        let rc = unsafe { pthread_cancel(self.id) };
        if rc != 0 {
            tracing::warn!(errno = rc, "pthread_cancel failed");
        }
        self.detach();
    }

    #[cfg(not(target_os = "linux"))]
    unsafe fn terminate(self) {
        tracing::warn!(
            backend = Posix::NAME,
            "forced termination unsupported, detaching thread instead"
        );
        self.detach();
    }
}
