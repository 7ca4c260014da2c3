//! ABI layer for thread creation, join and cancellation.

use std::ffi::c_void;
use std::ptr;

use osgeneric_core::ThreadHandle;

use crate::runtime_policy;

/// C thread entry: takes the creation parameter, returns the join value.
pub type StartRoutine = unsafe extern "C" fn(*mut c_void) -> *mut c_void;

/// Opaque thread handle returned by [`og_create_thread`].
pub struct OgThread(ThreadHandle<usize>);

/// Starts `routine(parameter)` on a new thread. Returns null when `routine`
/// is null or the thread cannot be created.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_create_thread(
    routine: Option<StartRoutine>,
    parameter: *mut c_void,
) -> *mut OgThread {
    let Some(routine) = routine else {
        runtime_policy::null_handle("og_create_thread");
        return ptr::null_mut();
    };
    // Raw pointers are not `Send`; the address crosses as an integer.
    let parameter = parameter as usize;
    let spawned = ThreadHandle::<usize>::spawn_terminable(move |_| {
        // SAFETY: the caller vouches for `routine` accepting `parameter`.
        unsafe { routine(parameter as *mut c_void) as usize }
    });
    match spawned {
        Ok(handle) => Box::into_raw(Box::new(OgThread(handle))),
        Err(e) => {
            tracing::warn!(errno = e.errno(), error = %e, "og_create_thread failed");
            ptr::null_mut()
        }
    }
}

/// Waits for the thread and returns its routine's value, releasing the
/// handle. Null, or a thread that did not finish normally, gives null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_join_thread(thread: *mut OgThread) -> *mut c_void {
    if thread.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: non-null handles come from `og_create_thread` and are consumed
    // exactly once.
    let OgThread(handle) = *unsafe { Box::from_raw(thread) };
    match handle.join() {
        Ok(value) => value as *mut c_void,
        Err(e) => {
            tracing::warn!(errno = e.errno(), error = %e, "og_join_thread: no value");
            ptr::null_mut()
        }
    }
}

/// Requests termination of the thread and releases the handle without
/// waiting. Null is a no-op.
///
/// With the posix backend the thread stops at its next blocking call
/// (`og_usleep`, `og_sleep`, `og_lock_sema`, `og_wait_cond`, `og_join_thread`);
/// the portable backend only detaches it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_cancel_thread(thread: *mut OgThread) {
    if thread.is_null() {
        return;
    }
    // SAFETY: as in `og_join_thread`.
    let OgThread(handle) = *unsafe { Box::from_raw(thread) };
    // SAFETY: the C contract accepts that the target's resources are
    // abandoned.
    unsafe { handle.force_cancel() };
}
