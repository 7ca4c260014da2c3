//! ABI layer for condition variables.

use std::ptr;

use osgeneric_core::Condvar;

use crate::mutex_abi::{OgMutex, mutex_ref};
use crate::runtime_policy;

/// Opaque condition variable returned by [`og_create_cond`].
pub struct OgCond(Condvar);

#[inline]
unsafe fn cond_ref<'a>(cond: *mut OgCond) -> Option<&'a Condvar> {
    // SAFETY: caller passes null or a live handle from `og_create_cond`.
    unsafe { cond.as_ref() }.map(|c| &c.0)
}

/// Returns null when the platform cannot create a condition variable.
#[unsafe(no_mangle)]
pub extern "C" fn og_create_cond() -> *mut OgCond {
    match Condvar::new() {
        Ok(c) => Box::into_raw(Box::new(OgCond(c))),
        Err(e) => {
            tracing::warn!(errno = e.errno(), error = %e, "og_create_cond failed");
            ptr::null_mut()
        }
    }
}

/// Releases `mutex`, waits for a wake-up and reacquires `mutex`. The caller
/// must hold `mutex` exactly once. May return spuriously.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_wait_cond(cond: *mut OgCond, mutex: *mut OgMutex) {
    // SAFETY: handle contract for both arguments.
    let (Some(c), Some(m)) = (unsafe { cond_ref(cond) }, unsafe { mutex_ref(mutex) }) else {
        runtime_policy::null_handle("og_wait_cond");
        return;
    };
    if let Err(e) = c.wait(m) {
        runtime_policy::fatal("og_wait_cond", &e);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_signal_cond(cond: *mut OgCond) {
    // SAFETY: handle contract.
    let Some(c) = (unsafe { cond_ref(cond) }) else {
        runtime_policy::null_handle("og_signal_cond");
        return;
    };
    if let Err(e) = c.signal() {
        runtime_policy::fatal("og_signal_cond", &e);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_broadcast_cond(cond: *mut OgCond) {
    // SAFETY: handle contract.
    let Some(c) = (unsafe { cond_ref(cond) }) else {
        runtime_policy::null_handle("og_broadcast_cond");
        return;
    };
    if let Err(e) = c.broadcast() {
        runtime_policy::fatal("og_broadcast_cond", &e);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_delete_cond(cond: *mut OgCond) {
    if cond.is_null() {
        return;
    }
    // SAFETY: live handle from `og_create_cond`, released exactly once.
    let OgCond(c) = *unsafe { Box::from_raw(cond) };
    if let Err(e) = c.delete() {
        tracing::warn!(errno = e.errno(), error = %e, "og_delete_cond failed, condition variable leaked");
    }
}
