//! ABI layer for counting semaphores.

use std::ffi::c_int;
use std::ptr;

use osgeneric_core::Semaphore;

use crate::runtime_policy;

/// Opaque semaphore returned by [`og_create_sema`], starting at zero.
pub struct OgSema(Semaphore);

#[inline]
unsafe fn sema_ref<'a>(sema: *mut OgSema) -> Option<&'a Semaphore> {
    // SAFETY: caller passes null or a live handle from `og_create_sema`.
    unsafe { sema.as_ref() }.map(|s| &s.0)
}

/// Returns null when the platform cannot create a semaphore.
#[unsafe(no_mangle)]
pub extern "C" fn og_create_sema() -> *mut OgSema {
    match Semaphore::new() {
        Ok(s) => Box::into_raw(Box::new(OgSema(s))),
        Err(e) => {
            tracing::warn!(errno = e.errno(), error = %e, "og_create_sema failed");
            ptr::null_mut()
        }
    }
}

/// Current count, or -1 for a null handle or a failed query.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_get_sema(sema: *mut OgSema) -> c_int {
    // SAFETY: handle contract.
    let Some(s) = (unsafe { sema_ref(sema) }) else {
        return -1;
    };
    match s.count() {
        Ok(n) => c_int::try_from(n).unwrap_or(c_int::MAX),
        Err(e) => {
            tracing::warn!(errno = e.errno(), error = %e, "og_get_sema failed");
            -1
        }
    }
}

/// Blocks until the count is positive, then decrements it. Failures have no
/// C return channel and go through [`runtime_policy::fatal`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_lock_sema(sema: *mut OgSema) {
    // SAFETY: handle contract.
    let Some(s) = (unsafe { sema_ref(sema) }) else {
        runtime_policy::null_handle("og_lock_sema");
        return;
    };
    if let Err(e) = s.wait() {
        runtime_policy::fatal("og_lock_sema", &e);
    }
}

/// Increments the count unless it is already at the ceiling, which is not
/// an error. Other failures go through [`runtime_policy::fatal`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_unlock_sema(sema: *mut OgSema) {
    // SAFETY: handle contract.
    let Some(s) = (unsafe { sema_ref(sema) }) else {
        runtime_policy::null_handle("og_unlock_sema");
        return;
    };
    if let Err(e) = s.signal() {
        runtime_policy::fatal("og_unlock_sema", &e);
    }
}

/// Destroys the semaphore. One with blocked waiters is leaked, handle and
/// all, so they can still be woken through it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_delete_sema(sema: *mut OgSema) {
    // SAFETY: handle contract.
    let Some(s) = (unsafe { sema_ref(sema) }) else {
        return;
    };
    let waiters = s.waiters();
    if waiters != 0 {
        tracing::warn!(waiters, "og_delete_sema with blocked waiters, leaking it");
        return;
    }
    // SAFETY: live handle from `og_create_sema`, released exactly once.
    let OgSema(s) = *unsafe { Box::from_raw(sema) };
    if let Err(e) = s.delete() {
        tracing::warn!(errno = e.errno(), error = %e, "og_delete_sema failed, semaphore leaked");
    }
}
