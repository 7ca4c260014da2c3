//! ABI layer for recursive mutexes.
//!
//! Creation, lock and unlock failures have no C return channel and go
//! through [`runtime_policy::fatal`].

use std::ptr;

use osgeneric_core::{Mutex, SyncError};

use crate::runtime_policy::{self, Mode};

/// Opaque recursive mutex returned by [`og_create_mutex`].
pub struct OgMutex(pub(crate) Mutex);

#[unsafe(no_mangle)]
pub extern "C" fn og_create_mutex() -> *mut OgMutex {
    match Mutex::new() {
        Ok(m) => Box::into_raw(Box::new(OgMutex(m))),
        Err(e) => {
            runtime_policy::fatal("og_create_mutex", &e);
            ptr::null_mut()
        }
    }
}

/// Borrows the mutex behind a handle.
///
/// # Safety
///
/// `mutex` is null or a live handle from [`og_create_mutex`].
#[inline]
pub(crate) unsafe fn mutex_ref<'a>(mutex: *mut OgMutex) -> Option<&'a Mutex> {
    // SAFETY: forwarded from the caller.
    unsafe { mutex.as_ref() }.map(|m| &m.0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_lock_mutex(mutex: *mut OgMutex) {
    // SAFETY: handle contract.
    let Some(m) = (unsafe { mutex_ref(mutex) }) else {
        runtime_policy::null_handle("og_lock_mutex");
        return;
    };
    if let Err(e) = m.lock() {
        runtime_policy::fatal("og_lock_mutex", &e);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_unlock_mutex(mutex: *mut OgMutex) {
    // SAFETY: handle contract.
    let Some(m) = (unsafe { mutex_ref(mutex) }) else {
        runtime_policy::null_handle("og_unlock_mutex");
        return;
    };
    match m.unlock() {
        Ok(()) => {}
        Err(SyncError::NotOwner) if runtime_policy::mode() == Mode::Hardened => {
            tracing::warn!("og_unlock_mutex by a non-owner ignored");
        }
        Err(e) => runtime_policy::fatal("og_unlock_mutex", &e),
    }
}

/// Destroys the mutex. A mutex that is still held is leaked, handle and
/// all, so its holder can still unlock it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_delete_mutex(mutex: *mut OgMutex) {
    // SAFETY: handle contract.
    let Some(m) = (unsafe { mutex_ref(mutex) }) else {
        return;
    };
    if m.depth() != 0 {
        tracing::warn!("og_delete_mutex on a held mutex, leaking it");
        return;
    }
    // SAFETY: live handle from `og_create_mutex`, released exactly once.
    let OgMutex(m) = *unsafe { Box::from_raw(mutex) };
    if let Err(e) = m.delete() {
        tracing::warn!(errno = e.errno(), error = %e, "og_delete_mutex failed, mutex leaked");
    }
}
