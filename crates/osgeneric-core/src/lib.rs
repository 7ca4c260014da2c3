//! Thread, lock, semaphore, condition variable and clock primitives with one
//! API over interchangeable OS backends.
//!
//! The typed wrappers here are generic over a [`sys::Backend`] and default to
//! the one selected at build time ([`sys::DefaultBackend`]). Every fallible
//! operation returns [`SyncError`]; the C surface in `osgeneric-abi` maps
//! those onto null handles, sentinel values or process abort.

#![deny(unsafe_code)]

/// Instantiates generic `fn name<B: Backend>()` tests once per backend.
#[cfg(test)]
macro_rules! backend_tests {
    ($($name:ident),* $(,)?) => {
        mod portable_backend {
            $(
                #[test]
                fn $name() {
                    super::$name::<crate::sys::portable::Portable>();
                }
            )*
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        mod posix_backend {
            $(
                #[test]
                fn $name() {
                    super::$name::<crate::sys::posix::Posix>();
                }
            )*
        }
    };
}

#[allow(unsafe_code)]
pub mod cond;
pub mod errno;
pub mod error;
#[cfg(test)]
#[allow(unsafe_code)]
mod footprint;
#[allow(unsafe_code)]
pub mod mutex;
#[allow(unsafe_code)]
pub mod sema;
#[allow(unsafe_code)]
pub mod sys;
#[allow(unsafe_code)]
pub mod thread;
pub mod time;

/// Highest count a [`Semaphore`] can reach; further signals are dropped.
pub const SEMA_MAX: u32 = 32_767;

pub use cond::Condvar;
pub use error::SyncError;
pub use mutex::{Mutex, MutexGuard};
pub use sema::Semaphore;
pub use sys::{Backend, DefaultBackend};
pub use thread::{CancelToken, ThreadHandle, spawn, spawn_cancellable};
