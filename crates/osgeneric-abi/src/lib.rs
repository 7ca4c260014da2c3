//! C ABI for the osgeneric primitives.
//!
//! Every handle is an opaque heap pointer owned by the caller between its
//! `og_create_*` and `og_delete_*`/`og_join_thread` calls. Null handles are
//! accepted everywhere and turn the call into a no-op (or a sentinel return).
//! Failures that the C contract has no way to report go through
//! [`runtime_policy::fatal`].

#![deny(unsafe_code)]
#![allow(clippy::missing_safety_doc)]

#[allow(unsafe_code)]
pub mod cond_abi;
#[allow(unsafe_code)]
pub mod mutex_abi;
pub mod runtime_policy;
#[allow(unsafe_code)]
pub mod sema_abi;
#[allow(unsafe_code)]
pub mod thread_abi;
#[allow(unsafe_code)]
pub mod time_abi;

pub use cond_abi::OgCond;
pub use mutex_abi::OgMutex;
pub use sema_abi::OgSema;
pub use thread_abi::OgThread;
