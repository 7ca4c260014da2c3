//! Unified error type for every fallible primitive operation.

use thiserror::Error;

use crate::errno;

/// Failure reported by a thread, lock, semaphore, condition variable or
/// clock operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The host returned an error code from the named call.
    #[error("{op} failed: {} (errno {errno})", errno::strerror_message(*errno))]
    Os { op: &'static str, errno: i32 },

    /// The object still has holders or waiters and cannot be destroyed.
    #[error("{0} is still held or waited on")]
    Busy(&'static str),

    /// Unlock from a thread that does not hold the mutex.
    #[error("calling thread does not own the mutex")]
    NotOwner,

    /// Condition variable wait with the mutex held more than once.
    #[error("condition wait needs the mutex held exactly once (held {depth} times)")]
    RecursiveWait { depth: u32 },

    /// The spawned entry function panicked instead of returning.
    #[error("thread panicked: {message}")]
    ThreadPanicked { message: String },

    /// The thread ended without producing a value.
    #[error("thread was cancelled before producing a value")]
    ThreadCancelled,

    /// The path cannot be handed to the host (interior NUL byte).
    #[error("path contains an interior NUL byte")]
    InvalidPath,
}

impl SyncError {
    #[inline]
    pub(crate) fn os(op: &'static str, errno: i32) -> Self {
        Self::Os { op, errno }
    }

    /// Errno-style code for this failure, used by the C ABI.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Os { errno, .. } => *errno,
            Self::Busy(_) => errno::EBUSY,
            Self::NotOwner => errno::EPERM,
            Self::RecursiveWait { .. } | Self::InvalidPath => errno::EINVAL,
            Self::ThreadPanicked { .. } => errno::EDEADLK,
            Self::ThreadCancelled => errno::ESRCH,
        }
    }

    /// Builds a [`SyncError::ThreadPanicked`] from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::ThreadPanicked { message }
    }
}

/// Maps a pthread-style return code (0 on success, errno otherwise).
#[inline]
pub(crate) fn check_rc(op: &'static str, rc: i32) -> Result<(), SyncError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(SyncError::os(op, rc))
    }
}
