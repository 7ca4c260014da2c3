//! Error number definitions.
//!
//! The posix backend reports whatever the host returns; the portable backend
//! has no host errno and reports these Linux-numbered codes instead so that
//! both backends surface the same values through [`crate::SyncError::errno`].

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const ESRCH: i32 = 3;
pub const EINTR: i32 = 4;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;
pub const EDEADLK: i32 = 35;
pub const ENAMETOOLONG: i32 = 36;
pub const ENOSYS: i32 = 38;
pub const EOVERFLOW: i32 = 75;

/// Returns the error message string for the given errno value.
///
/// Covers the codes the synchronization layer can produce; anything else
/// maps to a generic message.
pub fn strerror_message(errnum: i32) -> &'static str {
    match errnum {
        0 => "Success",
        EPERM => "Operation not permitted",
        ENOENT => "No such file or directory",
        ESRCH => "No such process",
        EINTR => "Interrupted system call",
        EAGAIN => "Resource temporarily unavailable",
        ENOMEM => "Cannot allocate memory",
        EBUSY => "Device or resource busy",
        EINVAL => "Invalid argument",
        EDEADLK => "Resource deadlock avoided",
        ENAMETOOLONG => "File name too long",
        ENOSYS => "Function not implemented",
        EOVERFLOW => "Value too large for defined data type",
        _ => "Unknown error",
    }
}

/// Reads the calling thread's host errno, falling back to `default` when the
/// platform has none to report.
#[inline]
pub fn last_os_errno(default: i32) -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .filter(|e| *e != 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strerror_known() {
        assert_eq!(strerror_message(EINVAL), "Invalid argument");
        assert_eq!(strerror_message(EBUSY), "Device or resource busy");
        assert_eq!(strerror_message(EAGAIN), "Resource temporarily unavailable");
        assert_eq!(strerror_message(0), "Success");
    }

    #[test]
    fn test_strerror_unknown() {
        assert_eq!(strerror_message(9999), "Unknown error");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn constants_match_host_values() {
        assert_eq!(EPERM, libc::EPERM);
        assert_eq!(EBUSY, libc::EBUSY);
        assert_eq!(EINVAL, libc::EINVAL);
        assert_eq!(EDEADLK, libc::EDEADLK);
        assert_eq!(EOVERFLOW, libc::EOVERFLOW);
    }
}
