//! ABI layer for sleeps, the monotonic clock and file modification times.

use std::ffi::{CStr, c_char, c_int};
use std::path::PathBuf;

use osgeneric_core::errno;
use osgeneric_core::time::{self as time_core, FILE_TIME_FAILURE};

/// Stores `val` in the calling thread's C `errno`.
#[inline]
fn set_abi_errno(val: c_int) {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: `__errno_location` always returns the calling thread's slot.
        unsafe { *libc::__errno_location() = val };
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = val;
    }
}

/// Sleeps for `seconds` whole seconds. Non-positive values return at once.
#[unsafe(no_mangle)]
pub extern "C" fn og_sleep(seconds: c_int) {
    let Ok(secs) = u32::try_from(seconds) else {
        return;
    };
    if let Err(e) = time_core::sleep_secs(secs) {
        tracing::warn!(seconds, error = %e, "og_sleep interrupted");
    }
}

/// Sleeps for `micros` microseconds. Returns 0, or -1 with `errno` set.
#[unsafe(no_mangle)]
pub extern "C" fn og_usleep(micros: c_int) -> c_int {
    let Ok(us) = u64::try_from(micros) else {
        set_abi_errno(errno::EINVAL);
        return -1;
    };
    match time_core::sleep_micros(us) {
        Ok(()) => 0,
        Err(e) => {
            set_abi_errno(e.errno());
            -1
        }
    }
}

/// Monotonic seconds; only differences between calls are meaningful.
#[unsafe(no_mangle)]
pub extern "C" fn og_get_absolute_time() -> f64 {
    time_core::elapsed_time()
}

/// Monotonic milliseconds on the same clock as [`og_get_absolute_time`].
#[unsafe(no_mangle)]
pub extern "C" fn og_get_absolute_time_ms() -> u64 {
    time_core::elapsed_time_ms()
}

fn c_path(file: &CStr) -> Option<PathBuf> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Some(PathBuf::from(std::ffi::OsStr::from_bytes(file.to_bytes())))
    }
    #[cfg(not(unix))]
    {
        file.to_str().ok().map(PathBuf::from)
    }
}

/// Modification time of `file` in seconds since the Unix epoch, or `-1.0`
/// when it cannot be read.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn og_get_file_time(file: *const c_char) -> f64 {
    if file.is_null() {
        return FILE_TIME_FAILURE;
    }
    // SAFETY: caller passes a NUL-terminated string.
    let file = unsafe { CStr::from_ptr(file) };
    let Some(path) = c_path(file) else {
        return FILE_TIME_FAILURE;
    };
    match time_core::file_modified_time(&path) {
        Ok(secs) => secs,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "og_get_file_time failed");
            FILE_TIME_FAILURE
        }
    }
}
