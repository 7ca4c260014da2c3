//! Elapsed time, sleeps and file modification time.
//!
//! All clocks here are for measuring intervals. The epoch is whatever the
//! backend uses (boot, process start) and must never be shown as a date.

use std::path::Path;
use std::time::Duration;

use crate::error::SyncError;
use crate::sys::{Backend, DefaultBackend};

/// Returned by the C ABI when a file time cannot be read.
pub const FILE_TIME_FAILURE: f64 = -1.0;

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MICRO: i64 = 1_000;
const MICROS_PER_SEC: u64 = 1_000_000;

/// Seconds plus nanoseconds, as handed to `nanosleep` or read from a clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timespec {
    /// Seconds.
    pub tv_sec: i64,
    /// Nanoseconds (0 to 999_999_999).
    pub tv_nsec: i64,
}

impl Timespec {
    /// Splits a duration into whole seconds and the sub-second remainder.
    /// Durations beyond `i64::MAX` seconds saturate.
    pub fn from_duration(dur: Duration) -> Self {
        Self {
            tv_sec: i64::try_from(dur.as_secs()).unwrap_or(i64::MAX),
            tv_nsec: i64::from(dur.subsec_nanos()),
        }
    }

    /// Converts a microsecond count, carrying whole seconds into `tv_sec`.
    pub fn from_micros(micros: u64) -> Self {
        Self {
            tv_sec: (micros / MICROS_PER_SEC) as i64,
            tv_nsec: (micros % MICROS_PER_SEC) as i64 * NANOS_PER_MICRO,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.tv_sec >= 0 && (0..NANOS_PER_SEC).contains(&self.tv_nsec)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.tv_sec as f64 + self.tv_nsec as f64 / NANOS_PER_SEC as f64
    }

    /// Whole milliseconds; negative values clamp to zero.
    pub fn as_millis(&self) -> u64 {
        if self.tv_sec < 0 {
            return 0;
        }
        (self.tv_sec as u64)
            .saturating_mul(1_000)
            .saturating_add((self.tv_nsec.max(0) / 1_000_000) as u64)
    }
}

/// Monotonic seconds from an unspecified epoch.
#[inline]
pub fn elapsed_time() -> f64 {
    DefaultBackend::elapsed_secs()
}

/// Monotonic milliseconds from the same epoch as [`elapsed_time`].
#[inline]
pub fn elapsed_time_ms() -> u64 {
    DefaultBackend::elapsed_millis()
}

/// Last-modification time of `path` in seconds since the Unix epoch.
///
/// The C ABI turns any error into [`FILE_TIME_FAILURE`].
pub fn file_modified_time(path: impl AsRef<Path>) -> Result<f64, SyncError> {
    DefaultBackend::file_modified_secs(path.as_ref())
}

/// Sleeps for at least `dur`, resuming after signal interruptions.
pub fn sleep(dur: Duration) -> Result<(), SyncError> {
    DefaultBackend::sleep(dur)
}

/// Sleeps for `secs` whole seconds.
pub fn sleep_secs(secs: u32) -> Result<(), SyncError> {
    sleep(Duration::from_secs(u64::from(secs)))
}

/// Sleeps for `micros` microseconds. Counts of a second or more sleep for
/// the full duration.
pub fn sleep_micros(micros: u64) -> Result<(), SyncError> {
    sleep(Duration::from_micros(micros))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn from_micros_carries_whole_seconds() {
        assert_eq!(
            Timespec::from_micros(1_500_000),
            Timespec { tv_sec: 1, tv_nsec: 500_000_000 }
        );
        assert_eq!(
            Timespec::from_micros(10_000),
            Timespec { tv_sec: 0, tv_nsec: 10_000_000 }
        );
        assert_eq!(Timespec::from_micros(3_000_000), Timespec { tv_sec: 3, tv_nsec: 0 });
    }

    #[test]
    fn from_duration_saturates() {
        let ts = Timespec::from_duration(Duration::new(u64::MAX, 5));
        assert_eq!(ts.tv_sec, i64::MAX);
        assert_eq!(ts.tv_nsec, 5);
    }

    #[test]
    fn millis_and_secs() {
        let ts = Timespec { tv_sec: 2, tv_nsec: 345_000_000 };
        assert_eq!(ts.as_millis(), 2_345);
        assert!((ts.as_secs_f64() - 2.345).abs() < 1e-9);
        assert_eq!(Timespec { tv_sec: -1, tv_nsec: 0 }.as_millis(), 0);
    }

    #[test]
    fn elapsed_time_is_monotonic() {
        let a = elapsed_time();
        let a_ms = elapsed_time_ms();
        sleep_micros(2_000).unwrap();
        let b = elapsed_time();
        let b_ms = elapsed_time_ms();
        assert!(b >= a + 0.001, "a={a} b={b}");
        assert!(b_ms >= a_ms + 1, "a_ms={a_ms} b_ms={b_ms}");
    }

    #[test]
    fn sleep_over_one_second_is_not_truncated() {
        let start = elapsed_time();
        sleep_micros(1_100_000).unwrap();
        assert!(elapsed_time() - start >= 1.0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("osgeneric-definitely-missing/nope.bin");
        assert!(file_modified_time(&path).is_err());
    }

    #[test]
    fn existing_file_time_is_stable() {
        let path = std::env::temp_dir().join(format!("osgeneric-time-{}.txt", std::process::id()));
        std::fs::write(&path, b"x").unwrap();
        let first = file_modified_time(&path).unwrap();
        let second = file_modified_time(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(first > 0.0);
        assert!(second >= first);
    }

    proptest! {
        #[test]
        fn prop_from_micros_is_normalized(micros in any::<u64>()) {
            let ts = Timespec::from_micros(micros);
            prop_assert!(ts.is_valid());
            let back = ts.tv_sec as u128 * 1_000_000 + (ts.tv_nsec / 1_000) as u128;
            prop_assert_eq!(back, micros as u128);
        }

        #[test]
        fn prop_from_duration_matches_parts(secs in 0u64..(i64::MAX as u64), nanos in 0u32..1_000_000_000) {
            let ts = Timespec::from_duration(Duration::new(secs, nanos));
            prop_assert!(ts.is_valid());
            prop_assert_eq!(ts.tv_sec as u64, secs);
            prop_assert_eq!(ts.tv_nsec as u32, nanos);
        }
    }
}
