//! Process-wide failure policy for ABI entrypoints.
//!
//! The mode is resolved from `OSGENERIC_MODE` on first use and stays fixed
//! for the life of the process (tests may override it).

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

use osgeneric_core::SyncError;

const MODE_ENV: &str = "OSGENERIC_MODE";

const MODE_UNRESOLVED: u8 = 0;
const MODE_STRICT: u8 = 1;
const MODE_HARDENED: u8 = 2;

static MODE_STATE: AtomicU8 = AtomicU8::new(MODE_UNRESOLVED);

/// How ABI calls react to failures they cannot report to C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Unexpected lock, semaphore and condition variable failures abort the
    /// process.
    Strict,
    /// Recoverable failures are logged and the call returns.
    Hardened,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Strict => "strict",
            Mode::Hardened => "hardened",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Mode::Strict => MODE_STRICT,
            Mode::Hardened => MODE_HARDENED,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            MODE_HARDENED => Mode::Hardened,
            _ => Mode::Strict,
        }
    }
}

/// Parses a mode value. Anything unrecognised is strict.
pub fn parse_mode_value(raw: &str) -> Mode {
    match raw.trim().to_ascii_lowercase().as_str() {
        "hardened" | "repair" => Mode::Hardened,
        _ => Mode::Strict,
    }
}

fn mode_from_env() -> Mode {
    std::env::var(MODE_ENV)
        .map(|v| parse_mode_value(&v))
        .unwrap_or(Mode::Strict)
}

#[must_use]
pub fn mode() -> Mode {
    let cached = MODE_STATE.load(Ordering::Acquire);
    if cached != MODE_UNRESOLVED {
        return Mode::from_u8(cached);
    }
    let resolved = mode_from_env();
    // Racing resolvers read the same environment; first store wins.
    match MODE_STATE.compare_exchange(
        MODE_UNRESOLVED,
        resolved.to_u8(),
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => {
            tracing::debug!(mode = resolved.as_str(), "osgeneric runtime mode resolved");
            resolved
        }
        Err(existing) => Mode::from_u8(existing),
    }
}

/// Forces the mode; `None` drops the cached value so the next call
/// re-reads the environment.
#[doc(hidden)]
pub fn set_mode_for_tests(mode: Option<Mode>) {
    MODE_STATE.store(mode.map_or(MODE_UNRESOLVED, Mode::to_u8), Ordering::SeqCst);
}

/// Reports a failure that the C signature cannot carry.
///
/// Strict mode logs, writes one line to stderr (no subscriber may be
/// installed) and aborts. Hardened mode logs and returns.
pub fn fatal(symbol: &'static str, err: &SyncError) {
    match mode() {
        Mode::Strict => {
            tracing::error!(symbol, errno = err.errno(), error = %err, "fatal osgeneric failure");
            let _ = writeln!(std::io::stderr(), "osgeneric: {symbol}: {err}, aborting");
            std::process::abort();
        }
        Mode::Hardened => {
            tracing::error!(
                symbol,
                errno = err.errno(),
                error = %err,
                "osgeneric failure healed, continuing"
            );
        }
    }
}

/// Logs a null handle passed where an object is expected.
#[inline]
pub(crate) fn null_handle(symbol: &'static str) {
    tracing::warn!(symbol, "null handle, call ignored");
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use std::sync::{Mutex, MutexGuard};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner())
    }

    struct EnvVarGuard {
        previous: Option<std::ffi::OsString>,
    }

    impl EnvVarGuard {
        fn set(value: Option<&str>) -> Self {
            let previous = std::env::var_os(MODE_ENV);
            // SAFETY: env mutation is serialised by `env_lock`.
            unsafe {
                match value {
                    Some(v) => std::env::set_var(MODE_ENV, v),
                    None => std::env::remove_var(MODE_ENV),
                }
            }
            Self { previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            // SAFETY: env mutation is serialised by `env_lock`.
            unsafe {
                match self.previous.as_ref() {
                    Some(v) => std::env::set_var(MODE_ENV, v),
                    None => std::env::remove_var(MODE_ENV),
                }
            }
            set_mode_for_tests(None);
        }
    }

    #[test]
    fn parser_accepts_strict_and_hardened_only() {
        assert_eq!(parse_mode_value("strict"), Mode::Strict);
        assert_eq!(parse_mode_value("HARDENED"), Mode::Hardened);
        assert_eq!(parse_mode_value(" repair "), Mode::Hardened);
        assert_eq!(parse_mode_value("off"), Mode::Strict);
        assert_eq!(parse_mode_value(""), Mode::Strict);
    }

    #[test]
    fn unset_environment_defaults_to_strict() {
        let _lock = env_lock();
        let _env = EnvVarGuard::set(None);
        set_mode_for_tests(None);
        assert_eq!(mode(), Mode::Strict);
    }

    #[test]
    fn resolved_mode_is_sticky_until_reset() {
        let _lock = env_lock();
        let _env = EnvVarGuard::set(Some("hardened"));
        set_mode_for_tests(None);
        assert_eq!(mode(), Mode::Hardened);

        // SAFETY: env mutation is serialised by `env_lock`.
        unsafe { std::env::set_var(MODE_ENV, "strict") };
        assert_eq!(mode(), Mode::Hardened);

        set_mode_for_tests(None);
        assert_eq!(mode(), Mode::Strict);
    }

    #[test]
    fn hardened_fatal_returns() {
        let _lock = env_lock();
        let _env = EnvVarGuard::set(None);
        set_mode_for_tests(Some(Mode::Hardened));
        fatal("og_lock_mutex", &SyncError::NotOwner);
    }
}
