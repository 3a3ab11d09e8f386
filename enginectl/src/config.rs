//! Runtime tunables for enginectl.
//!
//! Every value has a compile-time default and can be overridden through an
//! environment variable. Bridge-level settings (scratch size, recv timeout)
//! are read by `BridgeConfig::from_env` in engine-bridge.

use std::path::PathBuf;
use std::time::Duration;

/// Default time allowed for a whole engine session.
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30;

/// Default tracing filter when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "warn";

/// File name prefix for rolling log files.
pub const LOG_FILE_PREFIX: &str = "enginectl.log";

/// Get the session timeout.
///
/// Priority:
/// 1. `ENGINECTL_TIMEOUT_SECS` env variable if set (falls back to default
///    if the value cannot be parsed as a `u64`)
/// 2. `30` seconds as fallback
pub fn get_session_timeout() -> Duration {
    if let Ok(secs) = std::env::var("ENGINECTL_TIMEOUT_SECS") {
        return Duration::from_secs(secs.parse().unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS));
    }

    Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS)
}

/// Get the tracing filter used when `RUST_LOG` is unset.
pub fn get_default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Get the directory for rolling log files.
///
/// Priority:
/// 1. The `--log-dir` argument
/// 2. `ENGINECTL_LOG_DIR` env variable if set
/// 3. `None`: log to stderr
pub fn get_log_dir(cli_value: Option<PathBuf>) -> Option<PathBuf> {
    cli_value.or_else(|| std::env::var_os("ENGINECTL_LOG_DIR").map(PathBuf::from))
}
