//! Configuration for the engine bridge.
//!
//! Centralises the runtime tunables of a [`Bridge`](crate::Bridge): the size
//! of the scratch buffer each `recv` reads into, how long `start` waits for
//! the engine to finish initializing, the default deadline for `recv`, and
//! the poll interval used while waiting for the engine thread to exit. Every
//! value has a compile-time default and can be overridden at runtime via a
//! dedicated environment variable.

use std::time::Duration;

/// Smallest scratch buffer a bridge will read into.
pub const MIN_SCRATCH_BYTES: usize = 80;

/// Default scratch buffer size.
const DEFAULT_SCRATCH_BYTES: usize = MIN_SCRATCH_BYTES;

/// Default time `start` waits for engine initialization (in milliseconds).
const DEFAULT_START_TIMEOUT_MS: u64 = 10_000;

/// Default poll interval while waiting for the engine thread (in milliseconds).
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

const SCRATCH_BYTES_VAR: &str = "MULTIENGINE_SCRATCH_BYTES";
const START_TIMEOUT_VAR: &str = "MULTIENGINE_START_TIMEOUT_MS";
const RECV_TIMEOUT_VAR: &str = "MULTIENGINE_RECV_TIMEOUT_MS";
const POLL_INTERVAL_VAR: &str = "MULTIENGINE_POLL_INTERVAL_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Capacity of the buffer each `recv` reads into.
    pub scratch_capacity: usize,
    /// How long `start` waits for the engine to initialize.
    pub start_timeout: Duration,
    /// Deadline applied by `recv`. `None` blocks until the engine writes.
    pub recv_timeout: Option<Duration>,
    /// Poll interval used by `wait_exit`.
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            scratch_capacity: DEFAULT_SCRATCH_BYTES,
            start_timeout: Duration::from_millis(DEFAULT_START_TIMEOUT_MS),
            recv_timeout: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl BridgeConfig {
    /// Build a configuration from the environment.
    ///
    /// Priority for each value:
    /// 1. The matching `MULTIENGINE_*` env variable if set and parsable
    /// 2. The compile-time default
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let scratch_capacity = lookup(SCRATCH_BYTES_VAR)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(defaults.scratch_capacity);

        Self {
            scratch_capacity,
            start_timeout: parse_u64(START_TIMEOUT_VAR)
                .map(Duration::from_millis)
                .unwrap_or(defaults.start_timeout),
            recv_timeout: parse_u64(RECV_TIMEOUT_VAR)
                .map(Duration::from_millis)
                .or(defaults.recv_timeout),
            poll_interval: parse_u64(POLL_INTERVAL_VAR)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
        .normalized()
    }

    pub fn with_scratch_capacity(mut self, capacity: usize) -> Self {
        self.scratch_capacity = capacity;
        self.normalized()
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.scratch_capacity = self.scratch_capacity.max(MIN_SCRATCH_BYTES);
        if self.poll_interval.is_zero() {
            self.poll_interval = Duration::from_millis(1);
        }
        self
    }
}
