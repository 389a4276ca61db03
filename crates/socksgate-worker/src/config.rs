//! Worker configuration.

use std::time::Duration;

use crate::error::WorkerError;

/// Default idle reaper period.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Default liveness a session starts with (and returns to on refresh).
pub const DEFAULT_SESSION_LIVENESS: i32 = 10;

/// Default pause after a hard accept error.
pub const DEFAULT_ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Tunables for a single worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Period of the idle reaper. Every period, each registered session loses
    /// one point of liveness.
    pub reap_interval: Duration,
    /// Liveness a newly registered session starts with.
    ///
    /// With the defaults a silent session is woken for expiry after
    /// `reap_interval * session_liveness` (five minutes).
    pub session_liveness: i32,
    /// Pause before retrying after an accept error other than "would block".
    /// Zero retries immediately.
    pub accept_error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reap_interval: DEFAULT_REAP_INTERVAL,
            session_liveness: DEFAULT_SESSION_LIVENESS,
            accept_error_backoff: DEFAULT_ACCEPT_ERROR_BACKOFF,
        }
    }
}

impl WorkerConfig {
    /// Check the configuration for values the worker cannot run with.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.reap_interval.is_zero() {
            return Err(WorkerError::Config("reap_interval must be non-zero".to_string()));
        }

        if self.session_liveness <= 0 {
            return Err(WorkerError::Config(format!(
                "session_liveness must be positive, got {}",
                self.session_liveness
            )));
        }

        Ok(())
    }
}
