//! Retry and backoff configuration.

use std::time::Duration;

/// Tuning knobs for the refresh retry loop and post-success jitter.
#[derive(Clone, Debug)]
pub struct RefreshConfig {
    /// Generic retry budget for one refresh operation.
    pub retry_attempts_max: u32,

    /// Dedicated retry budget once an attempt fails offline or times
    /// out. Replaces the generic budget for the rest of the operation.
    pub offline_retry_attempts_max: u32,

    /// Delay before retrying an offline-classified failure. Timeouts
    /// retry immediately.
    pub offline_retry_delay: Duration,

    /// Ceiling on the server-advertised `Retry-After` backoff. A longer
    /// delay fails the operation instead of stalling the caller.
    pub retry_after_max: Duration,

    /// Lower bound of the post-success jitter window.
    pub jitter_min: Duration,

    /// Upper bound of the post-success jitter window.
    pub jitter_max: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            retry_attempts_max: 5,
            offline_retry_attempts_max: 3,
            offline_retry_delay: Duration::from_millis(500),
            retry_after_max: Duration::from_secs(10),
            jitter_min: Duration::from_millis(500),
            jitter_max: Duration::from_millis(2000),
        }
    }
}
