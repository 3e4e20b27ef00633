//! Transport-level retry policy for task-center requests.
//!
//! Mirrors the connection discipline expected by the center: a bounded
//! number of automatic re-sends, exponential backoff from a half-second
//! base, triggered only by gateway-class status codes or connection-level
//! failures. Method-level contracts (`fetch_task` returning `None`, etc.)
//! sit on top of this and never see a retryable failure directly.

use std::time::Duration;

use fognode_core::config::FogConfig;

/// Status codes that indicate a transient server-side fault.
pub const RETRYABLE_STATUS: [u16; 4] = [500, 502, 503, 504];

/// Tunable parameters for the request retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Automatic re-sends after the initial attempt.
    pub max_retries: u32,
    /// Backoff for the first retry; doubles on each subsequent one.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from the node configuration's retry knobs.
    pub fn from_config(config: &FogConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base …
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }

    /// Whether a response status warrants another attempt.
    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUS.contains(&status)
    }
}
