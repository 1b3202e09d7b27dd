//! Client-side configuration and retry policy.

use std::time::Duration;

use serde::Deserialize;

/// Rows requested per RPC when a scan does not set its own hint.
pub const DEFAULT_CACHING_ROWS: usize = 128;
/// Response byte cap when a scan does not set its own.
pub const DEFAULT_MAX_RESULT_BYTES: u64 = 2 * 1024 * 1024;

const RETRY_BACKOFF_MAX_SHIFT: u32 = 6;

/// Bounded exponential backoff for relocation and transport retries.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before the scan fails with a retries-exhausted error.
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub backoff_base: Duration,
    #[serde(with = "duration_ms")]
    pub backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.min(RETRY_BACKOFF_MAX_SHIFT);
        let delay = self.backoff_base.saturating_mul(1u32 << shift);
        delay.min(self.backoff_max)
    }
}

/// Per-client defaults applied where a scan leaves its knobs unset.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub caching_rows: usize,
    pub max_result_bytes: u64,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            caching_rows: DEFAULT_CACHING_ROWS,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            retry: RetryConfig::default(),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
