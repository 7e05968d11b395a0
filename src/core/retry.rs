//! Quality-driven retry policy for missions.
//!
//! A mission attempt whose verification quality falls below the threshold is
//! retried until `max_retries` is exhausted, after which it escalates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reference quality threshold (0-100).
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 85.0;

/// Reference retry budget.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Retry policy applied by the mission overseer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries, not including the initial attempt.
    /// `max_retries = 2` means up to 3 executions in total.
    pub max_retries: u32,

    /// Minimum verification quality score that counts as a pass.
    pub quality_threshold: f64,

    /// Fixed delay before each retry.
    #[serde(with = "serde_duration_ms", rename = "delay_ms")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with no retries: the first low-quality attempt escalates.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Create a policy with the given retry budget and threshold.
    pub fn new(max_retries: u32, quality_threshold: f64) -> Self {
        Self {
            max_retries,
            quality_threshold,
            delay: Duration::ZERO,
        }
    }

    /// Builder: set the delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Whether a quality score meets the threshold.
    pub fn is_acceptable(&self, quality_score: f64) -> bool {
        quality_score >= self.quality_threshold
    }

    /// Whether another attempt is allowed after `retries_used` retries.
    pub fn has_budget(&self, retries_used: u32) -> bool {
        retries_used < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            delay: Duration::ZERO,
        }
    }
}

/// Serde helper: Duration as whole milliseconds.
mod serde_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
