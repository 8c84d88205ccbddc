//! Retry policy for delivery operations.
//!
//! This module provides a clean abstraction over retry configuration and logic,
//! making it easy to test and reason about retry behavior independently of the
//! delivery processor.

use serde::{Deserialize, Serialize};

use crate::queue::retry::calculate_next_retry_time;

/// Retry policy configuration for delivery operations.
///
/// Encapsulates all retry-related configuration and provides methods for
/// determining retry behavior without exposing implementation details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts before giving up.
    ///
    /// Default: 5 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff (in seconds).
    ///
    /// The actual delay is calculated as: `base * 2^(attempts - 1)`
    ///
    /// Default: 60 seconds (1 minute)
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Maximum retry delay (in seconds).
    ///
    /// Caps the exponential backoff to prevent excessively long delays.
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Jitter factor for randomizing retry delays.
    ///
    /// Jitter prevents thundering herd problems when many messages
    /// retry simultaneously. The delay is scaled by `1 + U(0, jitter_factor)`,
    /// so jitter only ever lengthens a delay, never shortens it.
    ///
    /// Default: 0.1 (up to +10%)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if another retry should be attempted based on attempt count.
    ///
    /// Returns `true` if the number of attempts is less than `max_attempts`.
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Calculate when the next retry should occur.
    ///
    /// Uses exponential backoff with jitter to determine the retry time.
    ///
    /// # Arguments
    /// * `attempt_count` - Number of attempts made so far (0-indexed in practice,
    ///   but calculation treats as 1-indexed internally)
    ///
    /// # Returns
    /// Unix timestamp (seconds) when the next retry should be attempted
    #[must_use]
    pub fn calculate_next_retry(&self, attempt_count: u32) -> u64 {
        // Add 1 because the retry calculation expects 1-indexed attempts
        let attempt = attempt_count + 1;
        calculate_next_retry_time(
            attempt,
            self.base_retry_delay_secs,
            self.max_retry_delay_secs,
            self.retry_jitter_factor,
        )
    }

    /// Get the number of remaining retry attempts.
    ///
    /// Returns `0` if max attempts has been reached.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt_count: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt_count)
    }

    /// Check if this is the final retry attempt.
    #[must_use]
    pub const fn is_final_attempt(&self, attempt_count: u32) -> bool {
        attempt_count + 1 >= self.max_attempts
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        5
    }

    pub const fn base_retry_delay_secs() -> u64 {
        60 // 1 minute
    }

    pub const fn max_retry_delay_secs() -> u64 {
        3600 // 1 hour
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.1 // up to +10%, never negative
    }
}
