// SPDX-License-Identifier: Apache-2.0
//! Retry policies with deterministic backoff.
//!
//! Delays use fixed formulas (no jitter) so a poll's schedule can be
//! asserted exactly in tests and reproduced by a browser host driving the
//! same policy through its own timers.
//!
//! # Example
//!
//! ```
//! use kplan_runtime::retry::{BackoffStrategy, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, BackoffStrategy::Exponential {
//!     base_ms: 100,
//!     max_ms: 5000,
//! });
//!
//! assert_eq!(policy.delay(0), Duration::from_millis(100));
//! assert_eq!(policy.delay(1), Duration::from_millis(200));
//! assert_eq!(policy.delay(2), Duration::from_millis(400));
//! ```

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use web_time::Duration;

/// Interval between file-readiness probes.
pub const FILE_POLL_INTERVAL_MS: u64 = 3000;
/// Probes after the first before a submission's file is declared timed out.
pub const FILE_POLL_MAX_RETRIES: u32 = 20;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^attempt`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
    /// `base_ms * (attempt + 1)`, capped at `max_ms`.
    Linear { base_ms: u64, max_ms: u64 },
}

/// A retry policy with configurable attempts and backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt (0 = try once).
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// The schedule used while waiting for a submitted file: a probe every
    /// 3 s, giving up after 20 retries.
    #[must_use]
    pub fn file_poll() -> Self {
        Self::new(
            FILE_POLL_MAX_RETRIES,
            BackoffStrategy::Fixed {
                delay_ms: FILE_POLL_INTERVAL_MS,
            },
        )
    }

    /// Delay before retry `attempt` (0-indexed).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match &self.backoff {
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffStrategy::Exponential { base_ms, max_ms } => {
                let multiplier = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                let delay = base_ms.saturating_mul(multiplier);
                Duration::from_millis(delay.min(*max_ms))
            }
            BackoffStrategy::Linear { base_ms, max_ms } => {
                let delay = base_ms.saturating_mul(u64::from(attempt) + 1);
                Duration::from_millis(delay.min(*max_ms))
            }
        }
    }

    /// Sum of every retry delay: the longest a poll can wait before it
    /// times out.
    #[must_use]
    pub fn total_max_delay(&self) -> Duration {
        (0..self.max_retries).map(|i| self.delay(i)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::file_poll()
    }
}
