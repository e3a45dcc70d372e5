// Retry policy model - how activity calls are retried and bounded

//! # Retry Policy
//!
//! A [`RetryPolicy`] describes how every activity call inside one workflow is
//! retried: how long to wait between attempts, how many attempts to make, how
//! long a single attempt may take and which failure kinds are never retried.
//!
//! The policy is plain data. The engine's `ActivityProxy` applies it to each
//! call (see `engine::retry`).
//!
//! ## Backoff
//!
//! The delay after failed attempt `n` (1-based) is
//! `initial_interval * backoff_coefficient^(n-1)`, clamped to
//! `maximum_interval` when one is set. Attempt 1 is the first try, not a retry,
//! so `max_attempts = 3` means at most two retries.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ErrorKind, ProvisionerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_coefficient: f64,
    /// Upper bound on any single delay
    pub maximum_interval: Option<Duration>,
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Bound on a single attempt; exceeding it is a `Timeout` failure
    pub per_call_timeout: Duration,
    /// Failure kinds that abort immediately
    pub non_retryable_kinds: HashSet<ErrorKind>,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);

        match self.maximum_interval {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        !self.non_retryable_kinds.contains(&kind)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    pub fn with_non_retryable(mut self, kind: ErrorKind) -> Self {
        self.non_retryable_kinds.insert(kind);
        self
    }

    /// Reject policies that could never make progress
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ProvisionerError::InvalidConfiguration(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        if !self.backoff_coefficient.is_finite() || self.backoff_coefficient < 1.0 {
            return Err(ProvisionerError::InvalidConfiguration(format!(
                "backoff coefficient must be >= 1.0, got {}",
                self.backoff_coefficient
            )));
        }
        if self.per_call_timeout.is_zero() {
            return Err(ProvisionerError::InvalidConfiguration(
                "per-call timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    /// One-minute start-to-close timeout with exponential backoff
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Some(Duration::from_secs(100)),
            max_attempts: 5,
            per_call_timeout: Duration::from_secs(60),
            non_retryable_kinds: [
                ErrorKind::PreconditionFailed,
                ErrorKind::InvalidRequest,
                ErrorKind::EmptyResult,
            ]
            .into_iter()
            .collect(),
        }
    }
}
