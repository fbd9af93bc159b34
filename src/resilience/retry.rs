// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry policy with exponential backoff and jitter.
//!
//! A [`RetryOptions`] wraps any asynchronous operation in bounded retries:
//! exponential interval growth with a multiplier, randomization jitter,
//! a maximum-interval cap, and a retryable-error predicate gate.
//!
//! # Example
//!
//! ```
//! use swr_engine::RetryOptions;
//! use std::time::Duration;
//!
//! let options = RetryOptions::default();
//! assert_eq!(options.retry_count, 3);
//!
//! // Fail fast on bad parameters, never at execution time.
//! assert!(RetryOptions::new(0, Duration::from_millis(100), Duration::from_secs(1), 2.0, 0.5).is_err());
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::identity::Marker;

/// Decides whether a failure is worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&EngineError) -> bool + Send + Sync>;

/// Samples a jittered interval from `[low, high]` (seconds).
/// Pluggable so tests can pin the backoff schedule.
pub type Randomizer = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Retry policy for asynchronous operations.
///
/// Attempt counting: `retry_count = N` allows a total of `N` attempts,
/// i.e. up to `N - 1` additional attempts after the first.
#[derive(Clone)]
pub struct RetryOptions {
    pub retry_count: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    randomizer: Randomizer,
    should_retry: RetryPredicate,
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("retry_count", &self.retry_count)
            .field("initial_interval", &self.initial_interval)
            .field("max_interval", &self.max_interval)
            .field("multiplier", &self.multiplier)
            .field("randomization_factor", &self.randomization_factor)
            .finish_non_exhaustive()
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retry_count: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
            randomization_factor: 0.5,
            randomizer: default_randomizer(),
            should_retry: Arc::new(EngineError::is_transient),
        }
    }
}

fn default_randomizer() -> Randomizer {
    Arc::new(|low, high| {
        if high <= low {
            low
        } else {
            rand::thread_rng().gen_range(low..=high)
        }
    })
}

impl RetryOptions {
    /// Build a validated policy. Invalid parameters fail here, at
    /// construction time, with [`EngineError::InvalidConfig`].
    pub fn new(
        retry_count: usize,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Result<Self, EngineError> {
        if retry_count == 0 {
            return Err(EngineError::InvalidConfig(
                "retry_count must be at least 1".into(),
            ));
        }
        if multiplier < 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "multiplier must be >= 1.0, got {multiplier}"
            )));
        }
        if !(0.0..=1.0).contains(&randomization_factor) {
            return Err(EngineError::InvalidConfig(format!(
                "randomization_factor must be within [0, 1], got {randomization_factor}"
            )));
        }
        Ok(Self {
            retry_count,
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
            ..Self::default()
        })
    }

    /// A single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            retry_count: 1,
            ..Self::default()
        }
    }

    /// Replace the retryable-error predicate.
    #[must_use]
    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&EngineError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Replace the jitter randomizer.
    #[must_use]
    pub fn with_randomizer(
        mut self,
        randomizer: impl Fn(f64, f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.randomizer = Arc::new(randomizer);
        self
    }

    #[must_use]
    pub fn should_retry(&self, error: &EngineError) -> bool {
        (self.should_retry)(error)
    }

    /// Backoff interval before additional attempt number `attempt`
    /// (1-based): `min(max, initial * multiplier^(attempt-1))`, jittered
    /// by `±randomization_factor`.
    #[must_use]
    pub fn backoff_interval(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_interval.as_secs_f64());
        if self.randomization_factor <= 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let delta = capped * self.randomization_factor;
        let jittered = (self.randomizer)(capped - delta, capped + delta).max(0.0);
        Duration::from_secs_f64(jittered)
    }

    /// Execute `block`, retrying per this policy.
    ///
    /// The failure of the final attempt propagates unchanged. The marker
    /// travels into the log fields so callers can correlate retries.
    pub async fn with_retry<F, Fut, T>(
        &self,
        operation: &str,
        marker: &Marker,
        mut block: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempts = 0usize;
        loop {
            match block().await {
                Ok(value) => {
                    if attempts > 0 {
                        info!(
                            operation,
                            marker = %marker,
                            retries = attempts,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    attempts += 1;
                    if attempts >= self.retry_count || !self.should_retry(&err) {
                        return Err(err);
                    }
                    let delay = self.backoff_interval(attempts);
                    warn!(
                        operation,
                        marker = %marker,
                        attempt = attempts,
                        max = self.retry_count,
                        error = %err,
                        ?delay,
                        "Operation failed, retrying"
                    );
                    crate::metrics::record_retry(operation);
                    sleep(delay).await;
                }
            }
        }
    }
}
