//! Configuration for the cache engine.
//!
//! # Example
//!
//! ```
//! use swr_engine::EngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = EngineConfig::default();
//! assert_eq!(config.inactive_capacity, 1024);
//!
//! // Full config
//! let config = EngineConfig {
//!     stale_time_ms: 30_000,
//!     keep_alive_ms: 2_000,
//!     inactive_capacity: 256,
//!     inactive_ttl_secs: 600,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;
use crate::resilience::RetryOptions;

/// Configuration for the cache engine.
///
/// All fields have sensible defaults; a zero-config engine behaves like
/// a small in-memory stale-while-revalidate cache.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// How long a reply stays fresh before revalidation (ms)
    #[serde(default = "default_stale_time_ms")]
    pub stale_time_ms: u64,

    /// Grace period before an unobserved execution is cancelled (ms)
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,

    /// Inactive cache: max demoted entries
    #[serde(default = "default_inactive_capacity")]
    pub inactive_capacity: usize,

    /// Inactive cache: entry lifetime in seconds
    #[serde(default = "default_inactive_ttl_secs")]
    pub inactive_ttl_secs: u64,

    /// Garbage-collection batch settings
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,
    #[serde(default = "default_gc_chunk_size")]
    pub gc_chunk_size: usize,

    /// Retry tuning for fetch and mutation executions
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_initial_interval_ms")]
    pub retry_initial_interval_ms: u64,
    #[serde(default = "default_retry_max_interval_ms")]
    pub retry_max_interval_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
    #[serde(default = "default_retry_randomization_factor")]
    pub retry_randomization_factor: f64,

    /// Debounce before refreshing after connectivity returns (ms)
    #[serde(default = "default_resume_after_delay_ms")]
    pub resume_after_delay_ms: u64,
}

fn default_stale_time_ms() -> u64 { 0 } // every new observer revalidates
fn default_keep_alive_ms() -> u64 { 5_000 }
fn default_inactive_capacity() -> usize { 1024 }
fn default_inactive_ttl_secs() -> u64 { 300 }
fn default_gc_interval_ms() -> u64 { 500 }
fn default_gc_chunk_size() -> usize { 10 }
fn default_retry_count() -> usize { 3 }
fn default_retry_initial_interval_ms() -> u64 { 500 }
fn default_retry_max_interval_ms() -> u64 { 30_000 }
fn default_retry_multiplier() -> f64 { 1.5 }
fn default_retry_randomization_factor() -> f64 { 0.5 }
fn default_resume_after_delay_ms() -> u64 { 300 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: default_stale_time_ms(),
            keep_alive_ms: default_keep_alive_ms(),
            inactive_capacity: default_inactive_capacity(),
            inactive_ttl_secs: default_inactive_ttl_secs(),
            gc_interval_ms: default_gc_interval_ms(),
            gc_chunk_size: default_gc_chunk_size(),
            retry_count: default_retry_count(),
            retry_initial_interval_ms: default_retry_initial_interval_ms(),
            retry_max_interval_ms: default_retry_max_interval_ms(),
            retry_multiplier: default_retry_multiplier(),
            retry_randomization_factor: default_retry_randomization_factor(),
            resume_after_delay_ms: default_resume_after_delay_ms(),
        }
    }
}

impl EngineConfig {
    /// Build the retry policy described by this config.
    pub fn retry_options(&self) -> Result<RetryOptions, EngineError> {
        RetryOptions::new(
            self.retry_count,
            Duration::from_millis(self.retry_initial_interval_ms),
            Duration::from_millis(self.retry_max_interval_ms),
            self.retry_multiplier,
            self.retry_randomization_factor,
        )
    }

    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    #[must_use]
    pub fn resume_after_delay(&self) -> Duration {
        Duration::from_millis(self.resume_after_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.stale_time_ms, 0);
        assert_eq!(config.keep_alive_ms, 5_000);
        assert_eq!(config.inactive_capacity, 1024);
        assert!(config.retry_options().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"stale_time_ms": 60000, "retry_count": 5}"#).unwrap();
        assert_eq!(config.stale_time_ms, 60_000);
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.keep_alive_ms, 5_000, "unset fields fall back");
    }

    #[test]
    fn test_invalid_retry_tuning_surfaces_at_build() {
        let config = EngineConfig {
            retry_multiplier: 0.5,
            ..Default::default()
        };
        assert!(config.retry_options().is_err());
    }
}
