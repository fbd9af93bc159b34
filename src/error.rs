// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

/// Errors produced by the engine and its operations.
///
/// The enum is `Clone` because errors are carried inside broadcast state
/// snapshots ([`crate::model::DataModel`]) and relay records, both of which
/// fan out to multiple observers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A query fetch block failed (after retries were exhausted).
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// A mutation block failed (after retries were exhausted).
    #[error("mutation failed: {0}")]
    Mutation(String),

    /// A subscription stream yielded or ended with a failure.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// A value was requested from an empty [`crate::reply::Reply`].
    #[error("no value present")]
    NoValue,

    /// A policy or component was built with invalid parameters.
    /// Raised at construction time, never deferred to execution.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The owning actor was cancelled before the operation could complete.
    #[error("actor terminated")]
    Terminated,
}

impl EngineError {
    /// Whether this error class is worth retrying by default.
    ///
    /// Operation failures (fetch/mutation/subscription) are presumed
    /// transient; everything else is a local programming or lifecycle
    /// error that retrying cannot fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Fetch(_) | Self::Mutation(_) | Self::Subscription(_)
        )
    }
}
