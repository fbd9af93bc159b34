//! Observable per-key state snapshot.
//!
//! Every query, mutation, and subscription owns one [`DataModel`] and
//! broadcasts it over a watch channel; observers only ever read immutable
//! snapshots (single-writer discipline, no external locking).

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::error::EngineError;
use crate::reply::Reply;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = u64;

/// Current wall-clock time as [`EpochMillis`].
#[must_use]
pub fn epoch_millis() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as EpochMillis
}

/// Common shape of all per-key state.
///
/// `reply` and `error` are independent fields: a failed refresh keeps the
/// last good value available (stale-while-error). The UI-binding layer
/// decides what to render from the combination.
#[derive(Debug, Clone, Default)]
pub struct DataModel {
    /// Last-known result, if any.
    pub reply: Reply<Value>,
    /// When `reply` was last updated.
    pub reply_updated_at: EpochMillis,
    /// Failure of the most recent attempt, surfaced only after retries
    /// were exhausted.
    pub error: Option<EngineError>,
    /// When `error` was last updated.
    pub error_updated_at: EpochMillis,
    /// True while an execution (initial fetch or revalidation) is in flight.
    pub revalidating: bool,
    /// Set by `invalidate()`; cleared on the next successful reply.
    pub invalidated: bool,
}

impl DataModel {
    /// Whether a loading indicator is warranted: no reply exists yet, or
    /// a retry is actively in flight after a failure.
    #[must_use]
    pub fn is_awaited(&self) -> bool {
        self.reply.is_none() || (self.error.is_some() && self.revalidating)
    }

    /// Whether the reply is older than `stale_ms` (or marked invalidated)
    /// as of `now`. A missing reply is always stale.
    #[must_use]
    pub fn is_stale(&self, now: EpochMillis, stale_ms: u64) -> bool {
        if self.invalidated || self.reply.is_none() {
            return true;
        }
        now.saturating_sub(self.reply_updated_at) >= stale_ms
    }

    pub(crate) fn record_success(&mut self, value: Value, now: EpochMillis) {
        self.reply = Reply::Some(value);
        self.reply_updated_at = now;
        self.error = None;
        self.revalidating = false;
        self.invalidated = false;
    }

    pub(crate) fn record_failure(&mut self, error: EngineError, now: EpochMillis) {
        self.error = Some(error);
        self.error_updated_at = now;
        self.revalidating = false;
    }
}
