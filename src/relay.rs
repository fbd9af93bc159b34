// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Broadcast relay for unexpected background failures.
//!
//! The relay is a single-slot, drop-oldest broadcast bus: sending while a
//! record is already buffered replaces it, and every independent listener
//! observes the same emitted records. A pluggable [`RelayPolicy`] can
//! suppress records entirely or collapse two semantically-equal errors.
//!
//! Failures with a natural per-key home stay in that key's
//! [`crate::model::DataModel`]; only homeless background failures (or
//! explicit re-raises) flow through here.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::error::EngineError;
use crate::identity::{Marker, UniqueId};

/// The unit broadcast by the relay.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub error: EngineError,
    pub key_id: UniqueId,
    pub marker: Marker,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(error: EngineError, key_id: UniqueId, marker: Marker) -> Self {
        Self {
            error,
            key_id,
            marker,
        }
    }
}

/// Suppression and dedup policy, evaluated before a record is buffered.
pub trait RelayPolicy: Send + Sync {
    /// Filter a record out entirely; it is never stored or emitted.
    fn should_suppress_error(&self, _record: &ErrorRecord) -> bool {
        false
    }

    /// When true and `a` is still buffered, sending `b` keeps `a`.
    fn are_errors_equal(&self, _a: &ErrorRecord, _b: &ErrorRecord) -> bool {
        false
    }
}

/// No suppression, no dedup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRelayPolicy;

impl RelayPolicy for DefaultRelayPolicy {}

/// Single-slot drop-oldest broadcast channel for [`ErrorRecord`]s.
pub struct ErrorRelay {
    slot: watch::Sender<Option<ErrorRecord>>,
    policy: Arc<dyn RelayPolicy>,
}

impl ErrorRelay {
    /// Create a relay with the given policy.
    #[must_use]
    pub fn anycast(policy: Arc<dyn RelayPolicy>) -> Self {
        let (slot, _rx) = watch::channel(None);
        Self { slot, policy }
    }

    /// Buffer a record, replacing whatever was buffered before — unless
    /// the policy suppresses it or dedups it against the buffered record.
    pub fn send(&self, record: ErrorRecord) {
        if self.policy.should_suppress_error(&record) {
            debug!(key = %record.key_id, error = %record.error, "Relay record suppressed");
            return;
        }
        {
            let current = self.slot.borrow();
            if let Some(buffered) = current.as_ref() {
                if self.policy.are_errors_equal(buffered, &record) {
                    debug!(key = %record.key_id, "Relay record deduplicated");
                    return;
                }
            }
        }
        crate::metrics::record_relay_send();
        self.slot.send_replace(Some(record));
    }

    /// Create an independent listener. May be called any number of times;
    /// every listener observes the same emitted records. A record already
    /// buffered at subscribe time is delivered to the new listener too.
    #[must_use]
    pub fn subscribe(&self) -> ErrorListener {
        let mut rx = self.slot.subscribe();
        if rx.borrow().is_some() {
            rx.mark_changed();
        }
        ErrorListener { rx }
    }

    /// Snapshot of the currently buffered record, if any.
    #[must_use]
    pub fn latest(&self) -> Option<ErrorRecord> {
        self.slot.borrow().clone()
    }
}

/// One listener's view of the relay.
pub struct ErrorListener {
    rx: watch::Receiver<Option<ErrorRecord>>,
}

impl ErrorListener {
    /// Wait for the next record. Returns `None` once the relay is gone.
    pub async fn recv(&mut self) -> Option<ErrorRecord> {
        loop {
            self.rx.changed().await.ok()?;
            let record = self.rx.borrow_and_update().clone();
            if let Some(record) = record {
                return Some(record);
            }
        }
    }
}
