// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stale-while-revalidate query state machine.
//!
//! A [`ManagedQuery`] owns one key's [`DataModel`], broadcast over a
//! watch channel, and a fetch block executed inside an
//! [`ActorBlockRunner`]. The first observer launches the execution loop;
//! the loop fetches unless the current reply is still fresh, then waits
//! for refresh requests (`resume`, `invalidate`). Exhausted-retry
//! failures land in the model's `error` field with the previous reply
//! kept (stale-while-error); they are never routed to the error relay.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::actor::{ActorBlock, ActorBlockRunner, ActorLease, RunnerState, TimeoutCallback};
use crate::error::EngineError;
use crate::identity::{Marker, UniqueId};
use crate::model::{epoch_millis, DataModel};
use crate::reply::Reply;
use crate::resilience::RetryOptions;

/// Produces one fetch attempt per call.
pub type FetchBlock = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, EngineError>> + Send + Sync>;

/// One key's query state and execution loop. Created and pooled by the
/// engine; observers hold [`ObservedQuery`] handles.
pub struct ManagedQuery {
    key: UniqueId,
    marker: Marker,
    block: FetchBlock,
    retry: RetryOptions,
    stale_time_ms: u64,
    model: watch::Sender<DataModel>,
    refresh: watch::Sender<u64>,
    runner: Arc<ActorBlockRunner>,
}

impl ManagedQuery {
    pub(crate) fn new(
        key: UniqueId,
        marker: Marker,
        block: FetchBlock,
        retry: RetryOptions,
        stale_time_ms: u64,
        keep_alive: Duration,
        on_timeout: TimeoutCallback,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let loop_ref = weak.clone();
            let actor_block: ActorBlock = Arc::new(move |seq| {
                let loop_ref = loop_ref.clone();
                Box::pin(async move {
                    if let Some(query) = loop_ref.upgrade() {
                        query.run(seq).await;
                    }
                })
            });
            // Aborting a loop mid-fetch leaves nothing in flight; the
            // broadcast flag must say so.
            let timeout_ref = weak.clone();
            let on_timeout: TimeoutCallback = Arc::new(move |seq| {
                if let Some(query) = timeout_ref.upgrade() {
                    query.clear_in_flight();
                }
                on_timeout(seq);
            });
            let (model, _) = watch::channel(DataModel::default());
            let (refresh, _) = watch::channel(0u64);
            Self {
                key,
                marker,
                block,
                retry,
                stale_time_ms,
                model,
                refresh,
                runner: ActorBlockRunner::new(keep_alive, actor_block, on_timeout),
            }
        })
    }

    /// Begin observing. The first lease launches the execution loop;
    /// dropping the handle detaches (keep-alive applies after the last).
    #[must_use]
    pub fn attach(&self) -> ObservedQuery {
        ObservedQuery {
            _lease: self.runner.attach(),
            rx: self.model.subscribe(),
        }
    }

    /// Snapshot of the current model.
    #[must_use]
    pub fn model(&self) -> DataModel {
        self.model.borrow().clone()
    }

    /// Watch the model without holding an execution lease.
    #[must_use]
    pub fn subscribe_model(&self) -> watch::Receiver<DataModel> {
        self.model.subscribe()
    }

    #[must_use]
    pub fn key(&self) -> &UniqueId {
        &self.key
    }

    /// Force a refetch even if the reply is still fresh. While the loop
    /// is running this queues a refresh; an idle (demoted) query picks
    /// the request up on its next launch.
    pub fn resume(&self) {
        // Flag first, bump second: a freshly-launched loop only
        // subscribes to the refresh channel once polled, so a bump sent
        // before that is marked already-seen. The flag is re-read by the
        // loop's initial staleness check and survives the gap.
        self.model.send_modify(|m| m.invalidated = true);
        if self.runner.state() == RunnerState::Running {
            self.refresh.send_modify(|n| *n = n.wrapping_add(1));
        }
    }

    /// Mark the reply stale. An active query refetches immediately.
    pub fn invalidate(&self) {
        self.model.send_modify(|m| m.invalidated = true);
        if self.runner.state() == RunnerState::Running {
            self.refresh.send_modify(|n| *n = n.wrapping_add(1));
        }
    }

    /// Discard all state, back to the never-fetched model.
    pub fn reset(&self) {
        self.model.send_replace(DataModel::default());
    }

    /// Terminal scope cancellation.
    pub fn cancel(&self) {
        self.runner.cancel();
        self.clear_in_flight();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.runner.is_active()
    }

    fn clear_in_flight(&self) {
        self.model.send_if_modified(|m| {
            let was_revalidating = m.revalidating;
            m.revalidating = false;
            was_revalidating
        });
    }

    async fn run(&self, seq: u64) {
        let mut refresh_rx = self.refresh.subscribe();
        debug!(key = %self.key, seq, "Query loop started");

        let snapshot = self.model.borrow().clone();
        if snapshot.is_stale(epoch_millis(), self.stale_time_ms) {
            self.fetch_once().await;
        } else {
            debug!(key = %self.key, "Reply still fresh, initial fetch skipped");
            crate::metrics::record_lookup("query", true);
        }

        loop {
            if refresh_rx.changed().await.is_err() {
                return;
            }
            refresh_rx.borrow_and_update();
            self.fetch_once().await;
        }
    }

    async fn fetch_once(&self) {
        self.model.send_modify(|m| m.revalidating = true);
        let result = self
            .retry
            .with_retry("fetch", &self.marker, || (self.block)())
            .await;
        match result {
            Ok(value) => {
                self.model
                    .send_modify(|m| m.record_success(value, epoch_millis()));
                crate::metrics::record_operation("query", "success");
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "Fetch failed, retries exhausted");
                self.model
                    .send_modify(|m| m.record_failure(err, epoch_millis()));
                crate::metrics::record_operation("query", "error");
            }
        }
    }
}

/// An observer's handle: a keep-alive lease plus a model watch.
pub struct ObservedQuery {
    _lease: ActorLease,
    rx: watch::Receiver<DataModel>,
}

impl ObservedQuery {
    /// Snapshot of the current model.
    #[must_use]
    pub fn model(&self) -> DataModel {
        self.rx.borrow().clone()
    }

    /// Wait for the next model update.
    pub async fn updated(&mut self) -> Result<DataModel, EngineError> {
        self.rx
            .changed()
            .await
            .map_err(|_| EngineError::Terminated)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the model settles: a reply arrives, or an attempt fails
    /// with no retry in flight.
    pub async fn settled(&mut self) -> Result<Value, EngineError> {
        loop {
            let model = self.rx.borrow_and_update().clone();
            if let Reply::Some(value) = model.reply {
                return Ok(value);
            }
            if let Some(error) = model.error {
                if !model.revalidating {
                    return Err(error);
                }
            }
            self.rx
                .changed()
                .await
                .map_err(|_| EngineError::Terminated)?;
        }
    }

    /// Explicit detach; identical to dropping the handle.
    pub fn release(self) {}
}
