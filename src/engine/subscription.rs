// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Streaming subscription state machine.
//!
//! A [`ManagedSubscription`] drives a caller-supplied stream inside the
//! actor loop: every item replaces the reply, a stream error is recorded
//! in the model (its per-key home, never the relay) and stops
//! consumption until `resume()` re-subscribes. Like mutations,
//! subscriptions are dropped rather than demoted once unobserved past
//! keep-alive.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::actor::{ActorBlock, ActorBlockRunner, ActorLease, RunnerState, TimeoutCallback};
use crate::error::EngineError;
use crate::identity::{Marker, UniqueId};
use crate::model::{epoch_millis, DataModel};

/// Opens one upstream subscription per call.
pub type SubscribeBlock =
    Arc<dyn Fn() -> BoxStream<'static, Result<Value, EngineError>> + Send + Sync>;

pub struct ManagedSubscription {
    key: UniqueId,
    marker: Marker,
    block: SubscribeBlock,
    model: watch::Sender<DataModel>,
    refresh: watch::Sender<u64>,
    runner: Arc<ActorBlockRunner>,
}

impl ManagedSubscription {
    pub(crate) fn new(
        key: UniqueId,
        marker: Marker,
        block: SubscribeBlock,
        keep_alive: Duration,
        on_timeout: TimeoutCallback,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let loop_ref = weak.clone();
            let actor_block: ActorBlock = Arc::new(move |seq| {
                let loop_ref = loop_ref.clone();
                Box::pin(async move {
                    if let Some(subscription) = loop_ref.upgrade() {
                        subscription.run(seq).await;
                    }
                })
            });
            // Aborting the loop tears the stream down with it; the
            // broadcast flag must not claim one is still open.
            let timeout_ref = weak.clone();
            let on_timeout: TimeoutCallback = Arc::new(move |seq| {
                if let Some(subscription) = timeout_ref.upgrade() {
                    subscription.clear_in_flight();
                }
                on_timeout(seq);
            });
            let (model, _) = watch::channel(DataModel::default());
            let (refresh, _) = watch::channel(0u64);
            Self {
                key,
                marker,
                block,
                model,
                refresh,
                runner: ActorBlockRunner::new(keep_alive, actor_block, on_timeout),
            }
        })
    }

    /// Begin observing; the first lease opens the upstream stream.
    #[must_use]
    pub fn attach(&self) -> ObservedSubscription {
        ObservedSubscription {
            _lease: self.runner.attach(),
            rx: self.model.subscribe(),
        }
    }

    #[must_use]
    pub fn model(&self) -> DataModel {
        self.model.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_model(&self) -> watch::Receiver<DataModel> {
        self.model.subscribe()
    }

    #[must_use]
    pub fn key(&self) -> &UniqueId {
        &self.key
    }

    /// Tear down the current upstream stream and open a fresh one. Used
    /// after connectivity returns or when the stream ended in error.
    pub fn resume(&self) {
        if self.runner.state() == RunnerState::Running {
            self.refresh.send_modify(|n| *n = n.wrapping_add(1));
        } else {
            self.model.send_modify(|m| m.invalidated = true);
        }
    }

    pub fn reset(&self) {
        self.model.send_replace(DataModel::default());
    }

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
        debug!(key = %self.key, seq, "Subscription loop started");
        loop {
            let mut stream = (self.block)();
            self.model.send_modify(|m| m.revalidating = true);
            let reopen_now = loop {
                tokio::select! {
                    item = stream.next() => match item {
                        Some(Ok(value)) => {
                            self.model
                                .send_modify(|m| m.record_success(value, epoch_millis()));
                        }
                        Some(Err(err)) => {
                            warn!(
                                key = %self.key,
                                marker = %self.marker,
                                error = %err,
                                "Subscription stream failed"
                            );
                            self.model
                                .send_modify(|m| m.record_failure(err, epoch_millis()));
                            crate::metrics::record_operation("subscription", "error");
                            break false;
                        }
                        None => {
                            debug!(key = %self.key, "Subscription stream ended");
                            self.model.send_modify(|m| m.revalidating = false);
                            break false;
                        }
                    },
                    changed = refresh_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        refresh_rx.borrow_and_update();
                        break true;
                    }
                }
            };
            if !reopen_now {
                // Dead stream: wait for an explicit resume.
                if refresh_rx.changed().await.is_err() {
                    return;
                }
                refresh_rx.borrow_and_update();
            }
        }
    }
}

/// An observer's handle: a keep-alive lease plus a model watch.
pub struct ObservedSubscription {
    _lease: ActorLease,
    rx: watch::Receiver<DataModel>,
}

impl ObservedSubscription {
    #[must_use]
    pub fn model(&self) -> DataModel {
        self.rx.borrow().clone()
    }

    pub async fn updated(&mut self) -> Result<DataModel, EngineError> {
        self.rx
            .changed()
            .await
            .map_err(|_| EngineError::Terminated)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    pub fn release(self) {}
}
