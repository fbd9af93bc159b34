// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-shot mutation state machine.
//!
//! A [`ManagedMutation`] runs caller-supplied inputs through a mutation
//! block with retry, one at a time, and mirrors the outcome into its
//! [`DataModel`]. Unlike queries, mutations never refresh on their own
//! and are dropped (not demoted) once unobserved past keep-alive.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::actor::{ActorBlock, ActorBlockRunner, ActorLease, TimeoutCallback};
use crate::error::EngineError;
use crate::identity::{Marker, UniqueId};
use crate::model::{epoch_millis, DataModel};
use crate::resilience::RetryOptions;

/// Runs one mutation attempt for the given input per call.
pub type MutateBlock =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, EngineError>> + Send + Sync>;

pub struct ManagedMutation {
    key: UniqueId,
    marker: Marker,
    block: MutateBlock,
    retry: RetryOptions,
    model: watch::Sender<DataModel>,
    /// Mutations for one key run strictly one at a time.
    serial: tokio::sync::Mutex<()>,
    runner: Arc<ActorBlockRunner>,
}

impl ManagedMutation {
    pub(crate) fn new(
        key: UniqueId,
        marker: Marker,
        block: MutateBlock,
        retry: RetryOptions,
        keep_alive: Duration,
        on_timeout: TimeoutCallback,
    ) -> Arc<Self> {
        // The runner tracks observation lifetime only; mutations are
        // request/response, so its block just parks.
        let actor_block: ActorBlock =
            Arc::new(|_seq| Box::pin(futures::future::pending::<()>()));
        let (model, _) = watch::channel(DataModel::default());
        Arc::new(Self {
            key,
            marker,
            block,
            retry,
            model,
            serial: tokio::sync::Mutex::new(()),
            runner: ActorBlockRunner::new(keep_alive, actor_block, on_timeout),
        })
    }

    /// Hold the mutation alive while an observer cares about it.
    #[must_use]
    pub fn attach(&self) -> ObservedMutation {
        ObservedMutation {
            _lease: self.runner.attach(),
            rx: self.model.subscribe(),
        }
    }

    /// Execute the mutation with `input`. Concurrent calls on the same
    /// key queue behind each other. The result is both returned and
    /// mirrored into the model (stale-while-error on failure).
    #[tracing::instrument(skip(self, input), fields(key = %self.key))]
    pub async fn mutate(&self, input: Value) -> Result<Value, EngineError> {
        let _serial = self.serial.lock().await;
        self.model.send_modify(|m| m.revalidating = true);
        let result = self
            .retry
            .with_retry("mutate", &self.marker, || (self.block)(input.clone()))
            .await;
        match &result {
            Ok(value) => {
                let value = value.clone();
                self.model
                    .send_modify(|m| m.record_success(value, epoch_millis()));
                crate::metrics::record_operation("mutation", "success");
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "Mutation failed, retries exhausted");
                let err = err.clone();
                self.model
                    .send_modify(|m| m.record_failure(err, epoch_millis()));
                crate::metrics::record_operation("mutation", "error");
            }
        }
        result
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

    /// Discard all state, back to the never-run model.
    pub fn reset(&self) {
        self.model.send_replace(DataModel::default());
    }

    pub fn cancel(&self) {
        self.runner.cancel();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.runner.is_active()
    }
}

/// An observer's handle: a keep-alive lease plus a model watch.
pub struct ObservedMutation {
    _lease: ActorLease,
    rx: watch::Receiver<DataModel>,
}

impl ObservedMutation {
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
