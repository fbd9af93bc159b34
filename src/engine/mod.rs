// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine façade: per-key operation pool, lifecycle, and resume wiring.
//!
//! The [`CacheEngine`] hands out one live instance per [`UniqueId`] and
//! kind. Queries that go unobserved past keep-alive are demoted through
//! the GC batch scheduler into a capacity-bounded TTL cache and promoted
//! back (same instance) on the next lookup; mutations and subscriptions
//! are simply dropped. Connectivity and visibility observers resume
//! every active operation that is still awaited or stuck on an error.
//!
//! # Example
//!
//! ```
//! use swr_engine::{CacheEngine, EngineConfig, FetchBlock, UniqueId};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = CacheEngine::new(EngineConfig::default()).unwrap();
//! let fetch: FetchBlock =
//!     Arc::new(|| Box::pin(async { Ok(serde_json::json!("hello")) }));
//! let query = engine.query(UniqueId::new("greeting"), fetch);
//!
//! let mut observed = query.attach();
//! assert_eq!(observed.settled().await.unwrap(), serde_json::json!("hello"));
//! engine.shutdown().await;
//! # }
//! ```

pub mod mutation;
pub mod query;
pub mod subscription;

pub use mutation::{ManagedMutation, MutateBlock, ObservedMutation};
pub use query::{FetchBlock, ManagedQuery, ObservedQuery};
pub use subscription::{ManagedSubscription, ObservedSubscription, SubscribeBlock};

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::actor::TimeoutCallback;
use crate::batching::{BatchConfig, BatchScheduler};
use crate::cache::{SystemTimeSource, TimeBasedCache, TimeSource};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::filter::{EntryFilter, FilterResolver};
use crate::identity::{Marker, UniqueId};
use crate::observers::{
    on_network_reconnect, on_visibility_foreground, NetworkObserver, VisibilityObserver,
};
use crate::relay::{DefaultRelayPolicy, ErrorListener, ErrorRecord, ErrorRelay, RelayPolicy};
use crate::resilience::RetryOptions;

/// Pool of per-key operations plus the shared ambient machinery.
/// Must be created on a tokio runtime (the GC loop spawns immediately).
pub struct CacheEngine {
    config: EngineConfig,
    retry: RetryOptions,
    queries: DashMap<UniqueId, Arc<ManagedQuery>>,
    mutations: DashMap<UniqueId, Arc<ManagedMutation>>,
    subscriptions: DashMap<UniqueId, Arc<ManagedSubscription>>,
    inactive: Mutex<TimeBasedCache<UniqueId, Arc<ManagedQuery>>>,
    relay: ErrorRelay,
    gc: BatchScheduler,
    observer_tasks: Mutex<Vec<JoinHandle<()>>>,
    weak: Weak<Self>,
}

impl CacheEngine {
    /// Create an engine with the default relay policy and wall-clock time.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>, EngineError> {
        Self::with_relay_policy(config, Arc::new(DefaultRelayPolicy))
    }

    /// Create an engine with a custom error-relay policy.
    pub fn with_relay_policy(
        config: EngineConfig,
        policy: Arc<dyn RelayPolicy>,
    ) -> Result<Arc<Self>, EngineError> {
        Self::build(config, policy, Arc::new(SystemTimeSource))
    }

    /// Create an engine with a host-supplied clock for the inactive
    /// cache's TTL decisions.
    pub fn with_time_source(
        config: EngineConfig,
        time: Arc<dyn TimeSource>,
    ) -> Result<Arc<Self>, EngineError> {
        Self::build(config, Arc::new(DefaultRelayPolicy), time)
    }

    fn build(
        config: EngineConfig,
        policy: Arc<dyn RelayPolicy>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Arc<Self>, EngineError> {
        let retry = config.retry_options()?;
        let gc = BatchScheduler::start(BatchConfig {
            interval_ms: config.gc_interval_ms,
            chunk_size: config.gc_chunk_size,
        });
        let inactive = TimeBasedCache::new(config.inactive_capacity, time);
        Ok(Arc::new_cyclic(|weak| Self {
            config,
            retry,
            queries: DashMap::new(),
            mutations: DashMap::new(),
            subscriptions: DashMap::new(),
            inactive: Mutex::new(inactive),
            relay: ErrorRelay::anycast(policy),
            gc,
            observer_tasks: Mutex::new(Vec::new()),
            weak: weak.clone(),
        }))
    }

    /// Wire connectivity and visibility sources. The debounced reconnect
    /// signal and background→foreground transitions both trigger a
    /// resume sweep.
    pub fn start(&self, network: &dyn NetworkObserver, visibility: &dyn VisibilityObserver) {
        let weak = self.weak.clone();
        let reconnect = tokio::spawn(on_network_reconnect(
            network.subscribe(),
            self.config.resume_after_delay(),
            move || {
                if let Some(engine) = weak.upgrade() {
                    engine.resume_awaited("reconnect");
                }
            },
        ));
        let weak = self.weak.clone();
        let foreground = tokio::spawn(on_visibility_foreground(
            visibility.subscribe(),
            move || {
                if let Some(engine) = weak.upgrade() {
                    engine.resume_awaited("foreground");
                }
            },
        ));
        self.observer_tasks.lock().extend([reconnect, foreground]);
    }

    /// Get or create the query for `key`. Always the same live instance:
    /// an active query is returned directly, a demoted one is promoted
    /// back out of the inactive cache.
    pub fn query(&self, key: UniqueId, fetch: FetchBlock) -> Arc<ManagedQuery> {
        self.query_with(key, Marker::none(), fetch)
    }

    pub fn query_with(
        &self,
        key: UniqueId,
        marker: Marker,
        fetch: FetchBlock,
    ) -> Arc<ManagedQuery> {
        if let Some(existing) = self.lookup_query(&key) {
            return existing;
        }
        crate::metrics::record_lookup("query", false);
        let query = ManagedQuery::new(
            key.clone(),
            marker,
            fetch,
            self.retry.clone(),
            self.config.stale_time_ms,
            self.config.keep_alive(),
            self.demote_on_timeout(key.clone()),
        );
        let query = self.queries.entry(key).or_insert(query).clone();
        crate::metrics::set_active_entries("query", self.queries.len());
        query
    }

    /// Look up an existing query without creating one. Promotes from the
    /// inactive cache when needed.
    #[must_use]
    pub fn get(&self, key: &UniqueId) -> Option<Arc<ManagedQuery>> {
        self.lookup_query(key)
    }

    /// Get or create the mutation for `key`.
    pub fn mutation(&self, key: UniqueId, block: MutateBlock) -> Arc<ManagedMutation> {
        self.mutation_with(key, Marker::none(), block)
    }

    pub fn mutation_with(
        &self,
        key: UniqueId,
        marker: Marker,
        block: MutateBlock,
    ) -> Arc<ManagedMutation> {
        if let Some(existing) = self.mutations.get(&key) {
            crate::metrics::record_lookup("mutation", true);
            return existing.clone();
        }
        crate::metrics::record_lookup("mutation", false);
        let mutation = ManagedMutation::new(
            key.clone(),
            marker,
            block,
            self.retry.clone(),
            self.config.keep_alive(),
            self.drop_mutation_on_timeout(key.clone()),
        );
        self.mutations.entry(key).or_insert(mutation).clone()
    }

    /// Get or create the subscription for `key`.
    pub fn subscription(&self, key: UniqueId, block: SubscribeBlock) -> Arc<ManagedSubscription> {
        self.subscription_with(key, Marker::none(), block)
    }

    pub fn subscription_with(
        &self,
        key: UniqueId,
        marker: Marker,
        block: SubscribeBlock,
    ) -> Arc<ManagedSubscription> {
        if let Some(existing) = self.subscriptions.get(&key) {
            crate::metrics::record_lookup("subscription", true);
            return existing.clone();
        }
        crate::metrics::record_lookup("subscription", false);
        let subscription = ManagedSubscription::new(
            key.clone(),
            marker,
            block,
            self.config.keep_alive(),
            self.drop_subscription_on_timeout(key.clone()),
        );
        self.subscriptions.entry(key).or_insert(subscription).clone()
    }

    /// Mark every matching query stale; active ones refetch immediately.
    pub fn invalidate_where(&self, filter: &EntryFilter) {
        let matches = self.snapshot().resolve(filter);
        for key in &matches.active {
            if let Some(query) = self.queries.get(key) {
                query.invalidate();
            }
        }
        let inactive = self.inactive.lock();
        for key in &matches.inactive {
            if let Some(query) = inactive.get(key) {
                query.invalidate();
            }
        }
    }

    /// Wipe every matching query back to the never-fetched model.
    pub fn reset_where(&self, filter: &EntryFilter) {
        let matches = self.snapshot().resolve(filter);
        for key in &matches.active {
            if let Some(query) = self.queries.get(key) {
                query.reset();
            }
        }
        let inactive = self.inactive.lock();
        for key in &matches.inactive {
            if let Some(query) = inactive.get(key) {
                query.reset();
            }
        }
    }

    /// Remove every matching query entirely. Active instances are
    /// cancelled first.
    pub fn prune_where(&self, filter: &EntryFilter) {
        let matches = self.snapshot().resolve(filter);
        for key in &matches.active {
            if let Some((_, query)) = self.queries.remove(key) {
                query.cancel();
            }
        }
        {
            let mut inactive = self.inactive.lock();
            for key in &matches.inactive {
                inactive.delete(key);
            }
        }
        if !matches.is_empty() {
            debug!(count = matches.len(), "Pruned entries");
            crate::metrics::set_active_entries("query", self.queries.len());
            crate::metrics::set_inactive_entries(self.inactive.lock().len());
        }
    }

    /// Re-raise a failure onto the error relay.
    pub fn report_error(&self, error: EngineError, key: UniqueId, marker: Marker) {
        self.relay.send(ErrorRecord::new(error, key, marker));
    }

    #[must_use]
    pub fn relay(&self) -> &ErrorRelay {
        &self.relay
    }

    /// New independent listener on the error relay.
    #[must_use]
    pub fn subscribe_errors(&self) -> ErrorListener {
        self.relay.subscribe()
    }

    /// Active query count (all kinds have their own pools).
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.queries.len()
    }

    /// Demoted entry count, including not-yet-swept expired entries.
    #[must_use]
    pub fn inactive_count(&self) -> usize {
        self.inactive.lock().len()
    }

    /// Cancel everything and stop the GC loop (final flush included).
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        for task in self.observer_tasks.lock().drain(..) {
            task.abort();
        }
        for entry in self.queries.iter() {
            entry.value().cancel();
        }
        for entry in self.mutations.iter() {
            entry.value().cancel();
        }
        for entry in self.subscriptions.iter() {
            entry.value().cancel();
        }
        self.gc.shutdown().await;
        self.queries.clear();
        self.mutations.clear();
        self.subscriptions.clear();
        self.inactive.lock().clear();
        info!("Engine shut down");
    }

    fn lookup_query(&self, key: &UniqueId) -> Option<Arc<ManagedQuery>> {
        if let Some(query) = self.queries.get(key) {
            crate::metrics::record_lookup("query", true);
            return Some(query.clone());
        }
        let promoted = {
            let mut inactive = self.inactive.lock();
            if inactive.get(key).is_none() {
                // Drop a lazily-expired leftover here: the caller is
                // about to create a replacement instance, and bulk
                // snapshots must never see both under one key.
                inactive.delete(key);
                return None;
            }
            inactive.delete(key)?
        };
        debug!(key = %key, "Promoted query from inactive cache");
        crate::metrics::record_promotion();
        crate::metrics::record_lookup("query", true);
        self.queries.insert(key.clone(), promoted.clone());
        Some(promoted)
    }

    /// Keep-alive lapse → post a demotion to the GC batch. The check for
    /// a re-attach happens at flush time, not post time.
    fn demote_on_timeout(&self, key: UniqueId) -> TimeoutCallback {
        let weak = self.weak.clone();
        Arc::new(move |_seq| {
            let Some(engine) = weak.upgrade() else { return };
            let weak = weak.clone();
            let key = key.clone();
            engine.gc.post(move || {
                if let Some(engine) = weak.upgrade() {
                    engine.demote(&key);
                }
            });
        })
    }

    fn demote(&self, key: &UniqueId) {
        let Some(query) = self.queries.get(key).map(|q| q.value().clone()) else {
            return;
        };
        if query.is_active() {
            debug!(key = %key, "Demotion skipped, query re-attached");
            return;
        }
        self.queries.remove(key);
        let mut inactive = self.inactive.lock();
        inactive.evict();
        inactive.set(key.clone(), query, self.config.inactive_ttl_secs);
        crate::metrics::set_inactive_entries(inactive.len());
        drop(inactive);
        crate::metrics::set_active_entries("query", self.queries.len());
        debug!(key = %key, "Query demoted to inactive cache");
    }

    fn drop_mutation_on_timeout(&self, key: UniqueId) -> TimeoutCallback {
        let weak = self.weak.clone();
        Arc::new(move |_seq| {
            let Some(engine) = weak.upgrade() else { return };
            let weak = weak.clone();
            let key = key.clone();
            engine.gc.post(move || {
                if let Some(engine) = weak.upgrade() {
                    engine.mutations.remove_if(&key, |_, m| !m.is_active());
                }
            });
        })
    }

    fn drop_subscription_on_timeout(&self, key: UniqueId) -> TimeoutCallback {
        let weak = self.weak.clone();
        Arc::new(move |_seq| {
            let Some(engine) = weak.upgrade() else { return };
            let weak = weak.clone();
            let key = key.clone();
            engine.gc.post(move || {
                if let Some(engine) = weak.upgrade() {
                    engine.subscriptions.remove_if(&key, |_, s| !s.is_active());
                }
            });
        })
    }

    fn snapshot(&self) -> FilterResolver {
        let active = self
            .queries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().model()))
            .collect();
        let inactive = self
            .inactive
            .lock()
            .iter()
            .map(|(key, query)| (key.clone(), query.model()))
            .collect();
        FilterResolver::new(active, inactive)
    }

    fn resume_awaited(&self, trigger: &str) {
        let queries: Vec<Arc<ManagedQuery>> = self
            .queries
            .iter()
            .filter(|entry| {
                let model = entry.value().model();
                entry.value().is_active() && (model.is_awaited() || model.error.is_some())
            })
            .map(|entry| entry.value().clone())
            .collect();
        let subscriptions: Vec<Arc<ManagedSubscription>> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().is_active() && entry.value().model().error.is_some())
            .map(|entry| entry.value().clone())
            .collect();

        let count = queries.len() + subscriptions.len();
        for query in queries {
            query.resume();
        }
        for subscription in subscriptions {
            subscription.resume();
        }
        if count > 0 {
            info!(trigger, count, "Resumed awaited operations");
            crate::metrics::record_resume(trigger, count);
        }
    }
}
