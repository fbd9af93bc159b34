//! # SWR Engine
//!
//! A client-side stale-while-revalidate cache and execution engine.
//!
//! ## Architecture
//!
//! One live state machine per key, pooled by the engine:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Observation Layer                      │
//! │  • query()/mutation()/subscription() hand out pooled       │
//! │    instances; attach() returns a keep-alive lease          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Per-Key Actors (ActorBlockRunner)           │
//! │  • One execution loop per key, refcounted observers        │
//! │  • Keep-alive grace window after the last detach           │
//! │  • RetryOptions backoff around every attempt               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                  (GC demotion via BatchScheduler)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Inactive Cache (TimeBasedCache)              │
//! │  • Capacity-bounded, per-entry TTL                         │
//! │  • Eviction picks the entry nearest to expiry              │
//! │  • Next lookup promotes the same instance back             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swr_engine::{CacheEngine, EngineConfig, FetchBlock, UniqueId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = CacheEngine::new(EngineConfig::default()).unwrap();
//!
//!     let fetch: FetchBlock = Arc::new(|| {
//!         Box::pin(async {
//!             // Call your backend here.
//!             Ok(serde_json::json!({"name": "John Doe"}))
//!         })
//!     });
//!     let query = engine.query(UniqueId::new("user.profile").with_tags(["42"]), fetch);
//!
//!     // Observing launches the fetch; dropping the handle starts the
//!     // keep-alive countdown.
//!     let mut observed = query.attach();
//!     let value = observed.settled().await.unwrap();
//!     println!("got {value}");
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Features
//!
//! - **Stale-While-Revalidate**: observers see the last good reply
//!   instantly while a background refresh runs
//! - **Actor-per-Key**: executions are serialized per key and shared by
//!   all observers of that key
//! - **Keep-Alive**: unobserved work survives a grace window, so screen
//!   transitions don't restart in-flight fetches
//! - **TTL Demotion**: unobserved queries age out through a bounded
//!   inactive cache instead of dying immediately
//! - **Retry Logic**: exponential backoff with jitter around every attempt
//! - **Error Relay**: drop-oldest broadcast bus for homeless background
//!   failures
//! - **Resume Triggers**: debounced reconnect and foreground transitions
//!   refresh whatever is still awaited
//!
//! ## Configuration
//!
//! See [`EngineConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`engine`]: The main [`CacheEngine`] and per-key state machines
//! - [`cache`]: Capacity-bounded TTL cache backing demotion
//! - [`priority`]: Binary heap with interior removal
//! - [`batching`]: Chunk-or-interval batch scheduler (GC)
//! - [`resilience`]: Retry with exponential backoff
//! - [`relay`]: Error broadcast bus
//! - [`actor`]: Refcounted per-key execution with keep-alive
//! - [`observers`]: Connectivity/visibility sources and resume signals
//! - [`filter`]: Entry selection for bulk operations

pub mod actor;
pub mod batching;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod identity;
pub mod metrics;
pub mod model;
pub mod observers;
pub mod priority;
pub mod relay;
pub mod reply;
pub mod resilience;

pub use actor::{ActorBlock, ActorBlockRunner, ActorLease, RunnerState};
pub use batching::{BatchConfig, BatchScheduler, FlushReason};
pub use cache::{SystemTimeSource, TimeBasedCache, TimeSource};
pub use config::EngineConfig;
pub use engine::{
    CacheEngine, FetchBlock, ManagedMutation, ManagedQuery, ManagedSubscription, MutateBlock,
    ObservedMutation, ObservedQuery, ObservedSubscription, SubscribeBlock,
};
pub use error::EngineError;
pub use filter::{EntryFilter, FilterMatches, FilterResolver, FilterScope};
pub use identity::{Marker, UniqueId};
pub use model::{epoch_millis, DataModel, EpochMillis};
pub use observers::{
    EventNotifier, NetworkEvent, NetworkObserver, VisibilityEvent, VisibilityObserver,
};
pub use priority::PriorityQueue;
pub use relay::{
    DefaultRelayPolicy, ErrorListener, ErrorRecord, ErrorRelay, RelayPolicy,
};
pub use reply::Reply;
pub use resilience::RetryOptions;
