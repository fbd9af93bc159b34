// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capacity-bounded, per-entry-TTL key/value store.
//!
//! A priority queue keyed by expiry time decides which entry to evict
//! when a new key would push the table over capacity: always the entry
//! nearest to expiry, even if it has not technically expired yet.
//!
//! Expiry on read is lazy: `get` hides an expired entry but does not
//! remove it; `evict()` is the sole sweep point. `len`/`keys` may
//! therefore include logically-expired entries between sweeps, and
//! dependent call sites rely on that.
//!
//! Not internally synchronized: owned and mutated by a single
//! coordinating task, per the engine's single-writer discipline.
//!
//! # Example
//!
//! ```
//! use swr_engine::{TimeBasedCache, SystemTimeSource};
//! use std::sync::Arc;
//!
//! let mut cache = TimeBasedCache::new(3, Arc::new(SystemTimeSource));
//! cache.set("a", 1, 60);
//! assert_eq!(cache.get(&"a"), Some(&1));
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::priority::PriorityQueue;

/// Injected clock, epoch seconds. Defaults to wall time; tests supply a
/// manual source.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall-clock time source (epoch seconds).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: u64,
}

/// Expiry reference kept in the priority queue. Ordered by expiry first
/// so the heap minimum is always the entry nearest to expiry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ExpiryRef<K> {
    expires_at: u64,
    key: K,
}

/// Fixed-capacity TTL cache. See the module docs for eviction and
/// expiry semantics.
pub struct TimeBasedCache<K, V> {
    capacity: usize,
    time: Arc<dyn TimeSource>,
    entries: HashMap<K, Entry<V>>,
    expiries: PriorityQueue<ExpiryRef<K>>,
}

impl<K, V> TimeBasedCache<K, V>
where
    K: Eq + Hash + Ord + Clone,
{
    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize, time: Arc<dyn TimeSource>) -> Self {
        Self {
            capacity,
            time,
            entries: HashMap::with_capacity(capacity),
            expiries: PriorityQueue::with_capacity(capacity),
        }
    }

    /// Insert or overwrite `key` with `value`, expiring `ttl_secs` from now.
    ///
    /// Overwriting repositions the entry's expiry in the queue. Inserting
    /// a *new* key at capacity first evicts the single entry with the
    /// smallest `expires_at`.
    pub fn set(&mut self, key: K, value: V, ttl_secs: u64) {
        let expires_at = self.time.now().saturating_add(ttl_secs);

        if let Some(existing) = self.entries.get_mut(&key) {
            let old_ref = ExpiryRef {
                expires_at: existing.expires_at,
                key: key.clone(),
            };
            existing.value = value;
            existing.expires_at = expires_at;
            self.expiries.remove(&old_ref);
        } else {
            if self.capacity == 0 {
                return;
            }
            if self.entries.len() >= self.capacity {
                self.evict_nearest_expiry();
            }
            self.entries.insert(key.clone(), Entry { value, expires_at });
        }
        self.expiries.push(ExpiryRef { expires_at, key });
    }

    /// Read `key`; an entry whose expiry has passed behaves as absent but
    /// is not removed (lazy expiry).
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let entry = self.entries.get(key)?;
        if self.time.now() >= entry.expires_at {
            return None;
        }
        Some(&entry.value)
    }

    /// Apply `f` to the current value (or `None`) and store the result.
    ///
    /// An existing entry keeps its `expires_at`; an absent key is inserted
    /// with `ttl_secs`, going through the regular capacity check.
    pub fn swap<F>(&mut self, key: &K, ttl_secs: u64, f: F)
    where
        F: FnOnce(Option<V>) -> V,
    {
        if let Some(entry) = self.entries.remove(key) {
            let expires_at = entry.expires_at;
            let value = f(Some(entry.value));
            self.entries.insert(key.clone(), Entry { value, expires_at });
        } else {
            let value = f(None);
            self.set(key.clone(), value, ttl_secs);
        }
    }

    /// Remove `key`, returning its value if it was present (expired or not).
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.expiries.remove(&ExpiryRef {
            expires_at: entry.expires_at,
            key: key.clone(),
        });
        Some(entry.value)
    }

    /// Actively sweep every entry with `expires_at <= now`.
    pub fn evict(&mut self) {
        let now = self.time.now();
        let mut swept = 0usize;
        while let Some(head) = self.expiries.peek() {
            if head.expires_at > now {
                break;
            }
            // Queue and table are kept in sync by set/delete, so the head
            // always names a live entry.
            let head = self.expiries.pop();
            if let Some(expired) = head {
                self.entries.remove(&expired.key);
                swept += 1;
            }
        }
        if swept > 0 {
            debug!(swept, remaining = self.entries.len(), "TTL sweep complete");
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.expiries.clear();
    }

    /// Entry count, including logically-expired entries not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, including logically-expired ones not yet swept.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// All entries, including logically-expired ones not yet swept.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, e)| (k, &e.value))
    }

    fn evict_nearest_expiry(&mut self) {
        if let Some(victim) = self.expiries.pop() {
            self.entries.remove(&victim.key);
            crate::metrics::record_cache_eviction("capacity");
            debug!(expires_at = victim.expires_at, "Evicted entry nearest to expiry");
        }
    }
}
