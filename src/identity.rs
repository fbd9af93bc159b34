// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key identity and per-call markers.
//!
//! A [`UniqueId`] is the stable logical identity of a cached item: a
//! namespace plus an ordered list of secondary key fragments (tags).
//! Equality and hashing are structural, so two independently constructed
//! descriptors with the same namespace/tags collapse onto the same slot.
//!
//! # Example
//!
//! ```
//! use swr_engine::UniqueId;
//!
//! let a = UniqueId::new("user.profile").with_tags(["42"]);
//! let b = UniqueId::new("user.profile").with_tags(["42"]);
//! assert_eq!(a, b);
//! assert!(a.matches_tags(&["42".to_string()]));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structural identity of a cached item: namespace + ordered tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId {
    namespace: String,
    tags: Vec<String>,
}

impl UniqueId {
    /// Create an id with a namespace and no tags.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            tags: Vec::new(),
        }
    }

    /// Append secondary key fragments, returning the extended id.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Tag intersection test used by bulk-operation filters.
    /// True when any of `keys` appears in this id's tag list.
    #[must_use]
    pub fn matches_tags(&self, keys: &[String]) -> bool {
        keys.iter().any(|k| self.tags.contains(k))
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            write!(f, "{}", self.namespace)
        } else {
            write!(f, "{}[{}]", self.namespace, self.tags.join(","))
        }
    }
}

/// Extensible, immutable property bag attached to every engine call.
///
/// Markers ride alongside an operation into retry and error policies
/// without threading extra parameters through every signature. Cloning
/// is cheap (shared map).
#[derive(Debug, Clone, Default)]
pub struct Marker {
    entries: Arc<HashMap<String, Value>>,
}

impl Marker {
    /// The empty marker.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Return a new marker with `key` set to `value`.
    /// The original marker is unchanged.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut entries: HashMap<String, Value> = (*self.entries).clone();
        entries.insert(key.into(), value.into());
        Self {
            entries: Arc::new(entries),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "-");
        }
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        write!(f, "{}", keys.join(","))
    }
}
