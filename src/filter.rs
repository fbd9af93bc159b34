// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entry selection for bulk cache operations.
//!
//! An [`EntryFilter`] narrows by lifecycle scope (active, inactive or
//! both), by key tags, and by an arbitrary predicate over the entry's
//! current [`DataModel`]. The [`FilterResolver`] evaluates a filter
//! against point-in-time snapshots so bulk operations never hold store
//! locks while user predicates run.

use std::fmt;
use std::sync::Arc;

use crate::identity::UniqueId;
use crate::model::DataModel;

/// Which lifecycle population a bulk operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterScope {
    Active,
    Inactive,
    #[default]
    Both,
}

/// Predicate over an entry's current data model.
pub type ModelPredicate = Arc<dyn Fn(&DataModel) -> bool + Send + Sync>;

/// Conjunction of scope, tag and model criteria. An empty filter
/// matches every entry in both scopes.
#[derive(Clone, Default)]
pub struct EntryFilter {
    scope: FilterScope,
    keys: Option<Vec<String>>,
    predicate: Option<ModelPredicate>,
}

impl fmt::Debug for EntryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryFilter")
            .field("scope", &self.scope)
            .field("keys", &self.keys)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

impl EntryFilter {
    /// Matches everything, both scopes.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn active() -> Self {
        Self {
            scope: FilterScope::Active,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn inactive() -> Self {
        Self {
            scope: FilterScope::Inactive,
            ..Self::default()
        }
    }

    /// Restrict to entries whose key shares at least one tag with `keys`.
    #[must_use]
    pub fn with_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to entries whose model satisfies `predicate`.
    #[must_use]
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&DataModel) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn scope(&self) -> FilterScope {
        self.scope
    }

    /// Whether one entry satisfies the tag and predicate criteria.
    /// Scope is resolved by the caller, which knows the population.
    #[must_use]
    pub fn matches(&self, id: &UniqueId, model: &DataModel) -> bool {
        if let Some(keys) = &self.keys {
            if !id.matches_tags(keys) {
                return false;
            }
        }
        match &self.predicate {
            Some(predicate) => predicate(model),
            None => true,
        }
    }
}

/// Entries selected by a filter, split by the population they came from.
#[derive(Debug, Default)]
pub struct FilterMatches {
    pub active: Vec<UniqueId>,
    pub inactive: Vec<UniqueId>,
}

impl FilterMatches {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.inactive.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len() + self.inactive.len()
    }
}

/// Evaluates filters against snapshots taken by the engine.
pub struct FilterResolver {
    active: Vec<(UniqueId, DataModel)>,
    inactive: Vec<(UniqueId, DataModel)>,
}

impl FilterResolver {
    #[must_use]
    pub fn new(
        active: Vec<(UniqueId, DataModel)>,
        inactive: Vec<(UniqueId, DataModel)>,
    ) -> Self {
        Self { active, inactive }
    }

    /// Keys matching the filter, grouped by population.
    #[must_use]
    pub fn resolve(&self, filter: &EntryFilter) -> FilterMatches {
        let mut matches = FilterMatches::default();
        if matches!(filter.scope(), FilterScope::Active | FilterScope::Both) {
            matches.active = Self::select(&self.active, filter);
        }
        if matches!(filter.scope(), FilterScope::Inactive | FilterScope::Both) {
            matches.inactive = Self::select(&self.inactive, filter);
        }
        matches
    }

    fn select(entries: &[(UniqueId, DataModel)], filter: &EntryFilter) -> Vec<UniqueId> {
        entries
            .iter()
            .filter(|(id, model)| filter.matches(id, model))
            .map(|(id, _)| id.clone())
            .collect()
    }
}
