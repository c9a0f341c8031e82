//! Identifier registry
//!
//! [`IdentifierRegistry`] records every identifier minted during a run together
//! with the canonical name and the raw mentions that were grouped under it.
//! Minting is idempotent: minting the same canonical name twice returns the
//! same identifier and records nothing new. The final state does not depend
//! on the order names and aliases arrive in.

use crate::symbol::{normalize_name, EntityKind, IdentifierError, StableId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One registered entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// Minted identifier
    pub id: StableId,
    /// Lowest of the spellings supplied for this identifier
    pub canonical_name: String,
    /// Normalized raw mentions grouped under this entity
    pub aliases: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: BTreeMap<StableId, RegistryEntry>,
    aliases: BTreeMap<(EntityKind, String), StableId>,
}

/// Deterministic identifier registry
///
/// Iteration order is the identifier order, so snapshots of two registries
/// built from the same canonical input compare equal.
#[derive(Debug, Default)]
pub struct IdentifierRegistry {
    inner: RwLock<RegistryState>,
}

impl IdentifierRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint (or look up) the identifier for a canonical name
    ///
    /// Spelling variants share one entry; the entry keeps the lowest spelling
    /// so that the result is independent of minting order.
    ///
    /// # Errors
    /// Returns error if the name normalizes to nothing
    pub fn mint(&self, kind: EntityKind, canonical_name: &str) -> Result<StableId, IdentifierError> {
        let id = StableId::derive(kind, canonical_name)?;
        let spelling = canonical_name.trim();
        let mut state = self.inner.write();
        match state.entries.get_mut(&id) {
            Some(entry) => {
                if spelling < entry.canonical_name.as_str() {
                    entry.canonical_name = spelling.to_string();
                }
            }
            None => {
                tracing::debug!(%id, canonical_name, "minted identifier");
                state.entries.insert(
                    id.clone(),
                    RegistryEntry {
                        id: id.clone(),
                        canonical_name: spelling.to_string(),
                        aliases: BTreeSet::new(),
                    },
                );
            }
        }
        state
            .aliases
            .insert((kind, id.slug().to_string()), id.clone());
        Ok(id)
    }

    /// Record a raw mention as an alias of a registered identifier
    ///
    /// An alias that is the slug of a minted identifier always resolves to that
    /// identifier. Otherwise an alias claimed by several identifiers of the
    /// same kind binds to the lowest of them.
    ///
    /// # Errors
    /// Returns error if `id` was never minted or the alias is empty
    pub fn add_alias(&self, id: &StableId, alias: &str) -> Result<(), IdentifierError> {
        let normalized = normalize_name(alias);
        if normalized.is_empty() {
            return Err(IdentifierError::EmptyName(alias.to_string()));
        }
        let mut state = self.inner.write();
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| IdentifierError::NotRegistered(id.to_string()))?;
        entry.aliases.insert(normalized.clone());

        let key = (id.kind(), normalized);
        match state.aliases.get(&key) {
            Some(existing) if existing == id => {}
            Some(existing) if existing.slug() == key.1 || existing < id => {
                tracing::warn!(alias, %existing, requested = %id, "alias already bound; keeping existing binding");
            }
            _ => {
                state.aliases.insert(key, id.clone());
            }
        }
        Ok(())
    }

    /// Resolve a raw name (canonical or alias) to its identifier
    #[must_use]
    pub fn resolve(&self, kind: EntityKind, name: &str) -> Option<StableId> {
        let normalized = normalize_name(name);
        self.inner.read().aliases.get(&(kind, normalized)).cloned()
    }

    /// Whether the identifier was minted
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &StableId) -> bool {
        self.inner.read().entries.contains_key(id)
    }

    /// Whether a raw identifier string names a minted identifier
    #[must_use]
    pub fn contains_str(&self, raw: &str) -> bool {
        raw.parse::<StableId>().is_ok_and(|id| self.contains(&id))
    }

    /// Entry for an identifier
    #[must_use]
    pub fn get(&self, id: &StableId) -> Option<RegistryEntry> {
        self.inner.read().entries.get(id).cloned()
    }

    /// All identifiers of one kind, in identifier order
    #[must_use]
    pub fn ids_of(&self, kind: EntityKind) -> Vec<StableId> {
        self.inner
            .read()
            .entries
            .keys()
            .filter(|id| id.kind() == kind)
            .cloned()
            .collect()
    }

    /// Point-in-time copy of every entry
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<StableId, RegistryEntry> {
        self.inner.read().entries.clone()
    }

    /// Number of minted identifiers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether nothing was minted
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn mint_is_idempotent() {
        let registry = IdentifierRegistry::new();
        let a = registry.mint(EntityKind::Component, "Login Form").unwrap();
        let b = registry.mint(EntityKind::Component, "login-form").unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&a).unwrap().canonical_name, "Login Form");
    }

    #[test]
    fn kinds_are_separate_namespaces() {
        let registry = IdentifierRegistry::new();
        let comp = registry.mint(EntityKind::Component, "Session").unwrap();
        let state = registry.mint(EntityKind::StateModel, "Session").unwrap();
        assert_ne!(comp, state);
        assert_eq!(registry.ids_of(EntityKind::StateModel), vec![state]);
    }

    #[test]
    fn aliases_resolve_to_canonical_id() {
        let registry = IdentifierRegistry::new();
        let id = registry.mint(EntityKind::Component, "Usage Chart").unwrap();
        registry.add_alias(&id, "consumption graph").unwrap();

        assert_eq!(
            registry.resolve(EntityKind::Component, "Consumption Graph"),
            Some(id.clone())
        );
        assert_eq!(registry.resolve(EntityKind::Component, "usage_chart"), Some(id));
        assert_eq!(registry.resolve(EntityKind::Event, "usage chart"), None);
    }

    #[test]
    fn contested_alias_binds_the_lowest_id() {
        let registry = IdentifierRegistry::new();
        let chart = registry.mint(EntityKind::Component, "Usage Chart").unwrap();
        let table = registry.mint(EntityKind::Component, "Usage Table").unwrap();
        registry.add_alias(&table, "usage view").unwrap();
        registry.add_alias(&chart, "usage view").unwrap();
        assert_eq!(registry.resolve(EntityKind::Component, "usage view"), Some(chart.clone()));

        registry.add_alias(&chart, "usage table").unwrap();
        assert_eq!(registry.resolve(EntityKind::Component, "usage table"), Some(table));
    }

    #[test]
    fn lowest_spelling_is_kept() {
        let registry = IdentifierRegistry::new();
        let id = registry.mint(EntityKind::Component, "login-form").unwrap();
        registry.mint(EntityKind::Component, " Login Form ").unwrap();
        assert_eq!(registry.get(&id).unwrap().canonical_name, "Login Form");
    }

    #[test]
    fn alias_for_unknown_id_fails() {
        let registry = IdentifierRegistry::new();
        let id = StableId::derive(EntityKind::Event, "Ghost").unwrap();
        assert!(matches!(
            registry.add_alias(&id, "spirit"),
            Err(IdentifierError::NotRegistered(_))
        ));
    }

    #[test]
    fn contains_str_checks_minted_ids_only() {
        let registry = IdentifierRegistry::new();
        registry.mint(EntityKind::Event, "Session Started").unwrap();
        assert!(registry.contains_str("event.session_started"));
        assert!(!registry.contains_str("event.session_ended"));
        assert!(!registry.contains_str("not an id"));
    }

    proptest! {
        #[test]
        fn minting_is_order_independent(names in proptest::collection::vec("[A-Za-z][A-Za-z0-9 _-]{0,12}", 1..16)) {
            let forward = IdentifierRegistry::new();
            for name in &names {
                forward.mint(EntityKind::Component, name).unwrap();
            }
            let backward = IdentifierRegistry::new();
            for name in names.iter().rev() {
                backward.mint(EntityKind::Component, name).unwrap();
            }
            let ids = |r: &IdentifierRegistry| r.snapshot().into_keys().collect::<Vec<_>>();
            prop_assert_eq!(ids(&forward), ids(&backward));
        }
    }
}
