//! Write-scopes and their registry
//!
//! Each advisor declares the set of [`SectionPath`]s it may write. The
//! [`ScopeRegistry`] refuses to register a scope that overlaps one already
//! registered, so disjointness is established once, before any patch exists.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use weave_artifact::SectionPath;

/// Set of paths one writer may patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteScope {
    paths: BTreeSet<SectionPath>,
}

impl WriteScope {
    /// Create scope from paths
    #[must_use]
    pub fn new(paths: impl IntoIterator<Item = SectionPath>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    /// Scope covering every path
    #[must_use]
    pub fn all() -> Self {
        Self::new(SectionPath::ALL)
    }

    /// Whether `path` is writable
    #[inline]
    #[must_use]
    pub fn contains(&self, path: SectionPath) -> bool {
        self.paths.contains(&path)
    }

    /// Paths shared with another scope
    #[must_use]
    pub fn overlap(&self, other: &WriteScope) -> Vec<SectionPath> {
        self.paths.intersection(&other.paths).copied().collect()
    }

    /// Paths in order
    pub fn paths(&self) -> impl Iterator<Item = SectionPath> + '_ {
        self.paths.iter().copied()
    }

    /// Number of paths
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the scope permits nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FromIterator<SectionPath> for WriteScope {
    fn from_iter<I: IntoIterator<Item = SectionPath>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Registry of disjoint advisor write-scopes
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    scopes: BTreeMap<String, WriteScope>,
}

impl ScopeRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an advisor's scope
    ///
    /// # Errors
    /// - [`ScopeError::DuplicateWriter`] if the id is taken
    /// - [`ScopeError::EmptyScope`] if the scope permits nothing
    /// - [`ScopeError::Overlap`] if any path is already claimed
    pub fn register(
        &mut self,
        writer_id: impl Into<String>,
        scope: WriteScope,
    ) -> Result<(), ScopeError> {
        let writer_id = writer_id.into();
        if self.scopes.contains_key(&writer_id) {
            return Err(ScopeError::DuplicateWriter(writer_id));
        }
        if scope.is_empty() {
            return Err(ScopeError::EmptyScope(writer_id));
        }
        if let Some((other, shared)) = self
            .scopes
            .iter()
            .map(|(id, existing)| (id, existing.overlap(&scope)))
            .find(|(_, shared)| !shared.is_empty())
        {
            return Err(ScopeError::Overlap {
                writer: writer_id,
                claimed_by: other.clone(),
                paths: shared,
            });
        }
        self.scopes.insert(writer_id, scope);
        Ok(())
    }

    /// Scope of a registered writer
    #[inline]
    #[must_use]
    pub fn scope_of(&self, writer_id: &str) -> Option<&WriteScope> {
        self.scopes.get(writer_id)
    }

    /// Writer owning `path`, if any
    #[must_use]
    pub fn owner_of(&self, path: SectionPath) -> Option<&str> {
        self.scopes
            .iter()
            .find(|(_, scope)| scope.contains(path))
            .map(|(id, _)| id.as_str())
    }

    /// Registered writer ids, in order
    pub fn writers(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }

    /// Number of registered writers
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Whether nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Scope registration and composition errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// Writer id registered twice
    #[error("writer '{0}' is already registered")]
    DuplicateWriter(String),

    /// Scope with no paths
    #[error("writer '{0}' declares an empty write-scope")]
    EmptyScope(String),

    /// Scope overlaps an existing registration
    #[error("writer '{writer}' overlaps '{claimed_by}' on {paths:?}")]
    Overlap {
        writer: String,
        claimed_by: String,
        paths: Vec<SectionPath>,
    },

    /// Patches submitted for a writer that never registered
    #[error("writer '{0}' has no registered write-scope")]
    UnknownWriter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_scopes_register() {
        let mut registry = ScopeRegistry::new();
        registry
            .register("behavior", WriteScope::new([SectionPath::UserVisibleBehavior]))
            .unwrap();
        registry
            .register("scope-guard", WriteScope::new([SectionPath::EdgeCases, SectionPath::NonGoals]))
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.owner_of(SectionPath::NonGoals), Some("scope-guard"));
        assert_eq!(registry.owner_of(SectionPath::Title), None);
    }

    #[test]
    fn overlapping_scope_is_rejected() {
        let mut registry = ScopeRegistry::new();
        registry
            .register("acceptance", WriteScope::new([SectionPath::OutcomeAcceptanceCriteria]))
            .unwrap();
        let err = registry
            .register(
                "greedy",
                WriteScope::new([SectionPath::OutcomeAcceptanceCriteria, SectionPath::EdgeCases]),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ScopeError::Overlap {
                writer: "greedy".into(),
                claimed_by: "acceptance".into(),
                paths: vec![SectionPath::OutcomeAcceptanceCriteria],
            }
        );
        assert!(registry.scope_of("greedy").is_none());
    }

    #[test]
    fn duplicate_and_empty_registrations_fail() {
        let mut registry = ScopeRegistry::new();
        registry.register("a", WriteScope::new([SectionPath::Title])).unwrap();
        assert_eq!(
            registry.register("a", WriteScope::new([SectionPath::NonGoals])),
            Err(ScopeError::DuplicateWriter("a".into()))
        );
        assert_eq!(
            registry.register("b", WriteScope::default()),
            Err(ScopeError::EmptyScope("b".into()))
        );
    }
}
