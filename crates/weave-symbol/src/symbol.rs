//! Stable identifiers
//!
//! Provides [`StableId`], a type-prefixed identifier that is a pure function
//! of an entity's kind and normalized canonical name.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Namespace an identifier is minted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// UI or service component
    Component,
    /// Owned state model
    StateModel,
    /// Emitted/listened event
    Event,
    /// Data flow between components
    DataFlow,
    /// Component role
    Role,
    /// Story
    Story,
}

impl EntityKind {
    /// Every kind
    pub const ALL: [EntityKind; 6] = [
        Self::Component,
        Self::StateModel,
        Self::Event,
        Self::DataFlow,
        Self::Role,
        Self::Story,
    ];

    /// Identifier prefix
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Component => "comp",
            Self::StateModel => "state",
            Self::Event => "event",
            Self::DataFlow => "flow",
            Self::Role => "role",
            Self::Story => "story",
        }
    }

    /// Kind for an identifier prefix
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Normalize an entity name into an identifier slug
///
/// Lowercases, splits camelCase boundaries, and collapses every run of
/// non-alphanumeric characters into a single `_`. `"Login Form"`,
/// `"login-form"` and `"LoginForm"` all normalize to `login_form`.
///
/// Normalizing a slug returns it unchanged. Lowercasing can expand a letter
/// into a base letter plus combining marks ('İ' becomes "i\u{307}"); only
/// the alphanumeric part of the expansion is kept.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut prev: Option<char> = None;
    let mut pending_sep = false;

    for c in name.trim().chars() {
        let mut lowered = c.to_lowercase().filter(|l| l.is_alphanumeric()).peekable();
        if lowered.peek().is_some() {
            let camel_boundary = c.is_uppercase()
                && !c.to_lowercase().eq(std::iter::once(c))
                && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit());
            if (pending_sep || camel_boundary) && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(lowered);
        } else {
            pending_sep = true;
        }
        prev = Some(c);
    }

    slug
}

/// Type-prefixed stable identifier: `<prefix>.<slug>`
///
/// Equal (kind, normalized name) pairs always produce equal identifiers,
/// independent of call order or process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StableId {
    kind: EntityKind,
    slug: String,
}

impl StableId {
    /// Derive the identifier for a canonical name
    ///
    /// # Errors
    /// Returns error if the name normalizes to an empty slug
    pub fn derive(kind: EntityKind, canonical_name: &str) -> Result<Self, IdentifierError> {
        let slug = normalize_name(canonical_name);
        if slug.is_empty() {
            return Err(IdentifierError::EmptyName(canonical_name.to_string()));
        }
        Ok(Self { kind, slug })
    }

    /// Namespace
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Normalized name part
    #[inline]
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }
}

impl Display for StableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.prefix(), self.slug)
    }
}

impl FromStr for StableId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, slug) = s
            .split_once('.')
            .ok_or_else(|| IdentifierError::Malformed(s.to_string()))?;
        let kind = EntityKind::from_prefix(prefix)
            .ok_or_else(|| IdentifierError::UnknownPrefix(prefix.to_string()))?;
        if slug.is_empty() || normalize_name(slug) != slug {
            return Err(IdentifierError::Malformed(s.to_string()));
        }
        Ok(Self {
            kind,
            slug: slug.to_string(),
        })
    }
}

impl Serialize for StableId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StableId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// Name has no alphanumeric content
    #[error("name '{0}' normalizes to an empty identifier")]
    EmptyName(String),

    /// Identifier does not have the `<prefix>.<slug>` form
    #[error("malformed identifier: '{0}'")]
    Malformed(String),

    /// Identifier prefix names no known kind
    #[error("unknown identifier prefix: '{0}'")]
    UnknownPrefix(String),

    /// Identifier is not in the registry
    #[error("identifier not registered: {0}")]
    NotRegistered(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalization_collapses_spelling_variants() {
        assert_eq!(normalize_name("Login Form"), "login_form");
        assert_eq!(normalize_name("login-form"), "login_form");
        assert_eq!(normalize_name("LoginForm"), "login_form");
        assert_eq!(normalize_name("  login__form!! "), "login_form");
        assert_eq!(normalize_name("OAuth2Token"), "oauth2_token");
    }

    #[test]
    fn derive_prefixes_by_kind() {
        let id = StableId::derive(EntityKind::Event, "User Logged In").unwrap();
        assert_eq!(id.to_string(), "event.user_logged_in");
        let id = StableId::derive(EntityKind::StateModel, "Session").unwrap();
        assert_eq!(id.to_string(), "state.session");
    }

    #[test]
    fn derive_rejects_empty_names() {
        assert_eq!(
            StableId::derive(EntityKind::Component, " -- "),
            Err(IdentifierError::EmptyName(" -- ".to_string()))
        );
    }

    #[test]
    fn parse_round_trips() {
        let id: StableId = "comp.usage_chart".parse().unwrap();
        assert_eq!(id.kind(), EntityKind::Component);
        assert_eq!(id.slug(), "usage_chart");
        assert_eq!(id.to_string(), "comp.usage_chart");
    }

    #[test]
    fn parse_rejects_foreign_ids() {
        assert!(matches!(
            "widget.chart".parse::<StableId>(),
            Err(IdentifierError::UnknownPrefix(_))
        ));
        assert!(matches!(
            "comp.Usage Chart".parse::<StableId>(),
            Err(IdentifierError::Malformed(_))
        ));
        assert!(matches!(
            "comp".parse::<StableId>(),
            Err(IdentifierError::Malformed(_))
        ));
    }

    #[test]
    fn serde_uses_display_form() {
        let id = StableId::derive(EntityKind::DataFlow, "Auth to Dashboard").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"flow.auth_to_dashboard\"");
        assert_eq!(serde_json::from_str::<StableId>(&json).unwrap(), id);
    }

    #[test]
    fn expanding_lowercase_mints_parseable_ids() {
        assert_eq!(normalize_name("İstanbul Map"), "istanbul_map");

        let id = StableId::derive(EntityKind::Component, "İstanbul Map").unwrap();
        assert_eq!(id.to_string().parse::<StableId>().unwrap(), id);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<StableId>(&json).unwrap(), id);
    }

    #[test]
    fn caseless_capitals_do_not_split() {
        assert_eq!(normalize_name("Aϒ"), normalize_name(&normalize_name("Aϒ")));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(name in any::<String>()) {
            let once = normalize_name(&name);
            prop_assert_eq!(normalize_name(&once), once);
        }

        #[test]
        fn derived_ids_parse_back(name in "\\PC{1,24}") {
            if let Ok(id) = StableId::derive(EntityKind::Component, &name) {
                prop_assert_eq!(id.to_string().parse::<StableId>(), Ok(id));
            }
        }
    }
}
