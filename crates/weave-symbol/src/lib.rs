//! Weave Identifier Registry
//!
//! Deterministic, type-prefixed identifiers for discovered entities.
//!
//! # Overview
//!
//! The generation backend only ever reports *names*. Identifiers are derived
//! here, as a pure function of `(kind, normalized canonical name)`, so
//! re-running discovery on unchanged input yields byte-identical identifiers.
//!
//! - **StableId**: `<prefix>.<slug>` identifier (`comp.login_form`)
//! - **IdentifierRegistry**: records minted ids, canonical names and aliases
//!
//! # Example
//!
//! ```rust
//! use weave_symbol::{EntityKind, IdentifierRegistry};
//!
//! let registry = IdentifierRegistry::new();
//! let id = registry.mint(EntityKind::Component, "Login Form").unwrap();
//! assert_eq!(id.to_string(), "comp.login_form");
//! assert_eq!(registry.mint(EntityKind::Component, "LoginForm").unwrap(), id);
//! ```

#![warn(missing_docs)]

pub mod registry;
pub mod symbol;

pub use registry::{IdentifierRegistry, RegistryEntry};
pub use symbol::{normalize_name, EntityKind, IdentifierError, StableId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
