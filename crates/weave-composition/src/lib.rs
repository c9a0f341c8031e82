//! Weave Composition
//!
//! Write-scope enforcement for concurrent story writers.
//!
//! # Strategy
//!
//! Only the single-writer strategy is supported: every writer registers a
//! disjoint [`WriteScope`] up front, and the [`ScopeGate`] discards any patch
//! that strays outside it. Disjointness makes batches from different writers
//! commute, so they can be produced concurrently and applied in one pass.
//!
//! # Example
//!
//! ```rust
//! use weave_artifact::SectionPath;
//! use weave_composition::{ScopeRegistry, WriteScope};
//!
//! let mut registry = ScopeRegistry::new();
//! registry.register("behavior", WriteScope::new([SectionPath::UserVisibleBehavior])).unwrap();
//! assert!(registry
//!     .register("greedy", WriteScope::new([SectionPath::UserVisibleBehavior]))
//!     .is_err());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod gate;
mod scope;
mod single_writer;

pub use gate::{DiagnosticKind, GateReport, PatchDiagnostic, ScopeGate};
pub use scope::{ScopeError, ScopeRegistry, WriteScope};
pub use single_writer::{apply_admitted, CompositionOutcome, SingleWriterComposer};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
