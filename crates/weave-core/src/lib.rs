//! Weave Core
//!
//! The story synthesis pipeline: turns design material into cross-referenced,
//! quality-gated user stories backed by a text-generation backend.
//!
//! # Passes
//!
//! - **Discovery**: entity names from the source material, identifiers
//!   minted locally, shared context assembled ([`discovery`])
//! - **Generation**: single-concern advisors patch each story inside disjoint
//!   write-scopes ([`advisor`]); a judge scores it and low scores get one
//!   structural rewrite ([`judge`], [`rewriter`]); confident relationship
//!   proposals feed back into the context for up to three rounds
//!   ([`refinement`], [`relationship`])
//! - **Interconnection**: per-story cross-references ([`interconnection`])
//! - **Consistency**: cross-story issues, confident fixes applied, the rest
//!   flagged ([`consistency`])
//!
//! [`Pipeline`] sequences the passes and reports [`RunMetadata`].
//!
//! # Example
//!
//! ```rust,ignore
//! use weave_core::prelude::*;
//!
//! let config = PipelineConfig::new(EvaluationMode::Lenient);
//! let pipeline = Pipeline::new(gateway_from_config(&config)?, config)?;
//! let bundle = SourceBundle::new("Acme analytics")
//!     .with_seed(StorySeed::new("login", "Email + password form"));
//! let report = pipeline.run(&bundle).await?;
//! assert_eq!(report.metadata.passes_completed.len(), 4);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod advisor;
pub mod call;
pub mod config;
pub mod consistency;
pub mod context;
pub mod discovery;
pub mod error;
pub mod interconnection;
pub mod judge;
pub mod orchestrator;
pub mod prompts;
pub mod refinement;
pub mod relationship;
pub mod rewriter;
pub mod shape;
pub mod types;

pub use advisor::{standard_advisors, Advisor, AdvisorRunner};
pub use config::{EvaluationMode, PipelineConfig, RestartPolicy, Thresholds, MAX_REFINEMENT_ROUNDS};
pub use consistency::{
    AppliedFix, ConsistencyEngine, ConsistencyReport, Fix, FixApplicator, FixOutcome, FixType,
    FlagReason, FlaggedFix, Issue, IssueKind,
};
pub use context::SharedContext;
pub use discovery::DiscoveryEngine;
pub use error::{ConfigError, PipelineError, StageError};
pub use interconnection::{InterconnectionEngine, Ownership, RelatedStory, StoryInterconnections, StoryRelation};
pub use judge::{Judge, Recommendation, Verdict};
pub use orchestrator::{gateway_from_config, Pipeline, RunMetadata, RunReport, StoryOutcome};
pub use relationship::{Relationship, RelationshipKind, RelationshipOp};
pub use rewriter::Rewriter;
pub use shape::{validate, ShapeError, ShapeKind, Shaped};
pub use types::{
    FailureKind, Pass, ReferenceDoc, RunId, SourceBundle, StoryBrief, StoryFailure, StorySeed,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for driving a run
pub mod prelude {
    pub use crate::config::{EvaluationMode, PipelineConfig};
    pub use crate::error::PipelineError;
    pub use crate::orchestrator::{gateway_from_config, Pipeline, RunReport};
    pub use crate::types::{ReferenceDoc, SourceBundle, StorySeed};
    pub use weave_gateway::{ImageAttachment, TextGenerator};
}
