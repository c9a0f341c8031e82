//! Error types for the pipeline
//!
//! - [`StageError`]: one generation-backed step failed (call or shape)
//! - [`PipelineError`]: the whole run failed
//! - [`ConfigError`]: configuration could not be loaded or is invalid
//!
//! Per-story failures are not run errors; see [`crate::types::StoryFailure`].

use crate::shape::ShapeError;
use weave_artifact::HashError;
use weave_composition::ScopeError;
use weave_gateway::{FailureClass, GatewayError};
use weave_symbol::IdentifierError;

/// A generation-backed step failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    /// Backend call failed after retries
    #[error("generation call failed: {0}")]
    Gateway(#[from] GatewayError),

    /// Response did not match the expected shape
    #[error("response rejected: {0}")]
    Shape(#[from] ShapeError),

    /// Patches named a writer with no registered scope
    #[error("composition failed: {0}")]
    Composition(#[from] ScopeError),
}

impl StageError {
    /// Backend failure class, if the call itself failed
    #[must_use]
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Gateway(e) => Some(e.class()),
            Self::Shape(_) | Self::Composition(_) => None,
        }
    }
}

/// Run-level failure
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Discovery could not produce a shared context
    #[error("discovery failed: {0}")]
    DiscoveryFailed(StageError),

    /// Consistency pass failed
    #[error("consistency pass failed: {0}")]
    ConsistencyFailed(StageError),

    /// Judge crashed while running in strict mode
    #[error("evaluator crashed on {story_id} (strict mode): {source}")]
    EvaluatorCrashed {
        story_id: String,
        #[source]
        source: StageError,
    },

    /// Advisor scopes could not be registered
    #[error("advisor registration failed: {0}")]
    Scope(#[from] ScopeError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Shared context could not be digested
    #[error("context digest failed: {0}")]
    Digest(#[from] HashError),

    /// No seeds to generate from
    #[error("no story seeds supplied")]
    NoSeeds,

    /// Seed name does not yield a story id
    #[error("invalid story seed '{name}': {source}")]
    InvalidSeed {
        name: String,
        #[source]
        source: IdentifierError,
    },

    /// Two seeds resolve to the same story id
    #[error("duplicate story id: {0}")]
    DuplicateStory(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be parsed
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Evaluation mode was not chosen
    #[error("evaluation mode must be set explicitly (strict or lenient)")]
    MissingEvaluationMode,

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    /// Create range error
    #[inline]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
