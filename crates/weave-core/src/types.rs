//! Core types for the pipeline
//!
//! - Run identifiers and pass names
//! - Source material (seeds, references, images)
//! - Per-story failure records

use crate::error::StageError;
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use weave_gateway::{FailureClass, ImageAttachment};

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pass {
    /// Context discovery and identifier minting
    Discovery,
    /// Advisor generation, judging and refinement
    Generation,
    /// Per-story cross-references
    Interconnection,
    /// Cross-story reconciliation
    Consistency,
}

impl Pass {
    /// Pass name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Generation => "generation",
            Self::Interconnection => "interconnection",
            Self::Consistency => "consistency",
        }
    }
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One story to synthesize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySeed {
    /// Short name the story id is derived from
    pub name: String,
    /// Mockup description or brief
    pub text: String,
    /// Images shown to discovery and the advisors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
}

impl StorySeed {
    /// Create seed
    #[must_use]
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            images: Vec::new(),
        }
    }

    /// With images
    #[inline]
    #[must_use]
    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }
}

/// Reference architecture document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDoc {
    /// Title or file name
    pub title: String,
    /// Body
    pub text: String,
}

impl ReferenceDoc {
    /// Create reference
    #[must_use]
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }
}

/// Everything a run synthesizes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBundle {
    /// Product description
    pub product: String,
    /// Story seeds
    pub seeds: Vec<StorySeed>,
    /// Reference documents
    #[serde(default)]
    pub references: Vec<ReferenceDoc>,
}

impl SourceBundle {
    /// Create bundle
    #[must_use]
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            ..Self::default()
        }
    }

    /// Add seed
    #[inline]
    #[must_use]
    pub fn with_seed(mut self, seed: StorySeed) -> Self {
        self.seeds.push(seed);
        self
    }

    /// Add reference
    #[inline]
    #[must_use]
    pub fn with_reference(mut self, reference: ReferenceDoc) -> Self {
        self.references.push(reference);
        self
    }
}

/// Per-story input handed to every story-level stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryBrief {
    /// Minted story id (`story.<slug>`)
    pub story_id: String,
    /// Product description shared by every story
    pub product: String,
    /// Seed the story is synthesized from
    pub seed: StorySeed,
}

impl StoryBrief {
    /// Create brief
    #[must_use]
    pub fn new(story_id: impl Into<String>, product: impl Into<String>, seed: StorySeed) -> Self {
        Self {
            story_id: story_id.into(),
            product: product.into(),
            seed,
        }
    }
}

/// Why a story did not finish cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// A generation call (advisor, rewrite, interconnection) failed
    GenerationFailed,
    /// The judge call itself failed; retry the call
    EvaluatorCrashed,
    /// The judge ran and the story still scored below the cutoff; fix the content
    QualityRejected,
}

/// Per-story failure record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryFailure {
    /// Story
    pub story_id: String,
    /// Pass the failure happened in
    pub pass: Pass,
    /// Category
    pub kind: FailureKind,
    /// Backend failure class when a call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    /// Detail
    pub message: String,
}

impl StoryFailure {
    /// Failure caused by a stage error
    #[must_use]
    pub fn from_stage(story_id: &str, pass: Pass, kind: FailureKind, error: &StageError) -> Self {
        Self {
            story_id: story_id.to_string(),
            pass,
            kind,
            failure_class: error.failure_class(),
            message: error.to_string(),
        }
    }

    /// Quality rejection after the authoritative verdict
    #[must_use]
    pub fn quality_rejected(story_id: &str, overall_score: f64) -> Self {
        Self {
            story_id: story_id.to_string(),
            pass: Pass::Generation,
            kind: FailureKind::QualityRejected,
            failure_class: None,
            message: format!("overall score {overall_score:.2} after rewrite; needs manual review"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_gateway::GatewayError;

    #[test]
    fn pass_order_matches_execution() {
        let mut passes = vec![Pass::Consistency, Pass::Discovery, Pass::Interconnection, Pass::Generation];
        passes.sort();
        assert_eq!(
            passes.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            ["discovery", "generation", "interconnection", "consistency"]
        );
    }

    #[test]
    fn failures_keep_backend_class() {
        let err = StageError::Gateway(GatewayError::Timeout { timeout_ms: 5 });
        let failure = StoryFailure::from_stage("story.a", Pass::Generation, FailureKind::EvaluatorCrashed, &err);
        assert_eq!(failure.failure_class, Some(FailureClass::Timeout));

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "evaluator-crashed");
        assert_eq!(json["failureClass"], "timeout");
    }
}
