//! Quality judge
//!
//! Scores a rendered story on four 0-5 dimensions. The overall score is the
//! mean of the four, computed here; whatever overall score or recommendation
//! the backend reports is ignored. Decision rule:
//!
//! - `overall >= approve_score` → [`Recommendation::Approve`]
//! - below the cutoff on a first verdict → [`Recommendation::Rewrite`]
//! - below the cutoff after a rewrite → [`Recommendation::ManualReview`]
//!
//! The judge also forwards its relationship proposals, with each proposal's
//! confidence resolved from the inline value or the `confidenceByRelationship`
//! map.

use crate::call::generate_shaped;
use crate::context::SharedContext;
use crate::error::StageError;
use crate::prompts;
use crate::relationship::Relationship;
use crate::shape::{QualityRubric, RubricScores};
use crate::types::StoryBrief;
use serde::{Deserialize, Serialize};
use weave_artifact::StoryRecord;
use weave_gateway::{GenerationRequest, TextGenerator};

/// Judge recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recommendation {
    Approve,
    Rewrite,
    ManualReview,
}

/// One judging result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub scores: RubricScores,
    pub overall_score: f64,
    pub recommendation: Recommendation,
    /// Section-separation violations handed to the rewriter
    pub violations: Vec<String>,
    /// Proposed context mutations, confidence resolved
    pub new_relationships: Vec<Relationship>,
    pub needs_context_update: bool,
    /// Produced by the single re-judge after a rewrite
    pub judged_after_rewrite: bool,
}

impl Verdict {
    /// Build a verdict from the parsed rubric
    #[must_use]
    pub fn from_rubric(rubric: QualityRubric, approve_score: f64, after_rewrite: bool) -> Self {
        let overall_score = rubric.scores.mean();
        let recommendation = if overall_score >= approve_score {
            Recommendation::Approve
        } else if after_rewrite {
            Recommendation::ManualReview
        } else {
            Recommendation::Rewrite
        };
        if rubric.recommendation.is_some_and(|r| r != recommendation) {
            tracing::debug!(
                reported = ?rubric.recommendation,
                ?recommendation,
                overall_score,
                "overriding reported recommendation"
            );
        }

        let confidences = rubric.confidence_by_relationship;
        let new_relationships = rubric
            .new_relationships
            .into_iter()
            .map(|mut rel| {
                if rel.confidence.is_none() {
                    rel.confidence = confidences.get(&rel.id).copied();
                }
                rel
            })
            .collect();

        Self {
            scores: rubric.scores,
            overall_score,
            recommendation,
            violations: rubric.violations,
            new_relationships,
            needs_context_update: rubric.needs_context_update,
            judged_after_rewrite: after_rewrite,
        }
    }

    /// Whether the story passed
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.recommendation == Recommendation::Approve
    }
}

/// Scores stories through the generation backend
#[derive(Clone, Copy)]
pub struct Judge<'a> {
    generator: &'a dyn TextGenerator,
    approve_score: f64,
}

impl<'a> Judge<'a> {
    /// Judge approving at `approve_score` and above
    #[must_use]
    pub fn new(generator: &'a dyn TextGenerator, approve_score: f64) -> Self {
        Self {
            generator,
            approve_score,
        }
    }

    /// Judge one rendered story
    ///
    /// # Errors
    /// Returns error if the call fails or the rubric is malformed
    pub async fn judge(
        &self,
        brief: &StoryBrief,
        record: &StoryRecord,
        ctx: &SharedContext,
        after_rewrite: bool,
    ) -> Result<Verdict, StageError> {
        let request = GenerationRequest::new(
            prompts::JUDGE,
            prompts::JUDGE_INSTRUCTIONS,
            prompts::story_content(
                &brief.story_id,
                &brief.product,
                &brief.seed.text,
                &record.render(),
                ctx,
            ),
        );
        let rubric: QualityRubric = generate_shaped(self.generator, &request).await?;
        let verdict = Verdict::from_rubric(rubric, self.approve_score, after_rewrite);
        tracing::info!(
            story_id = %brief.story_id,
            overall_score = verdict.overall_score,
            recommendation = ?verdict.recommendation,
            after_rewrite,
            proposals = verdict.new_relationships.len(),
            "story judged"
        );
        Ok(verdict)
    }
}
