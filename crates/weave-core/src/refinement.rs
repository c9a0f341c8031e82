//! One generation round for one story
//!
//! A round is strictly sequential within the story:
//!
//! ```text
//! advisors ─▶ judge ─┬─ approve ───────────────────────────▶ done
//!                    └─ rewrite ─▶ rewriter ─▶ judge again ─▶ done
//! ```
//!
//! The second verdict is authoritative; there is no further rewrite. The
//! round works on a fresh record generated against the context snapshot and
//! hands it back to the orchestrator, which commits it at the round barrier.
//! Failed calls never publish half-applied patches, and only rounds whose
//! judging completed contribute relationship proposals.

use crate::advisor::AdvisorRunner;
use crate::config::EvaluationMode;
use crate::context::SharedContext;
use crate::error::{PipelineError, StageError};
use crate::judge::{Judge, Recommendation, Verdict};
use crate::relationship::Relationship;
use crate::rewriter::Rewriter;
use crate::types::{FailureKind, Pass, StoryBrief, StoryFailure};
use weave_artifact::{ContentHash, StoryRecord};
use weave_composition::PatchDiagnostic;
use weave_gateway::TextGenerator;

/// Everything a story round needs besides the story itself
#[derive(Clone, Copy)]
pub struct RoundDeps<'a> {
    pub generator: &'a dyn TextGenerator,
    pub advisors: &'a AdvisorRunner,
    pub approve_score: f64,
    pub evaluation_mode: EvaluationMode,
    pub max_concurrency: usize,
}

/// Result of one story round
#[derive(Debug, Clone, Default)]
pub struct RoundOutcome {
    pub story_id: String,
    /// Record to commit; `None` keeps whatever the story had before
    pub record: Option<StoryRecord>,
    /// Authoritative verdict, when judging completed
    pub verdict: Option<Verdict>,
    /// Whether the rewriter ran
    pub rewritten: bool,
    pub diagnostics: Vec<PatchDiagnostic>,
    /// Relationship proposals from every completed verdict
    pub proposals: Vec<Relationship>,
    pub failure: Option<StoryFailure>,
}

impl RoundOutcome {
    fn new(story_id: &str) -> Self {
        Self {
            story_id: story_id.to_string(),
            ..Self::default()
        }
    }

    fn failed(mut self, kind: FailureKind, error: &StageError) -> Self {
        tracing::error!(story_id = %self.story_id, ?kind, %error, "story round failed");
        self.failure = Some(StoryFailure::from_stage(&self.story_id, Pass::Generation, kind, error));
        self
    }
}

fn collect_proposals(into: &mut Vec<Relationship>, verdict: &Verdict) {
    for rel in &verdict.new_relationships {
        let seen = !rel.id.is_empty() && into.iter().any(|r| r.id == rel.id);
        if !seen {
            into.push(rel.clone());
        }
    }
}

/// Judge crash handling: fatal in strict mode, a per-story failure otherwise
fn judge_crashed(
    deps: &RoundDeps<'_>,
    outcome: RoundOutcome,
    error: StageError,
) -> Result<RoundOutcome, PipelineError> {
    if deps.evaluation_mode.is_strict() {
        tracing::error!(story_id = %outcome.story_id, %error, "judge crashed in strict mode");
        return Err(PipelineError::EvaluatorCrashed {
            story_id: outcome.story_id,
            source: error,
        });
    }
    Ok(outcome.failed(FailureKind::EvaluatorCrashed, &error))
}

/// Run one round for `brief` against `ctx`
///
/// # Errors
/// Returns [`PipelineError::EvaluatorCrashed`] only in strict mode when a
/// judge call fails; every other failure is recorded on the outcome
pub async fn run_story_round(
    deps: RoundDeps<'_>,
    brief: &StoryBrief,
    ctx: &SharedContext,
    ctx_digest: ContentHash,
) -> Result<RoundOutcome, PipelineError> {
    let mut outcome = RoundOutcome::new(&brief.story_id);
    let mut record = StoryRecord::new(&brief.story_id, ctx_digest);

    match deps
        .advisors
        .run(deps.generator, brief, &mut record, ctx, deps.max_concurrency)
        .await
    {
        Ok(composed) => outcome.diagnostics = composed.diagnostics,
        Err(e) => return Ok(outcome.failed(FailureKind::GenerationFailed, &e)),
    }

    let judge = Judge::new(deps.generator, deps.approve_score);
    let first = match judge.judge(brief, &record, ctx, false).await {
        Ok(verdict) => verdict,
        Err(e) => {
            // Lenient: keep the unjudged record as a degraded result
            outcome.record = Some(record);
            return judge_crashed(&deps, outcome, e);
        }
    };
    collect_proposals(&mut outcome.proposals, &first);

    if first.recommendation != Recommendation::Rewrite {
        outcome.record = Some(record);
        outcome.verdict = Some(first);
        return Ok(outcome);
    }

    let mut rewritten = record.clone();
    match Rewriter::new(deps.generator)
        .rewrite(&mut rewritten, &first.violations)
        .await
    {
        Ok(composed) => outcome.diagnostics.extend(composed.diagnostics),
        Err(e) => {
            outcome.proposals.clear();
            outcome.record = Some(record);
            outcome.verdict = Some(first);
            return Ok(outcome.failed(FailureKind::GenerationFailed, &e));
        }
    }
    outcome.rewritten = true;

    let second = match judge.judge(brief, &rewritten, ctx, true).await {
        Ok(verdict) => verdict,
        Err(e) => {
            outcome.proposals.clear();
            outcome.record = Some(rewritten);
            outcome.verdict = Some(first);
            return judge_crashed(&deps, outcome, e);
        }
    };
    collect_proposals(&mut outcome.proposals, &second);
    if second.recommendation == Recommendation::ManualReview {
        tracing::warn!(
            story_id = %brief.story_id,
            overall_score = second.overall_score,
            "story still below the cutoff after rewrite"
        );
        outcome.failure = Some(StoryFailure::quality_rejected(&brief.story_id, second.overall_score));
    }
    outcome.record = Some(rewritten);
    outcome.verdict = Some(second);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts;
    use crate::types::StorySeed;
    use pretty_assertions::assert_eq;
    use weave_gateway::GatewayError;
    use weave_test_utils::{fixtures, ScriptedGenerator};

    fn brief() -> StoryBrief {
        StoryBrief::new("story.login", "Acme", StorySeed::new("login", "Email and password form"))
    }

    async fn round(scripted: &ScriptedGenerator, mode: EvaluationMode) -> Result<RoundOutcome, PipelineError> {
        let advisors = AdvisorRunner::standard().unwrap();
        let deps = RoundDeps {
            generator: scripted,
            advisors: &advisors,
            approve_score: 3.5,
            evaluation_mode: mode,
            max_concurrency: 4,
        };
        run_story_round(deps, &brief(), &SharedContext::new(), ContentHash::default()).await
    }

    fn script() -> ScriptedGenerator {
        fixtures::advisor_script(ScriptedGenerator::new(), "story.login", "Login")
            .reply(prompts::REWRITE, fixtures::rewrite_json())
    }

    #[tokio::test]
    async fn approved_story_is_not_rewritten() {
        let scripted = script().reply(prompts::JUDGE, fixtures::judge_json(4, &[]));
        let outcome = round(&scripted, EvaluationMode::Strict).await.unwrap();

        assert!(!outcome.rewritten);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.verdict.unwrap().recommendation, Recommendation::Approve);
        assert!(scripted.calls_with_label(prompts::REWRITE).is_empty());
        assert_eq!(scripted.calls_with_label(prompts::JUDGE).len(), 1);
    }

    #[tokio::test]
    async fn low_score_rewrites_and_rejudges_once() {
        let scripted = script().reply(prompts::JUDGE, fixtures::judge_json(2, &[]));
        let outcome = round(&scripted, EvaluationMode::Strict).await.unwrap();

        assert!(outcome.rewritten);
        assert_eq!(scripted.calls_with_label(prompts::REWRITE).len(), 1);
        assert_eq!(scripted.calls_with_label(prompts::JUDGE).len(), 2);
        let verdict = outcome.verdict.unwrap();
        assert!(verdict.judged_after_rewrite);
        assert_eq!(verdict.recommendation, Recommendation::ManualReview);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::QualityRejected);
        assert!(outcome.record.is_some());
    }

    #[tokio::test]
    async fn rewrite_that_fixes_the_story_is_approved() {
        let scripted = script().sequence(
            prompts::JUDGE,
            [fixtures::judge_json(2, &[]), fixtures::judge_json(4, &[])],
        );
        let outcome = round(&scripted, EvaluationMode::Strict).await.unwrap();

        let verdict = outcome.verdict.unwrap();
        assert!(verdict.judged_after_rewrite);
        assert!(verdict.is_approved());
        assert!(outcome.failure.is_none());
    }

    #[tokio::test]
    async fn judge_crash_is_fatal_only_in_strict_mode() {
        let crash = || script().fail(prompts::JUDGE, GatewayError::Timeout { timeout_ms: 50 });

        let err = round(&crash(), EvaluationMode::Strict).await.unwrap_err();
        assert!(matches!(err, PipelineError::EvaluatorCrashed { ref story_id, .. } if story_id == "story.login"));

        let outcome = round(&crash(), EvaluationMode::Lenient).await.unwrap();
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::EvaluatorCrashed);
        assert!(outcome.verdict.is_none());
        assert!(outcome.proposals.is_empty());
        assert!(outcome.record.is_some());
    }

    #[tokio::test]
    async fn advisor_failure_publishes_nothing() {
        let scripted = script()
            .reply(prompts::JUDGE, fixtures::judge_json(4, &[]))
            .fail("advisor:behavior", GatewayError::Network("reset".into()));
        let outcome = round(&scripted, EvaluationMode::Strict).await.unwrap();

        assert!(outcome.record.is_none());
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::GenerationFailed);
        assert!(scripted.calls_with_label(prompts::JUDGE).is_empty());
    }

    #[tokio::test]
    async fn proposals_are_forwarded() {
        let scripted = script().reply(
            prompts::JUDGE,
            fixtures::judge_json(4, &[fixtures::component_proposal("r1", "Toast", 0.95)]),
        );
        let outcome = round(&scripted, EvaluationMode::Lenient).await.unwrap();
        assert_eq!(outcome.proposals.len(), 1);
        assert_eq!(outcome.proposals[0].confidence(), 0.95);
    }
}
