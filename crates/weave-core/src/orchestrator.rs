//! Pipeline orchestrator
//!
//! Sequences the four passes and owns every piece of cross-story state:
//!
//! 1. **Discovery**: mint identifiers, build the shared context
//! 2. **Generation**: up to `max_refinement_rounds` rounds; each round runs the
//!    pending stories concurrently against a frozen context snapshot, then
//!    commits records and merges accepted relationships at the barrier
//! 3. **Interconnection**: one extraction per story, concurrently
//! 4. **Consistency**: one pass over every story, then fix application
//!
//! The orchestrator is the only writer of the shared context and of the
//! story records; stages receive read-only references for the duration of a
//! round.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = PipelineConfig::new(EvaluationMode::Strict);
//! let pipeline = Pipeline::new(gateway_from_config(&config)?, config)?;
//! let report = pipeline.run(&bundle).await?;
//! println!("{}", report.metadata.refinement_rounds);
//! ```

use crate::advisor::{Advisor, AdvisorRunner};
use crate::call::MeteredGenerator;
use crate::config::{EvaluationMode, PipelineConfig, RestartPolicy};
use crate::consistency::{AppliedFix, ConsistencyEngine, ConsistencyReport, FixApplicator, FlaggedFix};
use crate::context::SharedContext;
use crate::discovery::DiscoveryEngine;
use crate::error::PipelineError;
use crate::interconnection::{InterconnectionEngine, StoryInterconnections};
use crate::judge::Verdict;
use crate::refinement::{run_story_round, RoundDeps, RoundOutcome};
use crate::relationship::{merge_relationships, Relationship};
use crate::types::{FailureKind, Pass, RunId, SourceBundle, StoryBrief, StoryFailure};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::Instrument;
use weave_artifact::StoryRecord;
use weave_composition::{DiagnosticKind, PatchDiagnostic};
use weave_gateway::{AnthropicBackend, GatewayError, RetryingGateway, TextGenerator, TokenUsage};
use weave_symbol::{EntityKind, IdentifierRegistry, RegistryEntry, StableId};

/// Run-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_id: RunId,
    pub evaluation_mode: EvaluationMode,
    /// Passes actually executed, in order
    pub passes_completed: Vec<Pass>,
    /// Generation rounds executed (at most 3)
    pub refinement_rounds: u32,
    pub relationships_merged: usize,
    pub context_version: u64,
    pub fixes_applied: usize,
    pub fixes_flagged_for_review: usize,
    pub scope_violations: usize,
    pub no_op_patches: usize,
    /// Stories generated against an older context than the final one
    pub stale_stories: Vec<String>,
    pub story_failures: Vec<StoryFailure>,
    pub token_usage: TokenUsage,
}

/// Final state of one story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryOutcome {
    pub story_id: String,
    /// Seed name the id was minted from
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<StoryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

/// Everything a run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub context: SharedContext,
    pub identifiers: BTreeMap<StableId, RegistryEntry>,
    pub stories: Vec<StoryOutcome>,
    pub interconnections: Vec<StoryInterconnections>,
    pub consistency: ConsistencyReport,
    pub applied_fixes: Vec<AppliedFix>,
    pub flagged_fixes: Vec<FlaggedFix>,
    pub diagnostics: Vec<PatchDiagnostic>,
}

impl RunReport {
    /// Story by id
    #[must_use]
    pub fn story(&self, story_id: &str) -> Option<&StoryOutcome> {
        self.stories.iter().find(|s| s.story_id == story_id)
    }
}

/// Mutable per-run state, owned by [`Pipeline::run`]
#[derive(Default)]
struct RunState {
    records: BTreeMap<String, StoryRecord>,
    verdicts: BTreeMap<String, Verdict>,
    failures: Vec<StoryFailure>,
    diagnostics: Vec<PatchDiagnostic>,
    passes: Vec<Pass>,
    rounds: u32,
    merged: usize,
}

impl RunState {
    /// Commit one story round; returns the proposals to merge
    fn commit(&mut self, outcome: RoundOutcome) -> Vec<Relationship> {
        let story_id = outcome.story_id;
        self.failures
            .retain(|f| !(f.story_id == story_id && f.pass == Pass::Generation));
        self.failures.extend(outcome.failure);
        self.diagnostics.extend(outcome.diagnostics);
        if let Some(record) = outcome.record {
            self.records.insert(story_id.clone(), record);
        }
        match outcome.verdict {
            Some(verdict) => self.verdicts.insert(story_id, verdict),
            None => self.verdicts.remove(&story_id),
        };
        outcome.proposals
    }

    fn count(&self, kind: DiagnosticKind) -> usize {
        self.diagnostics.iter().filter(|d| d.kind == kind).count()
    }
}

/// Build the production gateway: Anthropic backend behind retry and timeout
///
/// # Errors
/// Returns error if the API key is missing or the HTTP client cannot be built
pub fn gateway_from_config(config: &PipelineConfig) -> Result<Arc<dyn TextGenerator>, GatewayError> {
    let backend = AnthropicBackend::from_env(config.backend.clone())?;
    Ok(Arc::new(RetryingGateway::new(backend, config.retry.clone())))
}

/// The story synthesis pipeline
pub struct Pipeline {
    generator: Arc<dyn TextGenerator>,
    config: PipelineConfig,
    advisors: AdvisorRunner,
}

impl Pipeline {
    /// Pipeline with the standard advisors
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn new(generator: Arc<dyn TextGenerator>, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            generator,
            config,
            advisors: AdvisorRunner::standard()?,
        })
    }

    /// Replace the advisor set
    ///
    /// # Errors
    /// Returns error if the advisors' scopes overlap or are empty
    pub fn with_advisors(mut self, advisors: Vec<Advisor>) -> Result<Self, PipelineError> {
        self.advisors = AdvisorRunner::new(advisors)?;
        Ok(self)
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every pass over `bundle`
    ///
    /// # Errors
    /// - [`PipelineError::NoSeeds`] / [`PipelineError::DuplicateStory`] /
    ///   [`PipelineError::InvalidSeed`] for unusable input
    /// - [`PipelineError::DiscoveryFailed`] / [`PipelineError::ConsistencyFailed`]
    ///   when a global pass fails
    /// - [`PipelineError::EvaluatorCrashed`] when a judge call fails in strict mode
    pub async fn run(&self, bundle: &SourceBundle) -> Result<RunReport, PipelineError> {
        let run_id = RunId::new();
        self.run_inner(run_id, bundle)
            .instrument(tracing::info_span!("run", %run_id))
            .await
    }

    async fn run_inner(&self, run_id: RunId, bundle: &SourceBundle) -> Result<RunReport, PipelineError> {
        if bundle.seeds.is_empty() {
            return Err(PipelineError::NoSeeds);
        }
        let metered = MeteredGenerator::new(self.generator.as_ref());
        let registry = IdentifierRegistry::new();
        let briefs = story_briefs(bundle, &registry)?;
        let mut state = RunState::default();
        tracing::info!(
            stories = briefs.len(),
            mode = ?self.config.evaluation_mode,
            backend = metered.name(),
            "run started"
        );

        let mut ctx = DiscoveryEngine::new(&metered)
            .discover(bundle, &registry)
            .instrument(tracing::info_span!("discovery"))
            .await?;
        state.passes.push(Pass::Discovery);

        self.generation(&metered, &registry, &briefs, &mut ctx, &mut state)
            .instrument(tracing::info_span!("generation"))
            .await?;
        state.passes.push(Pass::Generation);

        let links = self
            .interconnection(&metered, &briefs, &ctx, &mut state)
            .instrument(tracing::info_span!("interconnection"))
            .await;
        state.passes.push(Pass::Interconnection);

        let stories: Vec<(String, String)> = state
            .records
            .iter()
            .map(|(id, record)| (id.clone(), record.render_annotated()))
            .collect();
        let report = ConsistencyEngine::new(&metered)
            .analyze(&ctx.vocabulary, &stories, &links, &registry)
            .instrument(tracing::info_span!("consistency"))
            .await?;
        let fixes = FixApplicator::new(self.config.thresholds.fix_apply_confidence)
            .apply(&report, &mut state.records);
        state.diagnostics.extend(fixes.diagnostics);
        state.passes.push(Pass::Consistency);

        let final_digest = ctx.digest()?;
        let stale_stories: Vec<String> = state
            .records
            .iter()
            .filter(|(_, record)| record.context_digest() != final_digest)
            .map(|(id, _)| id.clone())
            .collect();

        let metadata = RunMetadata {
            run_id,
            evaluation_mode: self.config.evaluation_mode,
            passes_completed: state.passes.clone(),
            refinement_rounds: state.rounds,
            relationships_merged: state.merged,
            context_version: ctx.version,
            fixes_applied: fixes.applied.len(),
            fixes_flagged_for_review: fixes.flagged.len(),
            scope_violations: state.count(DiagnosticKind::ScopeViolation),
            no_op_patches: state.count(DiagnosticKind::NoOp),
            stale_stories,
            story_failures: state.failures.clone(),
            token_usage: metered.usage(),
        };
        tracing::info!(
            rounds = metadata.refinement_rounds,
            fixes_applied = metadata.fixes_applied,
            fixes_flagged = metadata.fixes_flagged_for_review,
            failures = metadata.story_failures.len(),
            tokens = metadata.token_usage.total(),
            "run finished"
        );

        let stories = briefs
            .values()
            .map(|brief| {
                let record = state.records.remove(&brief.story_id);
                StoryOutcome {
                    story_id: brief.story_id.clone(),
                    name: brief.seed.name.clone(),
                    rendered: record.as_ref().map(StoryRecord::render),
                    record,
                    verdict: state.verdicts.remove(&brief.story_id),
                }
            })
            .collect();

        Ok(RunReport {
            metadata,
            context: ctx,
            identifiers: registry.snapshot(),
            stories,
            interconnections: links,
            consistency: report,
            applied_fixes: fixes.applied,
            flagged_fixes: fixes.flagged,
            diagnostics: state.diagnostics,
        })
    }

    /// Refinement loop: generate, judge, merge, restart
    async fn generation(
        &self,
        generator: &dyn TextGenerator,
        registry: &IdentifierRegistry,
        briefs: &BTreeMap<String, StoryBrief>,
        ctx: &mut SharedContext,
        state: &mut RunState,
    ) -> Result<(), PipelineError> {
        let deps = RoundDeps {
            generator,
            advisors: &self.advisors,
            approve_score: self.config.thresholds.approve_score,
            evaluation_mode: self.config.evaluation_mode,
            max_concurrency: self.config.max_concurrency,
        };
        let threshold = self.config.thresholds.merge_confidence;
        let mut pending: Vec<&StoryBrief> = briefs.values().collect();

        while state.rounds < self.config.max_refinement_rounds && !pending.is_empty() {
            state.rounds += 1;
            let round = state.rounds;
            let digest = ctx.digest()?;
            tracing::info!(round, stories = pending.len(), context_version = ctx.version, "round started");

            let snapshot: &SharedContext = ctx;
            let results: Vec<Result<RoundOutcome, PipelineError>> = stream::iter(pending.iter().copied())
                .map(|brief| run_story_round(deps, brief, snapshot, digest))
                .buffer_unordered(self.config.max_concurrency.max(1))
                .collect()
                .await;
            let mut outcomes = results.into_iter().collect::<Result<Vec<_>, _>>()?;
            outcomes.sort_by(|a, b| a.story_id.cmp(&b.story_id));

            let mut triggers = BTreeSet::new();
            for outcome in outcomes {
                let story_id = outcome.story_id.clone();
                let proposals = state.commit(outcome);
                if proposals.is_empty() {
                    continue;
                }
                let merged = merge_relationships(ctx, registry, &proposals, threshold);
                state.merged += merged.applied;
                if merged.changed() {
                    tracing::info!(round, story_id = %story_id, applied = merged.applied, "context updated");
                    triggers.insert(story_id);
                }
            }

            if triggers.is_empty() {
                tracing::info!(round, "context converged");
                return Ok(());
            }
            ctx.bump_version();
            pending = match self.config.restart_policy {
                RestartPolicy::TriggeringStory => briefs
                    .values()
                    .filter(|b| triggers.contains(&b.story_id))
                    .collect(),
                RestartPolicy::AllStories => briefs.values().collect(),
            };
        }
        tracing::info!(
            rounds = state.rounds,
            "round limit reached; continuing with the latest context"
        );
        Ok(())
    }

    /// Per-story cross-references; failures degrade to an empty record
    async fn interconnection(
        &self,
        generator: &dyn TextGenerator,
        briefs: &BTreeMap<String, StoryBrief>,
        ctx: &SharedContext,
        state: &mut RunState,
    ) -> Vec<StoryInterconnections> {
        let engine = InterconnectionEngine::new(generator);
        let known: BTreeSet<String> = state.records.keys().cloned().collect();
        let known = &known;
        let jobs: Vec<(&StoryBrief, &StoryRecord)> = state
            .records
            .iter()
            .filter_map(|(story_id, record)| briefs.get(story_id).map(|brief| (brief, record)))
            .collect();
        let mut results: Vec<_> = stream::iter(jobs)
            .map(|(brief, record)| async move {
                (brief.story_id.clone(), engine.extract(brief, record, ctx, known).await)
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        results
            .into_iter()
            .map(|(story_id, result)| match result {
                Ok(links) => links,
                Err(e) => {
                    tracing::error!(story_id = %story_id, error = %e, "interconnection failed");
                    state.failures.push(StoryFailure::from_stage(
                        &story_id,
                        Pass::Interconnection,
                        FailureKind::GenerationFailed,
                        &e,
                    ));
                    StoryInterconnections::empty(story_id)
                }
            })
            .collect()
    }
}

/// Mint a story id per seed, in seed-name order
fn story_briefs(
    bundle: &SourceBundle,
    registry: &IdentifierRegistry,
) -> Result<BTreeMap<String, StoryBrief>, PipelineError> {
    let mut briefs = BTreeMap::new();
    for seed in &bundle.seeds {
        let id = registry
            .mint(EntityKind::Story, &seed.name)
            .map_err(|source| PipelineError::InvalidSeed {
                name: seed.name.clone(),
                source,
            })?
            .to_string();
        if briefs.contains_key(&id) {
            return Err(PipelineError::DuplicateStory(id));
        }
        briefs.insert(id.clone(), StoryBrief::new(id, bundle.product.clone(), seed.clone()));
    }
    Ok(briefs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorySeed;

    #[test]
    fn seeds_mint_story_ids() {
        let registry = IdentifierRegistry::new();
        let bundle = SourceBundle::new("Acme")
            .with_seed(StorySeed::new("Dashboard", "charts"))
            .with_seed(StorySeed::new("login", "form"));
        let briefs = story_briefs(&bundle, &registry).unwrap();
        assert_eq!(briefs.keys().collect::<Vec<_>>(), ["story.dashboard", "story.login"]);
    }

    #[test]
    fn colliding_seed_names_are_refused() {
        let registry = IdentifierRegistry::new();
        let bundle = SourceBundle::new("Acme")
            .with_seed(StorySeed::new("Log-in", "a"))
            .with_seed(StorySeed::new("log in", "b"));
        let err = story_briefs(&bundle, &registry).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateStory(ref id) if id == "story.log_in"));
    }

    #[test]
    fn commit_replaces_generation_failures() {
        let mut state = RunState::default();
        state.failures.push(StoryFailure::quality_rejected("story.login", 2.0));
        state.commit(RoundOutcome {
            story_id: "story.login".into(),
            ..RoundOutcome::default()
        });
        assert!(state.failures.is_empty());
    }
}
