//! Single-concern advisors and the runner that composes their patches
//!
//! Every advisor declares a write-scope up front. Scopes are registered in a
//! [`ScopeRegistry`], which refuses overlaps, so the batches returned by
//! concurrently running advisors touch disjoint paths and commute. The runner
//! therefore needs no synchronization beyond collecting the batches:
//!
//! 1. Issue one call per advisor, concurrently (bounded)
//! 2. Parse each response as a patch set
//! 3. Gate each batch against its advisor's scope and apply it
//!
//! If any advisor call fails the record is left untouched; patches are
//! applied only after every batch has arrived.
//!
//! # Example
//!
//! ```rust,ignore
//! let runner = AdvisorRunner::standard()?;
//! let outcome = runner.run(&generator, &brief, &mut record, &ctx, 4).await?;
//! ```

use crate::call::generate_shaped;
use crate::context::SharedContext;
use crate::error::StageError;
use crate::prompts;
use crate::shape::PatchSet;
use crate::types::StoryBrief;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use weave_artifact::{SectionPatch, SectionPath, StoryRecord};
use weave_composition::{CompositionOutcome, ScopeError, ScopeRegistry, SingleWriterComposer, WriteScope};
use weave_gateway::{GenerationRequest, TextGenerator};

/// One single-concern advisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisor {
    /// Writer id (`story-framer`, `behavior`, ...)
    pub id: String,
    /// What the advisor is responsible for, in plain words
    pub concern: String,
    /// Paths it may write
    pub scope: WriteScope,
}

impl Advisor {
    /// Create advisor
    #[must_use]
    pub fn new(id: impl Into<String>, concern: impl Into<String>, scope: WriteScope) -> Self {
        Self {
            id: id.into(),
            concern: concern.into(),
            scope,
        }
    }

    /// Call label (`advisor:<id>`)
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}{}", prompts::ADVISOR_PREFIX, self.id)
    }

    /// Request for one story
    #[must_use]
    pub fn request(&self, brief: &StoryBrief, record: &StoryRecord, ctx: &SharedContext) -> GenerationRequest {
        let allowed: Vec<&str> = self.scope.paths().map(SectionPath::as_str).collect();
        GenerationRequest::new(
            self.label(),
            prompts::advisor_instructions(&self.concern, &allowed),
            prompts::story_content(
                &brief.story_id,
                &brief.product,
                &brief.seed.text,
                &record.render_annotated(),
                ctx,
            ),
        )
        .with_images(brief.seed.images.clone())
    }
}

/// The six standard advisors, with disjoint scopes covering every path
#[must_use]
pub fn standard_advisors() -> Vec<Advisor> {
    use SectionPath as P;
    vec![
        Advisor::new(
            "story-framer",
            "You frame the story: a short title and the 'as a / I want / so that' statement.",
            WriteScope::new([P::Title, P::StoryAsA, P::StoryIWant, P::StorySoThat]),
        ),
        Advisor::new(
            "behavior",
            "You describe what the user sees and does, in user terms only. No APIs, no storage, no timings.",
            WriteScope::new([P::UserVisibleBehavior]),
        ),
        Advisor::new(
            "acceptance",
            "You write acceptance criteria, split into user-observable outcomes and system-level checks.",
            WriteScope::new([P::OutcomeAcceptanceCriteria, P::SystemAcceptanceCriteria]),
        ),
        Advisor::new(
            "architecture",
            "You write implementation notes grounded in the shared context identifiers: state ownership, \
             data flow, contracts, events, dependencies, error handling and accessibility.",
            WriteScope::new(P::IMPLEMENTATION_NOTES),
        ),
        Advisor::new(
            "ui-mapper",
            "You map every UI term used in the story to a component id from the shared context.",
            WriteScope::new([P::UiMapping]),
        ),
        Advisor::new(
            "scope-guard",
            "You list open questions, edge cases and explicit non-goals.",
            WriteScope::new([P::OpenQuestions, P::EdgeCases, P::NonGoals]),
        ),
    ]
}

/// Runs a fixed set of advisors against one story
#[derive(Debug, Clone)]
pub struct AdvisorRunner {
    advisors: Vec<Advisor>,
    scopes: ScopeRegistry,
}

impl AdvisorRunner {
    /// Register `advisors`
    ///
    /// # Errors
    /// Returns error if two advisors share an id or a path, or a scope is empty
    pub fn new(advisors: Vec<Advisor>) -> Result<Self, ScopeError> {
        let mut scopes = ScopeRegistry::new();
        for advisor in &advisors {
            scopes.register(advisor.id.clone(), advisor.scope.clone())?;
        }
        Ok(Self { advisors, scopes })
    }

    /// Runner over [`standard_advisors`]
    ///
    /// # Errors
    /// Never in practice; the standard scopes are disjoint
    pub fn standard() -> Result<Self, ScopeError> {
        Self::new(standard_advisors())
    }

    /// Registered advisors
    #[must_use]
    pub fn advisors(&self) -> &[Advisor] {
        &self.advisors
    }

    /// Registered scopes
    #[must_use]
    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// Run every advisor once and compose their patches into `record`
    ///
    /// # Errors
    /// Returns the first advisor failure; `record` is unchanged in that case
    pub async fn run(
        &self,
        generator: &dyn TextGenerator,
        brief: &StoryBrief,
        record: &mut StoryRecord,
        ctx: &SharedContext,
        max_concurrency: usize,
    ) -> Result<CompositionOutcome, StageError> {
        let snapshot: &StoryRecord = record;
        let batches: BTreeMap<String, Vec<SectionPatch>> = stream::iter(&self.advisors)
            .map(|advisor| async move {
                let request = advisor.request(brief, snapshot, ctx);
                let set: PatchSet = generate_shaped(generator, &request).await.map_err(|e| {
                    tracing::error!(
                        story_id = %brief.story_id,
                        advisor_id = %advisor.id,
                        error = %e,
                        "advisor failed"
                    );
                    e
                })?;
                tracing::debug!(
                    story_id = %brief.story_id,
                    advisor_id = %advisor.id,
                    patches = set.patches.len(),
                    "advisor responded"
                );
                Ok::<_, StageError>((advisor.id.clone(), set.patches))
            })
            .buffer_unordered(max_concurrency.max(1))
            .try_collect()
            .await?;

        let outcome = SingleWriterComposer::new(&self.scopes).compose(record, batches)?;
        tracing::info!(
            story_id = %brief.story_id,
            applied = outcome.applied,
            diagnostics = outcome.diagnostics.len(),
            "advisor patches composed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorySeed;
    use weave_artifact::{ContentHash, Item, SectionPatch};
    use weave_composition::DiagnosticKind;
    use weave_gateway::GatewayError;
    use weave_test_utils::{fixtures, ScriptedGenerator};

    fn brief() -> StoryBrief {
        StoryBrief::new("story.login", "Acme", StorySeed::new("login", "Email and password form"))
    }

    #[test]
    fn standard_scopes_partition_every_path() {
        let runner = AdvisorRunner::standard().unwrap();
        for path in SectionPath::ALL {
            assert!(runner.scopes().owner_of(path).is_some(), "{path} has no owner");
        }
        assert_eq!(runner.advisors().len(), 6);
    }

    #[test]
    fn overlapping_advisors_are_refused() {
        let err = AdvisorRunner::new(vec![
            Advisor::new("a", "x", WriteScope::new([SectionPath::NonGoals])),
            Advisor::new("b", "y", WriteScope::new([SectionPath::NonGoals, SectionPath::EdgeCases])),
        ])
        .unwrap_err();
        assert!(matches!(err, ScopeError::Overlap { .. }));
    }

    #[test]
    fn request_shows_item_ids() {
        let mut record = StoryRecord::new("story.login", ContentHash::default());
        record.apply(&SectionPatch::add(
            SectionPath::EdgeCases,
            Item::new("edge-1", "Caps lock is on"),
        ));
        let advisor = Advisor::new("edges", "edge cases", WriteScope::new([SectionPath::EdgeCases]));

        let request = advisor.request(&brief(), &record, &SharedContext::new());
        assert!(request.content.contains("- [edge-1] Caps lock is on"));
    }

    #[tokio::test]
    async fn out_of_scope_patches_never_land() {
        let runner = AdvisorRunner::new(vec![Advisor::new(
            "behavior",
            "behavior",
            WriteScope::new([SectionPath::UserVisibleBehavior]),
        )])
        .unwrap();
        let reply = serde_json::json!({"patches": [
            {"op": "add", "path": "userVisibleBehavior", "item": {"text": "User sees a form"}},
            {"op": "add", "path": "systemAcceptanceCriteria", "item": {"text": "Returns 201"}}
        ]});
        let scripted = ScriptedGenerator::new().reply("advisor:behavior", reply.to_string());
        let mut record = StoryRecord::new("story.login", ContentHash::default());

        let outcome = runner
            .run(&scripted, &brief(), &mut record, &SharedContext::new(), 2)
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::ScopeViolation);
        assert!(record.items(SectionPath::SystemAcceptanceCriteria).is_empty());
        assert_eq!(
            record.items(SectionPath::UserVisibleBehavior)[0].text,
            "User sees a form"
        );
    }

    #[tokio::test]
    async fn one_failing_advisor_commits_nothing() {
        let runner = AdvisorRunner::standard().unwrap();
        let scripted = fixtures::advisor_script(ScriptedGenerator::new(), "story.login", "Login")
            .fail("advisor:scope-guard", GatewayError::Timeout { timeout_ms: 10 });
        let mut record = StoryRecord::new("story.login", ContentHash::default());

        let err = runner
            .run(&scripted, &brief(), &mut record, &SharedContext::new(), 3)
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Gateway(GatewayError::Timeout { .. })));
        assert_eq!(record.version(), 0);
        assert!(record.render().starts_with("# story.login"));
    }

    #[tokio::test]
    async fn every_advisor_is_called_once() {
        let runner = AdvisorRunner::standard().unwrap();
        let scripted = fixtures::advisor_script(ScriptedGenerator::new(), "story.login", "Login");
        let mut record = StoryRecord::new("story.login", ContentHash::default());

        let outcome = runner
            .run(&scripted, &brief(), &mut record, &SharedContext::new(), 4)
            .await
            .unwrap();

        assert_eq!(scripted.calls_with_label(prompts::ADVISOR_PREFIX).len(), 6);
        assert!(outcome.diagnostics.is_empty());
        assert!(record.render().starts_with("# Login"));
    }
}
