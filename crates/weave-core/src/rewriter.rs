//! Score-gated rewriter
//!
//! Receives only the judge's section-separation violations and returns
//! patches that move or reword the offending items. It may touch any path,
//! but still goes through the gate so its patches are stamped and logged
//! like every other writer's.

use crate::call::generate_shaped;
use crate::error::StageError;
use crate::prompts;
use crate::shape::PatchSet;
use weave_artifact::StoryRecord;
use weave_composition::{apply_admitted, CompositionOutcome, ScopeGate, WriteScope};
use weave_gateway::{GenerationRequest, TextGenerator};

/// Writer id stamped on rewrite patches
pub const REWRITER_ID: &str = "rewriter";

/// Repairs structural violations in a low-scoring story
#[derive(Clone, Copy)]
pub struct Rewriter<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> Rewriter<'a> {
    #[must_use]
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Rewrite `record` in place
    ///
    /// The record is only touched once the patch set has been received and
    /// parsed.
    ///
    /// # Errors
    /// Returns error if the call fails or the response is not a patch set
    pub async fn rewrite(
        &self,
        record: &mut StoryRecord,
        violations: &[String],
    ) -> Result<CompositionOutcome, StageError> {
        let request = GenerationRequest::new(
            prompts::REWRITE,
            prompts::rewrite_instructions(),
            prompts::rewrite_content(record.story_id(), &record.render_annotated(), violations),
        );
        let set: PatchSet = generate_shaped(self.generator, &request).await?;

        let story_id = record.story_id().to_string();
        let scope = WriteScope::all();
        let gated = ScopeGate::new(&story_id, REWRITER_ID, &scope).filter(set.patches);
        let mut outcome = CompositionOutcome {
            applied: 0,
            diagnostics: gated.rejected,
        };
        outcome.merge(apply_admitted(record, REWRITER_ID, &gated.admitted));
        tracing::info!(
            story_id = %story_id,
            violations = violations.len(),
            applied = outcome.applied,
            "story rewritten"
        );
        Ok(outcome)
    }
}
