//! Single-writer composition
//!
//! Each writer claims a disjoint set of paths, so batches from different
//! writers commute and can be applied in any order. Batches are applied in
//! writer-id order so the resulting item order is reproducible.

use crate::gate::{PatchDiagnostic, ScopeGate};
use crate::scope::{ScopeError, ScopeRegistry};
use std::collections::BTreeMap;
use weave_artifact::{PatchOutcome, SectionPatch, StoryRecord};

/// Counts and diagnostics from one composition
#[derive(Debug, Clone, Default)]
pub struct CompositionOutcome {
    /// Patches that changed the record
    pub applied: usize,
    /// Discarded or ineffective patches
    pub diagnostics: Vec<PatchDiagnostic>,
}

impl CompositionOutcome {
    /// Whether nothing changed
    #[inline]
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.applied == 0
    }

    /// Fold another outcome into this one
    pub fn merge(&mut self, other: CompositionOutcome) {
        self.applied += other.applied;
        self.diagnostics.extend(other.diagnostics);
    }
}

/// Applies scope-gated patch batches to a record
#[derive(Debug, Clone, Copy)]
pub struct SingleWriterComposer<'a> {
    registry: &'a ScopeRegistry,
}

impl<'a> SingleWriterComposer<'a> {
    /// Composer over a registry of disjoint scopes
    #[inline]
    #[must_use]
    pub fn new(registry: &'a ScopeRegistry) -> Self {
        Self { registry }
    }

    /// Validate that every batch belongs to a registered writer
    ///
    /// # Errors
    /// Returns [`ScopeError::UnknownWriter`] for the first unregistered writer
    pub fn validate(&self, batches: &BTreeMap<String, Vec<SectionPatch>>) -> Result<(), ScopeError> {
        match batches
            .keys()
            .find(|writer| self.registry.scope_of(writer).is_none())
        {
            Some(writer) => Err(ScopeError::UnknownWriter(writer.clone())),
            None => Ok(()),
        }
    }

    /// Gate and apply every batch to `record`
    ///
    /// # Errors
    /// Returns error if a batch names an unregistered writer; the record is
    /// untouched in that case
    pub fn compose(
        &self,
        record: &mut StoryRecord,
        batches: BTreeMap<String, Vec<SectionPatch>>,
    ) -> Result<CompositionOutcome, ScopeError> {
        self.validate(&batches)?;

        let mut outcome = CompositionOutcome::default();
        for (writer, patches) in batches {
            let Some(scope) = self.registry.scope_of(&writer) else {
                continue;
            };
            let story_id = record.story_id().to_string();
            let gated = ScopeGate::new(&story_id, &writer, scope).filter(patches);
            outcome.diagnostics.extend(gated.rejected);
            outcome.merge(apply_admitted(record, &writer, &gated.admitted));
        }
        Ok(outcome)
    }
}

/// Apply already-gated patches, recording a diagnostic per no-op
pub fn apply_admitted(
    record: &mut StoryRecord,
    writer: &str,
    patches: &[SectionPatch],
) -> CompositionOutcome {
    let mut outcome = CompositionOutcome::default();
    for patch in patches {
        match record.apply(patch) {
            PatchOutcome::Applied => outcome.applied += 1,
            PatchOutcome::NoOp(reason) => {
                tracing::debug!(story = record.story_id(), writer, %patch, %reason, "patch was a no-op");
                outcome
                    .diagnostics
                    .push(PatchDiagnostic::no_op(record.story_id(), writer, patch, &reason));
            }
        }
    }
    outcome
}
