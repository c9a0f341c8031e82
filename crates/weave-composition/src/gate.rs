//! Write-scope gate and patch diagnostics
//!
//! The gate sits between a writer's proposed patches and the record. Every
//! patch outside the writer's scope is discarded with a
//! [`DiagnosticKind::ScopeViolation`] diagnostic and never touches the record.

use crate::scope::WriteScope;
use serde::{Deserialize, Serialize};
use weave_artifact::{NoOpReason, PatchOp, SectionPatch, SectionPath};

/// Why a patch did not change a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    /// Path outside the writer's scope
    ScopeViolation,
    /// Admitted but left the record unchanged
    NoOp,
}

/// Diagnostic for one discarded or ineffective patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDiagnostic {
    /// Story the patch targeted
    pub story_id: String,
    /// Writer that proposed it
    pub advisor_id: String,
    /// Operation
    pub op: PatchOp,
    /// Target path
    pub path: SectionPath,
    /// Category
    pub kind: DiagnosticKind,
    /// Human-readable detail
    pub detail: String,
}

impl PatchDiagnostic {
    /// Diagnostic for an out-of-scope patch
    #[must_use]
    pub fn scope_violation(story_id: &str, advisor_id: &str, patch: &SectionPatch) -> Self {
        Self {
            story_id: story_id.to_string(),
            advisor_id: advisor_id.to_string(),
            op: patch.op,
            path: patch.path,
            kind: DiagnosticKind::ScopeViolation,
            detail: format!("'{advisor_id}' may not write {}", patch.path),
        }
    }

    /// Diagnostic for a patch that resolved to nothing
    #[must_use]
    pub fn no_op(story_id: &str, advisor_id: &str, patch: &SectionPatch, reason: &NoOpReason) -> Self {
        Self {
            story_id: story_id.to_string(),
            advisor_id: advisor_id.to_string(),
            op: patch.op,
            path: patch.path,
            kind: DiagnosticKind::NoOp,
            detail: reason.to_string(),
        }
    }
}

/// Patches split by the gate
#[derive(Debug, Clone, Default)]
pub struct GateReport {
    /// Patches inside the scope, stamped with the writer id
    pub admitted: Vec<SectionPatch>,
    /// One diagnostic per discarded patch
    pub rejected: Vec<PatchDiagnostic>,
}

/// Filters patches against one writer's scope
#[derive(Debug, Clone, Copy)]
pub struct ScopeGate<'a> {
    story_id: &'a str,
    advisor_id: &'a str,
    scope: &'a WriteScope,
}

impl<'a> ScopeGate<'a> {
    /// Gate for `advisor_id` writing `story_id`
    #[inline]
    #[must_use]
    pub fn new(story_id: &'a str, advisor_id: &'a str, scope: &'a WriteScope) -> Self {
        Self {
            story_id,
            advisor_id,
            scope,
        }
    }

    /// Split patches into admitted and rejected
    ///
    /// Admitted patches have `metadata.advisor_id` overwritten with the gate's
    /// writer, whatever the backend claimed.
    #[must_use]
    pub fn filter(&self, patches: impl IntoIterator<Item = SectionPatch>) -> GateReport {
        let mut report = GateReport::default();
        for mut patch in patches {
            if self.scope.contains(patch.path) {
                patch.metadata.advisor_id = self.advisor_id.to_string();
                report.admitted.push(patch);
            } else {
                tracing::warn!(
                    story = self.story_id,
                    advisor = self.advisor_id,
                    path = %patch.path,
                    "discarding out-of-scope patch"
                );
                report
                    .rejected
                    .push(PatchDiagnostic::scope_violation(self.story_id, self.advisor_id, &patch));
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_artifact::{Item, PatchMatch};

    #[test]
    fn gate_admits_in_scope_and_stamps_writer() {
        let scope = WriteScope::new([SectionPath::UserVisibleBehavior]);
        let gate = ScopeGate::new("story.login", "behavior", &scope);
        let report = gate.filter([
            SectionPatch::add(SectionPath::UserVisibleBehavior, Item::new("", "Shows errors"))
                .by("someone-else"),
            SectionPatch::remove(SectionPath::Title, PatchMatch::by_id("title")),
        ]);

        assert_eq!(report.admitted.len(), 1);
        assert_eq!(report.admitted[0].metadata.advisor_id, "behavior");
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].kind, DiagnosticKind::ScopeViolation);
        assert_eq!(report.rejected[0].path, SectionPath::Title);
    }

    #[test]
    fn diagnostic_serializes_camel_case() {
        let patch = SectionPatch::remove(SectionPath::EdgeCases, PatchMatch::by_id("edge-1"));
        let diag = PatchDiagnostic::no_op("story.a", "scope-guard", &patch, &NoOpReason::NoMatch);
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["storyId"], "story.a");
        assert_eq!(json["kind"], "noOp");
        assert_eq!(json["path"], "edgeCases");
    }
}
