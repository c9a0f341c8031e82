//! Cross-story consistency and fix application
//!
//! Runs once, after every story has an interconnection record. Issues come
//! from two sources:
//!
//! - **Backend report**: contract-id mismatches, vocabulary drift and missing
//!   links the model found in the rendered stories
//! - **Local checks**: deterministic scans of the interconnection records
//!   (unreciprocated related-story edges, contract ids that were never minted)
//!
//! Issues with the same kind and story set are merged. Every fix is then
//! routed by [`FixApplicator`]: at or above the apply threshold it becomes a
//! patch against the named story; otherwise it is flagged for review. A fix
//! is exactly one of applied or flagged.

use crate::call::generate_shaped;
use crate::error::PipelineError;
use crate::interconnection::StoryInterconnections;
use crate::prompts;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use weave_artifact::{Item, SectionPatch, SectionPath, StoryRecord};
use weave_composition::{apply_admitted, PatchDiagnostic, ScopeGate, WriteScope};
use weave_gateway::{GenerationRequest, TextGenerator};
use weave_symbol::IdentifierRegistry;

/// Writer id stamped on fix patches
pub const CONSISTENCY_WRITER: &str = "consistency";

/// Category of a cross-story issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    ContractIdMismatch,
    VocabularyDrift,
    MissingBidirectionalLink,
}

/// Remedy family for an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixType {
    NormalizeContractId,
    NormalizeTermToVocabulary,
    AddBidirectionalLink,
}

/// One proposed fix: a single patch against one story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    #[serde(default)]
    pub id: String,
    pub story_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub description: String,
    pub patch: SectionPatch,
}

/// One cross-story issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(default)]
    pub id: String,
    pub kind: IssueKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stories: Vec<String>,
    pub suggested_fix_type: FixType,
    #[serde(default)]
    pub fixes: Vec<Fix>,
}

impl Issue {
    fn key(&self) -> (IssueKind, BTreeSet<&str>) {
        (self.kind, self.stories.iter().map(String::as_str).collect())
    }
}

/// Consistency pass output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub issues: Vec<Issue>,
}

impl ConsistencyReport {
    /// Append issues, merging any whose kind and story set already exist
    pub fn absorb(&mut self, issues: impl IntoIterator<Item = Issue>) {
        for issue in issues {
            let existing = self.issues.iter().position(|i| i.key() == issue.key());
            match existing {
                Some(pos) => {
                    let target = &mut self.issues[pos];
                    for fix in issue.fixes {
                        let duplicate = target
                            .fixes
                            .iter()
                            .any(|f| f.story_id == fix.story_id && f.patch == fix.patch);
                        if !duplicate {
                            target.fixes.push(fix);
                        }
                    }
                    if target.description.is_empty() {
                        target.description = issue.description;
                    }
                }
                None => self.issues.push(issue),
            }
        }
    }

    /// Give every issue and fix an id, keeping ids already present
    pub fn assign_ids(&mut self) {
        for (n, issue) in self.issues.iter_mut().enumerate() {
            if issue.id.trim().is_empty() {
                issue.id = format!("issue-{}", n + 1);
            }
            for (m, fix) in issue.fixes.iter_mut().enumerate() {
                if fix.id.trim().is_empty() {
                    fix.id = format!("{}-fix-{}", issue.id, m + 1);
                }
            }
        }
    }

    /// Total number of proposed fixes
    #[must_use]
    pub fn fix_count(&self) -> usize {
        self.issues.iter().map(|i| i.fixes.len()).sum()
    }
}

/// Unreciprocated related-story edges, with a full-confidence fix each
///
/// The fix records the reverse link in the other story's dependency notes.
#[must_use]
pub fn missing_links(links: &[StoryInterconnections]) -> Vec<Issue> {
    let by_story: BTreeMap<&str, &StoryInterconnections> =
        links.iter().map(|l| (l.story_id.as_str(), l)).collect();
    let mut issues = Vec::new();
    for source in links {
        for edge in &source.related_stories {
            let Some(target) = by_story.get(edge.story_id.as_str()) else {
                continue;
            };
            if target.relation_to(&source.story_id).is_some() {
                continue;
            }
            let inverse = edge.relationship.inverse();
            let text = format!("Related story {} ({})", source.story_id, inverse.as_str());
            let fix = Fix {
                id: String::new(),
                story_id: target.story_id.clone(),
                confidence: 1.0,
                description: format!("record the {} link back to {}", inverse.as_str(), source.story_id),
                patch: SectionPatch::add(
                    SectionPath::NotesDependencies,
                    Item::minted(SectionPath::NotesDependencies, text),
                )
                .with_reasoning("reciprocate related-story edge"),
            };
            let mut stories = vec![source.story_id.clone(), target.story_id.clone()];
            stories.sort();
            issues.push(Issue {
                id: String::new(),
                kind: IssueKind::MissingBidirectionalLink,
                description: format!(
                    "{} lists {} as {} but the link is not reciprocated",
                    source.story_id,
                    target.story_id,
                    edge.relationship.as_str()
                ),
                stories,
                suggested_fix_type: FixType::AddBidirectionalLink,
                fixes: vec![fix],
            });
        }
    }
    issues
}

/// Contract ids referenced by a story that were never minted
///
/// These have no mechanical fix; they are reported for review.
#[must_use]
pub fn unminted_contracts(links: &[StoryInterconnections], registry: &IdentifierRegistry) -> Vec<Issue> {
    links
        .iter()
        .filter_map(|l| {
            let unknown: BTreeSet<&str> = l
                .contract_dependencies
                .iter()
                .map(String::as_str)
                .chain(l.ownership.ids())
                .filter(|id| !registry.contains_str(id))
                .collect();
            if unknown.is_empty() {
                return None;
            }
            Some(Issue {
                id: String::new(),
                kind: IssueKind::ContractIdMismatch,
                description: format!(
                    "{} references unknown contract ids: {}",
                    l.story_id,
                    unknown.into_iter().collect::<Vec<_>>().join(", ")
                ),
                stories: vec![l.story_id.clone()],
                suggested_fix_type: FixType::NormalizeContractId,
                fixes: Vec::new(),
            })
        })
        .collect()
}

/// Runs the cross-story analysis
#[derive(Clone, Copy)]
pub struct ConsistencyEngine<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> ConsistencyEngine<'a> {
    #[must_use]
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Analyze every story and its interconnections
    ///
    /// `stories` holds `(story_id, rendered)` pairs.
    ///
    /// # Errors
    /// Returns [`PipelineError::ConsistencyFailed`] if the call fails or the
    /// report is malformed
    pub async fn analyze(
        &self,
        vocabulary: &BTreeMap<String, String>,
        stories: &[(String, String)],
        links: &[StoryInterconnections],
        registry: &IdentifierRegistry,
    ) -> Result<ConsistencyReport, PipelineError> {
        let request = GenerationRequest::new(
            prompts::CONSISTENCY,
            prompts::CONSISTENCY_INSTRUCTIONS,
            prompts::consistency_content(&to_json(vocabulary), stories, &to_json(links)),
        );
        let mut report: ConsistencyReport = generate_shaped(self.generator, &request)
            .await
            .map_err(PipelineError::ConsistencyFailed)?;

        report.absorb(missing_links(links));
        report.absorb(unminted_contracts(links, registry));
        report.assign_ids();
        tracing::info!(
            issues = report.issues.len(),
            fixes = report.fix_count(),
            "consistency report ready"
        );
        Ok(report)
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unavailable: {e}>"))
}

/// Why a fix was not applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "reason", content = "detail")]
pub enum FlagReason {
    /// Confidence under the apply threshold
    BelowThreshold,
    /// The fix names a story that is not in the run
    UnknownStory,
    /// Patch resolved to nothing against the current record
    NoOp(String),
}

/// A fix and the issue it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedFix {
    pub issue_id: String,
    pub fix: Fix,
}

/// A fix held back for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedFix {
    pub issue_id: String,
    pub fix: Fix,
    #[serde(flatten)]
    pub reason: FlagReason,
}

/// Result of routing every fix in a report
#[derive(Debug, Clone, Default)]
pub struct FixOutcome {
    pub applied: Vec<AppliedFix>,
    pub flagged: Vec<FlaggedFix>,
    pub diagnostics: Vec<PatchDiagnostic>,
}

impl FixOutcome {
    /// Stories that received at least one fix
    #[must_use]
    pub fn touched_stories(&self) -> BTreeSet<&str> {
        self.applied.iter().map(|a| a.fix.story_id.as_str()).collect()
    }
}

/// Applies fixes at or above a confidence threshold
#[derive(Debug, Clone, Copy)]
pub struct FixApplicator {
    threshold: f64,
}

impl FixApplicator {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Route every fix in `report`, patching `records` in place
    ///
    /// Records of stories that receive no applied fix are not touched.
    pub fn apply(&self, report: &ConsistencyReport, records: &mut BTreeMap<String, StoryRecord>) -> FixOutcome {
        let scope = WriteScope::all();
        let mut outcome = FixOutcome::default();
        for issue in &report.issues {
            for fix in &issue.fixes {
                let flag = |reason: FlagReason| FlaggedFix {
                    issue_id: issue.id.clone(),
                    fix: fix.clone(),
                    reason,
                };
                if fix.confidence < self.threshold {
                    tracing::warn!(
                        fix = %fix.id,
                        story_id = %fix.story_id,
                        confidence = fix.confidence,
                        threshold = self.threshold,
                        "fix flagged for review"
                    );
                    outcome.flagged.push(flag(FlagReason::BelowThreshold));
                    continue;
                }
                let Some(record) = records.get_mut(&fix.story_id) else {
                    tracing::warn!(fix = %fix.id, story_id = %fix.story_id, "fix targets unknown story");
                    outcome.flagged.push(flag(FlagReason::UnknownStory));
                    continue;
                };
                let gated = ScopeGate::new(&fix.story_id, CONSISTENCY_WRITER, &scope).filter([fix.patch.clone()]);
                let applied = apply_admitted(record, CONSISTENCY_WRITER, &gated.admitted);
                if applied.applied > 0 {
                    tracing::info!(fix = %fix.id, story_id = %fix.story_id, patch = %fix.patch, "fix applied");
                    outcome.applied.push(AppliedFix {
                        issue_id: issue.id.clone(),
                        fix: fix.clone(),
                    });
                } else {
                    let detail = applied
                        .diagnostics
                        .first()
                        .map_or_else(|| "patch had no effect".to_string(), |d| d.detail.clone());
                    tracing::warn!(fix = %fix.id, story_id = %fix.story_id, %detail, "fix was a no-op");
                    outcome.flagged.push(flag(FlagReason::NoOp(detail)));
                    outcome.diagnostics.extend(applied.diagnostics);
                }
            }
        }
        outcome
    }
}
