//! Shape validation for generation output
//!
//! A response is turned into one of five fixed shapes in two steps:
//!
//! 1. **Extraction**: find the embedded JSON objects. Tried in order: the
//!    whole text, fenced code blocks from last to first, then every balanced
//!    `{ ... }` region from left to right.
//! 2. **Strict parse**: deserialize each candidate into the shape's type
//!    until one fits. Required fields must be present; nothing is guessed.
//!    A shape may add semantic checks (score ranges, non-empty names) on top.
//!
//! Prose around the JSON is tolerated; a partially matching object is not.

use crate::consistency::ConsistencyReport;
use crate::interconnection::{Ownership, RelatedStory};
use crate::judge::Recommendation;
use crate::relationship::Relationship;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use weave_artifact::SectionPatch;
use weave_symbol::normalize_name;

/// The five response shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShapeKind {
    DiscoveryMentions,
    PatchSet,
    QualityRubric,
    InterconnectionRecord,
    ConsistencyReport,
}

impl std::fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DiscoveryMentions => "discovery mentions",
            Self::PatchSet => "patch set",
            Self::QualityRubric => "quality rubric",
            Self::InterconnectionRecord => "interconnection record",
            Self::ConsistencyReport => "consistency report",
        };
        f.write_str(name)
    }
}

/// Shape validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// No JSON object anywhere in the text
    #[error("no JSON object found in {0} bytes of output")]
    NoJson(usize),

    /// JSON found but it does not deserialize into the shape
    #[error("{shape}: {message}")]
    Mismatch { shape: ShapeKind, message: String },

    /// Deserialized but semantically invalid
    #[error("{shape}: invalid content: {message}")]
    Invalid { shape: ShapeKind, message: String },
}

/// A response type with a fixed shape
pub trait Shape: DeserializeOwned {
    /// Shape identifier
    const KIND: ShapeKind;

    /// Semantic checks beyond deserialization
    ///
    /// # Errors
    /// Returns a description of the first violation
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Extract the embedded JSON object from free text
///
/// # Errors
/// Returns [`ShapeError::NoJson`] if no candidate parses as a JSON object
pub fn extract_json(text: &str) -> Result<Value, ShapeError> {
    candidates(text)
        .next()
        .ok_or(ShapeError::NoJson(text.len()))
}

/// Extract and strictly parse `text` as `T`
///
/// Candidates are tried in extraction order; the first that deserializes
/// into `T` and passes `T::check` wins. Objects that do not fit `T` are
/// skipped. If nothing fits, the last check failure is reported, or the
/// last deserialization failure when no candidate got that far.
///
/// # Errors
/// Returns error if no JSON is found, no candidate matches `T`, or `T::check` fails
pub fn parse_shape<T: Shape>(text: &str) -> Result<T, ShapeError> {
    let mut last_err = ShapeError::NoJson(text.len());
    for value in candidates(text) {
        let parsed: T = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                if !matches!(last_err, ShapeError::Invalid { .. }) {
                    last_err = ShapeError::Mismatch {
                        shape: T::KIND,
                        message: e.to_string(),
                    };
                }
                continue;
            }
        };
        match parsed.check() {
            Ok(()) => return Ok(parsed),
            Err(message) => {
                last_err = ShapeError::Invalid {
                    shape: T::KIND,
                    message,
                };
            }
        }
    }
    tracing::debug!(shape = %T::KIND, error = %last_err, "no candidate matched");
    Err(last_err)
}

/// Every JSON object embedded in `text`, in extraction order
fn candidates(text: &str) -> impl Iterator<Item = Value> + '_ {
    let trimmed = text.trim();
    std::iter::once(trimmed)
        .chain(fenced_blocks(trimmed).into_iter().rev())
        .chain(balanced_regions(trimmed))
        .filter_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        })
}

/// Tagged result of validating against a runtime-selected shape
#[derive(Debug, Clone, PartialEq)]
pub enum Shaped {
    DiscoveryMentions(DiscoveryMentions),
    PatchSet(PatchSet),
    QualityRubric(QualityRubric),
    InterconnectionRecord(InterconnectionRecord),
    ConsistencyReport(ConsistencyReport),
}

impl Shaped {
    /// Shape of the parsed value
    #[must_use]
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::DiscoveryMentions(_) => ShapeKind::DiscoveryMentions,
            Self::PatchSet(_) => ShapeKind::PatchSet,
            Self::QualityRubric(_) => ShapeKind::QualityRubric,
            Self::InterconnectionRecord(_) => ShapeKind::InterconnectionRecord,
            Self::ConsistencyReport(_) => ShapeKind::ConsistencyReport,
        }
    }
}

/// Validate `text` against the shape named by `kind`
///
/// # Errors
/// Returns error if the text does not match the shape
pub fn validate(kind: ShapeKind, text: &str) -> Result<Shaped, ShapeError> {
    Ok(match kind {
        ShapeKind::DiscoveryMentions => Shaped::DiscoveryMentions(parse_shape(text)?),
        ShapeKind::PatchSet => Shaped::PatchSet(parse_shape(text)?),
        ShapeKind::QualityRubric => Shaped::QualityRubric(parse_shape(text)?),
        ShapeKind::InterconnectionRecord => Shaped::InterconnectionRecord(parse_shape(text)?),
        ShapeKind::ConsistencyReport => Shaped::ConsistencyReport(parse_shape(text)?),
    })
}

/// Fenced code block bodies, in document order
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let body_start = after_open.find('\n').map_or(0, |i| i + 1);
        let body = &after_open[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        blocks.push(body[..close].trim());
        rest = &body[close + 3..];
    }
    blocks
}

/// Every balanced `{ ... }` region, string-literal aware, in start order
fn balanced_regions(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|&(_, c)| c == '{')
        .filter_map(move |(start, _)| balanced_from(text, start))
}

fn balanced_from(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn check_name(what: &str, name: &str) -> Result<(), String> {
    if normalize_name(name).is_empty() {
        Err(format!("{what} has an empty canonical name"))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Discovery mentions
// ---------------------------------------------------------------------------

/// Component cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMention {
    pub canonical_name: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// State model cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMention {
    pub canonical_name: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub consumers: Vec<String>,
}

/// Event cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMention {
    pub canonical_name: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub emitter: Option<String>,
    #[serde(default)]
    pub listeners: Vec<String>,
}

/// Data flow cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMention {
    pub canonical_name: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// Edge between two component names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeMention {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub evidence: String,
}

/// Component role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMention {
    pub component: String,
    pub role: String,
}

/// Discovery output: names only, never identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryMentions {
    pub components: Vec<ComponentMention>,
    #[serde(default)]
    pub state_models: Vec<StateMention>,
    #[serde(default)]
    pub events: Vec<EventMention>,
    #[serde(default)]
    pub data_flows: Vec<FlowMention>,
    #[serde(default)]
    pub composition_edges: Vec<EdgeMention>,
    #[serde(default)]
    pub coordination_edges: Vec<EdgeMention>,
    #[serde(default)]
    pub roles: Vec<RoleMention>,
    #[serde(default)]
    pub standard_states: Vec<String>,
    #[serde(default)]
    pub vocabulary: BTreeMap<String, String>,
}

impl Shape for DiscoveryMentions {
    const KIND: ShapeKind = ShapeKind::DiscoveryMentions;

    fn check(&self) -> Result<(), String> {
        self.components
            .iter()
            .try_for_each(|c| check_name("component", &c.canonical_name))?;
        self.state_models
            .iter()
            .try_for_each(|s| check_name("state model", &s.canonical_name))?;
        self.events
            .iter()
            .try_for_each(|e| check_name("event", &e.canonical_name))?;
        self.data_flows
            .iter()
            .try_for_each(|f| check_name("data flow", &f.canonical_name))
    }
}

// ---------------------------------------------------------------------------
// Patch set
// ---------------------------------------------------------------------------

/// Advisor or rewriter output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    pub patches: Vec<SectionPatch>,
}

impl Shape for PatchSet {
    const KIND: ShapeKind = ShapeKind::PatchSet;
}

// ---------------------------------------------------------------------------
// Quality rubric
// ---------------------------------------------------------------------------

/// Four 0-5 dimension scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricScores {
    pub section_separation: u8,
    pub correctness: u8,
    pub testability: u8,
    pub completeness: u8,
}

impl RubricScores {
    /// Arithmetic mean of the four dimensions
    #[must_use]
    pub fn mean(&self) -> f64 {
        let sum = u32::from(self.section_separation)
            + u32::from(self.correctness)
            + u32::from(self.testability)
            + u32::from(self.completeness);
        f64::from(sum) / 4.0
    }
}

/// Judge output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityRubric {
    pub scores: RubricScores,
    /// Model-supplied overall score; recomputed locally
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub recommendation: Option<Recommendation>,
    /// Flagged section-separation violations
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub new_relationships: Vec<Relationship>,
    #[serde(default)]
    pub needs_context_update: bool,
    #[serde(default)]
    pub confidence_by_relationship: BTreeMap<String, f64>,
}

impl Shape for QualityRubric {
    const KIND: ShapeKind = ShapeKind::QualityRubric;

    fn check(&self) -> Result<(), String> {
        let s = self.scores;
        for (name, score) in [
            ("sectionSeparation", s.section_separation),
            ("correctness", s.correctness),
            ("testability", s.testability),
            ("completeness", s.completeness),
        ] {
            if score > 5 {
                return Err(format!("{name} score {score} exceeds 5"));
            }
        }
        let confidences = self
            .new_relationships
            .iter()
            .filter_map(|r| r.confidence)
            .chain(self.confidence_by_relationship.values().copied());
        for confidence in confidences {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(format!("relationship confidence {confidence} is outside [0, 1]"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Interconnection record
// ---------------------------------------------------------------------------

/// Interconnection output for one story (the story id is assigned locally)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterconnectionRecord {
    pub ui_mapping: BTreeMap<String, String>,
    pub contract_dependencies: Vec<String>,
    pub ownership: Ownership,
    pub related_stories: Vec<RelatedStory>,
}

impl Shape for InterconnectionRecord {
    const KIND: ShapeKind = ShapeKind::InterconnectionRecord;

    fn check(&self) -> Result<(), String> {
        match self.related_stories.iter().find(|r| r.story_id.trim().is_empty()) {
            Some(_) => Err("related story with an empty story id".into()),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Consistency report
// ---------------------------------------------------------------------------

impl Shape for ConsistencyReport {
    const KIND: ShapeKind = ShapeKind::ConsistencyReport;

    fn check(&self) -> Result<(), String> {
        for fix in self.issues.iter().flat_map(|i| &i.fixes) {
            if !(0.0..=1.0).contains(&fix.confidence) {
                return Err(format!("fix confidence {} is outside [0, 1]", fix.confidence));
            }
            if fix.story_id.trim().is_empty() {
                return Err("fix without a target story".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn extracts_clean_json() {
        let value = extract_json(r#"{"patches": []}"#).unwrap();
        assert_eq!(value, serde_json::json!({"patches": []}));
    }

    #[test]
    fn extracts_from_fence_with_prose() {
        let text = "Here you go:\n```json\n{\"patches\": [{\"op\": \"add\", \"path\": \"nonGoals\", \"item\": {\"text\": \"No SSO\"}}]}\n```\nLet me know.";
        let set: PatchSet = parse_shape(text).unwrap();
        assert_eq!(set.patches.len(), 1);
    }

    #[test]
    fn extracts_region_after_stray_braces() {
        let text = "Consider {this} first. Result: {\"issues\": [], \"note\": \"a } in a string\"} done";
        let report: ConsistencyReport = parse_shape(text).unwrap();
        assert!(report.issues.is_empty());
    }

    #[test]
    fn missing_required_field_is_a_mismatch() {
        let err = parse_shape::<PatchSet>(r#"{"edits": []}"#).unwrap_err();
        assert!(matches!(err, ShapeError::Mismatch { shape: ShapeKind::PatchSet, .. }));

        let err = parse_shape::<QualityRubric>(
            r#"{"scores": {"sectionSeparation": 4, "correctness": 4, "testability": 4}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::Mismatch { .. }));
    }

    #[test]
    fn example_object_before_the_answer_is_skipped() {
        let set: PatchSet =
            parse_shape(r#"Format reminder: {"note": "example"}. Answer: {"patches": []}"#).unwrap();
        assert!(set.patches.is_empty());

        let text = "Answer:\n```json\n{\"issues\": []}\n```\nnot the patch form:\n```json\n{\"patches\": []}\n```";
        let report: ConsistencyReport = parse_shape(text).unwrap();
        assert!(report.issues.is_empty());
    }

    #[test]
    fn last_failure_is_reported_when_nothing_fits() {
        let err = parse_shape::<QualityRubric>(
            r#"See {"note": "x"} and {"scores": {"sectionSeparation": 9, "correctness": 4, "testability": 4, "completeness": 4}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::Invalid { shape: ShapeKind::QualityRubric, .. }));

        assert_eq!(parse_shape::<PatchSet>("nothing here"), Err(ShapeError::NoJson(12)));
    }

    #[test]
    fn no_json_is_reported() {
        assert_eq!(extract_json("I could not do that."), Err(ShapeError::NoJson(20)));
    }

    #[test]
    fn rubric_scores_are_range_checked() {
        let err = parse_shape::<QualityRubric>(
            r#"{"scores": {"sectionSeparation": 9, "correctness": 4, "testability": 4, "completeness": 4}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::Invalid { .. }));

        let err = parse_shape::<QualityRubric>(
            r#"{"scores": {"sectionSeparation": 3.5, "correctness": 4, "testability": 4, "completeness": 4}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::Mismatch { .. }));
    }

    #[test]
    fn rubric_mean_is_local() {
        let rubric: QualityRubric = parse_shape(
            r#"{"scores": {"sectionSeparation": 2, "correctness": 3, "testability": 4, "completeness": 5},
                "overallScore": 5.0, "recommendation": "approve"}"#,
        )
        .unwrap();
        assert_eq!(rubric.scores.mean(), 3.5);
        assert_eq!(rubric.recommendation, Some(Recommendation::Approve));
    }

    #[test]
    fn discovery_rejects_empty_names() {
        let err = parse_shape::<DiscoveryMentions>(r#"{"components": [{"canonicalName": " - "}]}"#).unwrap_err();
        assert!(matches!(err, ShapeError::Invalid { shape: ShapeKind::DiscoveryMentions, .. }));
    }

    #[test]
    fn validate_tags_the_result() {
        let shaped = validate(ShapeKind::InterconnectionRecord, r#"{
            "uiMapping": {"Usage chart": "comp.usage_chart"},
            "contractDependencies": ["state.session"],
            "ownership": {"consumesState": ["state.session"]},
            "relatedStories": [{"storyId": "story.login", "relationship": "prerequisite", "rationale": "needs a session"}]
        }"#)
        .unwrap();
        assert_eq!(shaped.kind(), ShapeKind::InterconnectionRecord);
    }

    proptest! {
        #[test]
        fn prose_wrapping_is_tolerated(prefix in "[a-zA-Z .,:]{0,40}", suffix in "[a-zA-Z .,:]{0,40}") {
            let text = format!("{prefix}{{\"patches\": []}}{suffix}");
            let set: PatchSet = parse_shape(&text).unwrap();
            prop_assert!(set.patches.is_empty());
        }
    }
}
