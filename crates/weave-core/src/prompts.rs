//! Call labels, instructions and content builders
//!
//! The instruction text is opaque to the pipeline; only the labels and the
//! shape each call must answer with are load-bearing.

use crate::context::SharedContext;
use crate::types::{ReferenceDoc, StorySeed};
use std::fmt::Write as _;

/// Discovery call label
pub const DISCOVERY: &str = "discovery";
/// Prefix of advisor call labels (`advisor:<id>`)
pub const ADVISOR_PREFIX: &str = "advisor:";
/// Judge call label
pub const JUDGE: &str = "judge";
/// Rewrite call label
pub const REWRITE: &str = "rewrite";
/// Interconnection call label
pub const INTERCONNECTION: &str = "interconnection";
/// Consistency call label
pub const CONSISTENCY: &str = "consistency";

const PATCH_CONTRACT: &str = r#"Respond with a single JSON object:
{"patches": [{"op": "add" | "replace" | "remove",
              "path": <section path>,
              "item": {"id": <optional>, "text": <string>},
              "match": {"id": <optional>, "textEquals": <optional>},
              "metadata": {"reasoning": <optional>}}]}
Existing list items are shown as "- [<id>] <text>"; match them by that id.
Use "replace"/"remove" only with a match that identifies exactly one existing item.
Only write the paths you are allowed to write; anything else is discarded."#;

pub(crate) const DISCOVERY_INSTRUCTIONS: &str = r#"You analyse product design material.
Report the entities you find as NAMES grouped into canonical clusters. Never invent identifiers.
Respond with a single JSON object:
{"components": [{"canonicalName", "mentions": [..], "evidence": [..]}],
 "stateModels": [{"canonicalName", "mentions", "evidence", "owner": <component name>, "consumers": [..]}],
 "events": [{"canonicalName", "mentions", "evidence", "emitter": <component name>, "listeners": [..]}],
 "dataFlows": [{"canonicalName", "mentions", "evidence", "from", "to"}],
 "compositionEdges": [{"from": <parent>, "to": <child>, "evidence"}],
 "coordinationEdges": [{"from", "to", "evidence"}],
 "roles": [{"component", "role"}],
 "standardStates": ["loading", "empty", "error", ...],
 "vocabulary": {<term>: <canonical term>}}"#;

pub(crate) const JUDGE_INSTRUCTIONS: &str = r#"You review one user story against the shared context.
Score 0-5 (integers) for: sectionSeparation (behaviour vs. acceptance criteria vs. implementation notes kept apart),
correctness (consistent with the shared context identifiers), testability (outcome vs. system acceptance
criteria split), completeness.
List every section-separation violation you found as a short sentence in "violations".
If the story reveals facts missing from the shared context, propose them in "newRelationships"
with a confidence between 0 and 1.
Respond with a single JSON object:
{"scores": {"sectionSeparation", "correctness", "testability", "completeness"},
 "recommendation": "approve" | "rewrite" | "manual-review",
 "violations": [..],
 "newRelationships": [{"id", "kind": "component" | "state-model" | "event" | "data-flow" | "composition" | "coordination",
                       "operation": "add_node" | "add_edge" | "edit_node" | "edit_edge",
                       "name", "from", "to", "evidence", "confidence"}],
 "needsContextUpdate": bool}"#;

pub(crate) const INTERCONNECTION_INSTRUCTIONS: &str = r#"You extract cross-references for one finished story.
Use only identifiers that appear in the shared context.
Respond with a single JSON object:
{"uiMapping": {<ui term>: <component id>},
 "contractDependencies": [<state or event id>],
 "ownership": {"ownsState": [..], "consumesState": [..], "emitsEvents": [..], "listensToEvents": [..]},
 "relatedStories": [{"storyId", "relationship": "prerequisite" | "parallel" | "dependent" | "related", "rationale"}]}"#;

pub(crate) const CONSISTENCY_INSTRUCTIONS: &str = r#"You reconcile a set of stories.
Find contract-id mismatches, vocabulary drift against the product vocabulary, and missing bidirectional links.
For each issue propose zero or more fixes, each a single patch against one story, with a confidence between 0 and 1.
Respond with a single JSON object:
{"issues": [{"id", "kind": "contract-id-mismatch" | "vocabulary-drift" | "missing-bidirectional-link",
             "description", "stories": [..],
             "suggestedFixType": "normalize-contract-id" | "normalize-term-to-vocabulary" | "add-bidirectional-link",
             "fixes": [{"storyId", "confidence", "description", "patch": <patch>}]}]}
A patch is {"op", "path", "item": {"text"}, "match": {"id"}}; list items appear in the stories as "- [<id>] <text>"."#;

/// Advisor instructions: concern plus the shared patch contract
#[must_use]
pub fn advisor_instructions(concern: &str, allowed: &[&str]) -> String {
    format!(
        "{concern}\nYou may write only these paths: {}.\n{PATCH_CONTRACT}",
        allowed.join(", ")
    )
}

/// Rewrite instructions
#[must_use]
pub fn rewrite_instructions() -> String {
    format!(
        "You repair section-separation violations in one story. Move or reword only the items \
         named by the violations; do not regenerate or add other content.\n{PATCH_CONTRACT}"
    )
}

fn context_json(ctx: &SharedContext) -> String {
    serde_json::to_string_pretty(ctx).unwrap_or_else(|e| format!("<context unavailable: {e}>"))
}

/// Discovery content: product, seeds and references
#[must_use]
pub fn discovery_content(product: &str, seeds: &[StorySeed], references: &[ReferenceDoc]) -> String {
    let mut out = format!("# Product\n{product}\n");
    for seed in seeds {
        let _ = write!(out, "\n# Story seed: {}\n{}\n", seed.name, seed.text);
    }
    for reference in references {
        let _ = write!(out, "\n# Reference: {}\n{}\n", reference.title, reference.text);
    }
    out
}

/// Per-story content: story id, seed, current render and shared context
#[must_use]
pub fn story_content(
    story_id: &str,
    product: &str,
    seed_text: &str,
    rendered: &str,
    ctx: &SharedContext,
) -> String {
    format!(
        "Story: {story_id}\n\n# Product\n{product}\n\n# Seed\n{seed_text}\n\n# Current story\n{rendered}\n\n# Shared context\n{}\n",
        context_json(ctx)
    )
}

/// Rewrite content: story plus flagged violations
#[must_use]
pub fn rewrite_content(story_id: &str, rendered: &str, violations: &[String]) -> String {
    let mut out = format!("Story: {story_id}\n\n# Story\n{rendered}\n\n# Violations\n");
    for violation in violations {
        let _ = writeln!(out, "- {violation}");
    }
    out
}

/// Consistency content: every story and its interconnections
#[must_use]
pub fn consistency_content(
    product_vocabulary: &str,
    stories: &[(String, String)],
    interconnections: &str,
) -> String {
    let mut out = format!("# Vocabulary\n{product_vocabulary}\n");
    for (story_id, rendered) in stories {
        let _ = write!(out, "\n# Story: {story_id}\n{rendered}\n");
    }
    let _ = write!(out, "\n# Interconnections\n{interconnections}\n");
    out
}
