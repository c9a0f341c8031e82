//! Canned responses for every pipeline call
//!
//! The discovery fixture describes a small analytics product with a login
//! form and a dashboard. Story-scoped rules match on the `Story: <id>` line
//! that opens every per-story request.

use crate::ScriptedGenerator;
use serde_json::{json, Value};

/// Advisor ids and the paths each one writes, mirroring the standard set
const ADVISORS: [&str; 6] = [
    "story-framer",
    "behavior",
    "acceptance",
    "architecture",
    "ui-mapper",
    "scope-guard",
];

/// Needle matching per-story requests for `story_id`
#[must_use]
pub fn story_needle(story_id: &str) -> String {
    format!("Story: {story_id}\n")
}

#[must_use]
pub fn discovery_json() -> String {
    json!({
        "components": [
            {"canonicalName": "Login Form", "mentions": ["sign-in form", "login screen"],
             "evidence": ["mockup: email + password fields"]},
            {"canonicalName": "Dashboard Page", "mentions": ["home"], "evidence": ["mockup: landing after login"]},
            {"canonicalName": "Usage Chart", "mentions": ["usage graph"], "evidence": ["mockup: weekly usage"]}
        ],
        "stateModels": [
            {"canonicalName": "Session", "mentions": ["auth session"], "owner": "Login Form",
             "consumers": ["Dashboard Page"], "evidence": ["arch: sessions live in the auth store"]}
        ],
        "events": [
            {"canonicalName": "Session Started", "emitter": "Login Form", "listeners": ["Dashboard Page"]}
        ],
        "dataFlows": [
            {"canonicalName": "Usage Metrics", "from": "Dashboard Page", "to": "Usage Chart"}
        ],
        "compositionEdges": [{"from": "Dashboard Page", "to": "Usage Chart", "evidence": "chart is embedded"}],
        "roles": [{"component": "Login Form", "role": "entry point"}],
        "standardStates": ["loading", "empty", "error"],
        "vocabulary": {"sign in": "log in"}
    })
    .to_string()
}

/// Patches for one advisor, all inside its scope
#[must_use]
pub fn advisor_json(advisor_id: &str, title: &str) -> String {
    let add = |path: &str, text: String| json!({"op": "add", "path": path, "item": {"text": text}});
    let patches: Vec<Value> = match advisor_id {
        "story-framer" => vec![
            add("title", title.to_string()),
            add("story.asA", "registered user".into()),
            add("story.iWant", format!("to use the {title} screen")),
            add("story.soThat", "I can see my usage".into()),
        ],
        "behavior" => vec![add("userVisibleBehavior", format!("User sees the {title} screen"))],
        "acceptance" => vec![
            add("outcomeAcceptanceCriteria", format!("{title} shows within two seconds")),
            add("systemAcceptanceCriteria", format!("{title} reads state.session")),
        ],
        "architecture" => vec![
            add("implementationNotes.stateOwnership", "Consumes state.session".into()),
            add("implementationNotes.errorHandling", "Shows the standard error state".into()),
        ],
        "ui-mapper" => vec![add("uiMapping", format!("{title} screen → comp.dashboard_page"))],
        "scope-guard" => vec![add("nonGoals", format!("{title} does not support SSO"))],
        _ => Vec::new(),
    };
    json!({ "patches": patches }).to_string()
}

/// Add one rule per standard advisor for `story_id`
#[must_use]
pub fn advisor_script(generator: ScriptedGenerator, story_id: &str, title: &str) -> ScriptedGenerator {
    let needle = story_needle(story_id);
    ADVISORS.iter().fold(generator, |generator, advisor| {
        generator.reply_for(&format!("advisor:{advisor}"), &needle, advisor_json(advisor, title))
    })
}

/// Relationship proposal adding a component
#[must_use]
pub fn component_proposal(id: &str, name: &str, confidence: f64) -> Value {
    json!({
        "id": id,
        "kind": "component",
        "operation": "add_node",
        "name": name,
        "evidence": "seen in the mockup",
        "confidence": confidence
    })
}

/// Rubric with every dimension at `score`
#[must_use]
pub fn judge_json(score: u8, relationships: &[Value]) -> String {
    let violations: Vec<&str> = if score < 4 {
        vec!["User-visible behavior mentions an HTTP status code"]
    } else {
        Vec::new()
    };
    json!({
        "scores": {
            "sectionSeparation": score,
            "correctness": score,
            "testability": score,
            "completeness": score
        },
        "violations": violations,
        "newRelationships": relationships,
        "needsContextUpdate": !relationships.is_empty()
    })
    .to_string()
}

#[must_use]
pub fn rewrite_json() -> String {
    json!({"patches": [
        {"op": "add", "path": "systemAcceptanceCriteria", "item": {"text": "Session cookie is set on success"}}
    ]})
    .to_string()
}

/// Interconnection record with the given `(story_id, relationship)` edges
#[must_use]
pub fn interconnection_json(related: &[(&str, &str)]) -> String {
    let related: Vec<Value> = related
        .iter()
        .map(|(story_id, relationship)| {
            json!({"storyId": story_id, "relationship": relationship, "rationale": "shares the session"})
        })
        .collect();
    json!({
        "uiMapping": {"Usage chart": "comp.usage_chart"},
        "contractDependencies": ["state.session"],
        "ownership": {"consumesState": ["state.session"], "listensToEvents": ["event.session_started"]},
        "relatedStories": related
    })
    .to_string()
}

#[must_use]
pub fn empty_consistency_json() -> String {
    json!({"issues": []}).to_string()
}

/// Vocabulary issue with one fix renaming the behavior line of `story_id`
#[must_use]
pub fn vocabulary_fix_json(story_id: &str, title: &str, confidence: f64) -> String {
    json!({"issues": [{
        "kind": "vocabulary-drift",
        "description": "'screen' should be 'page'",
        "stories": [story_id],
        "suggestedFixType": "normalize-term-to-vocabulary",
        "fixes": [{
            "storyId": story_id,
            "confidence": confidence,
            "description": "use the product vocabulary",
            "patch": {
                "op": "replace",
                "path": "userVisibleBehavior",
                "match": {"textEquals": format!("User sees the {title} screen")},
                "item": {"text": format!("User sees the {title} page")}
            }
        }]
    }]})
    .to_string()
}

/// Complete script for a run over the `login` and `dashboard` seeds
///
/// Both stories score 4, reciprocate their related-story edges and reference
/// only minted contracts, so the consistency pass finds nothing.
#[must_use]
pub fn happy_path() -> ScriptedGenerator {
    let generator = ScriptedGenerator::new()
        .reply("discovery", discovery_json())
        .reply("judge", judge_json(4, &[]))
        .reply("rewrite", rewrite_json())
        .reply("consistency", empty_consistency_json());
    let generator = advisor_script(generator, "story.login", "Login");
    let generator = advisor_script(generator, "story.dashboard", "Dashboard");
    generator
        .reply_for(
            "interconnection",
            &story_needle("story.login"),
            interconnection_json(&[("story.dashboard", "prerequisite")]),
        )
        .reply_for(
            "interconnection",
            &story_needle("story.dashboard"),
            interconnection_json(&[("story.login", "dependent")]),
        )
}
