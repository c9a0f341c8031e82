//! Per-story cross-references
//!
//! Runs once per finished story with no shared mutable state, so stories are
//! processed concurrently. Related-story edges pointing at the story itself
//! or at stories outside the run are dropped.

use crate::call::generate_shaped;
use crate::context::SharedContext;
use crate::error::StageError;
use crate::prompts;
use crate::shape::InterconnectionRecord;
use crate::types::StoryBrief;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use weave_artifact::StoryRecord;
use weave_gateway::{GenerationRequest, TextGenerator};

/// Typed edge between two stories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryRelation {
    Prerequisite,
    Parallel,
    Dependent,
    Related,
}

impl StoryRelation {
    /// Relation as seen from the other story
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Prerequisite => Self::Dependent,
            Self::Dependent => Self::Prerequisite,
            Self::Parallel => Self::Parallel,
            Self::Related => Self::Related,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prerequisite => "prerequisite",
            Self::Parallel => "parallel",
            Self::Dependent => "dependent",
            Self::Related => "related",
        }
    }
}

/// Edge to another story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedStory {
    pub story_id: String,
    pub relationship: StoryRelation,
    #[serde(default)]
    pub rationale: String,
}

/// State and event ownership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ownership {
    #[serde(default)]
    pub owns_state: Vec<String>,
    #[serde(default)]
    pub consumes_state: Vec<String>,
    #[serde(default)]
    pub emits_events: Vec<String>,
    #[serde(default)]
    pub listens_to_events: Vec<String>,
}

impl Ownership {
    /// Every referenced contract id
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.owns_state
            .iter()
            .chain(&self.consumes_state)
            .chain(&self.emits_events)
            .chain(&self.listens_to_events)
            .map(String::as_str)
    }
}

/// Cross-reference record of one story
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryInterconnections {
    pub story_id: String,
    /// UI term → component id
    pub ui_mapping: BTreeMap<String, String>,
    pub contract_dependencies: Vec<String>,
    pub ownership: Ownership,
    pub related_stories: Vec<RelatedStory>,
}

impl StoryInterconnections {
    /// Record with no references, used when extraction failed
    #[must_use]
    pub fn empty(story_id: impl Into<String>) -> Self {
        Self {
            story_id: story_id.into(),
            ..Self::default()
        }
    }

    /// Attach a story id to an extracted record, dropping edges to unknown
    /// stories and to itself
    #[must_use]
    pub fn from_record(story_id: &str, record: InterconnectionRecord, known: &BTreeSet<String>) -> Self {
        let related_stories = record
            .related_stories
            .into_iter()
            .filter(|r| {
                let keep = r.story_id != story_id && known.contains(&r.story_id);
                if !keep {
                    tracing::warn!(story_id, related = %r.story_id, "dropping related-story edge");
                }
                keep
            })
            .collect();
        Self {
            story_id: story_id.to_string(),
            ui_mapping: record.ui_mapping,
            contract_dependencies: record.contract_dependencies,
            ownership: record.ownership,
            related_stories,
        }
    }

    /// Edge to `other`, if any
    #[must_use]
    pub fn relation_to(&self, other: &str) -> Option<&RelatedStory> {
        self.related_stories.iter().find(|r| r.story_id == other)
    }
}

/// Extracts cross-references for finished stories
#[derive(Clone, Copy)]
pub struct InterconnectionEngine<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> InterconnectionEngine<'a> {
    #[must_use]
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }

    /// Extract the record for one story
    ///
    /// # Errors
    /// Returns error if the call fails or the response is not an
    /// interconnection record
    pub async fn extract(
        &self,
        brief: &StoryBrief,
        record: &StoryRecord,
        ctx: &SharedContext,
        known_stories: &BTreeSet<String>,
    ) -> Result<StoryInterconnections, StageError> {
        let request = GenerationRequest::new(
            prompts::INTERCONNECTION,
            prompts::INTERCONNECTION_INSTRUCTIONS,
            prompts::story_content(
                &brief.story_id,
                &brief.product,
                &brief.seed.text,
                &record.render(),
                ctx,
            ),
        );
        let extracted: InterconnectionRecord = generate_shaped(self.generator, &request).await?;
        let links = StoryInterconnections::from_record(&brief.story_id, extracted, known_stories);
        tracing::debug!(
            story_id = %brief.story_id,
            ui_terms = links.ui_mapping.len(),
            contracts = links.contract_dependencies.len(),
            related = links.related_stories.len(),
            "interconnections extracted"
        );
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StorySeed;
    use pretty_assertions::assert_eq;
    use weave_artifact::ContentHash;
    use weave_test_utils::{fixtures, ScriptedGenerator};

    #[test]
    fn inverse_relations() {
        assert_eq!(StoryRelation::Prerequisite.inverse(), StoryRelation::Dependent);
        assert_eq!(StoryRelation::Parallel.inverse(), StoryRelation::Parallel);
    }

    #[tokio::test]
    async fn drops_unknown_and_self_edges() {
        let reply = serde_json::json!({
            "uiMapping": {"Sign in button": "comp.login_form"},
            "contractDependencies": ["state.session"],
            "ownership": {"ownsState": ["state.session"]},
            "relatedStories": [
                {"storyId": "story.dashboard", "relationship": "prerequisite", "rationale": "creates the session"},
                {"storyId": "story.login", "relationship": "related"},
                {"storyId": "story.billing", "relationship": "related"}
            ]
        });
        let scripted = ScriptedGenerator::new().reply(prompts::INTERCONNECTION, reply.to_string());
        let brief = StoryBrief::new("story.login", "Acme", StorySeed::new("login", "form"));
        let known: BTreeSet<String> = ["story.login", "story.dashboard"].map(String::from).into();

        let links = InterconnectionEngine::new(&scripted)
            .extract(
                &brief,
                &StoryRecord::new("story.login", ContentHash::default()),
                &SharedContext::new(),
                &known,
            )
            .await
            .unwrap();

        assert_eq!(links.story_id, "story.login");
        assert_eq!(links.related_stories.len(), 1);
        assert_eq!(
            links.relation_to("story.dashboard").map(|r| r.relationship),
            Some(StoryRelation::Prerequisite)
        );
        assert_eq!(links.ownership.ids().collect::<Vec<_>>(), ["state.session"]);
    }

    #[tokio::test]
    async fn fixture_record_parses() {
        let scripted = ScriptedGenerator::new().reply(
            prompts::INTERCONNECTION,
            fixtures::interconnection_json(&[]),
        );
        let brief = StoryBrief::new("story.login", "Acme", StorySeed::new("login", "form"));
        let links = InterconnectionEngine::new(&scripted)
            .extract(
                &brief,
                &StoryRecord::new("story.login", ContentHash::default()),
                &SharedContext::new(),
                &BTreeSet::new(),
            )
            .await
            .unwrap();
        assert!(links.related_stories.is_empty());
    }
}
