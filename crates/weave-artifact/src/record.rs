//! Story records
//!
//! [`StoryRecord`] is the canonical, patch-mutable representation of one story.
//! It is created empty, mutated exclusively through [`SectionPatch`]es and
//! rendered deterministically to markdown after each batch.

use crate::hash::{ContentHash, HashError};
use crate::patch::{mint_item_id, Item, NoOpReason, PatchOp, PatchOutcome, SectionPatch};
use crate::path::SectionPath;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// `As a / I want / so that` headline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStory {
    pub as_a: Option<Item>,
    pub i_want: Option<Item>,
    pub so_that: Option<Item>,
}

/// The seven implementation-note buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationNotes {
    pub state_ownership: Vec<Item>,
    pub data_flow: Vec<Item>,
    pub contracts: Vec<Item>,
    pub events: Vec<Item>,
    pub dependencies: Vec<Item>,
    pub error_handling: Vec<Item>,
    pub accessibility: Vec<Item>,
}

/// Every patchable field of a story
///
/// Field order is fixed, so the JSON encoding (and therefore the digest) is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryContent {
    pub title: Option<Item>,
    pub story: UserStory,
    pub user_visible_behavior: Vec<Item>,
    pub outcome_acceptance_criteria: Vec<Item>,
    pub system_acceptance_criteria: Vec<Item>,
    pub implementation_notes: ImplementationNotes,
    pub ui_mapping: Vec<Item>,
    pub open_questions: Vec<Item>,
    pub edge_cases: Vec<Item>,
    pub non_goals: Vec<Item>,
}

enum Slot<'a> {
    Scalar(&'a mut Option<Item>),
    List(&'a mut Vec<Item>),
}

impl StoryContent {
    /// Items currently held at `path`
    #[must_use]
    pub fn items(&self, path: SectionPath) -> &[Item] {
        match path {
            SectionPath::Title => self.title.as_slice(),
            SectionPath::StoryAsA => self.story.as_a.as_slice(),
            SectionPath::StoryIWant => self.story.i_want.as_slice(),
            SectionPath::StorySoThat => self.story.so_that.as_slice(),
            SectionPath::UserVisibleBehavior => &self.user_visible_behavior,
            SectionPath::OutcomeAcceptanceCriteria => &self.outcome_acceptance_criteria,
            SectionPath::SystemAcceptanceCriteria => &self.system_acceptance_criteria,
            SectionPath::NotesStateOwnership => &self.implementation_notes.state_ownership,
            SectionPath::NotesDataFlow => &self.implementation_notes.data_flow,
            SectionPath::NotesContracts => &self.implementation_notes.contracts,
            SectionPath::NotesEvents => &self.implementation_notes.events,
            SectionPath::NotesDependencies => &self.implementation_notes.dependencies,
            SectionPath::NotesErrorHandling => &self.implementation_notes.error_handling,
            SectionPath::NotesAccessibility => &self.implementation_notes.accessibility,
            SectionPath::UiMapping => &self.ui_mapping,
            SectionPath::OpenQuestions => &self.open_questions,
            SectionPath::EdgeCases => &self.edge_cases,
            SectionPath::NonGoals => &self.non_goals,
        }
    }

    fn slot_mut(&mut self, path: SectionPath) -> Slot<'_> {
        match path {
            SectionPath::Title => Slot::Scalar(&mut self.title),
            SectionPath::StoryAsA => Slot::Scalar(&mut self.story.as_a),
            SectionPath::StoryIWant => Slot::Scalar(&mut self.story.i_want),
            SectionPath::StorySoThat => Slot::Scalar(&mut self.story.so_that),
            SectionPath::UserVisibleBehavior => Slot::List(&mut self.user_visible_behavior),
            SectionPath::OutcomeAcceptanceCriteria => {
                Slot::List(&mut self.outcome_acceptance_criteria)
            }
            SectionPath::SystemAcceptanceCriteria => {
                Slot::List(&mut self.system_acceptance_criteria)
            }
            SectionPath::NotesStateOwnership => {
                Slot::List(&mut self.implementation_notes.state_ownership)
            }
            SectionPath::NotesDataFlow => Slot::List(&mut self.implementation_notes.data_flow),
            SectionPath::NotesContracts => Slot::List(&mut self.implementation_notes.contracts),
            SectionPath::NotesEvents => Slot::List(&mut self.implementation_notes.events),
            SectionPath::NotesDependencies => {
                Slot::List(&mut self.implementation_notes.dependencies)
            }
            SectionPath::NotesErrorHandling => {
                Slot::List(&mut self.implementation_notes.error_handling)
            }
            SectionPath::NotesAccessibility => {
                Slot::List(&mut self.implementation_notes.accessibility)
            }
            SectionPath::UiMapping => Slot::List(&mut self.ui_mapping),
            SectionPath::OpenQuestions => Slot::List(&mut self.open_questions),
            SectionPath::EdgeCases => Slot::List(&mut self.edge_cases),
            SectionPath::NonGoals => Slot::List(&mut self.non_goals),
        }
    }

    /// Whether no section holds any item
    #[must_use]
    pub fn is_empty(&self) -> bool {
        SectionPath::ALL.iter().all(|p| self.items(*p).is_empty())
    }
}

/// One mutable story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRecord {
    /// Stable story identifier
    story_id: String,
    /// Patchable content
    content: StoryContent,
    /// Digest of the shared context this record was generated against
    context_digest: ContentHash,
    /// Incremented once per applied patch
    version: u64,
}

impl StoryRecord {
    /// Create an empty record generated against the given context digest
    #[inline]
    #[must_use]
    pub fn new(story_id: impl Into<String>, context_digest: ContentHash) -> Self {
        Self {
            story_id: story_id.into(),
            content: StoryContent::default(),
            context_digest,
            version: 0,
        }
    }

    /// Story identifier
    #[inline]
    #[must_use]
    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    /// Read-only content
    #[inline]
    #[must_use]
    pub fn content(&self) -> &StoryContent {
        &self.content
    }

    /// Context digest this record was generated against
    #[inline]
    #[must_use]
    pub fn context_digest(&self) -> ContentHash {
        self.context_digest
    }

    /// Version counter
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Items at `path`
    #[inline]
    #[must_use]
    pub fn items(&self, path: SectionPath) -> &[Item] {
        self.content.items(path)
    }

    /// Apply one patch
    ///
    /// Unresolvable patches are reported as [`PatchOutcome::NoOp`] and leave
    /// the record untouched, including its version.
    pub fn apply(&mut self, patch: &SectionPatch) -> PatchOutcome {
        let outcome = match patch.op {
            PatchOp::Add => self.apply_add(patch),
            PatchOp::Replace => self.apply_replace(patch),
            PatchOp::Remove => self.apply_remove(patch),
        };
        if outcome.is_applied() {
            self.version += 1;
        }
        outcome
    }

    /// Apply patches in order
    pub fn apply_all<'a, I>(&mut self, patches: I) -> Vec<PatchOutcome>
    where
        I: IntoIterator<Item = &'a SectionPatch>,
    {
        patches.into_iter().map(|p| self.apply(p)).collect()
    }

    fn normalized_item(patch: &SectionPatch) -> Option<Item> {
        patch.item.as_ref().map(|item| {
            let mut item = item.clone();
            if item.id.trim().is_empty() {
                item.id = mint_item_id(patch.path, &item.text);
            }
            item
        })
    }

    fn apply_add(&mut self, patch: &SectionPatch) -> PatchOutcome {
        let Some(item) = Self::normalized_item(patch) else {
            return PatchOutcome::NoOp(NoOpReason::MissingItem);
        };
        match self.content.slot_mut(patch.path) {
            Slot::Scalar(slot) => {
                if slot.is_some() {
                    return PatchOutcome::NoOp(NoOpReason::SlotOccupied);
                }
                *slot = Some(item);
            }
            Slot::List(list) => {
                if list.iter().any(|existing| existing.id == item.id) {
                    return PatchOutcome::NoOp(NoOpReason::DuplicateId(item.id));
                }
                list.push(item);
            }
        }
        PatchOutcome::Applied
    }

    /// Resolve the selector to exactly one index
    fn resolve(&self, patch: &SectionPatch) -> Result<usize, NoOpReason> {
        let selector = patch
            .selector
            .as_ref()
            .filter(|s| !s.is_empty())
            .ok_or(NoOpReason::MissingSelector)?;
        let hits: Vec<usize> = self
            .content
            .items(patch.path)
            .iter()
            .enumerate()
            .filter(|(_, item)| selector.matches(item))
            .map(|(i, _)| i)
            .collect();
        match hits.as_slice() {
            [] => Err(NoOpReason::NoMatch),
            [single] => Ok(*single),
            many => Err(NoOpReason::AmbiguousMatch(many.len())),
        }
    }

    fn apply_replace(&mut self, patch: &SectionPatch) -> PatchOutcome {
        let Some(mut item) = patch.item.clone() else {
            return PatchOutcome::NoOp(NoOpReason::MissingItem);
        };
        let index = match self.resolve(patch) {
            Ok(index) => index,
            Err(reason) => return PatchOutcome::NoOp(reason),
        };
        let current = &self.content.items(patch.path)[index];
        if item.id.trim().is_empty() {
            item.id.clone_from(&current.id);
        }
        if *current == item {
            return PatchOutcome::NoOp(NoOpReason::Unchanged);
        }
        if item.id != current.id
            && self
                .content
                .items(patch.path)
                .iter()
                .any(|other| other.id == item.id)
        {
            return PatchOutcome::NoOp(NoOpReason::DuplicateId(item.id));
        }
        match self.content.slot_mut(patch.path) {
            Slot::Scalar(slot) => *slot = Some(item),
            Slot::List(list) => list[index] = item,
        }
        PatchOutcome::Applied
    }

    fn apply_remove(&mut self, patch: &SectionPatch) -> PatchOutcome {
        let index = match self.resolve(patch) {
            Ok(index) => index,
            Err(reason) => return PatchOutcome::NoOp(reason),
        };
        match self.content.slot_mut(patch.path) {
            Slot::Scalar(slot) => *slot = None,
            Slot::List(list) => {
                list.remove(index);
            }
        }
        PatchOutcome::Applied
    }

    /// Content digest (independent of version and context digest)
    ///
    /// # Errors
    /// Returns error if the content cannot be encoded
    pub fn digest(&self) -> Result<ContentHash, HashError> {
        ContentHash::compute_serializable(&self.content)
    }

    /// Render to markdown
    ///
    /// Pure function of the record content: equal content renders to equal
    /// bytes. Empty sections are omitted.
    #[must_use]
    pub fn render(&self) -> String {
        self.render_with(false)
    }

    /// Render to markdown with each list item prefixed by its id
    ///
    /// Items appear as `- [id] text`, so patch authors can match them by id.
    #[must_use]
    pub fn render_annotated(&self) -> String {
        self.render_with(true)
    }

    fn render_with(&self, annotate: bool) -> String {
        let c = &self.content;
        let mut out = String::new();

        let title = c.title.as_ref().map_or(self.story_id.as_str(), |t| t.text.as_str());
        let _ = writeln!(out, "# {title}");

        let headline: Vec<String> = [
            (SectionPath::StoryAsA, &c.story.as_a),
            (SectionPath::StoryIWant, &c.story.i_want),
            (SectionPath::StorySoThat, &c.story.so_that),
        ]
        .into_iter()
        .filter_map(|(path, item)| {
            item.as_ref()
                .map(|i| format!("**{}** {}", path.heading(), i.text))
        })
        .collect();
        if !headline.is_empty() {
            let _ = write!(out, "\n{}\n", headline.join(", "));
        }

        for path in [
            SectionPath::UserVisibleBehavior,
            SectionPath::OutcomeAcceptanceCriteria,
            SectionPath::SystemAcceptanceCriteria,
        ] {
            render_list(&mut out, "##", path, c.items(path), annotate);
        }

        if SectionPath::IMPLEMENTATION_NOTES
            .iter()
            .any(|p| !c.items(*p).is_empty())
        {
            out.push_str("\n## Implementation Notes\n");
            for path in SectionPath::IMPLEMENTATION_NOTES {
                render_list(&mut out, "###", path, c.items(path), annotate);
            }
        }

        for path in [
            SectionPath::UiMapping,
            SectionPath::EdgeCases,
            SectionPath::OpenQuestions,
            SectionPath::NonGoals,
        ] {
            render_list(&mut out, "##", path, c.items(path), annotate);
        }

        out
    }
}

fn render_list(out: &mut String, level: &str, path: SectionPath, items: &[Item], annotate: bool) {
    if items.is_empty() {
        return;
    }
    let _ = write!(out, "\n{level} {}\n\n", path.heading());
    for item in items {
        if annotate {
            let _ = writeln!(out, "- [{}] {}", item.id, item.text);
        } else {
            let _ = writeln!(out, "- {}", item.text);
        }
    }
}
