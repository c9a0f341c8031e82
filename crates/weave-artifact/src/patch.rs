//! Scoped patches for story records
//!
//! Provides [`SectionPatch`], the only way a [`StoryRecord`](crate::StoryRecord)
//! is ever mutated. Patches are targeted item-level operations, never
//! free-text overwrites.

use crate::hash::ContentHash;
use crate::path::SectionPath;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Atomic unit inside every section of a story record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    /// Stable item identifier; minted from the text when left empty
    #[serde(default)]
    pub id: String,
    /// Item text
    pub text: String,
}

impl Item {
    /// Create item with explicit id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    /// Create item whose id is derived from its text and target section
    #[inline]
    #[must_use]
    pub fn minted(path: SectionPath, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: mint_item_id(path, &text),
            text,
        }
    }
}

/// Deterministic item id: `<section-prefix>-<8 hex of blake3(text)>`
#[must_use]
pub fn mint_item_id(path: SectionPath, text: &str) -> String {
    let hash = ContentHash::compute(text.trim().as_bytes());
    format!("{}-{}", path.id_prefix(), &hash.short()[..8])
}

/// Patch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Append an item
    Add,
    /// Replace exactly one matched item
    Replace,
    /// Remove exactly one matched item
    Remove,
}

impl Display for PatchOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
        })
    }
}

/// Selector for replace/remove targets
///
/// When both fields are present an item must satisfy both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMatch {
    /// Match by item id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Match by exact item text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_equals: Option<String>,
}

impl PatchMatch {
    /// Match by id
    #[inline]
    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text_equals: None,
        }
    }

    /// Match by exact text
    #[inline]
    #[must_use]
    pub fn by_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text_equals: Some(text.into()),
        }
    }

    /// Whether the selector constrains anything
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.text_equals.is_none()
    }

    /// Whether the item satisfies this selector
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        if self.is_empty() {
            return false;
        }
        let id_ok = self.id.as_deref().map_or(true, |id| item.id == id);
        let text_ok = self
            .text_equals
            .as_deref()
            .map_or(true, |text| item.text == text);
        id_ok && text_ok
    }
}

/// Provenance attached to every patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMetadata {
    /// Advisor that proposed the patch (overwritten by the runner)
    #[serde(default)]
    pub advisor_id: String,
    /// Optional free-text rationale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Targeted mutation of one item in one section
///
/// # Invariants
/// - `item` is required for `add` and `replace`
/// - `match` is required for `replace` and `remove`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionPatch {
    /// Operation
    pub op: PatchOp,
    /// Target section
    pub path: SectionPath,
    /// New item (add/replace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    /// Target selector (replace/remove)
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<PatchMatch>,
    /// Provenance
    #[serde(default)]
    pub metadata: PatchMetadata,
}

impl SectionPatch {
    /// Create an `add` patch
    #[inline]
    #[must_use]
    pub fn add(path: SectionPath, item: Item) -> Self {
        Self {
            op: PatchOp::Add,
            path,
            item: Some(item),
            selector: None,
            metadata: PatchMetadata::default(),
        }
    }

    /// Create a `replace` patch
    #[inline]
    #[must_use]
    pub fn replace(path: SectionPath, selector: PatchMatch, item: Item) -> Self {
        Self {
            op: PatchOp::Replace,
            path,
            item: Some(item),
            selector: Some(selector),
            metadata: PatchMetadata::default(),
        }
    }

    /// Create a `remove` patch
    #[inline]
    #[must_use]
    pub fn remove(path: SectionPath, selector: PatchMatch) -> Self {
        Self {
            op: PatchOp::Remove,
            path,
            item: None,
            selector: Some(selector),
            metadata: PatchMetadata::default(),
        }
    }

    /// Attribute the patch to an advisor
    #[inline]
    #[must_use]
    pub fn by(mut self, advisor_id: impl Into<String>) -> Self {
        self.metadata.advisor_id = advisor_id.into();
        self
    }

    /// Attach reasoning
    #[inline]
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.metadata.reasoning = Some(reasoning.into());
        self
    }
}

impl Display for SectionPatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.path)
    }
}

/// Result of applying one patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The record changed
    Applied,
    /// The record is untouched
    NoOp(NoOpReason),
}

impl PatchOutcome {
    /// Whether the record changed
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Why a patch left the record untouched
///
/// None of these are errors: an unresolvable patch is skipped, never guessed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoOpReason {
    /// `add`/`replace` without an item
    #[error("patch carries no item")]
    MissingItem,
    /// `replace`/`remove` without a usable selector
    #[error("patch carries no match selector")]
    MissingSelector,
    /// Selector resolved to no item
    #[error("match resolved to no item")]
    NoMatch,
    /// Selector resolved to more than one item
    #[error("match is ambiguous ({0} items)")]
    AmbiguousMatch(usize),
    /// An item with the same id already exists
    #[error("duplicate item id '{0}'")]
    DuplicateId(String),
    /// `add` on an occupied scalar section
    #[error("scalar section already holds an item")]
    SlotOccupied,
    /// `replace` with an identical item
    #[error("replacement is identical to the matched item")]
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_parses_from_wire_json() {
        let json = r#"{
            "op": "replace",
            "path": "implementationNotes.events",
            "item": {"text": "Emits event.session_started"},
            "match": {"textEquals": "Emits session event"},
            "metadata": {"advisorId": "architecture", "reasoning": "use stable id"}
        }"#;
        let patch: SectionPatch = serde_json::from_str(json).unwrap();
        assert_eq!(patch.op, PatchOp::Replace);
        assert_eq!(patch.path, SectionPath::NotesEvents);
        assert_eq!(patch.item.as_ref().unwrap().id, "");
        assert_eq!(
            patch.selector,
            Some(PatchMatch::by_text("Emits session event"))
        );
        assert_eq!(patch.metadata.advisor_id, "architecture");
    }

    #[test]
    fn patch_with_unknown_op_is_rejected() {
        let json = r#"{"op": "upsert", "path": "title", "item": {"text": "x"}}"#;
        assert!(serde_json::from_str::<SectionPatch>(json).is_err());
    }

    #[test]
    fn empty_selector_matches_nothing() {
        let item = Item::new("uvb-1", "Shows a spinner");
        assert!(!PatchMatch::default().matches(&item));
        assert!(PatchMatch::by_id("uvb-1").matches(&item));
        assert!(PatchMatch::by_text("Shows a spinner").matches(&item));
    }

    #[test]
    fn selector_with_both_fields_requires_both() {
        let item = Item::new("uvb-1", "Shows a spinner");
        let selector = PatchMatch {
            id: Some("uvb-1".into()),
            text_equals: Some("Shows a banner".into()),
        };
        assert!(!selector.matches(&item));
    }

    #[test]
    fn minted_ids_are_stable_and_prefixed() {
        let a = Item::minted(SectionPath::EdgeCases, "Network drops mid-login");
        let b = Item::minted(SectionPath::EdgeCases, "Network drops mid-login  ");
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("edge-"));
        assert_eq!(a.id.len(), "edge-".len() + 8);
    }
}
