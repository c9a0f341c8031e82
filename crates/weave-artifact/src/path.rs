//! Section paths for addressing within story records
//!
//! Provides [`SectionPath`], the closed set of locations a patch may target.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Location within a [`StoryRecord`](crate::StoryRecord)
///
/// The set is closed: a patch naming anything else fails to parse, so an
/// advisor can never address a field the record does not have.
///
/// Scalar paths (`title`, `story.*`) hold at most one item; every other path
/// holds an ordered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SectionPath {
    #[serde(rename = "title")]
    Title,
    #[serde(rename = "story.asA")]
    StoryAsA,
    #[serde(rename = "story.iWant")]
    StoryIWant,
    #[serde(rename = "story.soThat")]
    StorySoThat,
    #[serde(rename = "userVisibleBehavior")]
    UserVisibleBehavior,
    #[serde(rename = "outcomeAcceptanceCriteria")]
    OutcomeAcceptanceCriteria,
    #[serde(rename = "systemAcceptanceCriteria")]
    SystemAcceptanceCriteria,
    #[serde(rename = "implementationNotes.stateOwnership")]
    NotesStateOwnership,
    #[serde(rename = "implementationNotes.dataFlow")]
    NotesDataFlow,
    #[serde(rename = "implementationNotes.contracts")]
    NotesContracts,
    #[serde(rename = "implementationNotes.events")]
    NotesEvents,
    #[serde(rename = "implementationNotes.dependencies")]
    NotesDependencies,
    #[serde(rename = "implementationNotes.errorHandling")]
    NotesErrorHandling,
    #[serde(rename = "implementationNotes.accessibility")]
    NotesAccessibility,
    #[serde(rename = "uiMapping")]
    UiMapping,
    #[serde(rename = "openQuestions")]
    OpenQuestions,
    #[serde(rename = "edgeCases")]
    EdgeCases,
    #[serde(rename = "nonGoals")]
    NonGoals,
}

impl SectionPath {
    /// Every valid path, in render order
    pub const ALL: [SectionPath; 18] = [
        Self::Title,
        Self::StoryAsA,
        Self::StoryIWant,
        Self::StorySoThat,
        Self::UserVisibleBehavior,
        Self::OutcomeAcceptanceCriteria,
        Self::SystemAcceptanceCriteria,
        Self::NotesStateOwnership,
        Self::NotesDataFlow,
        Self::NotesContracts,
        Self::NotesEvents,
        Self::NotesDependencies,
        Self::NotesErrorHandling,
        Self::NotesAccessibility,
        Self::UiMapping,
        Self::OpenQuestions,
        Self::EdgeCases,
        Self::NonGoals,
    ];

    /// The seven implementation-note buckets
    pub const IMPLEMENTATION_NOTES: [SectionPath; 7] = [
        Self::NotesStateOwnership,
        Self::NotesDataFlow,
        Self::NotesContracts,
        Self::NotesEvents,
        Self::NotesDependencies,
        Self::NotesErrorHandling,
        Self::NotesAccessibility,
    ];

    /// Wire name (matches the serde representation)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::StoryAsA => "story.asA",
            Self::StoryIWant => "story.iWant",
            Self::StorySoThat => "story.soThat",
            Self::UserVisibleBehavior => "userVisibleBehavior",
            Self::OutcomeAcceptanceCriteria => "outcomeAcceptanceCriteria",
            Self::SystemAcceptanceCriteria => "systemAcceptanceCriteria",
            Self::NotesStateOwnership => "implementationNotes.stateOwnership",
            Self::NotesDataFlow => "implementationNotes.dataFlow",
            Self::NotesContracts => "implementationNotes.contracts",
            Self::NotesEvents => "implementationNotes.events",
            Self::NotesDependencies => "implementationNotes.dependencies",
            Self::NotesErrorHandling => "implementationNotes.errorHandling",
            Self::NotesAccessibility => "implementationNotes.accessibility",
            Self::UiMapping => "uiMapping",
            Self::OpenQuestions => "openQuestions",
            Self::EdgeCases => "edgeCases",
            Self::NonGoals => "nonGoals",
        }
    }

    /// Whether this path holds at most one item
    #[inline]
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        matches!(
            self,
            Self::Title | Self::StoryAsA | Self::StoryIWant | Self::StorySoThat
        )
    }

    /// Prefix used when minting item ids for this section
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::StoryAsA => "as-a",
            Self::StoryIWant => "i-want",
            Self::StorySoThat => "so-that",
            Self::UserVisibleBehavior => "uvb",
            Self::OutcomeAcceptanceCriteria => "oac",
            Self::SystemAcceptanceCriteria => "sac",
            Self::NotesStateOwnership => "note-state",
            Self::NotesDataFlow => "note-flow",
            Self::NotesContracts => "note-contract",
            Self::NotesEvents => "note-event",
            Self::NotesDependencies => "note-dep",
            Self::NotesErrorHandling => "note-error",
            Self::NotesAccessibility => "note-a11y",
            Self::UiMapping => "ui",
            Self::OpenQuestions => "oq",
            Self::EdgeCases => "edge",
            Self::NonGoals => "non-goal",
        }
    }

    /// Human heading used by the renderer
    #[must_use]
    pub const fn heading(self) -> &'static str {
        match self {
            Self::Title => "Title",
            Self::StoryAsA => "As a",
            Self::StoryIWant => "I want",
            Self::StorySoThat => "So that",
            Self::UserVisibleBehavior => "User-Visible Behavior",
            Self::OutcomeAcceptanceCriteria => "Outcome Acceptance Criteria",
            Self::SystemAcceptanceCriteria => "System Acceptance Criteria",
            Self::NotesStateOwnership => "State Ownership",
            Self::NotesDataFlow => "Data Flow",
            Self::NotesContracts => "Contracts",
            Self::NotesEvents => "Events",
            Self::NotesDependencies => "Dependencies",
            Self::NotesErrorHandling => "Error Handling",
            Self::NotesAccessibility => "Accessibility",
            Self::UiMapping => "UI Mapping",
            Self::OpenQuestions => "Open Questions",
            Self::EdgeCases => "Edge Cases",
            Self::NonGoals => "Non-Goals",
        }
    }
}

impl Display for SectionPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PathError::Unknown(s.to_string()))
    }
}

/// Errors when parsing section paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Path is not one of the closed set
    #[error("unknown section path: '{0}'")]
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_through_from_str() {
        for path in SectionPath::ALL {
            assert_eq!(path.as_str().parse::<SectionPath>().unwrap(), path);
        }
    }

    #[test]
    fn wire_names_match_serde() {
        for path in SectionPath::ALL {
            let json = serde_json::to_string(&path).unwrap();
            assert_eq!(json, format!("\"{}\"", path.as_str()));
        }
    }

    #[test]
    fn unknown_path_is_rejected() {
        assert_eq!(
            "implementationNotes.misc".parse::<SectionPath>(),
            Err(PathError::Unknown("implementationNotes.misc".to_string()))
        );
        assert!(serde_json::from_str::<SectionPath>("\"story\"").is_err());
    }

    #[test]
    fn only_headline_fields_are_scalar() {
        let scalars: Vec<_> = SectionPath::ALL.into_iter().filter(|p| p.is_scalar()).collect();
        assert_eq!(
            scalars,
            vec![
                SectionPath::Title,
                SectionPath::StoryAsA,
                SectionPath::StoryIWant,
                SectionPath::StorySoThat
            ]
        );
    }
}
