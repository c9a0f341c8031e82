//! Weave Story Records
//!
//! Patch-mutable, content-digested story records.
//!
//! # Core Concepts
//!
//! - [`StoryRecord`]: One story, mutated only through patches
//! - [`SectionPatch`]: Targeted add/replace/remove of one [`Item`]
//! - [`SectionPath`]: Closed set of patchable locations
//! - [`ContentHash`]: 32-byte Blake3 digest for records and context versions
//!
//! # Example
//!
//! ```rust
//! use weave_artifact::{ContentHash, Item, SectionPatch, SectionPath, StoryRecord};
//!
//! let mut record = StoryRecord::new("story.login", ContentHash::default());
//! record.apply(&SectionPatch::add(SectionPath::Title, Item::new("title", "Sign in")));
//!
//! assert!(record.render().starts_with("# Sign in"));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod hash;
mod patch;
mod path;
mod record;

pub use hash::{ContentHash, HashError};
pub use patch::{
    mint_item_id, Item, NoOpReason, PatchMatch, PatchMetadata, PatchOp, PatchOutcome,
    SectionPatch,
};
pub use path::{PathError, SectionPath};
pub use record::{ImplementationNotes, StoryContent, StoryRecord, UserStory};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn wire_patches_drive_a_record() {
        let patches: Vec<SectionPatch> = serde_json::from_str(
            r#"[
                {"op": "add", "path": "title", "item": {"id": "title", "text": "Dashboard"}},
                {"op": "add", "path": "uiMapping", "item": {"text": "Usage chart -> comp.usage_chart"}},
                {"op": "remove", "path": "uiMapping", "match": {"textEquals": "nothing"}}
            ]"#,
        )
        .unwrap();

        let mut record = StoryRecord::new("story.dashboard", ContentHash::default());
        let outcomes = record.apply_all(&patches);

        assert!(outcomes[0].is_applied());
        assert!(outcomes[1].is_applied());
        assert_eq!(outcomes[2], PatchOutcome::NoOp(NoOpReason::NoMatch));
        assert_eq!(record.version(), 2);
        assert!(record.render().contains("- Usage chart -> comp.usage_chart"));
    }
}
