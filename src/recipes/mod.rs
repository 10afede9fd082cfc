//! Scripted walkthroughs of the client API.
//!
//! Each recipe runs against an open project and returns a report the CLI
//! prints. Checks a recipe makes about the server's behavior surface as
//! errors rather than panics.

mod documents;
mod files;
mod items;
mod server;
mod tree;

pub use documents::{RenderReport, SectionReport, describe_document, render_document};
pub use files::{
    AttachReport, Attachment, PlacedImage, UploadReport, attach_file, list_attachments, place_image, upload_file,
};
pub use items::{
    DownlinkSwap, LabelStep, LabelWalk, UseCaseReport, add_attachment, create_use_case, swap_downlink, walk_labels,
};
pub use server::{Favorites, NotifyReport, favorites, fetch_log, notify, relationship_graph};
pub use tree::{ExecuteReport, execute_test_cases, folder_paths, get_or_create_output_folder, tree_paths};

use chrono::Utc;

/// Item ID read by the attachment recipes.
pub const ATTACHMENT_ITEM: &str = "SPEC-2";

/// Document rendered and described by default.
pub const DEFAULT_DOCUMENT: &str = "DOC-8";

/// Raw field holding attachment references.
pub const FILES_FIELD: &str = "Files";

/// A title that will not collide with earlier runs.
fn unique_title(prefix: &str) -> String {
    format!("{} {}", prefix, Utc::now().timestamp_millis())
}

/// Pick a random element.
fn pick<T>(items: &[T]) -> Option<&T> {
    use rand::Rng;

    if items.is_empty() {
        return None;
    }
    items.get(rand::rng().random_range(0..items.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_empty() {
        let empty: [u8; 0] = [];
        assert!(pick(&empty).is_none());
        assert_eq!(pick(&[7]), Some(&7));
    }

    #[test]
    fn test_unique_title_prefix() {
        assert!(unique_title("Test").starts_with("Test "));
    }
}
