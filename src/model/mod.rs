//! Core data model
//!
//! Vendor-neutral views of source issues, target mirrors, and comments. The
//! adapters in [`crate::integrations`] convert wire formats into these types.

mod comment;
mod source_issue;
mod target_issue;

pub use comment::CommentRecord;
pub use source_issue::{IssueLink, LinkDirection, NewSourceIssue, SourceIssue};
pub use target_issue::{IssueState, NewTargetIssue, TargetIssue, TargetUpdate};
pub use syncmark::{CommentMarker, Origin, SyncMetadata};
