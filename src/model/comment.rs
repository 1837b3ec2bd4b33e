//! Comment representation shared by both stores

use serde::{Deserialize, Serialize};
use syncmark::{CommentMarker, Origin};

/// A comment on either side of the sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    /// Display name (or login) of the author
    pub author: String,
    /// Body as markdown
    pub body: String,
    pub created: String,
    /// Store this comment lives in
    pub origin: Origin,
}

impl CommentRecord {
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        body: impl Into<String>,
        origin: Origin,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            body: body.into(),
            created: String::new(),
            origin,
        }
    }

    pub fn with_created(mut self, created: impl Into<String>) -> Self {
        self.created = created.into();
        self
    }

    /// Sync trailer, present only on mirrored copies
    pub fn marker(&self) -> Option<CommentMarker> {
        syncmark::parse_comment_marker(&self.body)
    }

    pub fn is_mirror(&self) -> bool {
        self.marker().is_some()
    }
}
