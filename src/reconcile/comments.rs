//! Comment cross-posting
//!
//! Each copy carries a trailer naming the side and id of its original.
//! Copies are never copied again, and an original is skipped once any
//! comment on the other side references it, so repeated passes settle at
//! originals plus one copy each.

use super::hash::comment_hash;
use crate::config::SyncDirection;
use crate::integrations::{SourceStore, TargetStore};
use crate::model::{CommentMarker, CommentRecord, Origin};
use crate::Result;
use std::fmt;
use tracing::{debug, info};

/// Counters for one issue pair (or a whole run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommentSyncStats {
    pub source_to_target: usize,
    pub target_to_source: usize,
    /// Originals whose copy already exists
    pub already_synced: usize,
    /// Comments that are themselves copies
    pub copies_ignored: usize,
}

impl CommentSyncStats {
    pub fn posted(&self) -> usize {
        self.source_to_target + self.target_to_source
    }

    pub fn merge(&mut self, other: CommentSyncStats) {
        self.source_to_target += other.source_to_target;
        self.target_to_source += other.target_to_source;
        self.already_synced += other.already_synced;
        self.copies_ignored += other.copies_ignored;
    }
}

impl fmt::Display for CommentSyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to target, {} to source, {} already synced",
            self.source_to_target, self.target_to_source, self.already_synced
        )
    }
}

/// Originals on one side that have no copy on the other
fn pending<'a>(
    originals: &'a [CommentRecord],
    destination: &[CommentRecord],
    origin: Origin,
    stats: &mut CommentSyncStats,
) -> Vec<&'a CommentRecord> {
    let markers: Vec<CommentMarker> = destination.iter().filter_map(CommentRecord::marker).collect();

    originals
        .iter()
        .filter(|comment| {
            if comment.is_mirror() {
                stats.copies_ignored += 1;
                return false;
            }
            if markers.iter().any(|m| m.references(origin, &comment.id)) {
                stats.already_synced += 1;
                return false;
            }
            true
        })
        .collect()
}

/// Cross-posts comments between a source issue and its mirror
#[derive(Debug, Clone)]
pub struct CommentSyncManager {
    source_name: String,
    target_name: String,
}

impl Default for CommentSyncManager {
    fn default() -> Self {
        Self::new("JIRA", "GitHub")
    }
}

impl CommentSyncManager {
    /// `source_name` / `target_name` appear in the attribution line
    pub fn new(source_name: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            target_name: target_name.into(),
        }
    }

    /// Body of a copy: attribution, original text, trailer
    pub fn render(&self, comment: &CommentRecord) -> Result<String> {
        let system = match comment.origin {
            Origin::Source => &self.source_name,
            Origin::Target => &self.target_name,
        };
        let when = if comment.created.is_empty() {
            String::new()
        } else {
            format!(" on {}", comment.created)
        };
        let text = format!(
            "**{}** commented in {}{}:\n\n{}",
            comment.author,
            system,
            when,
            comment.body.trim()
        );
        let marker = CommentMarker::new(comment.origin, &comment.id, comment_hash(&comment.body));
        Ok(syncmark::append_comment_marker(&text, &marker)?)
    }

    /// Sync comments for one pair in the directions `direction` allows
    pub async fn sync_pair(
        &self,
        source: &dyn SourceStore,
        target: &dyn TargetStore,
        source_id: &str,
        number: u64,
        direction: SyncDirection,
    ) -> Result<CommentSyncStats> {
        let mut stats = CommentSyncStats::default();
        let source_comments = source.get_comments(source_id).await?;
        let target_comments = target.get_comments(number).await?;

        if direction.includes_source_to_target() {
            for comment in pending(&source_comments, &target_comments, Origin::Source, &mut stats) {
                let body = self.render(comment)?;
                target.add_comment(number, &body).await?;
                stats.source_to_target += 1;
                debug!(source_id = %source_id, number, comment_id = %comment.id, "Copied comment to target");
            }
        }

        if direction.includes_target_to_source() {
            for comment in pending(&target_comments, &source_comments, Origin::Target, &mut stats) {
                let body = self.render(comment)?;
                source.add_comment(source_id, &body).await?;
                stats.target_to_source += 1;
                debug!(source_id = %source_id, number, comment_id = %comment.id, "Copied comment to source");
            }
        }

        if stats.posted() > 0 {
            info!(
                source_id = %source_id,
                number,
                to_target = stats.source_to_target,
                to_source = stats.target_to_source,
                "Synced comments"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{MemorySourceStore, MemoryTargetStore};
    use crate::model::SourceIssue;

    fn stores() -> (MemorySourceStore, MemoryTargetStore, u64) {
        let source = MemorySourceStore::new("X");
        source.insert(SourceIssue::new("X-1", "Fix login", "Ready", "t"));
        let target = MemoryTargetStore::new();
        let number = target.open_issue("Fix login", "", &[]);
        (source, target, number)
    }

    #[test]
    fn test_render_has_attribution_and_trailer() {
        let manager = CommentSyncManager::default();
        let comment = CommentRecord::new("100", "Ada", "Looks good", Origin::Source)
            .with_created("2024-01-02");
        let body = manager.render(&comment).unwrap();

        assert!(body.starts_with("**Ada** commented in JIRA on 2024-01-02:\n\nLooks good"));
        let marker = syncmark::parse_comment_marker(&body).unwrap();
        assert!(marker.references(Origin::Source, "100"));
        assert_eq!(marker.content_hash, comment_hash("Looks good"));
    }

    #[tokio::test]
    async fn test_bidirectional_convergence() {
        let (source, target, number) = stores();
        source.add_human_comment("X-1", "Ada", "first");
        source.add_human_comment("X-1", "Ada", "second");
        target.add_human_comment(number, "grace", "from github");

        let manager = CommentSyncManager::default();
        let stats = manager
            .sync_pair(&source, &target, "X-1", number, SyncDirection::Bidirectional)
            .await
            .unwrap();
        assert_eq!(stats.source_to_target, 2);
        assert_eq!(stats.target_to_source, 1);
        assert_eq!(source.comments("X-1").len(), 3);
        assert_eq!(target.comments(number).len(), 3);

        let again = manager
            .sync_pair(&source, &target, "X-1", number, SyncDirection::Bidirectional)
            .await
            .unwrap();
        assert_eq!(again.posted(), 0);
        assert_eq!(again.already_synced, 3);
        assert_eq!(again.copies_ignored, 3);
        assert_eq!(source.comments("X-1").len(), 3);
        assert_eq!(target.comments(number).len(), 3);
    }

    #[tokio::test]
    async fn test_one_direction_only() {
        let (source, target, number) = stores();
        source.add_human_comment("X-1", "Ada", "hello");
        target.add_human_comment(number, "grace", "hi");

        let stats = CommentSyncManager::default()
            .sync_pair(&source, &target, "X-1", number, SyncDirection::SourceToTarget)
            .await
            .unwrap();
        assert_eq!(stats.source_to_target, 1);
        assert_eq!(stats.target_to_source, 0);
        assert_eq!(source.comments("X-1").len(), 1);
    }
}
