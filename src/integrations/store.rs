//! Store abstractions
//!
//! The engine only talks to these traits. JIRA and GitHub adapters implement
//! them for real runs; the dry-run wrappers and in-memory stores implement
//! them for previews and tests.

use crate::model::{CommentRecord, NewSourceIssue, NewTargetIssue, SourceIssue, TargetIssue, TargetUpdate};
use crate::{Result, SyncError};
use async_trait::async_trait;
use tracing::debug;

/// One page-bounded search result
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub issues: Vec<SourceIssue>,
    /// Total matches reported by the store (may exceed `issues.len()`)
    pub total: u32,
}

/// A workflow transition available from an issue's current status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: String,
    pub name: String,
    /// Destination status name
    pub to_status: String,
}

/// Source store: owns canonical records and only changes status through
/// workflow transitions
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Query-bounded search
    async fn search_issues(&self, query: &str, fields: &[String], limit: u32) -> Result<SearchResult>;

    async fn get_issue(&self, id: &str, fields: &[String]) -> Result<SourceIssue>;

    /// Transitions available from the issue's current status
    async fn get_transitions(&self, id: &str) -> Result<Vec<Transition>>;

    async fn apply_transition(&self, id: &str, transition_id: &str) -> Result<()>;

    /// Discover a transition whose destination is `target_status` and apply it
    ///
    /// Fails with [`SyncError::NoTransition`] when the workflow offers none.
    async fn transition_issue(&self, id: &str, target_status: &str) -> Result<()> {
        let transitions = self.get_transitions(id).await?;
        let transition = transitions
            .iter()
            .find(|t| t.to_status.eq_ignore_ascii_case(target_status))
            .ok_or_else(|| {
                debug!(
                    id = %id,
                    target = %target_status,
                    available = ?transitions.iter().map(|t| &t.to_status).collect::<Vec<_>>(),
                    "No transition to requested status"
                );
                SyncError::NoTransition {
                    id: id.to_string(),
                    status: target_status.to_string(),
                }
            })?;
        self.apply_transition(id, &transition.id).await
    }

    async fn get_comments(&self, id: &str) -> Result<Vec<CommentRecord>>;

    /// Post a markdown comment, returning the new comment id
    async fn add_comment(&self, id: &str, body: &str) -> Result<String>;

    /// Create an issue, returning its key
    async fn create_issue(&self, issue: &NewSourceIssue) -> Result<String>;

    /// Link `child_id` under `parent_id`
    async fn create_link(&self, child_id: &str, parent_id: &str, relation: &str) -> Result<()>;
}

/// Target store: holds mirrors whose bodies carry the sync metadata
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get_all_issues(&self) -> Result<Vec<TargetIssue>>;

    /// Issues carrying valid sync metadata
    async fn get_synced_issues(&self) -> Result<Vec<TargetIssue>> {
        Ok(self
            .get_all_issues()
            .await?
            .into_iter()
            .filter(|issue| issue.metadata().is_some())
            .collect())
    }

    async fn get_issue_by_number(&self, number: u64) -> Result<TargetIssue>;

    /// Create a mirror, returning its number
    async fn create_issue(&self, issue: &NewTargetIssue) -> Result<u64>;

    async fn update_issue(&self, number: u64, update: &TargetUpdate) -> Result<()>;

    async fn get_comments(&self, number: u64) -> Result<Vec<CommentRecord>>;

    /// Post a markdown comment, returning the new comment id
    async fn add_comment(&self, number: u64, body: &str) -> Result<String>;

    /// Create any labels in `labels` the store does not know yet
    async fn ensure_labels_exist(&self, labels: &[String]) -> Result<()>;
}
