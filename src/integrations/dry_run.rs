//! Dry-run store wrappers
//!
//! Reads pass through to the wrapped store; writes are logged and skipped.
//! Creates hand back placeholder identifiers so the engine can carry on
//! planning (a placeholder child still renders in its parent's checklist).

use super::store::{SearchResult, SourceStore, TargetStore, Transition};
use crate::model::{CommentRecord, NewSourceIssue, NewTargetIssue, SourceIssue, TargetIssue, TargetUpdate};
use crate::{Result, SyncError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// First placeholder number handed out for target creates
pub const PLACEHOLDER_TARGET_BASE: u64 = 900_000_000;

/// Source store that never mutates
pub struct DryRunSource {
    inner: Arc<dyn SourceStore>,
    created: AtomicU64,
}

impl DryRunSource {
    pub fn new(inner: Arc<dyn SourceStore>) -> Self {
        Self {
            inner,
            created: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SourceStore for DryRunSource {
    async fn search_issues(&self, query: &str, fields: &[String], limit: u32) -> Result<SearchResult> {
        self.inner.search_issues(query, fields, limit).await
    }

    async fn get_issue(&self, id: &str, fields: &[String]) -> Result<SourceIssue> {
        self.inner.get_issue(id, fields).await
    }

    async fn get_transitions(&self, id: &str) -> Result<Vec<Transition>> {
        self.inner.get_transitions(id).await
    }

    // Discovery still runs through the default `transition_issue`, so a dry
    // run reports missing transitions exactly like a live one.
    async fn apply_transition(&self, id: &str, transition_id: &str) -> Result<()> {
        info!(id = %id, transition_id = %transition_id, "[dry-run] Would apply transition");
        Ok(())
    }

    async fn get_comments(&self, id: &str) -> Result<Vec<CommentRecord>> {
        self.inner.get_comments(id).await
    }

    async fn add_comment(&self, id: &str, _body: &str) -> Result<String> {
        info!(id = %id, "[dry-run] Would add source comment");
        Ok(format!("dry-run-{}", self.created.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn create_issue(&self, issue: &NewSourceIssue) -> Result<String> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        info!(summary = %issue.summary, "[dry-run] Would create source issue");
        Ok(format!("DRYRUN-{}", n))
    }

    async fn create_link(&self, child_id: &str, parent_id: &str, relation: &str) -> Result<()> {
        info!(child = %child_id, parent = %parent_id, relation = %relation, "[dry-run] Would link source issues");
        Ok(())
    }
}

/// Target store that never mutates
pub struct DryRunTarget {
    inner: Arc<dyn TargetStore>,
    created: AtomicU64,
}

impl DryRunTarget {
    pub fn new(inner: Arc<dyn TargetStore>) -> Self {
        Self {
            inner,
            created: AtomicU64::new(0),
        }
    }

    fn is_placeholder(number: u64) -> bool {
        number > PLACEHOLDER_TARGET_BASE
    }
}

#[async_trait]
impl TargetStore for DryRunTarget {
    async fn get_all_issues(&self) -> Result<Vec<TargetIssue>> {
        self.inner.get_all_issues().await
    }

    async fn get_issue_by_number(&self, number: u64) -> Result<TargetIssue> {
        if Self::is_placeholder(number) {
            return Err(SyncError::NotFound(format!("#{} (dry-run placeholder)", number)));
        }
        self.inner.get_issue_by_number(number).await
    }

    async fn create_issue(&self, issue: &NewTargetIssue) -> Result<u64> {
        let number = PLACEHOLDER_TARGET_BASE + self.created.fetch_add(1, Ordering::SeqCst) + 1;
        info!(title = %issue.title, placeholder = number, "[dry-run] Would create mirror");
        Ok(number)
    }

    async fn update_issue(&self, number: u64, update: &TargetUpdate) -> Result<()> {
        info!(
            number,
            title = update.title.is_some(),
            body = update.body.is_some(),
            labels = update.labels.is_some(),
            state = ?update.state,
            "[dry-run] Would update mirror"
        );
        Ok(())
    }

    async fn get_comments(&self, number: u64) -> Result<Vec<CommentRecord>> {
        if Self::is_placeholder(number) {
            return Ok(Vec::new());
        }
        self.inner.get_comments(number).await
    }

    async fn add_comment(&self, number: u64, _body: &str) -> Result<String> {
        info!(number, "[dry-run] Would add target comment");
        Ok(format!("dry-run-{}", self.created.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn ensure_labels_exist(&self, labels: &[String]) -> Result<()> {
        info!(count = labels.len(), "[dry-run] Would ensure labels exist");
        Ok(())
    }
}
