//! Status reconciliation
//!
//! The forward table maps a source status to a target state and/or board
//! column. The reverse direction inverts it, and refuses whenever the
//! inversion is not unique: a wrong workflow transition can be irreversible.

use crate::config::StatusTarget;
use crate::integrations::SourceStore;
use crate::model::{IssueState, SourceIssue, TargetIssue};
use crate::{Result, SyncError};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// What the reverse pass did for one mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The source status (or the target representation) has no table entry
    SkippedNoMapping,
    /// The target representation inverts to several statuses
    SkippedAmbiguous { candidates: Vec<String> },
    /// Source already matches the target
    SkippedSameValue,
    Applied { from: String, to: String },
    /// The workflow offers no transition into the resolved status
    FailedNoTransition { to: String },
}

impl StatusOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusOutcome::SkippedNoMapping => "skipped-no-mapping",
            StatusOutcome::SkippedAmbiguous { .. } => "skipped-ambiguous",
            StatusOutcome::SkippedSameValue => "skipped-same-value",
            StatusOutcome::Applied { .. } => "applied",
            StatusOutcome::FailedNoTransition { .. } => "failed-no-transition",
        }
    }
}

impl fmt::Display for StatusOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusOutcome::SkippedAmbiguous { candidates } => {
                write!(f, "{} ({})", self.as_str(), candidates.join(", "))
            }
            StatusOutcome::Applied { from, to } => write!(f, "{} ({} -> {})", self.as_str(), from, to),
            StatusOutcome::FailedNoTransition { to } => write!(f, "{} (to {})", self.as_str(), to),
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Result of inverting the forward table for one mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unmapped,
    Ambiguous(Vec<String>),
    Resolved(String),
}

/// Forward/reverse status translation
#[derive(Debug, Clone)]
pub struct StatusReconciler {
    /// Enabled entries only
    forward: BTreeMap<String, StatusTarget>,
    column_prefix: String,
}

impl StatusReconciler {
    pub fn new(status_map: &BTreeMap<String, StatusTarget>, column_prefix: impl Into<String>) -> Self {
        Self {
            forward: status_map
                .iter()
                .filter(|(_, target)| target.is_enabled())
                .map(|(status, target)| (status.clone(), target.clone()))
                .collect(),
            column_prefix: column_prefix.into(),
        }
    }

    pub fn column_prefix(&self) -> &str {
        &self.column_prefix
    }

    /// Forward entry for a source status (case-insensitive)
    pub fn forward(&self, status: &str) -> Option<&StatusTarget> {
        self.forward
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(status))
            .map(|(_, target)| target)
    }

    /// Board column label for a source status
    pub fn column_label(&self, status: &str) -> Option<String> {
        self.forward(status)
            .and_then(|t| t.target_column.as_ref())
            .map(|column| format!("{}{}", self.column_prefix, column))
    }

    /// Whether a label is a column label this reconciler manages
    pub fn is_column_label(&self, label: &str) -> bool {
        !self.column_prefix.is_empty() && label.starts_with(&self.column_prefix)
    }

    pub fn target_state(&self, status: &str) -> Option<IssueState> {
        self.forward(status).and_then(|t| t.target_state)
    }

    /// Whether `target` already shows what the forward table says for `status`
    pub fn matches_forward(&self, status: &str, target: &TargetIssue) -> bool {
        let Some(entry) = self.forward(status) else {
            return false;
        };
        let state_ok = entry.target_state.map_or(true, |s| s == target.state);
        let column_ok = entry.target_column.as_ref().map_or(true, |column| {
            target
                .label_value(&self.column_prefix)
                .is_some_and(|c| c.eq_ignore_ascii_case(column))
        });
        state_ok && column_ok
    }

    /// Invert the forward table for a mirror
    ///
    /// A column label wins over open/closed state, but only among entries
    /// whose state agrees with the mirror (a closed issue keeping its old
    /// column label resolves by state).
    pub fn resolve(&self, target: &TargetIssue) -> Resolution {
        let state_agrees = |entry: &StatusTarget| entry.target_state.map_or(true, |s| s == target.state);

        if let Some(column) = target.label_value(&self.column_prefix) {
            let by_column: Vec<String> = self
                .forward
                .iter()
                .filter(|(_, t)| {
                    t.target_column
                        .as_ref()
                        .is_some_and(|c| c.eq_ignore_ascii_case(column))
                        && state_agrees(*t)
                })
                .map(|(s, _)| s.clone())
                .collect();
            match by_column.len() {
                0 => {}
                1 => return Resolution::Resolved(by_column[0].clone()),
                _ => return Resolution::Ambiguous(by_column),
            }
        }

        let by_state: Vec<String> = self
            .forward
            .iter()
            .filter(|(_, t)| t.target_state == Some(target.state))
            .map(|(s, _)| s.clone())
            .collect();
        match by_state.len() {
            0 => Resolution::Unmapped,
            1 => Resolution::Resolved(by_state[0].clone()),
            _ => Resolution::Ambiguous(by_state),
        }
    }

    /// Decide, and when resolved apply, the source status for one mirror
    pub async fn reconcile(
        &self,
        source: &dyn SourceStore,
        issue: &SourceIssue,
        target: &TargetIssue,
    ) -> Result<StatusOutcome> {
        if self.forward(&issue.status).is_none() {
            debug!(source_id = %issue.id, status = %issue.status, "Source status not in status map");
            return Ok(StatusOutcome::SkippedNoMapping);
        }
        if self.matches_forward(&issue.status, target) {
            return Ok(StatusOutcome::SkippedSameValue);
        }

        let resolved = match self.resolve(target) {
            Resolution::Unmapped => {
                debug!(source_id = %issue.id, number = target.number, "Target state has no reverse mapping");
                return Ok(StatusOutcome::SkippedNoMapping);
            }
            Resolution::Ambiguous(candidates) => {
                warn!(
                    source_id = %issue.id,
                    number = target.number,
                    candidates = %candidates.join(", "),
                    "Reverse status mapping is ambiguous; not guessing"
                );
                return Ok(StatusOutcome::SkippedAmbiguous { candidates });
            }
            Resolution::Resolved(status) => status,
        };

        if resolved.eq_ignore_ascii_case(&issue.status) {
            return Ok(StatusOutcome::SkippedSameValue);
        }

        match source.transition_issue(&issue.id, &resolved).await {
            Ok(()) => {
                info!(
                    source_id = %issue.id,
                    from = %issue.status,
                    to = %resolved,
                    "Transitioned source issue"
                );
                Ok(StatusOutcome::Applied {
                    from: issue.status.clone(),
                    to: resolved,
                })
            }
            Err(SyncError::NoTransition { .. }) => {
                info!(
                    source_id = %issue.id,
                    from = %issue.status,
                    to = %resolved,
                    "No workflow transition available"
                );
                Ok(StatusOutcome::FailedNoTransition { to: resolved })
            }
            Err(e) => Err(e),
        }
    }

    /// Reverse table: target representation → source statuses
    pub fn reverse_table(&self) -> BTreeMap<String, Vec<String>> {
        let mut table: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (status, target) in &self.forward {
            if let Some(column) = &target.target_column {
                table
                    .entry(format!("column {}", column))
                    .or_default()
                    .push(status.clone());
            }
            if let Some(state) = target.target_state {
                table
                    .entry(format!("state {}", state))
                    .or_default()
                    .push(status.clone());
            }
        }
        table
    }

    /// Forward entries in table order
    pub fn forward_entries(&self) -> impl Iterator<Item = (&String, &StatusTarget)> {
        self.forward.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::MemorySourceStore;

    fn target(state: Option<IssueState>, column: Option<&str>) -> StatusTarget {
        StatusTarget {
            target_state: state,
            target_column: column.map(str::to_string),
            sync_enabled: None,
        }
    }

    fn table() -> BTreeMap<String, StatusTarget> {
        let mut map = BTreeMap::new();
        map.insert("Ready".to_string(), target(Some(IssueState::Open), Some("Todo")));
        map.insert(
            "In Progress".to_string(),
            target(Some(IssueState::Open), Some("In Progress")),
        );
        map.insert("Done".to_string(), target(Some(IssueState::Closed), None));
        map.insert(
            "Archived".to_string(),
            StatusTarget {
                sync_enabled: Some(false),
                ..target(Some(IssueState::Closed), None)
            },
        );
        map
    }

    fn mirror(state: IssueState, labels: &[&str]) -> TargetIssue {
        TargetIssue::new(5, "mirror")
            .with_state(state)
            .with_labels(labels.iter().map(|l| l.to_string()).collect())
    }

    #[test]
    fn test_reverse_prefers_consistent_column() {
        let reconciler = StatusReconciler::new(&table(), "status: ");
        assert_eq!(
            reconciler.resolve(&mirror(IssueState::Open, &["status: In Progress"])),
            Resolution::Resolved("In Progress".to_string())
        );
        // Closed by a human, old column label still attached
        assert_eq!(
            reconciler.resolve(&mirror(IssueState::Closed, &["status: Todo"])),
            Resolution::Resolved("Done".to_string())
        );
        // Disabled entries do not make "closed" ambiguous
        assert_eq!(
            reconciler.resolve(&mirror(IssueState::Closed, &[])),
            Resolution::Resolved("Done".to_string())
        );
    }

    #[test]
    fn test_no_guess_on_ambiguous_state() {
        let mut map = BTreeMap::new();
        map.insert("A".to_string(), target(Some(IssueState::Open), None));
        map.insert("B".to_string(), target(Some(IssueState::Open), None));
        let reconciler = StatusReconciler::new(&map, "status: ");

        assert_eq!(
            reconciler.resolve(&mirror(IssueState::Open, &[])),
            Resolution::Ambiguous(vec!["A".to_string(), "B".to_string()])
        );
        assert_eq!(
            reconciler.resolve(&mirror(IssueState::Closed, &[])),
            Resolution::Unmapped
        );
    }

    #[tokio::test]
    async fn test_reconcile_outcomes() {
        let reconciler = StatusReconciler::new(&table(), "status: ");
        let store = MemorySourceStore::new("X")
            .with_statuses(&["Ready", "In Progress", "Done"])
            .with_workflow("Ready", &["In Progress"]);
        store.insert(SourceIssue::new("X-1", "a", "In Progress", "t"));
        store.insert(SourceIssue::new("X-2", "b", "Ready", "t"));
        store.insert(SourceIssue::new("X-3", "c", "Backlog", "t"));

        let x1 = store.issue("X-1").unwrap();
        let outcome = reconciler
            .reconcile(&store, &x1, &mirror(IssueState::Open, &["status: In Progress"]))
            .await
            .unwrap();
        assert_eq!(outcome, StatusOutcome::SkippedSameValue);

        let outcome = reconciler
            .reconcile(&store, &x1, &mirror(IssueState::Closed, &["status: In Progress"]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StatusOutcome::Applied {
                from: "In Progress".to_string(),
                to: "Done".to_string()
            }
        );
        assert_eq!(store.issue("X-1").unwrap().status, "Done");

        let x2 = store.issue("X-2").unwrap();
        let outcome = reconciler
            .reconcile(&store, &x2, &mirror(IssueState::Closed, &[]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StatusOutcome::FailedNoTransition {
                to: "Done".to_string()
            }
        );
        assert_eq!(outcome.as_str(), "failed-no-transition");

        let x3 = store.issue("X-3").unwrap();
        let outcome = reconciler
            .reconcile(&store, &x3, &mirror(IssueState::Closed, &[]))
            .await
            .unwrap();
        assert_eq!(outcome, StatusOutcome::SkippedNoMapping);
        assert_eq!(store.transitions_applied(), 1);
    }

    #[test]
    fn test_reverse_table() {
        let reconciler = StatusReconciler::new(&table(), "status: ");
        let reverse = reconciler.reverse_table();
        assert_eq!(reverse["state open"], vec!["In Progress", "Ready"]);
        assert_eq!(reverse["state closed"], vec!["Done"]);
        assert_eq!(reverse["column Todo"], vec!["Ready"]);
        assert_eq!(
            reconciler.column_label("ready").as_deref(),
            Some("status: Todo")
        );
    }
}
