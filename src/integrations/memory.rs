//! In-memory stores
//!
//! Backing stores for tests and offline demos. They behave like the remote
//! systems where the engine cares: the source only changes status through
//! workflow transitions (each one bumps `updated`), the target keeps metadata
//! inside issue bodies, and both count their writes.

use super::store::{SearchResult, SourceStore, TargetStore, Transition};
use crate::model::{
    CommentRecord, IssueState, NewSourceIssue, NewTargetIssue, Origin, SourceIssue, TargetIssue,
    TargetUpdate,
};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct SourceState {
    /// Issues in insertion order
    issues: Vec<SourceIssue>,
    comments: HashMap<String, Vec<CommentRecord>>,
    /// Allowed destinations per status; statuses without an entry may move anywhere
    workflow: HashMap<String, Vec<String>>,
    /// Statuses offered as transition destinations
    statuses: Vec<String>,
    links: Vec<(String, String, String)>,
    clock: i64,
    next_comment: u64,
}

impl SourceState {
    fn tick(&mut self) -> String {
        self.clock += 1;
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        (base + ChronoDuration::seconds(self.clock)).to_rfc3339()
    }

    fn issue_mut(&mut self, id: &str) -> Result<&mut SourceIssue> {
        self.issues
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    fn know_status(&mut self, status: &str) {
        if !status.is_empty() && !self.statuses.iter().any(|s| s == status) {
            self.statuses.push(status.to_string());
        }
    }
}

/// Source store held in memory
pub struct MemorySourceStore {
    project: String,
    state: Mutex<SourceState>,
    transitions_applied: AtomicUsize,
    comments_added: AtomicUsize,
    issues_created: AtomicUsize,
}

impl MemorySourceStore {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            state: Mutex::new(SourceState::default()),
            transitions_applied: AtomicUsize::new(0),
            comments_added: AtomicUsize::new(0),
            issues_created: AtomicUsize::new(0),
        }
    }

    /// Add or replace an issue
    pub fn insert(&self, issue: SourceIssue) {
        let mut state = lock(&self.state);
        state.know_status(&issue.status);
        match state.issues.iter_mut().find(|i| i.id == issue.id) {
            Some(existing) => *existing = issue,
            None => state.issues.push(issue),
        }
    }

    /// Make `statuses` available as transition destinations
    pub fn with_statuses(self, statuses: &[&str]) -> Self {
        {
            let mut state = lock(&self.state);
            for status in statuses {
                state.know_status(status);
            }
        }
        self
    }

    /// Restrict transitions out of `from` to `to`
    pub fn with_workflow(self, from: &str, to: &[&str]) -> Self {
        {
            let mut state = lock(&self.state);
            for status in to {
                state.know_status(status);
            }
            state
                .workflow
                .insert(from.to_string(), to.iter().map(|s| s.to_string()).collect());
        }
        self
    }

    /// Simulate a human edit: change the summary and bump `updated`
    pub fn edit_summary(&self, id: &str, summary: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let updated = state.tick();
        let issue = state.issue_mut(id)?;
        issue.summary = summary.to_string();
        issue.updated = updated;
        Ok(())
    }

    /// Add a comment written by a person (not counted as a sync write)
    pub fn add_human_comment(&self, id: &str, author: &str, body: &str) -> String {
        let mut state = lock(&self.state);
        state.next_comment += 1;
        let comment_id = format!("{}", 10_000 + state.next_comment);
        let record = CommentRecord::new(&comment_id, author, body, Origin::Source);
        state.comments.entry(id.to_string()).or_default().push(record);
        comment_id
    }

    pub fn issue(&self, id: &str) -> Option<SourceIssue> {
        lock(&self.state).issues.iter().find(|i| i.id == id).cloned()
    }

    pub fn comments(&self, id: &str) -> Vec<CommentRecord> {
        lock(&self.state).comments.get(id).cloned().unwrap_or_default()
    }

    /// `(child, parent, relation)` triples created so far
    pub fn links(&self) -> Vec<(String, String, String)> {
        lock(&self.state).links.clone()
    }

    pub fn transitions_applied(&self) -> usize {
        self.transitions_applied.load(Ordering::SeqCst)
    }

    pub fn comments_added(&self) -> usize {
        self.comments_added.load(Ordering::SeqCst)
    }

    pub fn issues_created(&self) -> usize {
        self.issues_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    /// The query is not interpreted; every issue matches
    async fn search_issues(&self, _query: &str, _fields: &[String], limit: u32) -> Result<SearchResult> {
        let state = lock(&self.state);
        Ok(SearchResult {
            issues: state.issues.iter().take(limit as usize).cloned().collect(),
            total: state.issues.len() as u32,
        })
    }

    async fn get_issue(&self, id: &str, _fields: &[String]) -> Result<SourceIssue> {
        self.issue(id).ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    async fn get_transitions(&self, id: &str) -> Result<Vec<Transition>> {
        let state = lock(&self.state);
        let current = state
            .issues
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.status.clone())
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;

        let destinations = match state.workflow.get(&current) {
            Some(allowed) => allowed.clone(),
            None => state.statuses.clone(),
        };
        Ok(destinations
            .into_iter()
            .filter(|s| *s != current)
            .enumerate()
            .map(|(i, status)| Transition {
                id: format!("{}", 11 + i),
                name: format!("Move to {}", status),
                to_status: status,
            })
            .collect())
    }

    async fn apply_transition(&self, id: &str, transition_id: &str) -> Result<()> {
        let transitions = self.get_transitions(id).await?;
        let transition = transitions
            .into_iter()
            .find(|t| t.id == transition_id)
            .ok_or_else(|| {
                SyncError::Integration(format!(
                    "Transition {} is not valid for {}",
                    transition_id, id
                ))
            })?;

        let mut state = lock(&self.state);
        let updated = state.tick();
        let issue = state.issue_mut(id)?;
        issue.status = transition.to_status;
        issue.updated = updated;
        self.transitions_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_comments(&self, id: &str) -> Result<Vec<CommentRecord>> {
        Ok(self.comments(id))
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<String> {
        let mut state = lock(&self.state);
        state.issue_mut(id)?;
        state.next_comment += 1;
        let comment_id = format!("{}", 10_000 + state.next_comment);
        let record = CommentRecord::new(&comment_id, "issue-mirror", body, Origin::Source);
        state.comments.entry(id.to_string()).or_default().push(record);
        self.comments_added.fetch_add(1, Ordering::SeqCst);
        Ok(comment_id)
    }

    async fn create_issue(&self, issue: &NewSourceIssue) -> Result<String> {
        let mut state = lock(&self.state);
        let id = format!("{}-{}", self.project, 1000 + state.issues.len());
        let updated = state.tick();
        let status = state.statuses.first().cloned().unwrap_or_else(|| "To Do".to_string());
        let mut created = SourceIssue::new(&id, &issue.summary, status, updated);
        created.description = issue.description.clone();
        created.issue_type = Some(issue.issue_type.clone());
        created.labels = issue.labels.clone();
        state.issues.push(created);
        self.issues_created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn create_link(&self, child_id: &str, parent_id: &str, relation: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.issue_mut(parent_id)?;
        let updated = state.tick();
        let child = state.issue_mut(child_id)?;
        if relation.eq_ignore_ascii_case("parent") {
            child.parent = Some(parent_id.to_string());
        } else {
            child.links.push(crate::model::IssueLink::new(
                relation,
                crate::model::LinkDirection::Inward,
                parent_id,
            ));
        }
        child.updated = updated;
        state
            .links
            .push((child_id.to_string(), parent_id.to_string(), relation.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct TargetState {
    issues: BTreeMap<u64, TargetIssue>,
    comments: HashMap<u64, Vec<CommentRecord>>,
    labels: HashSet<String>,
    next_number: u64,
    next_comment: u64,
}

impl TargetState {
    fn allocate_number(&mut self) -> u64 {
        let highest = self.issues.keys().next_back().copied().unwrap_or(0);
        self.next_number = self.next_number.max(highest) + 1;
        self.next_number
    }

    fn issue_mut(&mut self, number: u64) -> Result<&mut TargetIssue> {
        self.issues
            .get_mut(&number)
            .ok_or_else(|| SyncError::NotFound(format!("#{}", number)))
    }
}

/// Target store held in memory
#[derive(Default)]
pub struct MemoryTargetStore {
    state: Mutex<TargetState>,
    issues_created: AtomicUsize,
    issues_updated: AtomicUsize,
    comments_added: AtomicUsize,
    labels_created: AtomicUsize,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an issue as-is
    pub fn insert(&self, issue: TargetIssue) {
        lock(&self.state).issues.insert(issue.number, issue);
    }

    /// Simulate a human creating an issue; returns its number
    pub fn open_issue(&self, title: &str, body: &str, labels: &[&str]) -> u64 {
        let mut state = lock(&self.state);
        let number = state.allocate_number();
        let issue = TargetIssue::new(number, title)
            .with_body(body)
            .with_labels(labels.iter().map(|l| l.to_string()).collect());
        state.issues.insert(number, issue);
        number
    }

    /// Simulate a human changing state and labels
    pub fn set_state(&self, number: u64, issue_state: IssueState) -> Result<()> {
        lock(&self.state).issue_mut(number)?.state = issue_state;
        Ok(())
    }

    pub fn set_labels(&self, number: u64, labels: &[&str]) -> Result<()> {
        lock(&self.state).issue_mut(number)?.labels = labels.iter().map(|l| l.to_string()).collect();
        Ok(())
    }

    /// Simulate a human editing the body
    pub fn set_body(&self, number: u64, body: &str) -> Result<()> {
        lock(&self.state).issue_mut(number)?.body = body.to_string();
        Ok(())
    }

    /// Add a comment written by a person (not counted as a sync write)
    pub fn add_human_comment(&self, number: u64, author: &str, body: &str) -> String {
        let mut state = lock(&self.state);
        state.next_comment += 1;
        let comment_id = state.next_comment.to_string();
        let record = CommentRecord::new(&comment_id, author, body, Origin::Target);
        state.comments.entry(number).or_default().push(record);
        comment_id
    }

    pub fn issue(&self, number: u64) -> Option<TargetIssue> {
        lock(&self.state).issues.get(&number).cloned()
    }

    pub fn issues(&self) -> Vec<TargetIssue> {
        lock(&self.state).issues.values().cloned().collect()
    }

    /// Mirror of `source_id`, if any
    pub fn find_mirror(&self, source_id: &str) -> Option<TargetIssue> {
        self.issues()
            .into_iter()
            .find(|i| i.metadata().is_some_and(|m| m.source_id == source_id))
    }

    pub fn comments(&self, number: u64) -> Vec<CommentRecord> {
        lock(&self.state).comments.get(&number).cloned().unwrap_or_default()
    }

    pub fn has_label(&self, label: &str) -> bool {
        lock(&self.state).labels.contains(label)
    }

    pub fn issues_created(&self) -> usize {
        self.issues_created.load(Ordering::SeqCst)
    }

    pub fn issues_updated(&self) -> usize {
        self.issues_updated.load(Ordering::SeqCst)
    }

    pub fn comments_added(&self) -> usize {
        self.comments_added.load(Ordering::SeqCst)
    }

    pub fn labels_created(&self) -> usize {
        self.labels_created.load(Ordering::SeqCst)
    }

    /// Total writes of any kind
    pub fn writes(&self) -> usize {
        self.issues_created() + self.issues_updated() + self.comments_added() + self.labels_created()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn get_all_issues(&self) -> Result<Vec<TargetIssue>> {
        Ok(self.issues())
    }

    async fn get_issue_by_number(&self, number: u64) -> Result<TargetIssue> {
        self.issue(number)
            .ok_or_else(|| SyncError::NotFound(format!("#{}", number)))
    }

    async fn create_issue(&self, issue: &NewTargetIssue) -> Result<u64> {
        let body = match &issue.metadata {
            Some(meta) => syncmark::inject(&issue.body, meta)?,
            None => issue.body.clone(),
        };
        let mut state = lock(&self.state);
        let number = state.allocate_number();
        let created = TargetIssue::new(number, &issue.title)
            .with_body(body)
            .with_labels(issue.labels.clone());
        state.issues.insert(number, created);
        self.issues_created.fetch_add(1, Ordering::SeqCst);
        Ok(number)
    }

    async fn update_issue(&self, number: u64, update: &TargetUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let mut state = lock(&self.state);
        let issue = state.issue_mut(number)?;
        if let Some(body) = update.resolve_body(&issue.body)? {
            issue.body = body;
        }
        if let Some(title) = &update.title {
            issue.title = title.clone();
        }
        if let Some(labels) = &update.labels {
            issue.labels = labels.clone();
        }
        if let Some(issue_state) = update.state {
            issue.state = issue_state;
        }
        self.issues_updated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_comments(&self, number: u64) -> Result<Vec<CommentRecord>> {
        Ok(self.comments(number))
    }

    async fn add_comment(&self, number: u64, body: &str) -> Result<String> {
        let mut state = lock(&self.state);
        state.issue_mut(number)?;
        state.next_comment += 1;
        let comment_id = state.next_comment.to_string();
        let record = CommentRecord::new(&comment_id, "issue-mirror[bot]", body, Origin::Target);
        state.comments.entry(number).or_default().push(record);
        self.comments_added.fetch_add(1, Ordering::SeqCst);
        Ok(comment_id)
    }

    async fn ensure_labels_exist(&self, labels: &[String]) -> Result<()> {
        let mut state = lock(&self.state);
        for label in labels {
            if state.labels.insert(label.clone()) {
                self.labels_created.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}
