//! Reconciliation engine
//!
//! One bounded batch pass per invocation:
//!
//! 1. **Pre-flight**: field validation against a sample; failure aborts
//!    before any write
//! 2. **Source → target**: create or refresh mirrors whose canonical hash
//!    (or children checklist) changed, parents before children
//! 3. **Target → source**: translate mirror state back into workflow
//!    transitions where the reverse mapping is unambiguous
//! 4. **Import**: create source issues for labelled, unmirrored target issues
//! 5. **Comments**: cross-post comments on every mirrored pair
//!
//! Issues are processed one at a time. A failure on one issue is recorded in
//! the report and the batch carries on.

use super::comments::CommentSyncManager;
use super::hash::{content_hash, HashInput};
use super::hierarchy::{
    parent_reference, walk_parent_chain, ChecklistEntry, HierarchyResolver, Relationships,
};
use super::report::{
    ImportReport, IssueError, RunReport, SourceToTargetReport, TargetToSourceReport,
};
use super::status::StatusReconciler;
use super::transform::{MappedFields, TransformRegistry};
use super::validator::{FieldValidator, ValidationReport};
use crate::config::{LevelConfig, SyncConfig};
use crate::integrations::{DryRunSource, DryRunTarget, SourceStore, TargetStore};
use crate::model::{
    IssueState, NewSourceIssue, NewTargetIssue, SourceIssue, SyncMetadata, TargetIssue,
    TargetUpdate,
};
use crate::{Result, SyncError};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static! {
    /// Visible footer every mirror body ends with
    static ref SYNCED_FROM: Regex =
        Regex::new(r"_Synced from \[([A-Za-z][A-Za-z0-9_]*-\d+)\]\(").expect("valid regex");
}

/// Source id named in a mirror's footer
fn footer_source_id(body: &str) -> Option<String> {
    SYNCED_FROM
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Target issues for one pass, reverse-indexed by embedded source id
///
/// Rebuilt from a full listing every pass and dropped afterwards.
struct MirrorIndex {
    /// Source id → canonical mirror number
    canonical: BTreeMap<String, u64>,
    issues: HashMap<u64, TargetIssue>,
}

impl MirrorIndex {
    fn build(mut all: Vec<TargetIssue>) -> Self {
        all.sort_by_key(|issue| issue.number);
        let mut canonical = BTreeMap::new();
        let mut issues = HashMap::with_capacity(all.len());

        for issue in all {
            if let Some(meta) = issue.metadata() {
                match canonical.get(&meta.source_id) {
                    Some(first) => warn!(
                        source_id = %meta.source_id,
                        canonical = first,
                        duplicate = issue.number,
                        "Duplicate mirror; keeping the lowest issue number"
                    ),
                    None => {
                        canonical.insert(meta.source_id.clone(), issue.number);
                    }
                }
            }
            issues.insert(issue.number, issue);
        }

        // Bodies whose metadata block was lost still name their source in
        // the footer; treat them as mirrors so the block gets rewritten
        let mut numbers: Vec<u64> = issues.keys().copied().collect();
        numbers.sort_unstable();
        for number in numbers {
            let Some(issue) = issues.get(&number) else {
                continue;
            };
            if issue.metadata().is_some() {
                continue;
            }
            if let Some(source_id) = footer_source_id(&issue.body) {
                if !canonical.contains_key(&source_id) {
                    warn!(
                        source_id = %source_id,
                        number,
                        "Mirror metadata missing; recovered from footer"
                    );
                    canonical.insert(source_id, number);
                }
            }
        }

        Self { canonical, issues }
    }

    fn is_mirror(&self, number: u64) -> bool {
        self.canonical.values().any(|n| *n == number)
            || self
                .issues
                .get(&number)
                .is_some_and(|issue| issue.metadata().is_some())
    }

    fn mirror(&self, source_id: &str) -> Option<&TargetIssue> {
        self.canonical
            .get(source_id)
            .and_then(|number| self.issues.get(number))
    }

    fn numbers(&self) -> HashMap<String, u64> {
        self.canonical
            .iter()
            .map(|(id, number)| (id.clone(), *number))
            .collect()
    }

    /// Parent recorded in a mirror's metadata
    fn recorded_parent(&self, source_id: &str) -> Option<String> {
        self.mirror(source_id)
            .and_then(TargetIssue::metadata)
            .and_then(|meta| meta.parent_source_id)
    }

    fn upsert(&mut self, source_id: &str, issue: TargetIssue) {
        self.canonical.insert(source_id.to_string(), issue.number);
        self.issues.insert(issue.number, issue);
    }

    fn pairs(&self) -> Vec<(String, TargetIssue)> {
        self.canonical
            .iter()
            .filter_map(|(id, number)| self.issues.get(number).map(|i| (id.clone(), i.clone())))
            .collect()
    }
}

/// Drives reconciliation between one source and one target store
pub struct Reconciler {
    config: SyncConfig,
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    transforms: TransformRegistry,
    hierarchy: HierarchyResolver,
    status: StatusReconciler,
    comments: CommentSyncManager,
    validator: FieldValidator,
}

impl Reconciler {
    /// Build an engine; with `config.dry_run` both stores are wrapped so no
    /// write reaches them
    pub fn new(config: SyncConfig, source: Arc<dyn SourceStore>, target: Arc<dyn TargetStore>) -> Self {
        let (source, target): (Arc<dyn SourceStore>, Arc<dyn TargetStore>) = if config.dry_run {
            (
                Arc::new(DryRunSource::new(source)),
                Arc::new(DryRunTarget::new(target)),
            )
        } else {
            (source, target)
        };

        Self {
            hierarchy: HierarchyResolver::new(config.hierarchy.clone()),
            status: StatusReconciler::new(&config.status_map, config.column_label_prefix.clone()),
            validator: FieldValidator::from_config(&config),
            transforms: TransformRegistry::with_builtins(),
            comments: CommentSyncManager::default(),
            config,
            source,
            target,
        }
    }

    /// Replace the custom transform registry
    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn browse_base(&self) -> &str {
        self.config.source.url.trim_end_matches('/')
    }

    /// Field validation only
    pub async fn validate(&self) -> Result<ValidationReport> {
        self.validator.validate_sample(self.source.as_ref(), &self.config).await
    }

    async fn preflight(&self) -> Result<()> {
        let report = self.validate().await?;
        if !report.valid {
            return Err(SyncError::Validation(report));
        }
        for warning in &report.warnings {
            warn!("{}", warning);
        }
        Ok(())
    }

    async fn fetch_source_issues(&self) -> Result<Vec<SourceIssue>> {
        let result = self
            .source
            .search_issues(&self.config.query, &self.config.source_fields(), self.config.max_issues)
            .await?;
        if result.total > self.config.max_issues {
            warn!(
                total = result.total,
                limit = self.config.max_issues,
                "Source query matches more issues than max_issues; the rest are not synced this run"
            );
        }
        Ok(result.issues)
    }

    async fn fetch_mirrors(&self) -> Result<MirrorIndex> {
        Ok(MirrorIndex::build(self.target.get_all_issues().await?))
    }

    /// Full run in the configured direction
    pub async fn run(&self) -> Result<RunReport> {
        let direction = self.config.direction;
        info!(direction = ?direction, dry_run = self.config.dry_run, "Starting sync run");

        self.preflight().await?;
        let issues = self.fetch_source_issues().await?;

        let mut report = RunReport {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        if direction.includes_source_to_target() {
            let mut index = self.fetch_mirrors().await?;
            report.source_to_target = self.source_to_target_pass(&issues, &mut index).await;
        }

        if direction.includes_target_to_source() {
            let index = self.fetch_mirrors().await?;
            report.target_to_source = self.target_to_source_pass(&issues, &index).await;

            if self.config.import.enabled {
                let mut index = self.fetch_mirrors().await?;
                report.imported = self.import_pass(&mut index).await;
            }
        }

        if self.config.comments.enabled {
            let index = self.fetch_mirrors().await?;
            let mut in_scope: HashSet<String> = issues.iter().map(|i| i.id.clone()).collect();
            in_scope.extend(report.imported.created.iter().map(|(_, id)| id.clone()));
            self.comment_pass(&index, &in_scope, &mut report).await;
        }

        info!(
            created = report.source_to_target.created.len(),
            updated = report.source_to_target.updated.len(),
            transitions = report.target_to_source.applied().len(),
            comments = report.comments.posted(),
            errors = report.errors().count(),
            "Sync run complete"
        );
        Ok(report)
    }

    /// Source → target pass on its own (validated first)
    pub async fn run_source_to_target(&self) -> Result<SourceToTargetReport> {
        self.preflight().await?;
        let issues = self.fetch_source_issues().await?;
        let mut index = self.fetch_mirrors().await?;
        Ok(self.source_to_target_pass(&issues, &mut index).await)
    }

    /// Target → source pass on its own (validated first)
    pub async fn run_target_to_source(&self) -> Result<TargetToSourceReport> {
        self.preflight().await?;
        let issues = self.fetch_source_issues().await?;
        let index = self.fetch_mirrors().await?;
        Ok(self.target_to_source_pass(&issues, &index).await)
    }

    async fn source_to_target_pass(
        &self,
        issues: &[SourceIssue],
        index: &mut MirrorIndex,
    ) -> SourceToTargetReport {
        let mut report = SourceToTargetReport::default();

        let mut relationships: HashMap<String, Relationships> = if self.hierarchy.is_enabled() {
            self.hierarchy.extract_all(issues)
        } else {
            HashMap::new()
        };
        let declared_parents: HashMap<String, String> = relationships
            .iter()
            .filter_map(|(id, rel)| rel.parent.clone().map(|p| (id.clone(), p)))
            .collect();

        // Depth guard, decided once for the whole batch
        let mut depths: HashMap<&str, usize> = HashMap::new();
        let mut flattened: HashSet<String> = HashSet::new();
        for issue in issues {
            let Some(parent) = declared_parents.get(&issue.id) else {
                continue;
            };
            let walk = walk_parent_chain(parent, |id| {
                declared_parents
                    .get(id)
                    .cloned()
                    .or_else(|| index.recorded_parent(id))
            });
            depths.insert(issue.id.as_str(), walk.depth);
            if !walk.allows_nesting() {
                warn!(
                    source_id = %issue.id,
                    parent = %parent,
                    depth = walk.depth,
                    cycle = walk.cycle,
                    "Refusing structural nesting; mirroring flat"
                );
                flattened.insert(issue.id.clone());
                report.flattened.push(issue.id.clone());
            }
        }
        for (id, rel) in relationships.iter_mut() {
            if flattened.contains(id) {
                rel.parent = None;
            }
            rel.children.retain(|child| !flattened.contains(child));
        }

        // Parents first, so children can link to freshly created mirrors
        let mut ordered: Vec<&SourceIssue> = issues.iter().collect();
        ordered.sort_by_key(|issue| depths.get(issue.id.as_str()).copied().unwrap_or(0));

        info!(issues = issues.len(), mirrors = index.canonical.len(), "Source -> target pass");

        for issue in ordered {
            let rel = relationships.get(&issue.id).cloned().unwrap_or_default();
            if let Err(e) = self.sync_issue(issue, rel, index, &mut report).await {
                warn!(source_id = %issue.id, error = %e, "Failed to sync issue");
                report.errors.push(IssueError::new(&issue.id, e));
            }
        }

        report
    }

    async fn sync_issue(
        &self,
        issue: &SourceIssue,
        rel: Relationships,
        index: &mut MirrorIndex,
        report: &mut SourceToTargetReport,
    ) -> Result<()> {
        if !self.hierarchy.is_syncable(&issue.status) {
            debug!(source_id = %issue.id, status = %issue.status, "Level not synced");
            report.skipped_wrong_level.push(issue.id.clone());
            return Ok(());
        }
        let level = self.hierarchy.classify(&issue.status);
        let level_name = level.map(|l| l.name.as_str());

        let hash = content_hash(HashInput::from_issue(issue, rel.parent.as_deref(), level_name));
        let mirrors = index.numbers();
        let entries =
            self.hierarchy
                .checklist_entries(&rel, &mirrors, self.browse_base(), &index.issues);

        let existing = index.mirror(&issue.id).cloned();
        if let Some(mirror) = &existing {
            let stored_hash = mirror.metadata().map(|m| m.content_hash);
            let drift = self.hierarchy.checklist_drift(&mirror.body, &entries);
            if stored_hash.as_deref() == Some(hash.as_str()) && !drift {
                debug!(source_id = %issue.id, number = mirror.number, "Mirror up to date");
                report.skipped_up_to_date.push(issue.id.clone());
                return Ok(());
            }
        }

        let mapped = MappedFields::build(issue, &self.config.field_mappings, &self.transforms)?;
        let block = if self.hierarchy.is_enabled() {
            self.hierarchy
                .render(&rel, &mirrors, self.browse_base(), &index.issues)
        } else {
            String::new()
        };
        let title = mapped.title.clone().unwrap_or_else(|| issue.summary.clone());
        let narrative = self.compose_body(issue, &mapped, &block);
        let managed = self.managed_labels(&mapped, level, &issue.status);
        let state = self.status.target_state(&issue.status);

        let parent_number = rel.parent.as_ref().and_then(|p| mirrors.get(p).copied());
        let mut metadata = SyncMetadata::new(&issue.id, &issue.updated, &hash)
            .with_parent(rel.parent.clone(), parent_number)
            .with_children(rel.children.clone())
            .with_original_link(self.source_link(issue))
            .with_managed_labels(managed.clone());
        if let Some(name) = level_name {
            metadata = metadata.with_hierarchy_level(name);
        }

        let previous = existing.as_ref().and_then(TargetIssue::metadata);
        let previous_parent = previous.as_ref().and_then(|m| m.parent_source_id.clone());

        let number = match existing {
            Some(mirror) => {
                let previously_managed = previous.map(|m| m.managed_labels).unwrap_or_default();
                let labels = self.merge_labels(&mirror.labels, &previously_managed, &managed);
                self.target.ensure_labels_exist(&labels).await?;
                let update = TargetUpdate {
                    title: Some(title.clone()),
                    body: Some(narrative.clone()),
                    labels: Some(labels.clone()),
                    state,
                    metadata: Some(metadata.clone()),
                };
                self.target.update_issue(mirror.number, &update).await?;
                info!(source_id = %issue.id, number = mirror.number, "Updated mirror");
                report.updated.push((issue.id.clone(), mirror.number));

                let refreshed = TargetIssue {
                    title,
                    body: syncmark::inject(&narrative, &metadata)?,
                    labels,
                    state: state.unwrap_or(mirror.state),
                    ..mirror
                };
                let number = refreshed.number;
                index.upsert(&issue.id, refreshed);
                number
            }
            None => {
                self.target.ensure_labels_exist(&managed).await?;
                let new_issue = NewTargetIssue {
                    title: title.clone(),
                    body: narrative.clone(),
                    labels: managed.clone(),
                    metadata: Some(metadata.clone()),
                };
                let number = self.target.create_issue(&new_issue).await?;
                if state == Some(IssueState::Closed) {
                    let close = TargetUpdate {
                        state: Some(IssueState::Closed),
                        ..Default::default()
                    };
                    self.target.update_issue(number, &close).await?;
                }
                info!(source_id = %issue.id, number, "Created mirror");
                report.created.push((issue.id.clone(), number));

                let created = TargetIssue::new(number, title)
                    .with_body(syncmark::inject(&narrative, &metadata)?)
                    .with_labels(managed)
                    .with_state(state.unwrap_or_default());
                index.upsert(&issue.id, created);
                number
            }
        };

        if let Some(old_parent) = previous_parent.filter(|old| rel.parent.as_ref() != Some(old)) {
            let entry = ChecklistEntry {
                source_id: issue.id.clone(),
                number: Some(number),
                closed: false,
                url: None,
            };
            self.remove_from_parent(&old_parent, &entry, index).await?;
        }

        if let (Some(parent_id), Some(parent_number)) = (&rel.parent, parent_number) {
            let closed = index
                .issues
                .get(&number)
                .map(TargetIssue::is_closed)
                .unwrap_or(false);
            let entry = ChecklistEntry {
                source_id: issue.id.clone(),
                number: Some(number),
                closed,
                url: Some(self.source_link(issue)),
            };
            self.ensure_in_parent(parent_id, parent_number, &entry, index)
                .await?;
        }

        Ok(())
    }

    /// Keep the parent mirror's checklist listing `entry`
    async fn ensure_in_parent(
        &self,
        parent_id: &str,
        parent_number: u64,
        entry: &ChecklistEntry,
        index: &mut MirrorIndex,
    ) -> Result<()> {
        let Some(parent) = index.issues.get(&parent_number).cloned() else {
            return Ok(());
        };
        let (narrative, metadata) = syncmark::split(&parent.body);
        let Some(narrative) = self.hierarchy.ensure_in_parent_task_list(&narrative, entry) else {
            return Ok(());
        };

        self.write_parent_checklist(parent_id, parent, narrative, metadata, index)
            .await?;
        debug!(parent = %parent_id, number = parent_number, child = %entry.source_id, "Updated parent checklist");
        Ok(())
    }

    /// Take a re-parented child off its former parent's checklist
    async fn remove_from_parent(
        &self,
        parent_id: &str,
        entry: &ChecklistEntry,
        index: &mut MirrorIndex,
    ) -> Result<()> {
        let Some(parent) = index.mirror(parent_id).cloned() else {
            return Ok(());
        };
        let (narrative, metadata) = syncmark::split(&parent.body);
        let Some(narrative) = self
            .hierarchy
            .remove_from_parent_task_list(&narrative, entry)
        else {
            return Ok(());
        };

        let metadata = metadata.map(|mut meta| {
            meta.child_source_ids.retain(|child| child != &entry.source_id);
            meta
        });
        let number = parent.number;
        self.write_parent_checklist(parent_id, parent, narrative, metadata, index)
            .await?;
        info!(parent = %parent_id, number, child = %entry.source_id, "Removed child from former parent");
        Ok(())
    }

    async fn write_parent_checklist(
        &self,
        parent_id: &str,
        parent: TargetIssue,
        narrative: String,
        metadata: Option<SyncMetadata>,
        index: &mut MirrorIndex,
    ) -> Result<()> {
        let metadata = metadata.map(|mut meta| {
            meta.last_sync = Utc::now();
            meta
        });
        let update = TargetUpdate {
            body: Some(narrative.clone()),
            metadata: metadata.clone(),
            ..Default::default()
        };
        self.target.update_issue(parent.number, &update).await?;

        let body = match &metadata {
            Some(meta) => syncmark::inject(&narrative, meta)?,
            None => narrative,
        };
        index.upsert(parent_id, TargetIssue { body, ..parent });
        Ok(())
    }

    fn source_link(&self, issue: &SourceIssue) -> String {
        issue
            .url
            .clone()
            .unwrap_or_else(|| format!("{}/browse/{}", self.browse_base(), issue.id))
    }

    /// Narrative part of a mirror body
    fn compose_body(&self, issue: &SourceIssue, mapped: &MappedFields, block: &str) -> String {
        let mut parts: Vec<String> = Vec::new();

        let description = mapped
            .body
            .clone()
            .or_else(|| issue.description.clone())
            .unwrap_or_default();
        if !description.trim().is_empty() {
            parts.push(description.trim().to_string());
        }
        if !mapped.sections.is_empty() {
            let sections: Vec<String> = mapped
                .sections
                .iter()
                .map(|(name, value)| format!("**{}:** {}", name, value))
                .collect();
            parts.push(sections.join("\n"));
        }
        if !block.is_empty() {
            parts.push(block.to_string());
        }
        parts.push(format!(
            "---\n_Synced from [{}]({})_",
            issue.id,
            self.source_link(issue)
        ));

        parts.join("\n\n")
    }

    /// Labels the engine owns on a mirror
    fn managed_labels(
        &self,
        mapped: &MappedFields,
        level: Option<&LevelConfig>,
        status: &str,
    ) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        let mut push = |label: String| {
            if !label.trim().is_empty() && !labels.contains(&label) {
                labels.push(label);
            }
        };

        for label in &self.config.labels {
            push(label.clone());
        }
        for label in &mapped.labels {
            push(label.clone());
        }
        if let Some(level) = level {
            push(format!("{}{}", self.config.level_label_prefix, level.name));
        }
        if let Some(column) = self.status.column_label(status) {
            push(column);
        }
        labels
    }

    /// Keep labels added by people; replace the ones the engine owns
    ///
    /// `previous` is the managed set recorded by the last write, so a mapped
    /// label whose value changed is dropped rather than kept as a human one.
    fn merge_labels(
        &self,
        existing: &[String],
        previous: &[String],
        managed: &[String],
    ) -> Vec<String> {
        let level_prefix = &self.config.level_label_prefix;
        let mut labels: Vec<String> = existing
            .iter()
            .filter(|label| {
                !self.status.is_column_label(label)
                    && !(!level_prefix.is_empty() && label.starts_with(level_prefix.as_str()))
                    && !managed.contains(*label)
                    && !previous.contains(*label)
            })
            .cloned()
            .collect();
        labels.extend(managed.iter().cloned());
        labels
    }

    async fn target_to_source_pass(
        &self,
        issues: &[SourceIssue],
        index: &MirrorIndex,
    ) -> TargetToSourceReport {
        let mut report = TargetToSourceReport::default();
        let batch: HashMap<&str, &SourceIssue> =
            issues.iter().map(|issue| (issue.id.as_str(), issue)).collect();

        info!(mirrors = index.canonical.len(), "Target -> source pass");

        for (source_id, mirror) in index.pairs() {
            let issue = match batch.get(source_id.as_str()) {
                Some(issue) => (*issue).clone(),
                None => match self
                    .source
                    .get_issue(&source_id, &self.config.source_fields())
                    .await
                {
                    Ok(issue) => issue,
                    Err(e) => {
                        warn!(source_id = %source_id, error = %e, "Failed to load source issue");
                        report.errors.push(IssueError::new(&source_id, e));
                        continue;
                    }
                },
            };

            match self.status.reconcile(self.source.as_ref(), &issue, &mirror).await {
                Ok(outcome) => {
                    debug!(source_id = %source_id, number = mirror.number, outcome = %outcome, "Status reconciled");
                    report.outcomes.push((source_id, outcome));
                }
                Err(e) => {
                    warn!(source_id = %source_id, error = %e, "Failed to reconcile status");
                    report.errors.push(IssueError::new(&source_id, e));
                }
            }
        }

        report
    }

    async fn import_pass(&self, index: &mut MirrorIndex) -> ImportReport {
        let mut report = ImportReport::default();
        let label = &self.config.import.label;

        let mut candidates: Vec<TargetIssue> = index
            .issues
            .values()
            .filter(|issue| {
                !index.is_mirror(issue.number)
                    && issue.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|issue| issue.number);

        info!(candidates = candidates.len(), label = %label, "Import pass");

        for candidate in candidates {
            if let Err(e) = self.import_issue(&candidate, index, &mut report).await {
                warn!(number = candidate.number, error = %e, "Failed to import issue");
                report
                    .errors
                    .push(IssueError::new(format!("#{}", candidate.number), e));
            }
        }
        report
    }

    async fn import_issue(
        &self,
        candidate: &TargetIssue,
        index: &mut MirrorIndex,
        report: &mut ImportReport,
    ) -> Result<()> {
        let narrative = candidate.narrative();
        let new_issue = NewSourceIssue {
            summary: candidate.title.clone(),
            description: (!narrative.trim().is_empty()).then(|| narrative.clone()),
            issue_type: self.config.import.issue_type.clone(),
            labels: Vec::new(),
        };

        // Resolve the structural parent before creating anything
        let parent = parent_reference(&narrative).and_then(|number| {
            index
                .issues
                .get(&number)
                .and_then(TargetIssue::metadata)
                .map(|meta| (meta.source_id, number))
        });
        let parent = match parent {
            Some((parent_id, number)) => {
                let walk = walk_parent_chain(&parent_id, |id| index.recorded_parent(id));
                if walk.allows_nesting() {
                    Some((parent_id, number))
                } else {
                    warn!(
                        number = candidate.number,
                        parent = %parent_id,
                        depth = walk.depth,
                        cycle = walk.cycle,
                        "Refusing structural nesting; importing flat"
                    );
                    report.flattened.push(candidate.number);
                    None
                }
            }
            None => None,
        };

        let source_id = self.source.create_issue(&new_issue).await?;
        info!(number = candidate.number, source_id = %source_id, "Imported target issue");

        if let Some((parent_id, _)) = &parent {
            self.source
                .create_link(&source_id, parent_id, &self.config.import.link_relation)
                .await?;
        }

        let (updated, status) = if self.config.dry_run {
            (String::new(), String::new())
        } else {
            let created = self
                .source
                .get_issue(&source_id, &self.config.source_fields())
                .await?;
            (created.updated, created.status)
        };
        let level = self.hierarchy.classify(&status).map(|l| l.name.clone());
        let parent_id = parent.as_ref().map(|(id, _)| id.clone());
        let hash = content_hash(HashInput {
            id: &source_id,
            updated: &updated,
            summary: &candidate.title,
            status: &status,
            parent: parent_id.as_deref(),
            hierarchy_level: level.as_deref(),
        });

        let mut metadata = SyncMetadata::new(&source_id, &updated, &hash)
            .with_parent(parent_id, parent.as_ref().map(|(_, number)| *number))
            .with_original_link(format!("{}/browse/{}", self.browse_base(), source_id));
        if let Some(level) = &level {
            metadata = metadata.with_hierarchy_level(level);
        }

        let update = TargetUpdate {
            metadata: Some(metadata.clone()),
            ..Default::default()
        };
        self.target.update_issue(candidate.number, &update).await?;

        index.upsert(
            &source_id,
            TargetIssue {
                body: syncmark::inject(&candidate.body, &metadata)?,
                ..candidate.clone()
            },
        );
        report.created.push((candidate.number, source_id));
        Ok(())
    }

    async fn comment_pass(
        &self,
        index: &MirrorIndex,
        in_scope: &HashSet<String>,
        report: &mut RunReport,
    ) {
        for (source_id, mirror) in index.pairs() {
            if !in_scope.contains(&source_id) {
                continue;
            }
            match self
                .comments
                .sync_pair(
                    self.source.as_ref(),
                    self.target.as_ref(),
                    &source_id,
                    mirror.number,
                    self.config.direction,
                )
                .await
            {
                Ok(stats) => report.comments.merge(stats),
                Err(e) => {
                    warn!(source_id = %source_id, number = mirror.number, error = %e, "Failed to sync comments");
                    report.comment_errors.push(IssueError::new(&source_id, e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GitHubConfig, JiraConfig, StatusTarget};
    use crate::integrations::{MemorySourceStore, MemoryTargetStore, RetryConfig};

    fn config() -> SyncConfig {
        let mut config = SyncConfig::new(
            JiraConfig {
                url: "https://jira.test".to_string(),
                project: "X".to_string(),
                token_env: "JIRA_TOKEN".to_string(),
                email_env: None,
                retry: RetryConfig::disabled(),
            },
            GitHubConfig {
                url: "https://github.com".to_string(),
                owner: "acme".to_string(),
                repo: "roadmap".to_string(),
                token_env: "GITHUB_TOKEN".to_string(),
                retry: RetryConfig::disabled(),
            },
            "project = X",
        );
        config.status_map.insert(
            "Ready".to_string(),
            StatusTarget {
                target_state: Some(IssueState::Open),
                target_column: Some("Todo".to_string()),
                sync_enabled: None,
            },
        );
        config
    }

    #[test]
    fn test_mirror_index_prefers_lowest_number() {
        let meta = SyncMetadata::new("X-1", "t", "h");
        let body = syncmark::inject("", &meta).unwrap();
        let index = MirrorIndex::build(vec![
            TargetIssue::new(9, "dup").with_body(body.clone()),
            TargetIssue::new(4, "first").with_body(body),
            TargetIssue::new(5, "human"),
        ]);
        assert_eq!(index.mirror("X-1").map(|i| i.number), Some(4));
        assert_eq!(index.issues.len(), 3);
        assert_eq!(index.pairs().len(), 1);
    }

    #[test]
    fn test_mirror_index_recovers_from_footer() {
        let index = MirrorIndex::build(vec![
            TargetIssue::new(3, "lost").with_body("Text\n\n---\n_Synced from [X-7](https://jira.test/browse/X-7)_"),
            TargetIssue::new(4, "human").with_body("See _Synced from_ elsewhere"),
        ]);
        assert_eq!(index.mirror("X-7").map(|i| i.number), Some(3));
        assert!(index.is_mirror(3));
        assert!(!index.is_mirror(4));
    }

    #[test]
    fn test_merge_labels_keeps_human_labels() {
        let source = Arc::new(MemorySourceStore::new("X"));
        let target = Arc::new(MemoryTargetStore::new());
        let engine = Reconciler::new(config(), source, target);

        let existing = vec![
            "needs-design".to_string(),
            "status: In Progress".to_string(),
            "level: story".to_string(),
        ];
        let managed = vec!["level: task".to_string(), "status: Todo".to_string()];
        assert_eq!(
            engine.merge_labels(&existing, &[], &managed),
            vec!["needs-design", "level: task", "status: Todo"]
        );
    }

    #[test]
    fn test_merge_labels_drops_previously_managed() {
        let source = Arc::new(MemorySourceStore::new("X"));
        let target = Arc::new(MemoryTargetStore::new());
        let engine = Reconciler::new(config(), source, target);

        let existing = vec![
            "priority: High".to_string(),
            "priority: urgent-ish".to_string(),
            "level: task".to_string(),
        ];
        let previous = vec!["priority: High".to_string(), "level: task".to_string()];
        let managed = vec!["priority: Low".to_string(), "level: task".to_string()];
        assert_eq!(
            engine.merge_labels(&existing, &previous, &managed),
            vec!["priority: urgent-ish", "priority: Low", "level: task"]
        );
    }

    #[test]
    fn test_compose_body() {
        let source = Arc::new(MemorySourceStore::new("X"));
        let target = Arc::new(MemoryTargetStore::new());
        let engine = Reconciler::new(config(), source, target);

        let issue = SourceIssue::new("X-1", "Fix login", "Ready", "t").with_description("Steps");
        let mapped = MappedFields {
            sections: vec![("Team".to_string(), "Core".to_string())],
            ..Default::default()
        };
        assert_eq!(
            engine.compose_body(&issue, &mapped, "**Parent:** #3"),
            "Steps\n\n**Team:** Core\n\n**Parent:** #3\n\n---\n_Synced from [X-1](https://jira.test/browse/X-1)_"
        );
    }
}
