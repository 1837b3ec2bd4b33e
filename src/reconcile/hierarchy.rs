//! Hierarchy resolution
//!
//! Reads parent/child/related edges off source issues, classifies each issue
//! into a level by status, renders the relationship block of a mirror body,
//! and keeps the children checklist of parent mirrors in step with the
//! children's open/closed state.

use crate::config::{HierarchyConfig, LevelConfig, LinkModel};
use crate::model::{LinkDirection, SourceIssue, TargetIssue};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::warn;

/// Deepest allowed nesting, counted in ancestors of the nested issue
pub const MAX_HIERARCHY_DEPTH: usize = 8;

lazy_static! {
    /// `Parent: #12` (any case, optional bold) in a target body
    static ref PARENT_REF: Regex =
        Regex::new(r"(?im)^\s*(?:\*\*)?parent:?(?:\*\*)?:?\s*#(\d+)\b").expect("valid regex");
    /// A task-list line: `- [ ] ...` / `* [x] ...`
    static ref TASK_LINE: Regex =
        Regex::new(r"^\s*[-*] \[( |x|X)\] ").expect("valid regex");
}

/// Structural edges of one source issue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationships {
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub related: Vec<String>,
}

/// One line of a parent's children checklist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistEntry {
    pub source_id: String,
    /// Mirror number, once the child is mirrored
    pub number: Option<u64>,
    pub closed: bool,
    /// Browse link used while the child has no mirror
    pub url: Option<String>,
}

impl ChecklistEntry {
    pub fn line(&self) -> String {
        let mark = if self.closed { "x" } else { " " };
        match (self.number, &self.url) {
            (Some(number), _) => format!("- [{}] #{} ({})", mark, number, self.source_id),
            (None, Some(url)) => format!("- [{}] [{}]({})", mark, self.source_id, url),
            (None, None) => format!("- [{}] {}", mark, self.source_id),
        }
    }

    /// Whether `line` is this entry's checklist line (in any state)
    fn matches(&self, line: &str) -> bool {
        if !TASK_LINE.is_match(line) {
            return false;
        }
        if let Some(number) = self.number {
            if contains_token(line, &format!("#{}", number)) {
                return true;
            }
        }
        contains_token(line, &self.source_id)
    }
}

/// `token` appears in `line` with no word character or `-` on either side
fn contains_token(line: &str, token: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_' || c == '-';
    line.match_indices(token).any(|(at, _)| {
        let before = line[..at].chars().next_back();
        let after = line[at + token.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Result of walking a parent chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainWalk {
    /// Ancestors found, including the starting parent
    pub depth: usize,
    /// The chain revisited an issue
    pub cycle: bool,
}

impl ChainWalk {
    /// Whether an issue under this chain may be nested structurally
    pub fn allows_nesting(&self) -> bool {
        !self.cycle && self.depth < MAX_HIERARCHY_DEPTH
    }
}

/// Walk upward from `parent` until a root, a cycle, or the depth limit
///
/// `parent_of` answers the parent of any known issue. The walk never visits
/// an issue twice and stops one step past the limit, so it terminates on any
/// input.
pub fn walk_parent_chain<F>(parent: &str, parent_of: F) -> ChainWalk
where
    F: Fn(&str) -> Option<String>,
{
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = Some(parent.to_string());
    let mut depth = 0;

    while let Some(id) = current {
        if !visited.insert(id.clone()) {
            return ChainWalk { depth, cycle: true };
        }
        depth += 1;
        if depth > MAX_HIERARCHY_DEPTH {
            break;
        }
        current = parent_of(&id);
    }

    ChainWalk {
        depth,
        cycle: false,
    }
}

/// `Parent: #N` reference in a target body
pub fn parent_reference(body: &str) -> Option<u64> {
    PARENT_REF
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Hierarchy logic driven by the level table and link model
#[derive(Debug, Clone)]
pub struct HierarchyResolver {
    config: HierarchyConfig,
}

impl HierarchyResolver {
    pub fn new(config: HierarchyConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn children_heading(&self) -> &str {
        &self.config.children_heading
    }

    /// Edges declared on the issue itself
    pub fn extract(&self, issue: &SourceIssue) -> Relationships {
        let mut relationships = Relationships::default();

        match &self.config.link_model {
            LinkModel::ParentField => {
                relationships.parent = issue.parent.clone();
                relationships.children = issue.subtasks.clone();
                relationships.related = issue.links.iter().map(|l| l.issue.clone()).collect();
            }
            LinkModel::IssueLinks {
                hierarchy_link_type,
            } => {
                for link in &issue.links {
                    if !link.link_type.eq_ignore_ascii_case(hierarchy_link_type) {
                        relationships.related.push(link.issue.clone());
                        continue;
                    }
                    match link.direction {
                        LinkDirection::Inward if relationships.parent.is_none() => {
                            relationships.parent = Some(link.issue.clone());
                        }
                        LinkDirection::Inward => {
                            warn!(
                                issue = %issue.id,
                                ignored = %link.issue,
                                "Issue has more than one hierarchy parent"
                            );
                        }
                        LinkDirection::Outward => relationships.children.push(link.issue.clone()),
                    }
                }
            }
        }

        relationships.related.sort();
        relationships.related.dedup();
        relationships
    }

    /// Edges for every issue in a batch, with children completed from the
    /// parent side (an epic does not list the stories pointing at it)
    pub fn extract_all(&self, issues: &[SourceIssue]) -> HashMap<String, Relationships> {
        let mut all: HashMap<String, Relationships> = issues
            .iter()
            .map(|issue| (issue.id.clone(), self.extract(issue)))
            .collect();

        let edges: Vec<(String, String)> = all
            .iter()
            .filter_map(|(id, rel)| rel.parent.clone().map(|p| (p, id.clone())))
            .collect();
        for (parent, child) in edges {
            if let Some(rel) = all.get_mut(&parent) {
                if !rel.children.contains(&child) {
                    rel.children.push(child);
                }
            }
        }
        for rel in all.values_mut() {
            rel.children.sort();
        }
        all
    }

    /// Level for a status; unmatched statuses fall into the lowest level
    pub fn classify(&self, status: &str) -> Option<&LevelConfig> {
        if !self.config.enabled {
            return None;
        }
        self.config
            .levels
            .iter()
            .find(|level| level.statuses.iter().any(|s| s.eq_ignore_ascii_case(status)))
            .or_else(|| self.config.levels.first())
    }

    /// Whether issues in this status are mirrored at all
    pub fn is_syncable(&self, status: &str) -> bool {
        self.classify(status).map(|level| level.sync).unwrap_or(true)
    }

    /// Relationship block of a mirror body
    ///
    /// `mirrors` maps source ids to mirror numbers; `existing` supplies live
    /// open/closed state for the checklist. Children without a mirror link to
    /// the source store instead.
    pub fn render(
        &self,
        relationships: &Relationships,
        mirrors: &HashMap<String, u64>,
        base_url: &str,
        existing: &HashMap<u64, TargetIssue>,
    ) -> String {
        let reference = |id: &str| match mirrors.get(id) {
            Some(number) => format!("#{}", number),
            None => format!("[{}]({}/browse/{})", id, base_url, id),
        };

        let mut lines = Vec::new();
        if let Some(parent) = &relationships.parent {
            lines.push(format!("**Parent:** {}", reference(parent)));
        }
        if !relationships.related.is_empty() {
            let related: Vec<String> = relationships.related.iter().map(|id| reference(id)).collect();
            lines.push(format!("**Related:** {}", related.join(", ")));
        }

        let entries = self.checklist_entries(relationships, mirrors, base_url, existing);
        if !entries.is_empty() {
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(self.checklist_heading());
            lines.push(String::new());
            lines.extend(entries.iter().map(ChecklistEntry::line));
        }

        lines.join("\n")
    }

    pub fn checklist_entries(
        &self,
        relationships: &Relationships,
        mirrors: &HashMap<String, u64>,
        base_url: &str,
        existing: &HashMap<u64, TargetIssue>,
    ) -> Vec<ChecklistEntry> {
        relationships
            .children
            .iter()
            .map(|child| {
                let number = mirrors.get(child).copied();
                ChecklistEntry {
                    source_id: child.clone(),
                    number,
                    closed: number
                        .and_then(|n| existing.get(&n))
                        .map(TargetIssue::is_closed)
                        .unwrap_or(false),
                    url: Some(format!("{}/browse/{}", base_url, child)),
                }
            })
            .collect()
    }

    /// Whether any entry is missing from `body` or shows a stale state, or
    /// the checklist lists a child that is no longer expected
    pub fn checklist_drift(&self, body: &str, entries: &[ChecklistEntry]) -> bool {
        let lines: Vec<&str> = body.lines().collect();
        let missing = entries.iter().any(|entry| {
            let expected = entry.line();
            !lines
                .iter()
                .any(|line| entry.matches(line) && line.trim() == expected)
        });
        if missing {
            return true;
        }

        match self.checklist_section(&lines) {
            Some((_, section)) => lines[section]
                .iter()
                .filter(|line| TASK_LINE.is_match(line))
                .any(|line| !entries.iter().any(|entry| entry.matches(line))),
            None => false,
        }
    }

    /// Make `body` list `entry` exactly once with the right state
    ///
    /// Returns `None` when the body is already correct. A stale line is
    /// rewritten in place; a missing line is appended under the checklist
    /// heading, which is created at the end of the narrative if absent.
    pub fn ensure_in_parent_task_list(&self, body: &str, entry: &ChecklistEntry) -> Option<String> {
        let expected = entry.line();
        let mut lines: Vec<String> = body.lines().map(str::to_string).collect();

        let matching: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| entry.matches(line))
            .map(|(i, _)| i)
            .collect();

        if let Some(&first) = matching.first() {
            if matching.len() == 1 && lines[first].trim() == expected {
                return None;
            }
            let indent: String = lines[first]
                .chars()
                .take_while(|c| c.is_whitespace())
                .collect();
            lines[first] = format!("{}{}", indent, expected);
            // Collapse duplicates left by hand edits
            for &extra in matching.iter().skip(1).rev() {
                lines.remove(extra);
            }
            return Some(lines.join("\n"));
        }

        match self.checklist_section(&lines) {
            Some((heading_at, section)) => {
                let mut insert_at = section.end;
                if insert_at == heading_at + 1 {
                    lines.insert(insert_at, String::new());
                    insert_at += 1;
                }
                lines.insert(insert_at, expected);
                Some(lines.join("\n"))
            }
            None => {
                let trimmed = body.trim_end();
                let separator = if trimmed.is_empty() { "" } else { "\n\n" };
                Some(format!(
                    "{}{}{}\n\n{}",
                    trimmed,
                    separator,
                    self.checklist_heading(),
                    expected
                ))
            }
        }
    }

    /// Drop `entry` from the checklist of `body`
    ///
    /// Only lines under the checklist heading are touched. The heading goes
    /// too once no task line is left under it. Returns `None` when the
    /// checklist does not list the entry.
    pub fn remove_from_parent_task_list(
        &self,
        body: &str,
        entry: &ChecklistEntry,
    ) -> Option<String> {
        let mut lines: Vec<&str> = body.lines().collect();
        let (heading_at, section) = self.checklist_section(&lines)?;

        let stale: Vec<usize> = section
            .clone()
            .filter(|&i| entry.matches(lines[i]))
            .collect();
        if stale.is_empty() {
            return None;
        }

        let tasks = section
            .clone()
            .filter(|&i| TASK_LINE.is_match(lines[i]))
            .count();
        if tasks == stale.len() {
            let mut start = heading_at;
            while start > 0 && lines[start - 1].trim().is_empty() {
                start -= 1;
            }
            lines.drain(start..section.end);
        } else {
            for &i in stale.iter().rev() {
                lines.remove(i);
            }
        }
        Some(lines.join("\n"))
    }

    fn checklist_heading(&self) -> String {
        format!("### {}", self.children_heading())
    }

    /// Heading position and the line range of the task list under it
    ///
    /// The range ends after the last task line; blank lines between task
    /// lines belong to it, any other text ends it.
    fn checklist_section<S: AsRef<str>>(&self, lines: &[S]) -> Option<(usize, Range<usize>)> {
        let heading = self.checklist_heading();
        let heading_at = lines
            .iter()
            .position(|line| line.as_ref().trim() == heading)?;

        let mut end = heading_at + 1;
        for (i, line) in lines.iter().enumerate().skip(heading_at + 1) {
            let line = line.as_ref();
            if TASK_LINE.is_match(line) {
                end = i + 1;
            } else if !line.trim().is_empty() {
                break;
            }
        }
        Some((heading_at, heading_at + 1..end))
    }
}
