//! Run reports

use super::comments::CommentSyncStats;
use super::status::StatusOutcome;
use std::fmt;

/// A per-issue failure that did not stop the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueError {
    /// Source id, or `#N` for target-only issues
    pub id: String,
    pub message: String,
}

impl IssueError {
    pub fn new(id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            id: id.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for IssueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.message)
    }
}

/// Source → target pass
#[derive(Debug, Clone, Default)]
pub struct SourceToTargetReport {
    /// `(source id, mirror number)`
    pub created: Vec<(String, u64)>,
    pub updated: Vec<(String, u64)>,
    pub skipped_wrong_level: Vec<String>,
    pub skipped_up_to_date: Vec<String>,
    /// Mirrored without a parent link because of the depth guard
    pub flattened: Vec<String>,
    pub errors: Vec<IssueError>,
}

impl SourceToTargetReport {
    pub fn writes(&self) -> usize {
        self.created.len() + self.updated.len()
    }
}

/// Target → source pass
#[derive(Debug, Clone, Default)]
pub struct TargetToSourceReport {
    /// `(source id, outcome)` for every mirror examined
    pub outcomes: Vec<(String, StatusOutcome)>,
    pub errors: Vec<IssueError>,
}

impl TargetToSourceReport {
    /// Number of outcomes of one kind (`"applied"`, `"skipped-ambiguous"`, ...)
    pub fn count(&self, kind: &str) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.as_str() == kind).count()
    }

    pub fn applied(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, StatusOutcome::Applied { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Import of labelled target issues into the source store
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// `(target number, new source id)`
    pub created: Vec<(u64, String)>,
    /// Created without the requested parent link
    pub flattened: Vec<u64>,
    pub errors: Vec<IssueError>,
}

/// Everything one invocation did
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub dry_run: bool,
    pub source_to_target: SourceToTargetReport,
    pub target_to_source: TargetToSourceReport,
    pub comments: CommentSyncStats,
    pub comment_errors: Vec<IssueError>,
    pub imported: ImportReport,
}

impl RunReport {
    pub fn errors(&self) -> impl Iterator<Item = &IssueError> {
        self.source_to_target
            .errors
            .iter()
            .chain(&self.target_to_source.errors)
            .chain(&self.comment_errors)
            .chain(&self.imported.errors)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "Dry run: no changes were written")?;
        }

        let s2t = &self.source_to_target;
        writeln!(f, "Source -> target:")?;
        writeln!(f, "  created:     {}", s2t.created.len())?;
        for (id, number) in &s2t.created {
            writeln!(f, "    {} -> #{}", id, number)?;
        }
        writeln!(f, "  updated:     {}", s2t.updated.len())?;
        for (id, number) in &s2t.updated {
            writeln!(f, "    {} -> #{}", id, number)?;
        }
        writeln!(f, "  up to date:  {}", s2t.skipped_up_to_date.len())?;
        writeln!(f, "  wrong level: {}", s2t.skipped_wrong_level.len())?;
        if !s2t.flattened.is_empty() {
            writeln!(f, "  flattened:   {}", s2t.flattened.join(", "))?;
        }

        let t2s = &self.target_to_source;
        writeln!(f, "Target -> source:")?;
        for kind in [
            "applied",
            "skipped-same-value",
            "skipped-no-mapping",
            "skipped-ambiguous",
            "failed-no-transition",
        ] {
            writeln!(f, "  {:<21} {}", format!("{}:", kind), t2s.count(kind))?;
        }
        for (id, outcome) in &t2s.outcomes {
            if !matches!(outcome, StatusOutcome::SkippedSameValue | StatusOutcome::SkippedNoMapping) {
                writeln!(f, "    {}: {}", id, outcome)?;
            }
        }

        writeln!(f, "Comments: {}", self.comments)?;

        if !self.imported.created.is_empty() || !self.imported.errors.is_empty() {
            writeln!(f, "Imported:")?;
            for (number, id) in &self.imported.created {
                writeln!(f, "    #{} -> {}", number, id)?;
            }
        }

        let errors: Vec<&IssueError> = self.errors().collect();
        if errors.is_empty() {
            writeln!(f, "No errors")?;
        } else {
            writeln!(f, "Errors: {}", errors.len())?;
            for error in errors {
                writeln!(f, "    {}", error)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_summary() {
        let mut report = RunReport::default();
        report.source_to_target.created.push(("X-1".to_string(), 4));
        report.target_to_source.outcomes.push((
            "X-2".to_string(),
            StatusOutcome::SkippedAmbiguous {
                candidates: vec!["A".to_string(), "B".to_string()],
            },
        ));
        report
            .imported
            .errors
            .push(IssueError::new("#9", "boom"));

        let text = report.to_string();
        assert!(text.contains("X-1 -> #4"));
        assert!(text.contains("X-2: skipped-ambiguous (A, B)"));
        assert!(text.contains("Errors: 1"));
        assert!(text.contains("#9: boom"));
        assert!(report.has_errors());
        assert_eq!(report.target_to_source.count("skipped-ambiguous"), 1);
    }
}
