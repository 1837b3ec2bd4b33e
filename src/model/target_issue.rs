//! Target issue (mirror) representation

use serde::{Deserialize, Serialize};
use syncmark::SyncMetadata;

/// Open/closed state of a target issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

impl Default for IssueState {
    fn default() -> Self {
        Self::Open
    }
}

impl IssueState {
    /// Parse a state name case-insensitively ("OPEN", "closed", ...)
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue in the target store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetIssue {
    pub number: u64,
    pub title: String,
    /// Full body: narrative text plus any embedded metadata block
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub state: IssueState,
    #[serde(default)]
    pub url: Option<String>,
}

impl TargetIssue {
    pub fn new(number: u64, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            body: String::new(),
            labels: Vec::new(),
            state: IssueState::Open,
            url: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_state(mut self, state: IssueState) -> Self {
        self.state = state;
        self
    }

    /// Embedded sync metadata; malformed blocks read as "never synced"
    pub fn metadata(&self) -> Option<SyncMetadata> {
        syncmark::extract(&self.body)
    }

    /// Body with the metadata block removed
    pub fn narrative(&self) -> String {
        syncmark::strip(&self.body)
    }

    pub fn is_closed(&self) -> bool {
        self.state == IssueState::Closed
    }

    /// First label starting with `prefix`, with the prefix removed
    pub fn label_value(&self, prefix: &str) -> Option<&str> {
        self.labels
            .iter()
            .find_map(|label| label.strip_prefix(prefix))
            .map(str::trim)
    }
}

/// Payload for creating a mirror
#[derive(Debug, Clone, PartialEq)]
pub struct NewTargetIssue {
    pub title: String,
    /// Narrative body; the store embeds `metadata` when given
    pub body: String,
    pub labels: Vec<String>,
    pub metadata: Option<SyncMetadata>,
}

/// Partial update of a mirror; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetUpdate {
    pub title: Option<String>,
    /// Narrative body; when `metadata` is also set the block is re-embedded
    pub body: Option<String>,
    pub labels: Option<Vec<String>>,
    pub state: Option<IssueState>,
    pub metadata: Option<SyncMetadata>,
}

impl TargetUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.labels.is_none()
            && self.state.is_none()
            && self.metadata.is_none()
    }

    /// Compute the body a store should persist for `current`
    ///
    /// A new narrative replaces the old one; metadata is embedded into the new
    /// narrative or replaced in place in the existing body.
    pub fn resolve_body(&self, current: &str) -> crate::Result<Option<String>> {
        match (&self.body, &self.metadata) {
            (Some(body), Some(meta)) => Ok(Some(syncmark::inject(body, meta)?)),
            (Some(body), None) => Ok(Some(body.clone())),
            (None, Some(meta)) => Ok(Some(syncmark::inject(current, meta)?)),
            (None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse() {
        assert_eq!(IssueState::parse("OPEN"), Some(IssueState::Open));
        assert_eq!(IssueState::parse("closed"), Some(IssueState::Closed));
        assert_eq!(IssueState::parse("merged"), None);
        assert_eq!(IssueState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_label_value() {
        let issue = TargetIssue::new(1, "t")
            .with_labels(vec!["jira".to_string(), "status: In Review".to_string()]);
        assert_eq!(issue.label_value("status:"), Some("In Review"));
        assert_eq!(issue.label_value("level:"), None);
    }

    #[test]
    fn test_resolve_body_variants() {
        let meta = SyncMetadata::new("X-1", "t", "h");
        let update = TargetUpdate {
            metadata: Some(meta.clone()),
            ..Default::default()
        };
        let body = update.resolve_body("Human text").unwrap().unwrap();
        assert!(body.starts_with("Human text"));
        assert_eq!(syncmark::extract(&body), Some(meta));

        assert!(TargetUpdate::default().resolve_body("x").unwrap().is_none());
        assert!(TargetUpdate::default().is_empty());
    }
}
