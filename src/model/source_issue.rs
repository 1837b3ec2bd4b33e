//! Source issue representation
//!
//! The source store owns canonical records. Besides the handful of typed
//! fields the engine reasons about, the raw field map is kept so field
//! mappings and the validator can address custom fields by path.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Direction of a typed link edge, seen from the issue that carries it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    /// The other issue points at this one (e.g. "is child of")
    Inward,
    /// This issue points at the other one (e.g. "is parent of")
    Outward,
}

/// Typed link edge between two source issues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLink {
    /// Link type name (e.g. "Parent-Child", "Relates")
    pub link_type: String,
    pub direction: LinkDirection,
    /// Key of the issue on the other end
    pub issue: String,
}

impl IssueLink {
    pub fn new(link_type: impl Into<String>, direction: LinkDirection, issue: impl Into<String>) -> Self {
        Self {
            link_type: link_type.into(),
            direction,
            issue: issue.into(),
        }
    }
}

/// Canonical issue in the source store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceIssue {
    /// Issue key (e.g. "PROJ-123")
    pub id: String,

    pub summary: String,

    /// Workflow status name
    pub status: String,

    /// Last-updated timestamp exactly as the store reports it
    pub updated: String,

    /// Description normalized to markdown
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub issue_type: Option<String>,

    #[serde(default)]
    pub labels: Vec<String>,

    /// Native parent reference
    #[serde(default)]
    pub parent: Option<String>,

    /// Native sub-task keys
    #[serde(default)]
    pub subtasks: Vec<String>,

    #[serde(default)]
    pub links: Vec<IssueLink>,

    /// Browse URL
    #[serde(default)]
    pub url: Option<String>,

    /// Raw field map as returned by the store (custom fields included)
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl SourceIssue {
    pub fn new(
        id: impl Into<String>,
        summary: impl Into<String>,
        status: impl Into<String>,
        updated: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            status: status.into(),
            updated: updated.into(),
            description: None,
            issue_type: None,
            labels: Vec::new(),
            parent: None,
            subtasks: Vec::new(),
            links: Vec::new(),
            url: None,
            fields: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_link(mut self, link: IssueLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Resolve a dotted field path (e.g. `fields.customfield_10010.value`)
    ///
    /// The typed names (`key`, `summary`, `status`, `updated`, `description`,
    /// `labels`, `parent`) resolve from the typed fields; everything else walks
    /// the raw field map. Returns `None` when the path does not exist and
    /// `Some(Value::Null)` when it exists but is empty.
    pub fn field(&self, path: &str) -> Option<Value> {
        let path = path.strip_prefix("fields.").unwrap_or(path);
        let mut segments = path.split('.');
        let head = segments.next()?;

        let root = match self.fields.get(head) {
            Some(value) => value.clone(),
            None => self.typed_field(head)?,
        };

        segments.try_fold(root, |value, segment| match value {
            Value::Object(mut map) => map.remove(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.into_iter().nth(i)),
            // Descending into an empty field stays empty
            Value::Null => Some(Value::Null),
            _ => None,
        })
    }

    fn typed_field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "key" | "id" => Value::String(self.id.clone()),
            "summary" => Value::String(self.summary.clone()),
            "status" => Value::String(self.status.clone()),
            "updated" => Value::String(self.updated.clone()),
            "description" => self
                .description
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            "issuetype" | "issue_type" => self
                .issue_type
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            "labels" => Value::Array(self.labels.iter().cloned().map(Value::String).collect()),
            "parent" => self.parent.clone().map(Value::String).unwrap_or(Value::Null),
            _ => return None,
        };
        Some(value)
    }
}

/// Payload for creating an issue in the source store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSourceIssue {
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Issue type name (e.g. "Task")
    pub issue_type: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issue() -> SourceIssue {
        SourceIssue::new("PROJ-1", "Fix login", "Ready", "2024-01-01T00:00:00.000+0000")
            .with_field("customfield_10010", json!({ "value": "Platform", "id": "3" }))
            .with_field("customfield_10020", json!(["a", "b"]))
            .with_field("customfield_10030", Value::Null)
    }

    #[test]
    fn test_typed_fields() {
        let issue = issue();
        assert_eq!(issue.field("summary"), Some(json!("Fix login")));
        assert_eq!(issue.field("fields.status"), Some(json!("Ready")));
        assert_eq!(issue.field("key"), Some(json!("PROJ-1")));
        assert_eq!(issue.field("parent"), Some(Value::Null));
    }

    #[test]
    fn test_raw_field_paths() {
        let issue = issue();
        assert_eq!(
            issue.field("fields.customfield_10010.value"),
            Some(json!("Platform"))
        );
        assert_eq!(issue.field("customfield_10020.1"), Some(json!("b")));
        assert_eq!(issue.field("customfield_10030"), Some(Value::Null));
        assert_eq!(issue.field("customfield_10030.value"), Some(Value::Null));
        assert_eq!(issue.field("customfield_99999"), None);
        assert_eq!(issue.field("customfield_10010.missing"), None);
    }
}
