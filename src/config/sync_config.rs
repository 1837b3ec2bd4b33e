//! Sync configuration file handling
//!
//! Loads `~/.config/issue-mirror/config.yaml` (or an explicit path) into a
//! [`SyncConfig`]. Everything the engine decides on (status table, level
//! table, field mappings, required fields) comes from here.

use crate::integrations::retry::RetryConfig;
use crate::model::IssueState;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Which passes a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    SourceToTarget,
    TargetToSource,
    Bidirectional,
}

impl Default for SyncDirection {
    fn default() -> Self {
        Self::Bidirectional
    }
}

impl SyncDirection {
    pub fn includes_source_to_target(&self) -> bool {
        matches!(self, Self::SourceToTarget | Self::Bidirectional)
    }

    pub fn includes_target_to_source(&self) -> bool {
        matches!(self, Self::TargetToSource | Self::Bidirectional)
    }

    /// Parse a CLI value (`source-to-target`, `target_to_source`, `both`, ...)
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().replace('-', "_").as_str() {
            "source_to_target" | "s2t" | "push" => Some(Self::SourceToTarget),
            "target_to_source" | "t2s" | "pull" => Some(Self::TargetToSource),
            "bidirectional" | "both" => Some(Self::Bidirectional),
            _ => None,
        }
    }
}

/// JIRA connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    /// JIRA instance URL
    pub url: String,

    /// Project key used for imports
    pub project: String,

    /// Env var holding the API token
    #[serde(default = "default_jira_token_env")]
    pub token_env: String,

    /// Env var holding the account email; enables basic auth when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_env: Option<String>,

    #[serde(default = "RetryConfig::for_rate_limited")]
    pub retry: RetryConfig,
}

fn default_jira_token_env() -> String {
    "JIRA_TOKEN".to_string()
}

/// GitHub connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// GitHub instance URL (e.g. "https://github.com" or an Enterprise host)
    #[serde(default = "default_github_url")]
    pub url: String,

    pub owner: String,

    pub repo: String,

    #[serde(default = "default_github_token_env")]
    pub token_env: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_github_url() -> String {
    "https://github.com".to_string()
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

/// Where a mapped value lands on the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetField {
    Title,
    /// Replaces the description as the body text
    Body,
    /// Appended to the body as a `**Name:** value` line
    Section,
    /// Added as one label per value
    Labels,
}

/// Value derivation for a field mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    /// `{value}`, `{key}`, `{summary}`, `{status}` placeholders
    Template { template: String },

    /// Exact-match table with an optional fallback
    Lookup {
        table: BTreeMap<String, String>,
        #[serde(default)]
        default: Option<String>,
    },

    /// Named function registered with the transform registry
    Custom { function: String },
}

/// One source path → target field mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Dotted path into the source issue (e.g. `fields.customfield_10010.value`)
    pub source: String,

    pub target: TargetField,

    /// Display name for `section` targets (defaults to the source path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
}

/// Target representation for one source status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_state: Option<IssueState>,

    /// Board column, carried on the mirror as a prefixed label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_column: Option<String>,

    /// `false` keeps the entry for documentation but excludes it from sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_enabled: Option<bool>,
}

impl StatusTarget {
    pub fn is_enabled(&self) -> bool {
        self.sync_enabled.unwrap_or(true)
    }
}

/// How parent/child edges are read from source issues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkModel {
    /// Native `parent` field plus sub-tasks
    ParentField,

    /// Typed link edges; inward edges of this type point at the parent
    IssueLinks { hierarchy_link_type: String },
}

impl Default for LinkModel {
    fn default() -> Self {
        Self::ParentField
    }
}

/// A hierarchy level and the statuses that place an issue in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelConfig {
    pub name: String,

    #[serde(default)]
    pub statuses: Vec<String>,

    /// Whether issues at this level are mirrored
    #[serde(default = "default_true")]
    pub sync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub link_model: LinkModel,

    /// Ordered lowest → highest (e.g. idea, task, story, epic)
    #[serde(default)]
    pub levels: Vec<LevelConfig>,

    /// Heading above the children checklist
    #[serde(default = "default_children_heading")]
    pub children_heading: String,
}

fn default_children_heading() -> String {
    "Child issues".to_string()
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            link_model: LinkModel::default(),
            levels: Vec::new(),
            children_heading: default_children_heading(),
        }
    }
}

/// Expected shape of a required source field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    /// Single select: object with a `value`
    Select,
    /// Multi select / array
    #[serde(alias = "multiselect")]
    Array,
    /// Object with `accountId` or `displayName`
    User,
    Object,
    Any,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Select => "select",
            FieldType::Array => "array",
            FieldType::User => "user",
            FieldType::Object => "object",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredField {
    pub path: String,

    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: FieldType,

    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_field_type() -> FieldType {
    FieldType::Any
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Issues sampled from the source query before the run
    #[serde(default = "default_sample_size")]
    pub sample_size: u32,

    #[serde(default)]
    pub required_fields: Vec<RequiredField>,
}

fn default_sample_size() -> u32 {
    5
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            required_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CommentConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Creation of source issues from labelled, unmirrored target issues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_import_label")]
    pub label: String,

    #[serde(default = "default_import_issue_type")]
    pub issue_type: String,

    /// Relation name passed to `create_link` for structural children
    #[serde(default = "default_link_relation")]
    pub link_relation: String,
}

fn default_import_label() -> String {
    "to-jira".to_string()
}

fn default_import_issue_type() -> String {
    "Task".to_string()
}

fn default_link_relation() -> String {
    "parent".to_string()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            label: default_import_label(),
            issue_type: default_import_issue_type(),
            link_relation: default_link_relation(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_issues() -> u32 {
    1000
}

fn default_column_prefix() -> String {
    "status: ".to_string()
}

fn default_level_prefix() -> String {
    "level: ".to_string()
}

/// Complete sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub direction: SyncDirection,

    /// Execute decisions without mutating either store
    #[serde(default)]
    pub dry_run: bool,

    pub source: JiraConfig,

    pub target: GitHubConfig,

    /// Source query (JQL) bounding the issue set
    pub query: String,

    #[serde(default = "default_max_issues")]
    pub max_issues: u32,

    /// Extra source fields to request (custom fields used by mappings)
    #[serde(default)]
    pub fields: Vec<String>,

    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,

    /// Forward status table: source status → target representation
    #[serde(default)]
    pub status_map: BTreeMap<String, StatusTarget>,

    #[serde(default = "default_column_prefix")]
    pub column_label_prefix: String,

    #[serde(default = "default_level_prefix")]
    pub level_label_prefix: String,

    /// Labels put on every mirror
    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub hierarchy: HierarchyConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub comments: CommentConfig,

    #[serde(default)]
    pub import: ImportConfig,
}

impl SyncConfig {
    /// Minimal configuration; everything else takes its default
    pub fn new(source: JiraConfig, target: GitHubConfig, query: impl Into<String>) -> Self {
        Self {
            direction: SyncDirection::default(),
            dry_run: false,
            source,
            target,
            query: query.into(),
            max_issues: default_max_issues(),
            fields: Vec::new(),
            field_mappings: Vec::new(),
            status_map: BTreeMap::new(),
            column_label_prefix: default_column_prefix(),
            level_label_prefix: default_level_prefix(),
            labels: Vec::new(),
            hierarchy: HierarchyConfig::default(),
            validation: ValidationConfig::default(),
            comments: CommentConfig::default(),
            import: ImportConfig::default(),
        }
    }

    /// Load configuration from the default path
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::SyncError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading sync configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;

        tracing::debug!(
            direction = ?config.direction,
            mappings = config.field_mappings.len(),
            statuses = config.status_map.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// `~/.config/issue-mirror/config.yaml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("issue-mirror");
        path.push("config.yaml");
        path
    }

    /// Source fields to request on search: the engine's own plus mapped ones
    pub fn source_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = [
            "summary",
            "status",
            "updated",
            "description",
            "issuetype",
            "labels",
            "parent",
            "subtasks",
            "issuelinks",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mapped = self
            .field_mappings
            .iter()
            .map(|m| m.source.as_str())
            .chain(self.validation.required_fields.iter().map(|f| f.path.as_str()))
            .chain(self.fields.iter().map(String::as_str));

        for path in mapped {
            let root = path
                .strip_prefix("fields.")
                .unwrap_or(path)
                .split('.')
                .next()
                .unwrap_or_default()
                .to_string();
            if !root.is_empty() && !fields.contains(&root) {
                fields.push(root);
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
direction: bidirectional
source:
  url: https://acme.atlassian.net
  project: PROJ
  email_env: JIRA_EMAIL
target:
  owner: acme
  repo: roadmap
query: project = PROJ AND labels = roadmap
labels: [jira]
field_mappings:
  - source: fields.customfield_10010.value
    target: section
    name: Team
  - source: fields.priority.name
    target: labels
    transform:
      kind: lookup
      table: { Highest: "priority: high", High: "priority: high" }
      default: "priority: normal"
status_map:
  Ready: { target_state: open, target_column: Todo }
  In Progress: { target_state: open, target_column: In Progress }
  Done: { target_state: closed }
hierarchy:
  enabled: true
  link_model: { kind: issue_links, hierarchy_link_type: Parent-Child }
  levels:
    - { name: idea, statuses: [Idea], sync: false }
    - { name: task, statuses: [Ready, In Progress, Done] }
validation:
  required_fields:
    - { path: fields.customfield_10010, type: select }
"#;

    #[test]
    fn test_parse_full_config() {
        let config = SyncConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.direction, SyncDirection::Bidirectional);
        assert_eq!(config.source.token_env, "JIRA_TOKEN");
        assert_eq!(config.source.retry, RetryConfig::for_rate_limited());
        assert_eq!(config.target.url, "https://github.com");
        assert_eq!(config.field_mappings.len(), 2);
        assert!(matches!(
            config.field_mappings[1].transform,
            Some(Transform::Lookup { .. })
        ));
        assert_eq!(
            config.status_map["Done"].target_state,
            Some(IssueState::Closed)
        );
        assert_eq!(
            config.hierarchy.link_model,
            LinkModel::IssueLinks {
                hierarchy_link_type: "Parent-Child".to_string()
            }
        );
        assert!(!config.hierarchy.levels[0].sync);
        assert!(config.hierarchy.levels[1].sync);
        assert_eq!(
            config.validation.required_fields[0].field_type,
            FieldType::Select
        );
        assert!(config.comments.enabled);
        assert!(!config.import.enabled);
    }

    #[test]
    fn test_source_fields_include_mapped_roots() {
        let config = SyncConfig::from_yaml(SAMPLE).unwrap();
        let fields = config.source_fields();
        assert!(fields.contains(&"customfield_10010".to_string()));
        assert!(fields.contains(&"priority".to_string()));
        assert_eq!(
            fields.iter().filter(|f| *f == "customfield_10010").count(),
            1
        );
    }

    #[test]
    fn test_save_and_load() {
        let config = SyncConfig::from_yaml(SAMPLE).unwrap();
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded = SyncConfig::load(file.path()).unwrap();
        assert_eq!(loaded.query, config.query);
        assert_eq!(loaded.status_map, config.status_map);
    }

    #[test]
    fn test_missing_file() {
        let err = SyncConfig::load("/nonexistent/issue-mirror.yaml").unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(
            SyncDirection::parse("source-to-target"),
            Some(SyncDirection::SourceToTarget)
        );
        assert_eq!(SyncDirection::parse("both"), Some(SyncDirection::Bidirectional));
        assert_eq!(SyncDirection::parse("sideways"), None);
        assert!(SyncDirection::TargetToSource.includes_target_to_source());
        assert!(!SyncDirection::TargetToSource.includes_source_to_target());
    }
}
