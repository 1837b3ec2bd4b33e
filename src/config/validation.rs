//! Configuration validation
//!
//! Static checks that need no remote access:
//! - Valid store URLs and non-empty identifiers
//! - A non-empty source query
//! - A usable hierarchy level table (non-empty, unique names, no status in two levels)
//! - Field mappings that can produce a value
//!
//! Reverse-ambiguous status entries are not errors; they are reported as
//! warnings because the engine refuses to guess at run time anyway.

use super::sync_config::{SyncConfig, TargetField, Transform};
use crate::SyncError;
use std::collections::{BTreeMap, HashSet};

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Validate a sync configuration
pub fn validate_config(config: &SyncConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if !is_http_url(&config.source.url) {
        errors.push(ValidationError::new(
            "source.url",
            format!("Invalid JIRA URL: {}", config.source.url),
        ));
    }
    if config.source.project.trim().is_empty() {
        errors.push(ValidationError::new(
            "source.project",
            "JIRA project key cannot be empty",
        ));
    }
    if !is_http_url(&config.target.url) {
        errors.push(ValidationError::new(
            "target.url",
            format!("Invalid GitHub URL: {}", config.target.url),
        ));
    }
    if config.target.owner.trim().is_empty() || config.target.repo.trim().is_empty() {
        errors.push(ValidationError::new(
            "target",
            "GitHub owner and repo must both be set",
        ));
    }
    if config.query.trim().is_empty() {
        errors.push(ValidationError::new("query", "Source query cannot be empty"));
    }
    if config.max_issues == 0 {
        errors.push(ValidationError::new(
            "max_issues",
            "Must be greater than 0",
        ));
    }

    if config.hierarchy.enabled {
        validate_levels(config, &mut errors);
    }

    for (i, mapping) in config.field_mappings.iter().enumerate() {
        let field = format!("field_mappings[{}]", i);
        if mapping.source.trim().is_empty() {
            errors.push(ValidationError::new(&field, "Source path cannot be empty"));
        }
        match &mapping.transform {
            Some(Transform::Template { template }) if template.is_empty() => {
                errors.push(ValidationError::new(&field, "Template cannot be empty"));
            }
            Some(Transform::Lookup { table, default }) if table.is_empty() && default.is_none() => {
                errors.push(ValidationError::new(
                    &field,
                    "Lookup table needs at least one entry or a default",
                ));
            }
            Some(Transform::Custom { function }) if function.trim().is_empty() => {
                errors.push(ValidationError::new(&field, "Custom function name cannot be empty"));
            }
            _ => {}
        }
        if mapping.target == TargetField::Title
            && config
                .field_mappings
                .iter()
                .filter(|m| m.target == TargetField::Title)
                .count()
                > 1
        {
            errors.push(ValidationError::new(&field, "Only one mapping may target the title"));
        }
    }

    if config.column_label_prefix.is_empty()
        && config.status_map.values().any(|t| t.target_column.is_some())
    {
        errors.push(ValidationError::new(
            "column_label_prefix",
            "A prefix is required when any status maps to a column",
        ));
    }

    if config.import.enabled && config.import.label.trim().is_empty() {
        errors.push(ValidationError::new(
            "import.label",
            "Import label cannot be empty when import is enabled",
        ));
    }

    for warning in ambiguous_reverse_entries(config) {
        tracing::warn!("{}", warning);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_levels(config: &SyncConfig, errors: &mut Vec<ValidationError>) {
    let levels = &config.hierarchy.levels;
    if levels.is_empty() {
        errors.push(ValidationError::new(
            "hierarchy.levels",
            "At least one level must be defined when hierarchy is enabled",
        ));
        return;
    }

    let mut names = HashSet::new();
    let mut owners: BTreeMap<String, &str> = BTreeMap::new();
    for level in levels {
        if !names.insert(level.name.to_lowercase()) {
            errors.push(ValidationError::new(
                "hierarchy.levels",
                format!("Duplicate level name: {}", level.name),
            ));
        }
        for status in &level.statuses {
            if let Some(previous) = owners.insert(status.to_lowercase(), &level.name) {
                errors.push(ValidationError::new(
                    "hierarchy.levels",
                    format!(
                        "Status '{}' belongs to both '{}' and '{}'",
                        status, previous, level.name
                    ),
                ));
            }
        }
    }
}

/// Human-readable notes for target values that invert to several statuses
pub fn ambiguous_reverse_entries(config: &SyncConfig) -> Vec<String> {
    let mut by_state: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    let mut by_column: BTreeMap<String, Vec<&str>> = BTreeMap::new();

    for (status, target) in config.status_map.iter().filter(|(_, t)| t.is_enabled()) {
        if let Some(column) = &target.target_column {
            by_column.entry(column.clone()).or_default().push(status);
        } else if let Some(state) = target.target_state {
            by_state.entry(state.to_string()).or_default().push(status);
        }
    }

    let describe = |kind: &str, map: BTreeMap<String, Vec<&str>>| {
        map.into_iter()
            .filter(|(_, statuses)| statuses.len() > 1)
            .map(|(value, statuses)| {
                format!(
                    "Target {} '{}' maps back to several statuses ({}); reverse sync will skip it",
                    kind,
                    value,
                    statuses.join(", ")
                )
            })
            .collect::<Vec<_>>()
    };

    let mut notes = describe("column", by_column);
    notes.extend(describe("state", by_state));
    notes
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &SyncConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        SyncError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        FieldMapping, GitHubConfig, JiraConfig, LevelConfig, StatusTarget,
    };
    use crate::integrations::retry::RetryConfig;
    use crate::model::IssueState;

    fn base_config() -> SyncConfig {
        SyncConfig::new(
            JiraConfig {
                url: "https://jira.example.com".to_string(),
                project: "PROJ".to_string(),
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
            "project = PROJ",
        )
    }

    fn level(name: &str, statuses: &[&str]) -> LevelConfig {
        LevelConfig {
            name: name.to_string(),
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            sync: true,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_invalid_urls_and_empty_query() {
        let mut config = base_config();
        config.source.url = "jira.example.com".to_string();
        config.query = "  ".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.field == "source.url"));
        assert!(errors.iter().any(|e| e.field == "query"));
    }

    #[test]
    fn test_hierarchy_levels_checked_only_when_enabled() {
        let mut config = base_config();
        config.hierarchy.levels = vec![level("task", &["Ready"]), level("Task", &["Ready"])];
        assert!(validate_config(&config).is_ok());

        config.hierarchy.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("Duplicate level name")));
        assert!(errors.iter().any(|e| e.message.contains("belongs to both")));

        config.hierarchy.levels.clear();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].message.contains("At least one level"));
    }

    #[test]
    fn test_empty_lookup_rejected() {
        let mut config = base_config();
        config.field_mappings.push(FieldMapping {
            source: "fields.priority.name".to_string(),
            target: TargetField::Labels,
            name: None,
            transform: Some(Transform::Lookup {
                table: BTreeMap::new(),
                default: None,
            }),
        });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "field_mappings[0]");
    }

    #[test]
    fn test_ambiguous_reverse_entries() {
        let mut config = base_config();
        let open = StatusTarget {
            target_state: Some(IssueState::Open),
            ..Default::default()
        };
        config.status_map.insert("A".to_string(), open.clone());
        config.status_map.insert("B".to_string(), open);
        config.status_map.insert(
            "Done".to_string(),
            StatusTarget {
                target_state: Some(IssueState::Closed),
                ..Default::default()
            },
        );

        let notes = ambiguous_reverse_entries(&config);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("'open'"));
        assert!(notes[0].contains("A, B"));
        // Ambiguity alone never fails validation
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_config_result_message() {
        let mut config = base_config();
        config.max_issues = 0;
        let err = validate_config_result(&config).unwrap_err();
        assert!(err.to_string().contains("max_issues: Must be greater than 0"));
    }
}
