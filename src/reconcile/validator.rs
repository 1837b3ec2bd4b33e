//! Pre-flight field validation
//!
//! Runs once per invocation, before any write, against a small sample of the
//! source query. A required field that is missing or has an incompatible
//! shape means the configuration does not match the source store, so the
//! whole run is refused rather than failing issue by issue.

use crate::config::{FieldType, RequiredField, SyncConfig};
use crate::integrations::SourceStore;
use crate::model::SourceIssue;
use crate::Result;
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

/// A required field that failed on one sampled issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub issue_id: String,
    pub field: String,
    pub expected: FieldType,
    /// Observed JSON shape; `None` when the field is missing or empty
    pub actual: Option<String>,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "{}: {} expected {}, found {}",
                self.issue_id, self.field, self.expected, actual
            ),
            None => write!(
                f,
                "{}: {} expected {}, missing",
                self.issue_id, self.field, self.expected
            ),
        }
    }
}

/// Outcome of a validation pass
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldError>,
    pub warnings: Vec<String>,
    /// Number of issues inspected
    pub sampled: usize,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            writeln!(f, "Validation passed ({} issue(s) sampled)", self.sampled)?;
        } else {
            writeln!(
                f,
                "Validation failed: {} error(s) across {} sampled issue(s)",
                self.errors.len(),
                self.sampled
            )?;
        }
        for error in &self.errors {
            writeln!(f, "  error: {}", error)?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {}", warning)?;
        }
        Ok(())
    }
}

/// JSON shape name used in error messages
fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_date(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z").is_ok()
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

/// Compatibility table between declared types and observed JSON values
pub fn is_compatible(expected: FieldType, value: &Value) -> bool {
    match (expected, value) {
        (_, Value::Null) => false,
        (FieldType::Any, _) => true,
        (FieldType::String, Value::String(_)) => true,
        (FieldType::Number, Value::Number(_)) => true,
        (FieldType::Number, Value::String(s)) => s.trim().parse::<f64>().is_ok(),
        (FieldType::Boolean, Value::Bool(_)) => true,
        (FieldType::Date, Value::String(s)) => is_date(s),
        // Single select: option object, or a name already flattened to text
        (FieldType::Select, Value::Object(map)) => {
            map.contains_key("value") || map.contains_key("name")
        }
        (FieldType::Select, Value::String(_)) => true,
        (FieldType::Array, Value::Array(_)) => true,
        (FieldType::User, Value::Object(map)) => {
            map.contains_key("accountId")
                || map.contains_key("displayName")
                || map.contains_key("emailAddress")
        }
        (FieldType::Object, Value::Object(_)) => true,
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Checks declared field requirements against sampled issues
#[derive(Debug, Clone, Default)]
pub struct FieldValidator {
    required: Vec<RequiredField>,
    /// Paths read by field mappings; absence is only worth a warning
    mapped: Vec<String>,
}

impl FieldValidator {
    pub fn new(required: Vec<RequiredField>) -> Self {
        Self {
            required,
            mapped: Vec::new(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            required: config.validation.required_fields.clone(),
            mapped: config
                .field_mappings
                .iter()
                .map(|m| m.source.clone())
                .collect(),
        }
    }

    /// Validate already-fetched issues
    pub fn validate(&self, issues: &[SourceIssue]) -> ValidationReport {
        let mut report = ValidationReport {
            sampled: issues.len(),
            ..Default::default()
        };

        if issues.is_empty() {
            report
                .warnings
                .push("Source query returned no issues; nothing to validate".to_string());
        }

        for issue in issues {
            for field in &self.required {
                match issue.field(&field.path) {
                    Some(value) if is_empty(&value) => {
                        if field.required {
                            report.errors.push(FieldError {
                                issue_id: issue.id.clone(),
                                field: field.path.clone(),
                                expected: field.field_type,
                                actual: None,
                            });
                        } else {
                            report
                                .warnings
                                .push(format!("{}: optional field {} is empty", issue.id, field.path));
                        }
                    }
                    Some(value) if !is_compatible(field.field_type, &value) => {
                        report.errors.push(FieldError {
                            issue_id: issue.id.clone(),
                            field: field.path.clone(),
                            expected: field.field_type,
                            actual: Some(shape(&value).to_string()),
                        });
                    }
                    Some(_) => {}
                    None if field.required => report.errors.push(FieldError {
                        issue_id: issue.id.clone(),
                        field: field.path.clone(),
                        expected: field.field_type,
                        actual: None,
                    }),
                    None => report
                        .warnings
                        .push(format!("{}: optional field {} is absent", issue.id, field.path)),
                }
            }
        }

        if !issues.is_empty() {
            for path in &self.mapped {
                if issues.iter().all(|issue| issue.field(path).is_none()) {
                    report.warnings.push(format!(
                        "Mapped field {} is absent on every sampled issue",
                        path
                    ));
                }
            }
        }

        report.valid = report.errors.is_empty();
        report
    }

    /// Fetch a sample from the source query and validate it
    pub async fn validate_sample(
        &self,
        source: &dyn SourceStore,
        config: &SyncConfig,
    ) -> Result<ValidationReport> {
        let sample = source
            .search_issues(
                &config.query,
                &config.source_fields(),
                config.validation.sample_size.max(1),
            )
            .await?;
        let report = self.validate(&sample.issues);

        if report.valid {
            info!(
                sampled = report.sampled,
                warnings = report.warnings.len(),
                "Field validation passed"
            );
        } else {
            for error in &report.errors {
                warn!(
                    issue = %error.issue_id,
                    field = %error.field,
                    expected = %error.expected,
                    actual = error.actual.as_deref().unwrap_or("missing"),
                    "Required field check failed"
                );
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn required(path: &str, field_type: FieldType) -> RequiredField {
        RequiredField {
            path: path.to_string(),
            field_type,
            required: true,
        }
    }

    fn issue() -> SourceIssue {
        SourceIssue::new("X-1", "Fix login", "Ready", "2024-01-01T00:00:00.000+0000")
            .with_field("customfield_1", json!({ "value": "Platform" }))
            .with_field("customfield_2", json!(["a"]))
            .with_field("customfield_3", json!({ "accountId": "u1", "displayName": "Ada" }))
            .with_field("customfield_4", json!("2024-05-01"))
            .with_field("customfield_5", Value::Null)
    }

    #[test]
    fn test_compatibility_table() {
        assert!(is_compatible(FieldType::Select, &json!({ "value": "x" })));
        assert!(!is_compatible(FieldType::Select, &json!(["x"])));
        assert!(is_compatible(FieldType::Array, &json!([])));
        assert!(is_compatible(FieldType::User, &json!({ "displayName": "Ada" })));
        assert!(!is_compatible(FieldType::User, &json!({ "name": "x" })));
        assert!(is_compatible(FieldType::Date, &json!("2024-01-01T00:00:00.000+0000")));
        assert!(is_compatible(FieldType::Date, &json!("2024-01-01")));
        assert!(!is_compatible(FieldType::Date, &json!("yesterday")));
        assert!(is_compatible(FieldType::Number, &json!("3.5")));
        assert!(!is_compatible(FieldType::Any, &Value::Null));
    }

    #[test]
    fn test_valid_sample() {
        let validator = FieldValidator::new(vec![
            required("fields.customfield_1", FieldType::Select),
            required("customfield_2", FieldType::Array),
            required("customfield_3", FieldType::User),
            required("customfield_4", FieldType::Date),
            required("summary", FieldType::String),
        ]);
        let report = validator.validate(&[issue()]);
        assert!(report.valid, "{}", report);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_and_mismatched_fields() {
        let validator = FieldValidator::new(vec![
            required("customfield_1", FieldType::Array),
            required("customfield_99", FieldType::String),
            required("customfield_5", FieldType::Select),
        ]);
        let report = validator.validate(&[issue()]);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.errors[0].actual.as_deref(), Some("object"));
        assert_eq!(report.errors[1].actual, None);
        assert_eq!(
            report.errors[1].to_string(),
            "X-1: customfield_99 expected string, missing"
        );
    }

    #[test]
    fn test_empty_optional_field_is_warning() {
        let validator = FieldValidator::new(vec![RequiredField {
            path: "customfield_5".to_string(),
            field_type: FieldType::String,
            required: false,
        }]);
        let report = validator.validate(&[issue()]);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_empty_sample_warns() {
        let report = FieldValidator::default().validate(&[]);
        assert!(report.valid);
        assert_eq!(report.sampled, 0);
        assert_eq!(report.warnings.len(), 1);
    }
}
