//! Field transformer engine
//!
//! Every configured mapping reads one source path and derives the value for
//! one target field. Derivation is a tagged variant dispatched through
//! [`TransformRegistry::apply`]; custom functions are registered in code under
//! a name, never loaded dynamically.

use crate::config::{FieldMapping, TargetField, Transform};
use crate::model::SourceIssue;
use crate::{Result, SyncError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A named value transform
pub trait ValueTransform: Send + Sync {
    fn apply(&self, input: &Value, issue: &SourceIssue) -> anyhow::Result<Value>;
}

impl<F> ValueTransform for F
where
    F: Fn(&Value, &SourceIssue) -> anyhow::Result<Value> + Send + Sync,
{
    fn apply(&self, input: &Value, issue: &SourceIssue) -> anyhow::Result<Value> {
        self(input, issue)
    }
}

/// Flatten a field value to display text
///
/// Option objects render their `value` (or `name`/`displayName`), arrays
/// are joined with ", ", and null is empty.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => ["value", "name", "displayName", "key"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
    }
}

fn render_template(template: &str, value: &Value, issue: &SourceIssue) -> String {
    template
        .replace("{value}", &value_text(value))
        .replace("{key}", &issue.id)
        .replace("{summary}", &issue.summary)
        .replace("{status}", &issue.status)
}

/// Registry of custom transform functions
#[derive(Clone, Default)]
pub struct TransformRegistry {
    functions: HashMap<String, Arc<dyn ValueTransform>>,
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl TransformRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock functions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("uppercase", |v: &Value, _: &SourceIssue| -> anyhow::Result<Value> {
            Ok(Value::String(value_text(v).to_uppercase()))
        });
        registry.register("lowercase", |v: &Value, _: &SourceIssue| -> anyhow::Result<Value> {
            Ok(Value::String(value_text(v).to_lowercase()))
        });
        registry.register("slug", |v: &Value, _: &SourceIssue| -> anyhow::Result<Value> {
            let slug = value_text(v)
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("-");
            Ok(Value::String(slug))
        });
        registry.register("date", |v: &Value, _: &SourceIssue| -> anyhow::Result<Value> {
            let text = value_text(v);
            let date = text.get(..10).filter(|d| d.len() == 10).ok_or_else(|| {
                anyhow::anyhow!("'{}' is not a date", text)
            })?;
            Ok(Value::String(date.to_string()))
        });
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, transform: impl ValueTransform + 'static) {
        self.functions.insert(name.into(), Arc::new(transform));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Apply one transform kind to `input`; no transform passes the value through
    pub fn apply(
        &self,
        kind: Option<&Transform>,
        input: &Value,
        issue: &SourceIssue,
    ) -> Result<Value> {
        match kind {
            None => Ok(input.clone()),
            Some(Transform::Template { template }) => {
                Ok(Value::String(render_template(template, input, issue)))
            }
            Some(Transform::Lookup { table, default }) => {
                let key = value_text(input);
                Ok(table
                    .get(&key)
                    .or(default.as_ref())
                    .map(|v| Value::String(v.clone()))
                    .unwrap_or(Value::Null))
            }
            Some(Transform::Custom { function }) => {
                let transform = self.functions.get(function).ok_or_else(|| {
                    SyncError::Transform(format!("Unknown transform function '{}'", function))
                })?;
                transform.apply(input, issue).map_err(|e| {
                    SyncError::Transform(format!("{} failed on {}: {}", function, issue.id, e))
                })
            }
        }
    }
}

/// Target field values derived from the mappings for one issue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedFields {
    pub title: Option<String>,
    /// Replacement for the description
    pub body: Option<String>,
    /// `(name, value)` lines appended to the body
    pub sections: Vec<(String, String)>,
    pub labels: Vec<String>,
}

impl MappedFields {
    /// Build all mapped values for `issue`
    ///
    /// A mapping whose source path is absent, or whose value ends up empty,
    /// contributes nothing.
    pub fn build(
        issue: &SourceIssue,
        mappings: &[FieldMapping],
        registry: &TransformRegistry,
    ) -> Result<Self> {
        let mut mapped = Self::default();

        for mapping in mappings {
            let input = issue.field(&mapping.source).unwrap_or(Value::Null);
            let value = registry.apply(mapping.transform.as_ref(), &input, issue)?;

            let values: Vec<String> = match &value {
                Value::Array(items) => items.iter().map(value_text).collect(),
                other => vec![value_text(other)],
            };
            let values: Vec<String> = values
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                debug!(issue = %issue.id, source = %mapping.source, "Mapping produced no value");
                continue;
            }

            match mapping.target {
                TargetField::Title => mapped.title = Some(values.join(", ")),
                TargetField::Body => mapped.body = Some(values.join(", ")),
                TargetField::Section => {
                    let name = mapping
                        .name
                        .clone()
                        .unwrap_or_else(|| mapping.source.clone());
                    mapped.sections.push((name, values.join(", ")));
                }
                TargetField::Labels => {
                    for label in values {
                        if !mapped.labels.contains(&label) {
                            mapped.labels.push(label);
                        }
                    }
                }
            }
        }

        Ok(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn issue() -> SourceIssue {
        SourceIssue::new("X-1", "Fix login", "Ready", "2024-01-01T00:00:00.000+0000")
            .with_field("priority", json!({ "name": "Highest", "id": "1" }))
            .with_field("customfield_1", json!({ "value": "Platform" }))
            .with_field("components", json!([{ "name": "auth" }, { "name": "web" }]))
    }

    fn mapping(source: &str, target: TargetField, transform: Option<Transform>) -> FieldMapping {
        FieldMapping {
            source: source.to_string(),
            target,
            name: None,
            transform,
        }
    }

    #[test]
    fn test_template_placeholders() {
        let registry = TransformRegistry::new();
        let value = registry
            .apply(
                Some(&Transform::Template {
                    template: "[{key}] {summary} ({value})".to_string(),
                }),
                &json!({ "value": "Platform" }),
                &issue(),
            )
            .unwrap();
        assert_eq!(value, json!("[X-1] Fix login (Platform)"));
    }

    #[test]
    fn test_lookup_with_default() {
        let registry = TransformRegistry::new();
        let mut table = BTreeMap::new();
        table.insert("Highest".to_string(), "priority: high".to_string());
        let lookup = Transform::Lookup {
            table: table.clone(),
            default: Some("priority: normal".to_string()),
        };
        assert_eq!(
            registry.apply(Some(&lookup), &json!({ "name": "Highest" }), &issue()).unwrap(),
            json!("priority: high")
        );
        assert_eq!(
            registry.apply(Some(&lookup), &json!("Low"), &issue()).unwrap(),
            json!("priority: normal")
        );

        let strict = Transform::Lookup { table, default: None };
        assert_eq!(
            registry.apply(Some(&strict), &json!("Low"), &issue()).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_custom_functions() {
        let mut registry = TransformRegistry::with_builtins();
        registry.register("team_label", |v: &Value, _: &SourceIssue| -> anyhow::Result<Value> {
            Ok(json!(format!("team: {}", value_text(v))))
        });

        let custom = |name: &str| Transform::Custom {
            function: name.to_string(),
        };
        assert_eq!(
            registry.apply(Some(&custom("team_label")), &json!({ "value": "Core" }), &issue()).unwrap(),
            json!("team: Core")
        );
        assert_eq!(
            registry.apply(Some(&custom("slug")), &json!("Fix The Login!"), &issue()).unwrap(),
            json!("fix-the-login")
        );

        let err = registry
            .apply(Some(&custom("date")), &json!("soon"), &issue())
            .unwrap_err();
        assert!(err.to_string().contains("date failed on X-1"));
        assert!(registry.apply(Some(&custom("nope")), &json!(1), &issue()).is_err());
    }

    #[test]
    fn test_build_mapped_fields() {
        let registry = TransformRegistry::with_builtins();
        let mut table = BTreeMap::new();
        table.insert("Highest".to_string(), "priority: high".to_string());

        let mut team = mapping("fields.customfield_1", TargetField::Section, None);
        team.name = Some("Team".to_string());
        let mappings = vec![
            team,
            mapping(
                "priority",
                TargetField::Labels,
                Some(Transform::Lookup { table, default: None }),
            ),
            mapping("components", TargetField::Labels, None),
            mapping("customfield_missing", TargetField::Section, None),
        ];

        let mapped = MappedFields::build(&issue(), &mappings, &registry).unwrap();
        assert_eq!(mapped.sections, vec![("Team".to_string(), "Platform".to_string())]);
        assert_eq!(mapped.labels, vec!["priority: high", "auth", "web"]);
        assert_eq!(mapped.title, None);
    }
}
