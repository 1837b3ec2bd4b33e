//! Configuration system
//!
//! Loads the YAML sync configuration and checks it statically before any
//! remote call is made:
//! - Source (JIRA) and target (GitHub) connection settings
//! - Forward status table and board-column label convention
//! - Hierarchy level table and link model
//! - Field mappings and required-field declarations

mod sync_config;
pub mod validation;

pub use sync_config::{
    CommentConfig, FieldMapping, FieldType, GitHubConfig, HierarchyConfig, ImportConfig,
    JiraConfig, LevelConfig, LinkModel, RequiredField, StatusTarget, SyncConfig, SyncDirection,
    TargetField, Transform, ValidationConfig,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
