//! Reconciliation
//!
//! The pieces a sync run is made of, and the engine that drives them:
//!
//! - **validator**: pre-flight check of required source fields
//! - **transform**: field mappings and value transforms
//! - **hierarchy**: parent/child extraction, levels, checklists, depth guard
//! - **status**: forward and reverse status translation
//! - **comments**: comment cross-posting with loop prevention
//! - **hash**: change-detection hashes
//! - **engine**: the batch passes tying it together

pub mod comments;
pub mod engine;
pub mod hash;
pub mod hierarchy;
pub mod report;
pub mod status;
pub mod transform;
pub mod validator;

pub use comments::{CommentSyncManager, CommentSyncStats};
pub use engine::Reconciler;
pub use hash::{canonical_hash, comment_hash, content_hash, HashInput};
pub use hierarchy::{
    parent_reference, walk_parent_chain, ChainWalk, ChecklistEntry, HierarchyResolver,
    Relationships, MAX_HIERARCHY_DEPTH,
};
pub use report::{ImportReport, IssueError, RunReport, SourceToTargetReport, TargetToSourceReport};
pub use status::{Resolution, StatusOutcome, StatusReconciler};
pub use transform::{MappedFields, TransformRegistry, ValueTransform};
pub use validator::{FieldError, FieldValidator, ValidationReport};
