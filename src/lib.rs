//! issue-mirror - batch reconciliation between a JIRA project and GitHub issues
//!
//! Each invocation runs one bounded pass: source issues are mirrored into the
//! target tracker with a hidden metadata block, target-side status changes
//! flow back as workflow transitions, and comments are cross-posted. All
//! state lives in the two stores; nothing is kept locally between runs.
//!
//! # Architecture
//!
//! - **model**: vendor-neutral issue and comment types
//! - **config**: YAML configuration and static checks
//! - **integrations**: JIRA/GitHub adapters, in-memory and dry-run stores
//! - **reconcile**: validation, mapping, hierarchy, status, comments, engine
//!
//! The metadata block codec lives in the `syncmark` crate.

pub mod config;
pub mod error;
pub mod integrations;
pub mod logging;
pub mod model;
pub mod reconcile;

// Re-exports
pub use error::{Result, SyncError};
