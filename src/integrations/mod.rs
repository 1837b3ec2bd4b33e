//! External Integrations
//!
//! Store adapters the reconciliation engine runs against.
//!
//! # Built-in Stores
//!
//! - **JIRA**: REST API v3 adapter, the source store
//! - **GitHub**: REST API adapter, the target store
//! - **Memory**: in-process stores for tests and offline demos
//! - **Dry run**: wrappers that pass reads through and skip writes
//!
//! Every remote call goes through [`retry::with_retry`], so rate limits and
//! transient 5xx responses are absorbed before the engine sees an error.

pub mod adf;
pub mod dry_run;
pub mod github;
pub mod jira;
pub mod memory;
pub mod retry;
pub mod store;

pub use dry_run::{DryRunSource, DryRunTarget, PLACEHOLDER_TARGET_BASE};
pub use github::{
    CreateIssueRequest, GitHubAdapter, GitHubComment, GitHubIssue, GitHubLabel, GitHubUser,
    UpdateIssueRequest,
};
pub use jira::{JiraAdapter, JiraComment, JiraIssue, JiraStatus, JiraTransition, JiraUser};
pub use memory::{MemorySourceStore, MemoryTargetStore};
pub use retry::{with_retry, RetryConfig, RetryDecision, RetryableError};
pub use store::{SearchResult, SourceStore, TargetStore, Transition};
