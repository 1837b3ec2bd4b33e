//! GitHub Issues Integration Adapter
//!
//! Target store backed by the GitHub REST API. Mirrors carry their sync
//! metadata inside the issue body; board columns and hierarchy levels are
//! carried as prefixed labels.

use super::retry::{with_retry, RetryConfig};
use super::store::TargetStore;
use crate::config::GitHubConfig;
use crate::error::parse_retry_after;
use crate::model::{CommentRecord, IssueState, NewTargetIssue, Origin, TargetIssue, TargetUpdate};
use crate::{Result, SyncError};
use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Per-request timeout for paged listings
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single issue fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// GitHub caps list pages at 100 items
const PAGE_SIZE: u32 = 100;
/// Color for labels the mirror creates
const DEFAULT_LABEL_COLOR: &str = "ededed";

/// GitHub API client
pub struct GitHubAdapter {
    client: Client,
    config: GitHubConfig,
    rest_base_url: String,
    auth_token: Option<String>,
    /// Label names known to exist in the repository
    known_labels: Mutex<Option<HashSet<String>>>,
}

/// GitHub issue (REST API format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    pub html_url: String,
    /// Present only when the "issue" is a pull request
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubComment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: Option<GitHubUser>,
    pub created_at: String,
}

/// Issue creation request
#[derive(Debug, Clone, Serialize)]
pub struct CreateIssueRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

/// Issue update request
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateIssueRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
struct CreateCommentRequest {
    body: String,
}

#[derive(Debug, Clone, Serialize)]
struct CreateLabelRequest {
    name: String,
    color: String,
}

impl GitHubIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn into_target_issue(self) -> TargetIssue {
        let state = IssueState::parse(&self.state).unwrap_or_default();
        let mut issue = TargetIssue::new(self.number, self.title)
            .with_body(self.body.unwrap_or_default())
            .with_labels(self.labels.into_iter().map(|l| l.name).collect())
            .with_state(state);
        issue.url = Some(self.html_url);
        issue
    }
}

impl GitHubComment {
    fn into_record(self) -> CommentRecord {
        let author = self
            .user
            .map(|u| u.login)
            .unwrap_or_else(|| "ghost".to_string());
        CommentRecord::new(
            self.id.to_string(),
            author,
            self.body.unwrap_or_default(),
            Origin::Target,
        )
        .with_created(self.created_at)
    }
}

impl GitHubAdapter {
    /// Create a new GitHub adapter
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static("issue-mirror/0.4"),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/vnd.github.v3+json"),
                );
                headers
            })
            .build()?;

        let base_url = config.url.trim_end_matches('/');
        let rest_base_url =
            if base_url.contains("github.com") && !base_url.contains("api.github.com") {
                "https://api.github.com".to_string()
            } else if base_url.contains("api.github.com") {
                base_url.to_string()
            } else {
                format!("{}/api/v3", base_url)
            };

        let auth_token = std::env::var(config.token_env.trim_start_matches('$')).ok();

        Ok(Self {
            client,
            config,
            rest_base_url,
            auth_token,
            known_labels: Mutex::new(None),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn owner(&self) -> &str {
        &self.config.owner
    }

    pub fn repo(&self) -> &str {
        &self.config.repo
    }

    fn retry(&self) -> &RetryConfig {
        &self.config.retry
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.rest_base_url, self.config.owner, self.config.repo, path
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, self.repo_url(path));
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(SyncError::Integration(
                "GitHub authentication failed".to_string(),
            )),
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(what.to_string())),
            // Secondary rate limits come back as 403 with Retry-After
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
                if response.headers().contains_key("retry-after")
                    || response
                        .headers()
                        .get("x-ratelimit-remaining")
                        .and_then(|v| v.to_str().ok())
                        == Some("0") =>
            {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok());
                Err(SyncError::RateLimited(parse_retry_after(retry_after)))
            }
            status => {
                let error_body = response.text().await.unwrap_or_default();
                Err(SyncError::Integration(format!(
                    "GitHub API error during {}: HTTP {}: {}",
                    what, status, error_body
                )))
            }
        }
    }

    async fn list_issues_page(&self, page: u32) -> Result<Vec<GitHubIssue>> {
        let response = self
            .request(Method::GET, "/issues")
            .query(&[
                ("state", "all".to_string()),
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ])
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, "issue listing").await?.json().await?)
    }

    async fn fetch_issue(&self, number: u64) -> Result<GitHubIssue> {
        let response = self
            .request(Method::GET, &format!("/issues/{}", number))
            .timeout(GET_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, &format!("#{}", number))
            .await?
            .json()
            .await?)
    }

    async fn post_issue(&self, request: &CreateIssueRequest) -> Result<GitHubIssue> {
        let response = self
            .request(Method::POST, "/issues")
            .json(request)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, "issue creation").await?.json().await?)
    }

    async fn patch_issue(&self, number: u64, request: &UpdateIssueRequest) -> Result<GitHubIssue> {
        let response = self
            .request(Method::PATCH, &format!("/issues/{}", number))
            .json(request)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, &format!("#{}", number))
            .await?
            .json()
            .await?)
    }

    async fn list_comments_page(&self, number: u64, page: u32) -> Result<Vec<GitHubComment>> {
        let response = self
            .request(Method::GET, &format!("/issues/{}/comments", number))
            .query(&[("per_page", PAGE_SIZE), ("page", page)])
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, &format!("comments of #{}", number))
            .await?
            .json()
            .await?)
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<GitHubComment> {
        let request = CreateCommentRequest {
            body: body.to_string(),
        };
        let response = self
            .request(Method::POST, &format!("/issues/{}/comments", number))
            .json(&request)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, &format!("comment on #{}", number))
            .await?
            .json()
            .await?)
    }

    async fn list_labels_page(&self, page: u32) -> Result<Vec<GitHubLabel>> {
        let response = self
            .request(Method::GET, "/labels")
            .query(&[("per_page", PAGE_SIZE), ("page", page)])
            .timeout(LIST_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, "label listing").await?.json().await?)
    }

    async fn label_exists(&self, name: &str) -> Result<bool> {
        let path = format!("/labels/{}", urlencoding::encode(name));
        let response = self
            .request(Method::GET, &path)
            .timeout(GET_TIMEOUT)
            .send()
            .await?;
        match Self::check(response, &format!("label '{}'", name)).await {
            Ok(_) => Ok(true),
            Err(SyncError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn post_label(&self, name: &str) -> Result<()> {
        let request = CreateLabelRequest {
            name: name.to_string(),
            color: DEFAULT_LABEL_COLOR.to_string(),
        };
        let response = self
            .request(Method::POST, "/labels")
            .json(&request)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        // 422 means someone created it between our listing and now
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY && self.label_exists(name).await? {
            return Ok(());
        }
        Self::check(response, &format!("label '{}'", name)).await?;
        Ok(())
    }

    async fn load_labels(&self) -> Result<HashSet<String>> {
        let mut labels = HashSet::new();
        let mut page = 1;
        loop {
            let batch = with_retry(self.retry(), "github.list_labels", || {
                self.list_labels_page(page)
            })
            .await?;
            let returned = batch.len();
            labels.extend(batch.into_iter().map(|l| l.name));
            if returned < PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        debug!(count = labels.len(), "Loaded GitHub labels");
        Ok(labels)
    }
}

#[async_trait]
impl TargetStore for GitHubAdapter {
    async fn get_all_issues(&self) -> Result<Vec<TargetIssue>> {
        let mut issues = Vec::new();
        let mut page = 1;
        loop {
            let batch = with_retry(self.retry(), "github.list_issues", || {
                self.list_issues_page(page)
            })
            .await?;
            let returned = batch.len();
            issues.extend(
                batch
                    .into_iter()
                    .filter(|issue| !issue.is_pull_request())
                    .map(GitHubIssue::into_target_issue),
            );
            if returned < PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        info!(
            owner = %self.config.owner,
            repo = %self.config.repo,
            count = issues.len(),
            "Listed GitHub issues"
        );
        Ok(issues)
    }

    async fn get_issue_by_number(&self, number: u64) -> Result<TargetIssue> {
        debug!(number, "Fetching GitHub issue");
        let issue = with_retry(self.retry(), "github.get_issue", || self.fetch_issue(number)).await?;
        Ok(issue.into_target_issue())
    }

    async fn create_issue(&self, issue: &NewTargetIssue) -> Result<u64> {
        let body = match &issue.metadata {
            Some(meta) => syncmark::inject(&issue.body, meta)?,
            None => issue.body.clone(),
        };
        let request = CreateIssueRequest {
            title: issue.title.clone(),
            body: Some(body),
            labels: (!issue.labels.is_empty()).then(|| issue.labels.clone()),
        };

        info!(repo = %self.config.repo, title = %request.title, "Creating GitHub issue");
        let created = with_retry(self.retry(), "github.create_issue", || {
            self.post_issue(&request)
        })
        .await?;
        info!(number = created.number, "GitHub issue created");
        Ok(created.number)
    }

    async fn update_issue(&self, number: u64, update: &TargetUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        // Metadata without a new narrative is embedded into the live body
        let body = if update.body.is_none() && update.metadata.is_some() {
            let current = self.get_issue_by_number(number).await?;
            update.resolve_body(&current.body)?
        } else {
            update.resolve_body("")?
        };

        let request = UpdateIssueRequest {
            title: update.title.clone(),
            body,
            state: update.state.map(|s| s.as_str().to_string()),
            labels: update.labels.clone(),
        };

        info!(number, "Updating GitHub issue");
        with_retry(self.retry(), "github.update_issue", || {
            self.patch_issue(number, &request)
        })
        .await?;
        Ok(())
    }

    async fn get_comments(&self, number: u64) -> Result<Vec<CommentRecord>> {
        let mut comments = Vec::new();
        let mut page = 1;
        loop {
            let batch = with_retry(self.retry(), "github.get_comments", || {
                self.list_comments_page(number, page)
            })
            .await?;
            let returned = batch.len();
            comments.extend(batch.into_iter().map(GitHubComment::into_record));
            if returned < PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        Ok(comments)
    }

    async fn add_comment(&self, number: u64, body: &str) -> Result<String> {
        info!(number, "Adding comment to GitHub issue");
        let comment = with_retry(self.retry(), "github.add_comment", || {
            self.post_comment(number, body)
        })
        .await?;
        Ok(comment.id.to_string())
    }

    async fn ensure_labels_exist(&self, labels: &[String]) -> Result<()> {
        let mut known = self.known_labels.lock().await;
        if known.is_none() {
            *known = Some(self.load_labels().await?);
        }
        let Some(known) = known.as_mut() else {
            return Ok(());
        };

        for label in labels {
            if known.contains(label) {
                continue;
            }
            info!(label = %label, "Creating GitHub label");
            with_retry(self.retry(), "github.create_label", || self.post_label(label)).await?;
            known.insert(label.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(url: &str) -> GitHubConfig {
        GitHubConfig {
            url: url.to_string(),
            owner: "test-org".to_string(),
            repo: "roadmap".to_string(),
            token_env: "ISSUE_MIRROR_TEST_UNSET_TOKEN".to_string(),
            retry: RetryConfig::disabled(),
        }
    }

    #[test]
    fn test_adapter_creation() {
        let adapter = GitHubAdapter::new(test_config("https://github.com"))
            .expect("Failed to create adapter");
        assert_eq!(adapter.owner(), "test-org");
        assert_eq!(adapter.repo(), "roadmap");
        assert_eq!(adapter.rest_base_url, "https://api.github.com");
        assert!(!adapter.is_authenticated());
        assert!(adapter.with_token("t").is_authenticated());
    }

    #[test]
    fn test_enterprise_urls() {
        let adapter = GitHubAdapter::new(test_config("https://github.example.com/"))
            .expect("Failed to create adapter");
        assert_eq!(adapter.rest_base_url, "https://github.example.com/api/v3");
        assert_eq!(
            adapter.repo_url("/issues/4"),
            "https://github.example.com/api/v3/repos/test-org/roadmap/issues/4"
        );
    }

    #[test]
    fn test_issue_conversion_and_pull_requests() {
        let raw = serde_json::json!({
            "number": 12,
            "title": "Fix login",
            "body": null,
            "state": "closed",
            "labels": [{ "name": "jira" }, { "name": "status: Done", "color": "ededed" }],
            "html_url": "https://github.com/test-org/roadmap/issues/12"
        });
        let issue: GitHubIssue = serde_json::from_value(raw).unwrap();
        assert!(!issue.is_pull_request());

        let issue = issue.into_target_issue();
        assert_eq!(issue.number, 12);
        assert!(issue.is_closed());
        assert_eq!(issue.body, "");
        assert_eq!(issue.label_value("status: "), Some("Done"));

        let pr: GitHubIssue = serde_json::from_value(serde_json::json!({
            "number": 13, "title": "PR", "state": "open",
            "html_url": "https://github.com/test-org/roadmap/pull/13",
            "pull_request": { "url": "x" }
        }))
        .unwrap();
        assert!(pr.is_pull_request());
    }

    #[test]
    fn test_update_request_skips_unset_fields() {
        let request = UpdateIssueRequest {
            state: Some("closed".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "closed" }));
    }
}
