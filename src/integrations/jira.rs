//! JIRA Integration Adapter
//!
//! Source store backed by the JIRA Cloud REST API v3.

use super::adf;
use super::retry::{with_retry, RetryConfig};
use super::store::{SearchResult, SourceStore, Transition};
use crate::config::JiraConfig;
use crate::error::parse_retry_after;
use crate::model::{CommentRecord, IssueLink, LinkDirection, NewSourceIssue, Origin, SourceIssue};
use crate::{Result, SyncError};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Per-request timeout for search/query operations (large result sets)
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single issue fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// JIRA caps search pages at 100 issues
const SEARCH_PAGE_SIZE: u32 = 100;

/// How requests authenticate
#[derive(Debug, Clone)]
enum JiraAuth {
    /// Cloud: account email + API token
    Basic { email: String, token: String },
    /// Server/Data Center personal access token
    Bearer(String),
}

/// JIRA API client
pub struct JiraAdapter {
    client: Client,
    config: JiraConfig,
    base_url: String,
    auth: Option<JiraAuth>,
}

/// Raw JIRA issue: typed identity plus the untouched field map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraIssue {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraSearchResponse {
    #[serde(default)]
    total: u32,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraStatus {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraTransition {
    pub id: String,
    pub name: String,
    pub to: JiraStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraTransitionsResponse {
    transitions: Vec<JiraTransition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraUser {
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "accountId", default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraComment {
    pub id: String,
    /// ADF document (v3) or plain text (v2 / Server)
    pub body: Value,
    #[serde(default)]
    pub author: Option<JiraUser>,
    #[serde(default)]
    pub created: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraCommentsResponse {
    #[serde(default)]
    comments: Vec<JiraComment>,
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraCreated {
    key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraKeyRef {
    key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraLinkType {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct JiraIssueLink {
    #[serde(rename = "type")]
    link_type: JiraLinkType,
    #[serde(rename = "inwardIssue", default)]
    inward_issue: Option<JiraKeyRef>,
    #[serde(rename = "outwardIssue", default)]
    outward_issue: Option<JiraKeyRef>,
}

impl JiraIssue {
    fn str_field(&self, name: &str) -> Option<String> {
        self.fields.get(name).and_then(Value::as_str).map(str::to_string)
    }

    fn named_field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Convert to the engine's source issue view
    pub fn into_source_issue(self, browse_base: &str) -> SourceIssue {
        let summary = self.str_field("summary").unwrap_or_default();
        let status = self.named_field("status").unwrap_or_default();
        let updated = self.str_field("updated").unwrap_or_default();

        let mut issue = SourceIssue::new(&self.key, summary, status, updated)
            .with_url(format!("{}/browse/{}", browse_base, self.key));

        issue.description = self
            .fields
            .get("description")
            .filter(|v| !v.is_null())
            .map(adf::to_markdown);
        issue.issue_type = self.named_field("issuetype");
        issue.labels = self
            .fields
            .get("labels")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        issue.parent = self
            .fields
            .get("parent")
            .and_then(|p| p.get("key"))
            .and_then(Value::as_str)
            .map(str::to_string);
        issue.subtasks = self
            .fields
            .get("subtasks")
            .and_then(Value::as_array)
            .map(|tasks| {
                tasks
                    .iter()
                    .filter_map(|t| t.get("key").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if let Some(links) = self.fields.get("issuelinks") {
            let links: Vec<JiraIssueLink> =
                serde_json::from_value(links.clone()).unwrap_or_default();
            issue.links = links
                .into_iter()
                .filter_map(|link| match (link.inward_issue, link.outward_issue) {
                    (Some(other), _) => Some(IssueLink::new(
                        link.link_type.name,
                        LinkDirection::Inward,
                        other.key,
                    )),
                    (None, Some(other)) => Some(IssueLink::new(
                        link.link_type.name,
                        LinkDirection::Outward,
                        other.key,
                    )),
                    (None, None) => None,
                })
                .collect();
        }

        issue.fields = self.fields;
        issue
    }
}

impl JiraComment {
    fn into_record(self) -> CommentRecord {
        let author = self
            .author
            .map(|a| a.display_name)
            .unwrap_or_else(|| "Unknown".to_string());
        CommentRecord::new(self.id, author, adf::to_markdown(&self.body), Origin::Source)
            .with_created(self.created)
    }
}

impl JiraAdapter {
    /// Create a new JIRA adapter
    ///
    /// Credentials are read from the configured environment variables. A
    /// missing token leaves the adapter unauthenticated.
    pub fn new(config: JiraConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let base_url = format!("{}/rest/api/3", config.url.trim_end_matches('/'));

        let token = std::env::var(config.token_env.trim_start_matches('$')).ok();
        let email = config
            .email_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var.trim_start_matches('$')).ok());
        let auth = match (email, token) {
            (Some(email), Some(token)) => Some(JiraAuth::Basic { email, token }),
            (None, Some(token)) => Some(JiraAuth::Bearer(token)),
            _ => None,
        };

        Ok(Self {
            client,
            config,
            base_url,
            auth,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(JiraAuth::Bearer(token.into()));
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }

    pub fn project(&self) -> &str {
        &self.config.project
    }

    fn browse_base(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn retry(&self) -> &RetryConfig {
        &self.config.retry
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let request = self.client.request(method, url);
        match &self.auth {
            Some(JiraAuth::Basic { email, token }) => request.basic_auth(email, Some(token)),
            Some(JiraAuth::Bearer(token)) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Map non-success responses onto the error taxonomy
    async fn check(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Integration(
                format!("JIRA authentication failed during {}", what),
            )),
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(what.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok());
                Err(SyncError::RateLimited(parse_retry_after(retry_after)))
            }
            status => {
                let error_body = response.text().await.unwrap_or_default();
                Err(SyncError::Integration(format!(
                    "JIRA API error during {}: HTTP {}: {}",
                    what, status, error_body
                )))
            }
        }
    }

    async fn search_page(
        &self,
        jql: &str,
        fields: &str,
        start_at: u32,
        max_results: u32,
    ) -> Result<JiraSearchResponse> {
        let params = [
            ("jql", jql.to_string()),
            ("fields", fields.to_string()),
            ("startAt", start_at.to_string()),
            ("maxResults", max_results.to_string()),
        ];
        let response = self
            .request(Method::GET, "/search")
            .query(&params)
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, "search").await?.json().await?)
    }

    /// Search with JQL, following `startAt` pagination up to `limit` issues
    pub async fn search(&self, jql: &str, fields: &[String], limit: u32) -> Result<SearchResult> {
        let fields = fields.join(",");
        let mut issues = Vec::new();
        let mut total = 0;

        debug!(jql = %jql, limit, "Searching JIRA issues");

        while (issues.len() as u32) < limit {
            let start_at = issues.len() as u32;
            let page_size = SEARCH_PAGE_SIZE.min(limit - start_at);
            let page = with_retry(self.retry(), "jira.search", || {
                self.search_page(jql, &fields, start_at, page_size)
            })
            .await?;

            total = page.total;
            let returned = page.issues.len();
            issues.extend(
                page.issues
                    .into_iter()
                    .map(|issue| issue.into_source_issue(self.browse_base())),
            );

            if returned == 0 || issues.len() as u32 >= total {
                break;
            }
        }

        info!(total, returned = issues.len(), "JIRA search complete");
        Ok(SearchResult { issues, total })
    }

    async fn fetch_issue(&self, key: &str, fields: &str) -> Result<JiraIssue> {
        let response = self
            .request(Method::GET, &format!("/issue/{}", key))
            .query(&[("fields", fields)])
            .timeout(GET_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, &format!("issue {}", key)).await?.json().await?)
    }

    async fn fetch_transitions(&self, key: &str) -> Result<Vec<JiraTransition>> {
        let response = self
            .request(Method::GET, &format!("/issue/{}/transitions", key))
            .timeout(GET_TIMEOUT)
            .send()
            .await?;
        let result: JiraTransitionsResponse = Self::check(response, &format!("transitions of {}", key))
            .await?
            .json()
            .await?;
        Ok(result.transitions)
    }

    async fn post_transition(&self, key: &str, transition_id: &str) -> Result<()> {
        let body = json!({ "transition": { "id": transition_id } });
        let response = self
            .request(Method::POST, &format!("/issue/{}/transitions", key))
            .json(&body)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        Self::check(response, &format!("transition of {}", key)).await?;
        Ok(())
    }

    async fn fetch_comments(&self, key: &str, start_at: u32) -> Result<JiraCommentsResponse> {
        let response = self
            .request(Method::GET, &format!("/issue/{}/comment", key))
            .query(&[("startAt", start_at.to_string()), ("maxResults", "100".to_string())])
            .timeout(GET_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, &format!("comments of {}", key))
            .await?
            .json()
            .await?)
    }

    async fn post_comment(&self, key: &str, markdown: &str) -> Result<JiraComment> {
        let body = json!({ "body": adf::from_markdown(markdown) });
        let response = self
            .request(Method::POST, &format!("/issue/{}/comment", key))
            .json(&body)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, &format!("comment on {}", key))
            .await?
            .json()
            .await?)
    }

    async fn post_issue(&self, body: &Value) -> Result<JiraCreated> {
        let response = self
            .request(Method::POST, "/issue")
            .json(body)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        Ok(Self::check(response, "issue creation").await?.json().await?)
    }

    async fn put_parent(&self, child: &str, parent: &str) -> Result<()> {
        let body = json!({ "fields": { "parent": { "key": parent } } });
        let response = self
            .request(Method::PUT, &format!("/issue/{}", child))
            .json(&body)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        Self::check(response, &format!("parent update of {}", child)).await?;
        Ok(())
    }

    async fn post_link(&self, child: &str, parent: &str, link_type: &str) -> Result<()> {
        let body = json!({
            "type": { "name": link_type },
            "inwardIssue": { "key": parent },
            "outwardIssue": { "key": child },
        });
        let response = self
            .request(Method::POST, "/issueLink")
            .json(&body)
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;
        Self::check(response, &format!("link {} -> {}", child, parent)).await?;
        Ok(())
    }
}

#[async_trait]
impl SourceStore for JiraAdapter {
    async fn search_issues(&self, query: &str, fields: &[String], limit: u32) -> Result<SearchResult> {
        self.search(query, fields, limit).await
    }

    async fn get_issue(&self, id: &str, fields: &[String]) -> Result<SourceIssue> {
        let fields = fields.join(",");
        debug!(key = %id, "Fetching JIRA issue");
        let issue = with_retry(self.retry(), "jira.get_issue", || self.fetch_issue(id, &fields)).await?;
        Ok(issue.into_source_issue(self.browse_base()))
    }

    async fn get_transitions(&self, id: &str) -> Result<Vec<Transition>> {
        let transitions =
            with_retry(self.retry(), "jira.get_transitions", || self.fetch_transitions(id)).await?;
        Ok(transitions
            .into_iter()
            .map(|t| Transition {
                id: t.id,
                name: t.name,
                to_status: t.to.name,
            })
            .collect())
    }

    async fn apply_transition(&self, id: &str, transition_id: &str) -> Result<()> {
        info!(key = %id, transition_id = %transition_id, "Transitioning JIRA issue");
        with_retry(self.retry(), "jira.transition", || {
            self.post_transition(id, transition_id)
        })
        .await
    }

    async fn get_comments(&self, id: &str) -> Result<Vec<CommentRecord>> {
        let mut comments = Vec::new();
        loop {
            let start_at = comments.len() as u32;
            let page = with_retry(self.retry(), "jira.get_comments", || {
                self.fetch_comments(id, start_at)
            })
            .await?;
            let returned = page.comments.len();
            comments.extend(page.comments.into_iter().map(JiraComment::into_record));
            if returned == 0 || comments.len() as u32 >= page.total {
                break;
            }
        }
        Ok(comments)
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<String> {
        info!(key = %id, "Adding comment to JIRA issue");
        let comment = with_retry(self.retry(), "jira.add_comment", || self.post_comment(id, body)).await?;
        Ok(comment.id)
    }

    async fn create_issue(&self, issue: &NewSourceIssue) -> Result<String> {
        let mut fields = json!({
            "project": { "key": self.config.project },
            "summary": issue.summary,
            "issuetype": { "name": issue.issue_type },
            "labels": issue.labels,
        });
        if let Some(description) = &issue.description {
            fields["description"] = adf::from_markdown(description);
        }
        let body = json!({ "fields": fields });

        info!(project = %self.config.project, summary = %issue.summary, "Creating JIRA issue");
        let created = with_retry(self.retry(), "jira.create_issue", || self.post_issue(&body)).await?;
        info!(key = %created.key, "JIRA issue created");
        Ok(created.key)
    }

    async fn create_link(&self, child_id: &str, parent_id: &str, relation: &str) -> Result<()> {
        info!(child = %child_id, parent = %parent_id, relation = %relation, "Linking JIRA issues");
        if relation.eq_ignore_ascii_case("parent") {
            with_retry(self.retry(), "jira.set_parent", || {
                self.put_parent(child_id, parent_id)
            })
            .await
        } else {
            with_retry(self.retry(), "jira.create_link", || {
                self.post_link(child_id, parent_id, relation)
            })
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JiraConfig {
        JiraConfig {
            url: "https://jira.example.com/".to_string(),
            project: "TEST".to_string(),
            token_env: "ISSUE_MIRROR_TEST_UNSET_TOKEN".to_string(),
            email_env: None,
            retry: RetryConfig::disabled(),
        }
    }

    #[test]
    fn test_adapter_creation() {
        let adapter = JiraAdapter::new(test_config()).expect("Failed to create adapter");
        assert_eq!(adapter.project(), "TEST");
        assert_eq!(adapter.base_url, "https://jira.example.com/rest/api/3");
        assert!(!adapter.is_authenticated());
        assert!(adapter.with_token("t").is_authenticated());
    }

    #[test]
    fn test_issue_conversion() {
        let raw = json!({
            "id": "10001",
            "key": "TEST-7",
            "fields": {
                "summary": "Fix login",
                "status": { "name": "In Progress", "id": "3" },
                "updated": "2024-02-01T10:00:00.000+0000",
                "issuetype": { "name": "Story" },
                "labels": ["roadmap"],
                "description": {
                    "type": "doc", "version": 1,
                    "content": [{ "type": "paragraph", "content": [{ "type": "text", "text": "Details" }] }]
                },
                "parent": { "key": "TEST-1" },
                "subtasks": [{ "key": "TEST-8" }],
                "issuelinks": [
                    { "type": { "name": "Parent-Child" }, "inwardIssue": { "key": "TEST-2" } },
                    { "type": { "name": "Relates" }, "outwardIssue": { "key": "TEST-9" } }
                ],
                "customfield_10010": { "value": "Platform" }
            }
        });
        let issue: JiraIssue = serde_json::from_value(raw).unwrap();
        let issue = issue.into_source_issue("https://jira.example.com");

        assert_eq!(issue.id, "TEST-7");
        assert_eq!(issue.status, "In Progress");
        assert_eq!(issue.description.as_deref(), Some("Details"));
        assert_eq!(issue.issue_type.as_deref(), Some("Story"));
        assert_eq!(issue.parent.as_deref(), Some("TEST-1"));
        assert_eq!(issue.subtasks, vec!["TEST-8".to_string()]);
        assert_eq!(issue.links.len(), 2);
        assert_eq!(issue.links[0].direction, LinkDirection::Inward);
        assert_eq!(issue.links[1].issue, "TEST-9");
        assert_eq!(issue.url.as_deref(), Some("https://jira.example.com/browse/TEST-7"));
        assert_eq!(
            issue.field("fields.customfield_10010.value"),
            Some(json!("Platform"))
        );
    }

    #[test]
    fn test_comment_conversion() {
        let raw = json!({
            "id": "500",
            "body": { "type": "doc", "content": [{ "type": "paragraph", "content": [{ "type": "text", "text": "hi" }] }] },
            "author": { "displayName": "Ada Lovelace", "accountId": "abc" },
            "created": "2024-02-01T10:00:00.000+0000"
        });
        let comment: JiraComment = serde_json::from_value(raw).unwrap();
        let record = comment.into_record();
        assert_eq!(record.author, "Ada Lovelace");
        assert_eq!(record.body, "hi");
        assert_eq!(record.origin, Origin::Source);
    }
}
