//! Hidden sync markers for free-text issue bodies
//!
//! Issue trackers rarely offer a key/value slot for integration state, so sync
//! state rides along inside the issue body (or comment body) as an HTML comment
//! wrapping canonical JSON. Markdown renderers hide the block; the codec in this
//! crate finds it again.
//!
//! # Example
//!
//! ```
//! use syncmark::SyncMetadata;
//!
//! let meta = SyncMetadata::new("PROJ-1", "2024-01-01T10:00:00.000+0000", "abc123");
//! let body = syncmark::inject("Narrative text", &meta)?;
//!
//! assert!(body.starts_with("Narrative text"));
//! assert_eq!(syncmark::extract(&body), Some(meta));
//! # Ok::<(), syncmark::Error>(())
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Opening delimiter of the issue metadata block
pub const METADATA_START: &str = "<!-- issue-mirror:metadata";

/// Closing delimiter of the issue metadata block
pub const METADATA_END: &str = "issue-mirror:end -->";

/// Opening delimiter of a comment trailer
pub const COMMENT_START: &str = "<!-- issue-mirror:comment";

/// Closing delimiter of a comment trailer
pub const COMMENT_END: &str = "-->";

/// Errors raised by the strict codec entry points
#[derive(Error, Debug)]
pub enum Error {
    #[error("Marker start found without a matching end delimiter")]
    Unterminated,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sync state persisted inside a mirrored issue body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Key of the canonical record in the source store
    pub source_id: String,

    /// Source `updated` timestamp at the time of the last write (opaque string)
    pub source_updated: String,

    /// When the mirror was last written
    pub last_sync: DateTime<Utc>,

    /// Canonical hash of the source fields relevant to change detection
    #[serde(alias = "sync_hash")]
    pub content_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_source_id: Option<String>,

    /// Target issue number of the parent mirror, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_target_ref: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_source_ids: Vec<String>,

    /// Browse URL of the source record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_link: Option<String>,

    /// Labels the last write derived from source fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_labels: Vec<String>,
}

impl SyncMetadata {
    /// Create metadata stamped with the current time
    pub fn new(
        source_id: impl Into<String>,
        source_updated: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_updated: source_updated.into(),
            last_sync: Utc::now(),
            content_hash: content_hash.into(),
            hierarchy_level: None,
            parent_source_id: None,
            parent_target_ref: None,
            child_source_ids: Vec::new(),
            original_link: None,
            managed_labels: Vec::new(),
        }
    }

    pub fn with_hierarchy_level(mut self, level: impl Into<String>) -> Self {
        self.hierarchy_level = Some(level.into());
        self
    }

    pub fn with_parent(mut self, source_id: Option<String>, target_ref: Option<u64>) -> Self {
        self.parent_source_id = source_id;
        self.parent_target_ref = target_ref;
        self
    }

    pub fn with_children(mut self, children: Vec<String>) -> Self {
        self.child_source_ids = children;
        self
    }

    pub fn with_original_link(mut self, link: impl Into<String>) -> Self {
        self.original_link = Some(link.into());
        self
    }

    pub fn with_managed_labels(mut self, labels: Vec<String>) -> Self {
        self.managed_labels = labels;
        self
    }

    /// Render the delimited block (start delimiter, pretty JSON, end delimiter)
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string_pretty(self)?;
        Ok(format!("{}\n{}\n{}", METADATA_START, json, METADATA_END))
    }
}

/// Locate the last `start .. end` block in `text`, end delimiter included
fn locate(text: &str, start: &str, end: &str) -> Option<Range<usize>> {
    let begin = text.rfind(start)?;
    let json_from = begin + start.len();
    let end_offset = text[json_from..].find(end)?;
    Some(begin..json_from + end_offset + end.len())
}

/// JSON payload between the delimiters of a located block
fn payload<'a>(text: &'a str, range: &Range<usize>, start: &str, end: &str) -> &'a str {
    text[range.start + start.len()..range.end - end.len()].trim()
}

/// Extract metadata, reporting why extraction failed
///
/// Returns `Ok(None)` when the body carries no block at all.
pub fn try_extract(body: &str) -> Result<Option<SyncMetadata>> {
    if !body.contains(METADATA_START) {
        return Ok(None);
    }
    let range = locate(body, METADATA_START, METADATA_END).ok_or(Error::Unterminated)?;
    let json = payload(body, &range, METADATA_START, METADATA_END);
    Ok(Some(serde_json::from_str(json)?))
}

/// Extract metadata from an issue body
///
/// Scans for the last start delimiter. Malformed or truncated blocks yield
/// `None`; this never fails.
pub fn extract(body: &str) -> Option<SyncMetadata> {
    try_extract(body).ok().flatten()
}

/// Embed metadata into a body
///
/// An existing block is replaced in place and the surrounding text is kept
/// byte for byte. Otherwise the block is appended after a blank line.
pub fn inject(body: &str, meta: &SyncMetadata) -> Result<String> {
    let block = meta.encode()?;

    if let Some(range) = locate(body, METADATA_START, METADATA_END) {
        let mut out = String::with_capacity(body.len() + block.len());
        out.push_str(&body[..range.start]);
        out.push_str(&block);
        out.push_str(&body[range.end..]);
        return Ok(out);
    }

    if body.is_empty() {
        return Ok(block);
    }

    let separator = if body.ends_with("\n\n") {
        ""
    } else if body.ends_with('\n') {
        "\n"
    } else {
        "\n\n"
    };
    Ok(format!("{}{}{}", body, separator, block))
}

/// Remove the metadata block, returning only the narrative text
pub fn strip(body: &str) -> String {
    match locate(body, METADATA_START, METADATA_END) {
        Some(range) => {
            let before = body[..range.start].trim_end();
            let after = body[range.end..].trim_start();
            if after.is_empty() {
                before.to_string()
            } else if before.is_empty() {
                after.to_string()
            } else {
                format!("{}\n\n{}", before, after)
            }
        }
        None => body.to_string(),
    }
}

/// Split a body into its narrative and (fail-open) metadata
pub fn split(body: &str) -> (String, Option<SyncMetadata>) {
    (strip(body), extract(body))
}

/// Which side of the sync a comment was copied from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Source,
    Target,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Source => write!(f, "source"),
            Origin::Target => write!(f, "target"),
        }
    }
}

/// Provenance trailer appended to every mirrored comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentMarker {
    /// Side the original comment lives on
    pub synced_from: Origin,

    /// Id of the original comment on that side
    pub source_comment_id: String,

    pub content_hash: String,

    pub synced_at: DateTime<Utc>,
}

impl CommentMarker {
    pub fn new(
        synced_from: Origin,
        source_comment_id: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            synced_from,
            source_comment_id: source_comment_id.into(),
            content_hash: content_hash.into(),
            synced_at: Utc::now(),
        }
    }

    /// Render the single-line trailer
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{} {} {}", COMMENT_START, json, COMMENT_END))
    }

    /// Whether this trailer marks a copy of `comment_id` taken from `origin`
    pub fn references(&self, origin: Origin, comment_id: &str) -> bool {
        self.synced_from == origin && self.source_comment_id == comment_id
    }
}

/// Parse the trailer of a comment body (last occurrence, fail-open)
pub fn parse_comment_marker(body: &str) -> Option<CommentMarker> {
    let range = locate(body, COMMENT_START, COMMENT_END)?;
    serde_json::from_str(payload(body, &range, COMMENT_START, COMMENT_END)).ok()
}

/// Whether a comment body carries a sync trailer (i.e. is itself a copy)
pub fn has_comment_marker(body: &str) -> bool {
    parse_comment_marker(body).is_some()
}

/// Append a trailer to a rendered comment body
pub fn append_comment_marker(body: &str, marker: &CommentMarker) -> Result<String> {
    Ok(format!("{}\n\n{}", body.trim_end(), marker.encode()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyncMetadata {
        SyncMetadata::new("PROJ-7", "2024-03-01T09:15:00.000+0000", "deadbeef")
            .with_hierarchy_level("story")
            .with_parent(Some("PROJ-1".to_string()), Some(12))
            .with_children(vec!["PROJ-8".to_string(), "PROJ-9".to_string()])
            .with_original_link("https://jira.example.com/browse/PROJ-7")
            .with_managed_labels(vec!["priority: High".to_string()])
    }

    #[test]
    fn test_round_trip() {
        let meta = sample();
        let body = inject("Some *markdown* body\n\n- item", &meta).unwrap();
        assert_eq!(extract(&body), Some(meta));
    }

    #[test]
    fn test_empty_managed_labels_not_written() {
        let meta = SyncMetadata::new("X-1", "t", "h");
        assert!(!meta.encode().unwrap().contains("managed_labels"));

        let meta = meta.with_managed_labels(vec!["priority: Low".to_string()]);
        let body = inject("", &meta).unwrap();
        assert_eq!(extract(&body).unwrap().managed_labels, vec!["priority: Low"]);
    }

    #[test]
    fn test_inject_into_empty_body() {
        let meta = sample();
        let body = inject("", &meta).unwrap();
        assert!(body.starts_with(METADATA_START));
        assert_eq!(extract(&body), Some(meta));
    }

    #[test]
    fn test_reinject_replaces_only_the_block() {
        let first = sample();
        let body = inject("Intro paragraph", &first).unwrap();
        let body = format!("{}\n\nTrailing notes added by a human", body);

        let mut second = sample();
        second.content_hash = "cafebabe".to_string();
        let updated = inject(&body, &second).unwrap();

        assert!(updated.starts_with("Intro paragraph\n\n"));
        assert!(updated.ends_with("\n\nTrailing notes added by a human"));
        assert_eq!(updated.matches(METADATA_START).count(), 1);
        assert_eq!(extract(&updated).unwrap().content_hash, "cafebabe");
    }

    #[test]
    fn test_extract_uses_last_block() {
        let meta = sample();
        let body = format!(
            "Quoted example: {} {{\"not\": \"json\"\n\n{}",
            METADATA_START,
            meta.encode().unwrap()
        );
        assert_eq!(extract(&body), Some(meta));
    }

    #[test]
    fn test_malformed_json_fails_open() {
        let body = format!("text\n{}\n{{ broken json\n{}", METADATA_START, METADATA_END);
        assert_eq!(extract(&body), None);
        assert!(try_extract(&body).is_err());
    }

    #[test]
    fn test_unterminated_block_fails_open() {
        let body = format!("text\n{}\n{{}}", METADATA_START);
        assert_eq!(extract(&body), None);
        assert!(matches!(try_extract(&body), Err(Error::Unterminated)));
    }

    #[test]
    fn test_no_block() {
        assert_eq!(extract("plain body"), None);
        assert!(try_extract("plain body").unwrap().is_none());
    }

    #[test]
    fn test_sync_hash_alias() {
        let body = format!(
            "{}\n{{\"source_id\":\"X-1\",\"source_updated\":\"t\",\"last_sync\":\"2024-01-01T00:00:00Z\",\"sync_hash\":\"h\"}}\n{}",
            METADATA_START, METADATA_END
        );
        let meta = extract(&body).unwrap();
        assert_eq!(meta.content_hash, "h");
        assert!(meta.child_source_ids.is_empty());
        assert!(meta.managed_labels.is_empty());
    }

    #[test]
    fn test_strip_and_split() {
        let meta = sample();
        let body = inject("Narrative", &meta).unwrap();
        assert_eq!(strip(&body), "Narrative");

        let (narrative, parsed) = split(&body);
        assert_eq!(narrative, "Narrative");
        assert_eq!(parsed, Some(meta));
        assert_eq!(strip("no block here"), "no block here");
    }

    #[test]
    fn test_comment_marker_round_trip() {
        let marker = CommentMarker::new(Origin::Source, "10042", "abc");
        let body = append_comment_marker("**alice** wrote:\n\nLooks good", &marker).unwrap();

        assert!(has_comment_marker(&body));
        let parsed = parse_comment_marker(&body).unwrap();
        assert_eq!(parsed, marker);
        assert!(parsed.references(Origin::Source, "10042"));
        assert!(!parsed.references(Origin::Target, "10042"));
    }

    #[test]
    fn test_comment_without_marker() {
        assert!(!has_comment_marker("Just a human comment <!-- not ours -->"));
        assert_eq!(parse_comment_marker(""), None);
    }
}
