use std::{collections::HashSet, fmt::Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::enrichment::KeyInfo;

use super::errors::AppError;

/// Remote primary key. Kept as raw json so both bigint and uuid tables work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub serde_json::Value);

impl Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            serde_json::Value::String(s) => write!(f, "{s}"),
            other => write!(f, "{other}"),
        }
    }
}

/// pgvector columns come back as `"[0.1,0.2]"` through the rest layer, while
/// rpc results and our own writes use plain json arrays. Accept both.
pub fn deserialize_embedding<'de, D>(deserializer: D) -> Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Array(Vec<f32>),
        Text(String),
        Null(()),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Array(values) => Ok(values),
        Repr::Null(()) => Ok(vec![]),
        Repr::Text(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
    }
}

/// Enrichment already paid for by an existing entry with the same url.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReusableEnrichment {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_info: KeyInfo,
    #[serde(default, deserialize_with = "deserialize_embedding")]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRemoteEntry {
    pub user_id: String,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub key_info: KeyInfo,
    pub embedding: Vec<f32>,
    pub browser_bookmark_id: String,
    pub is_delete: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteBookmarkEntry {
    pub id: RemoteId,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_info: KeyInfo,
    #[serde(default, deserialize_with = "deserialize_embedding")]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub browser_bookmark_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub is_delete: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A row returned by the tag or hybrid search procedures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedBookmark {
    pub id: RemoteId,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_info: Option<KeyInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridMatch {
    pub query_text: String,
    pub query_embedding: Vec<f32>,
    pub match_count: usize,
    #[serde(rename = "user_id_param")]
    pub user_id: String,
    pub match_threshold: f32,
}

/// The hosted bookmark table plus its stored procedures.
pub trait RemoteIndex: Send + Sync {
    /// Urls of the user's active (not soft-deleted) entries.
    fn active_urls(&self, user_id: &str) -> Result<HashSet<String>, AppError>;

    /// Point read of any entry for `url`, used to reuse its enrichment.
    fn find_by_url(&self, url: &str) -> Result<Option<ReusableEnrichment>, AppError>;

    /// Conditional insert keyed on `(user_id, url)`: inserts, or revives and
    /// overwrites the existing row. Returns the stored row.
    fn upsert(&self, entry: NewRemoteEntry) -> Result<RemoteBookmarkEntry, AppError>;

    fn associate_tags(
        &self,
        bookmark_id: &RemoteId,
        user_id: &str,
        tags: &[String],
    ) -> Result<(), AppError>;

    /// Flags the entries of a local bookmark as deleted. Returns rows flagged.
    fn soft_delete(&self, browser_bookmark_id: &str, user_id: &str) -> Result<usize, AppError>;

    fn search_by_tag(&self, user_id: &str, tag_name: &str)
        -> Result<Vec<MatchedBookmark>, AppError>;

    fn match_hybrid(&self, query: HybridMatch) -> Result<Vec<MatchedBookmark>, AppError>;
}
