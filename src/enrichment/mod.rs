//! Enrichment service: page summaries, embeddings and question classification.
//!
//! - `gemini`: HTTP client for the Gemini-style generateContent/embedContent API

pub mod gemini;

use serde::{Deserialize, Serialize};

use crate::app::errors::AppError;

pub use gemini::GeminiClient;

/// Function name the classifier picks for tag lookups.
pub const FUNC_SEARCH_BY_TAG_NAME: &str = "search_bookmarks_by_tag_name";
/// Function name the classifier picks for similarity lookups.
pub const FUNC_SEMANTIC_SEARCH: &str = "semantic_search_bookmarks";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub main_points: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_info: KeyInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_summarized: Option<bool>,
}

/// A function call proposed by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

pub trait EnrichmentService: Send + Sync {
    /// Summarize the page behind `url` and extract keywords and main points.
    fn summarize(&self, url: &str) -> Result<Summary, AppError>;

    /// Fixed-dimension embedding of `text`.
    fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;

    /// Pick a search function for `question`. `None` when the model answered
    /// without a function call.
    fn classify(&self, question: &str) -> Result<Option<FunctionCall>, AppError>;
}
