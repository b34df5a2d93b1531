//! Routes a free-text question to tag search or semantic search.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::enrichment::{
    EnrichmentService, FunctionCall, FUNC_SEARCH_BY_TAG_NAME, FUNC_SEMANTIC_SEARCH,
};

use super::{
    backend::{HybridMatch, MatchedBookmark, RemoteIndex},
    errors::AppError,
};

/// Similarity cut-off for semantic search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MatchThreshold {
    Low,
    #[default]
    Medium,
    High,
}

impl MatchThreshold {
    pub fn value(self) -> f32 {
        match self {
            MatchThreshold::Low => 0.5,
            MatchThreshold::Medium => 0.65,
            MatchThreshold::High => 0.78,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Classified {
    #[serde(rename_all = "camelCase")]
    TagSearch { tag_name: String },
    SemanticSearch { text: String },
}

/// Uniform answer shape. `success` is reported apart from `data`, so an empty
/// result set is distinguishable from a failed search.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub success: bool,
    pub data: Vec<MatchedBookmark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Classified>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn string_arg(call: &FunctionCall, key: &str) -> Option<String> {
    call.args
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Map the classifier's function call onto a route. Anything unresolvable
/// falls back to semantic search over the raw question.
pub fn resolve(call: Option<&FunctionCall>, question: &str) -> Classified {
    let fallback = || Classified::SemanticSearch {
        text: question.to_string(),
    };

    let Some(call) = call else {
        return fallback();
    };

    match call.name.as_str() {
        FUNC_SEARCH_BY_TAG_NAME => match string_arg(call, "tagName") {
            Some(tag_name) => Classified::TagSearch { tag_name },
            None => {
                log::warn!("tag search proposed without a tag name, falling back");
                fallback()
            }
        },
        FUNC_SEMANTIC_SEARCH => string_arg(call, "textSearch")
            .map(|text| Classified::SemanticSearch { text })
            .unwrap_or_else(fallback),
        other => {
            log::warn!("unknown function {other:?} proposed, falling back");
            fallback()
        }
    }
}

pub struct QueryDispatcher {
    enrichment: Arc<dyn EnrichmentService>,
    remote: Arc<dyn RemoteIndex>,
    match_count: usize,
}

impl QueryDispatcher {
    pub fn new(
        enrichment: Arc<dyn EnrichmentService>,
        remote: Arc<dyn RemoteIndex>,
        match_count: usize,
    ) -> Self {
        Self {
            enrichment,
            remote,
            match_count,
        }
    }

    /// Never fails: a failed classification request takes the fallback route.
    pub fn classify(&self, question: &str) -> Classified {
        let call = match self.enrichment.classify(question) {
            Ok(call) => call,
            Err(err) => {
                log::warn!("classification failed, using semantic search: {err}");
                None
            }
        };

        resolve(call.as_ref(), question)
    }

    pub fn execute(
        &self,
        classified: &Classified,
        user_id: &str,
        threshold: MatchThreshold,
    ) -> Result<Vec<MatchedBookmark>, AppError> {
        match classified {
            Classified::TagSearch { tag_name } => {
                log::info!("searching bookmarks by tag {tag_name:?}");
                self.remote.search_by_tag(user_id, tag_name)
            }
            Classified::SemanticSearch { text } => {
                log::info!("semantic search at threshold {}", threshold.value());
                let query_embedding = self.enrichment.embed(text)?;
                self.remote.match_hybrid(HybridMatch {
                    query_text: text.clone(),
                    query_embedding,
                    match_count: self.match_count,
                    user_id: user_id.to_string(),
                    match_threshold: threshold.value(),
                })
            }
        }
    }

    pub fn ask(&self, user_id: &str, question: &str, threshold: MatchThreshold) -> AskResponse {
        let classified = self.classify(question);

        match self.execute(&classified, user_id, threshold) {
            Ok(data) => AskResponse {
                success: true,
                data,
                route: Some(classified),
                error: None,
            },
            Err(err) => {
                log::error!("search failed: {err}");
                AskResponse {
                    success: false,
                    data: vec![],
                    route: Some(classified),
                    error: Some(err.to_string()),
                }
            }
        }
    }
}
