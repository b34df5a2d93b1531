use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{app::errors::AppError, config::EnrichmentConfig};

use super::{
    EnrichmentService, FunctionCall, KeyInfo, Summary, FUNC_SEARCH_BY_TAG_NAME,
    FUNC_SEMANTIC_SEARCH,
};

const SERVICE: &str = "enrichment";

const SYSTEM_INSTRUCTION: &str = "You extract information from web pages. The user gives you a URL. \
Analyse the page and return a summary, keywords and main points. \
If the page has no readable content (single page app, internal tool, login wall) set is_summarized to false.";

pub struct GeminiClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter())
            .into_iter()
            .flatten()
    }
}

impl GeminiClient {
    pub fn new(config: &EnrichmentConfig, api_key: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
        })
    }

    fn post(&self, model: &str, method: &str, payload: &Value) -> Result<Value, AppError> {
        let url = format!("{}/v1beta/models/{model}:{method}", self.base_url);
        log::debug!("POST {url}");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(payload)
            .send()?;

        handle_response(resp)
    }

    fn summarize_payload(url: &str) -> Value {
        let prompt = format!(
            "Extract the content of the web page at the URL below.\n\
             1. summary: a concise 3-5 sentence summary with the main points, overall topic and any conclusion.\n\
             2. keywords: the domains and core concepts of the page, e.g. Showbiz, Technology, ReactJs, Supabase.\n\
             3. main_points: 3-6 distinct, self-contained sentences the page wants to convey.\n\
             Answer in JSON, e.g. {{\"keywords\": [\"keyword1\"], \"main_points\": [\"point1\"]}}.\n\
             URL: {url}"
        );

        json!({
            "system_instruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "summary": { "type": "STRING" },
                        "key_info": {
                            "type": "OBJECT",
                            "properties": {
                                "keywords": { "type": "ARRAY", "items": { "type": "STRING" } },
                                "main_points": { "type": "ARRAY", "items": { "type": "STRING" } }
                            }
                        },
                        "is_summarized": { "type": "BOOLEAN" }
                    },
                    "required": ["summary", "key_info", "is_summarized"]
                }
            }
        })
    }

    fn classify_payload(question: &str) -> Value {
        let declarations = json!([
            {
                "name": FUNC_SEMANTIC_SEARCH,
                "description": "Semantic search over every bookmark related to the query",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "textSearch": {
                            "type": "string",
                            "description": "Text used to generate the embedding for the semantic search"
                        }
                    },
                    "required": ["textSearch"]
                }
            },
            {
                "name": FUNC_SEARCH_BY_TAG_NAME,
                "description": "Find the user's bookmarks by tag name; selects every bookmark whose keywords contain the tag",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "tagName": { "type": "string", "description": "tag name" }
                    },
                    "required": ["tagName"]
                }
            }
        ]);

        json!({
            "contents": [{ "role": "user", "parts": [{ "text": question }] }],
            "tools": { "functionDeclarations": declarations }
        })
    }
}

/// Non-2xx responses become [`AppError::Http`], using `error.message` when the
/// body carries one.
fn handle_response(resp: reqwest::blocking::Response) -> Result<Value, AppError> {
    let status = resp.status();
    let text = resp.text()?;

    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(text);
        log::error!("enrichment call failed: {status} {message}");
        return Err(AppError::Http {
            service: SERVICE,
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        err.into()
    })
}

impl EnrichmentService for GeminiClient {
    fn summarize(&self, url: &str) -> Result<Summary, AppError> {
        let resp = self.post(&self.model, "generateContent", &Self::summarize_payload(url))?;
        let resp: GenerateResponse = serde_json::from_value(resp)?;

        let text = resp.parts().find_map(|p| p.text.clone());
        match text.as_deref() {
            Some(text) => Ok(serde_json::from_str(text).map_err(|err| {
                AppError::Malformed(format!("summary is not valid json: {err}"))
            })?),
            None => {
                log::warn!("no summary candidate for {url}");
                Ok(Summary {
                    summary: String::new(),
                    key_info: KeyInfo::default(),
                    is_summarized: Some(false),
                })
            }
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let payload = json!({
            "model": format!("models/{}", self.embedding_model),
            "content": { "parts": [{ "text": text }] }
        });
        let resp = self.post(&self.embedding_model, "embedContent", &payload)?;
        let resp: EmbedResponse = serde_json::from_value(resp)
            .map_err(|err| AppError::Malformed(format!("embedding response: {err}")))?;

        if resp.embedding.values.is_empty() {
            return Err(AppError::Malformed("empty embedding".to_string()));
        }

        Ok(resp.embedding.values)
    }

    fn classify(&self, question: &str) -> Result<Option<FunctionCall>, AppError> {
        let resp = self.post(&self.model, "generateContent", &Self::classify_payload(question))?;
        let resp: GenerateResponse = serde_json::from_value(resp)?;

        let call = resp.parts().find_map(|p| p.function_call.clone());
        if call.is_none() {
            log::debug!("classifier answered without a function call");
        }

        Ok(call)
    }
}
