use std::{sync::Arc, time::Duration};

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::{
    app::{
        backend::{HybridMatch, NewRemoteEntry, RemoteId, RemoteIndex},
        errors::AppError,
        remote::AppRemote,
        state::{SyncStore, UserIdentity},
    },
    config::{EnrichmentConfig, RemoteConfig},
    enrichment::{EnrichmentService, GeminiClient, KeyInfo, FUNC_SEARCH_BY_TAG_NAME},
    storage::BackendMemory,
};

const TIMEOUT: Duration = Duration::from_secs(5);

// blocking clients are built and dropped off the async runtime
fn gemini(uri: &str) -> GeminiClient {
    let config = EnrichmentConfig {
        base_url: uri.to_string(),
        ..Default::default()
    };
    GeminiClient::new(&config, "gemini-key", TIMEOUT).unwrap()
}

fn remote(uri: &str, token: Option<&str>) -> AppRemote {
    let store = SyncStore::new(Arc::new(BackendMemory::new()));
    store
        .set_user(&UserIdentity {
            id: "user-1".to_string(),
            access_token: token.map(str::to_string),
        })
        .unwrap();

    let config = RemoteConfig {
        url: uri.to_string(),
        anon_key: String::new(),
    };
    AppRemote::new(&config, "anon-key", store, TIMEOUT).unwrap()
}

fn candidate_text(text: &str) -> serde_json::Value {
    json!({"candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]})
}

#[tokio::test(flavor = "multi_thread")]
async fn test_summarize_parses_structured_answer() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "gemini-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate_text(
            r#"{"summary": "s", "key_info": {"keywords": ["k1", "k2"], "main_points": ["p"]}, "is_summarized": true}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let summary = tokio::task::spawn_blocking(move || gemini(&uri).summarize("https://a.example"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.summary, "s");
    assert_eq!(summary.key_info.keywords, vec!["k1", "k2"]);
    assert_eq!(summary.is_summarized, Some(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_summarize_without_candidates() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let uri = server.uri();
    let summary = tokio::task::spawn_blocking(move || gemini(&uri).summarize("https://spa.example"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.summary, "");
    assert_eq!(summary.key_info, KeyInfo::default());
    assert_eq!(summary.is_summarized, Some(false));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_embed_returns_values() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/text-embedding-004:embedContent"))
        .and(body_partial_json(json!({"content": {"parts": [{"text": "s"}]}})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": {"values": [0.1, 0.2]}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let embedding = tokio::task::spawn_blocking(move || gemini(&uri).embed("s"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(embedding, vec![0.1, 0.2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_classify_picks_function_call() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": FUNC_SEARCH_BY_TAG_NAME, "args": {"tagName": "React"}}}
            ]}}]
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let call = tokio::task::spawn_blocking(move || gemini(&uri).classify("find my React bookmarks"))
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(call.name, FUNC_SEARCH_BY_TAG_NAME);
    assert_eq!(call.args["tagName"], "React");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_enrichment_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED"}
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || gemini(&uri).embed("s"))
        .await
        .unwrap()
        .unwrap_err();

    match err {
        AppError::Http {
            service,
            status,
            message,
        } => {
            assert_eq!(service, "enrichment");
            assert_eq!(status, 429);
            assert_eq!(message, "Resource has been exhausted");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_active_urls_sends_user_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookmarks"))
        .and(query_param("select", "url"))
        .and(query_param("user_id", "eq.user-1"))
        .and(query_param("is_delete", "eq.false"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"url": "https://a.example"},
            {"url": "https://b.example"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let urls = tokio::task::spawn_blocking(move || {
        remote(&uri, Some("user-token")).active_urls("user-1")
    })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(urls.len(), 2);
    assert!(urls.contains("https://a.example"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_find_by_url_accepts_text_vectors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookmarks"))
        .and(query_param("url", "eq.https://a.example"))
        .and(query_param("limit", "1"))
        .and(header("authorization", "Bearer anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"summary": "s", "key_info": {"keywords": ["k1"]}, "embedding": "[0.1,0.2]"}
        ])))
        .mount(&server)
        .await;

    let uri = server.uri();
    let found = tokio::task::spawn_blocking(move || remote(&uri, None).find_by_url("https://a.example"))
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(found.summary, "s");
    assert_eq!(found.key_info.keywords, vec!["k1"]);
    assert_eq!(found.embedding, vec![0.1, 0.2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upsert_and_tags() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/bookmarks"))
        .and(query_param("on_conflict", "user_id,url"))
        .and(header_exists("prefer"))
        .and(body_partial_json(json!([{
            "url": "https://a.example",
            "user_id": "user-1",
            "browser_bookmark_id": "10",
            "is_delete": false
        }])))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": 42,
            "url": "https://a.example",
            "title": "a",
            "summary": "s",
            "key_info": {"keywords": ["k1", "k2"], "main_points": []},
            "embedding": "[0.1,0.2]",
            "browser_bookmark_id": "10",
            "user_id": "user-1",
            "is_delete": false
        }])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/insert_bookmark_tags"))
        .and(body_partial_json(json!({
            "p_bookmark_id": 42,
            "p_user_id": "user-1",
            "p_tag_names": ["k1", "k2"]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let entry = tokio::task::spawn_blocking(move || {
        let client = remote(&uri, None);
        let entry = client.upsert(NewRemoteEntry {
            user_id: "user-1".to_string(),
            url: "https://a.example".to_string(),
            title: "a".to_string(),
            summary: "s".to_string(),
            key_info: KeyInfo {
                keywords: vec!["k1".to_string(), "k2".to_string()],
                main_points: vec![],
            },
            embedding: vec![0.1, 0.2],
            browser_bookmark_id: "10".to_string(),
            is_delete: false,
            updated_at: chrono::Utc::now(),
        })?;
        client.associate_tags(&entry.id, "user-1", &entry.key_info.keywords)?;
        Ok::<_, AppError>(entry)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(entry.id, RemoteId(json!(42)));
    assert_eq!(entry.embedding, vec![0.1, 0.2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_soft_delete_counts_rows() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/bookmarks"))
        .and(query_param("browser_bookmark_id", "eq.10"))
        .and(query_param("user_id", "eq.user-1"))
        .and(body_partial_json(json!({"is_delete": true})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let flagged = tokio::task::spawn_blocking(move || remote(&uri, None).soft_delete("10", "user-1"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(flagged, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_rpcs() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/get_bookmarks_by_tag_name"))
        .and(body_partial_json(json!({
            "tag_name_param": "React",
            "user_id_param": "user-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "url": "https://react.dev", "title": "React"}
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/match_bookmarks_hybrid"))
        .and(body_partial_json(json!({
            "query_text": "react hooks",
            "match_count": 10,
            "user_id_param": "user-1",
            "match_threshold": 0.5
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .mount(&server)
        .await;

    let uri = server.uri();
    let (tagged, matched) = tokio::task::spawn_blocking(move || {
        let client = remote(&uri, None);
        let tagged = client.search_by_tag("user-1", "React")?;
        let matched = client.match_hybrid(HybridMatch {
            query_text: "react hooks".to_string(),
            query_embedding: vec![0.1, 0.2],
            match_count: 10,
            user_id: "user-1".to_string(),
            match_threshold: 0.5,
        })?;
        Ok::<_, AppError>((tagged, matched))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].url, "https://react.dev");
    assert!(matched.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_error_message() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "PGRST301",
            "message": "JWT expired"
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let err = tokio::task::spawn_blocking(move || remote(&uri, Some("stale")).active_urls("user-1"))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Http { service: "remote index", status: 401, ref message } if message == "JWT expired"
    ));
}
