use serde_json::{json, Value};

use super::mocks::{Classification, Harness, MockEnrichment, USER_ID};
use crate::{
    app::{dispatcher::MatchThreshold, dispatcher::QueryDispatcher, task_runner::TaskQueue},
    web,
};

struct Daemon {
    base: String,
    client: reqwest::Client,
    queue: TaskQueue,
}

async fn spawn_daemon(h: &Harness) -> Daemon {
    let (queue, _handle) = TaskQueue::start(h.other_session());
    let dispatcher = QueryDispatcher::new(
        MockEnrichment::with_classification(Classification::NoCall),
        h.remote.clone(),
        10,
    );
    let app = web::router(
        queue.clone(),
        dispatcher,
        h.store.clone(),
        MatchThreshold::Medium,
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Daemon {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        queue,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sign_in_then_sync_created_bookmark() {
    let h = Harness::signed_out();
    let daemon = spawn_daemon(&h).await;

    let resp = daemon
        .client
        .post(format!("{}/api/user", daemon.base))
        .json(&json!({"id": USER_ID, "access_token": "t"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(h.store.require_user().unwrap().access_token.as_deref(), Some("t"));

    let resp = daemon
        .client
        .post(format!("{}/api/bookmarks/created", daemon.base))
        .json(&json!({"id": "10", "url": "https://a.example", "title": "a", "parentId": "1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    // queued behind the creation event
    let report: Value = daemon
        .client
        .post(format!("{}/api/sync", daemon.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["report"], "drain");
    assert_eq!(report["outcome"], "empty");

    assert!(h.remote.entry("https://a.example").is_some());

    let status: Value = daemon
        .client
        .get(format!("{}/api/sync/status", daemon.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"]["state"], "idle");
    assert_eq!(status["pending"], json!([]));

    daemon.queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_init_returns_pending_count() {
    let h = Harness::new();
    let daemon = spawn_daemon(&h).await;

    let resp: Value = daemon
        .client
        .post(format!("{}/api/sync/init", daemon.base))
        .json(&json!({"tree": [{"id": "1", "title": "bar", "children": [
            {"id": "10", "parentId": "1", "title": "a", "url": "https://a.example"},
            {"id": "11", "parentId": "1", "title": "b", "url": "https://b.example"}
        ]}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp, json!({"pending": 2}));
    assert_eq!(h.remote.count("upsert"), 0);

    daemon.queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ask_requires_sign_in() {
    let h = Harness::signed_out();
    let daemon = spawn_daemon(&h).await;

    let resp = daemon
        .client
        .post(format!("{}/api/ask", daemon.base))
        .json(&json!({"question": "rust"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    daemon.queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ask_uses_requested_threshold() {
    let h = Harness::new();
    let daemon = spawn_daemon(&h).await;

    let resp: Value = daemon
        .client
        .post(format!("{}/api/ask", daemon.base))
        .json(&json!({"question": "rust", "threshold": "low"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp["success"], true);
    assert_eq!(resp["data"], json!([]));
    assert_eq!(h.remote.hybrid_queries.lock().unwrap()[0].match_threshold, 0.5);

    daemon.queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reset_returns_previous_status() {
    let h = Harness::new();
    h.store
        .set_status(&crate::app::state::SyncStatus::Running {
            session: crate::eid::Eid::new(),
            started_at: chrono::Utc::now(),
        })
        .unwrap();
    let daemon = spawn_daemon(&h).await;

    let previous: Value = daemon
        .client
        .post(format!("{}/api/sync/reset", daemon.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(previous["state"], "running");
    assert!(!h.store.status().unwrap().is_running());

    daemon.queue.shutdown();
}
