use crate::{
    app::{
        dispatcher::{AskResponse, MatchThreshold, QueryDispatcher},
        state::{SyncStatus, SyncStore, UserIdentity},
        task_runner::{Task, TaskQueue, TaskReport},
        AppContext, AppError,
    },
    bookmarks::{BookmarkRecord, BookmarkTreeNode},
};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, thread::JoinHandle};
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    queue: TaskQueue,
    dispatcher: Arc<QueryDispatcher>,
    store: SyncStore,
    default_threshold: MatchThreshold,
}

pub fn router(
    queue: TaskQueue,
    dispatcher: QueryDispatcher,
    store: SyncStore,
    default_threshold: MatchThreshold,
) -> Router {
    let shared_state = Arc::new(SharedState {
        queue,
        dispatcher: Arc::new(dispatcher),
        store,
        default_threshold,
    });

    Router::new()
        .route("/api/ask", post(ask))
        .route("/api/sync/init", post(sync_init))
        .route("/api/sync", post(sync))
        .route("/api/sync/status", get(sync_status))
        .route("/api/sync/reset", post(sync_reset))
        .route("/api/bookmarks/created", post(bookmark_created))
        .route("/api/bookmarks/removed", post(bookmark_removed))
        .route("/api/user", post(set_user))
        // whole bookmark trees are posted to the sync routes
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn start_app(ctx: AppContext, queue: TaskQueue, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(
        queue,
        ctx.dispatcher(),
        ctx.store().clone(),
        ctx.config().search.default_threshold,
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(ctx: AppContext) -> anyhow::Result<()> {
    let addr: SocketAddr = ctx.config().daemon_addr.parse()?;
    let (queue, handle) = TaskQueue::start(ctx.reconciler());

    let served = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(ctx, queue.clone(), addr));

    stop_queue(&queue, handle);
    served
}

fn stop_queue(queue: &TaskQueue, handle: JoinHandle<()>) {
    queue.shutdown();

    // join on queue thread handle
    log::warn!("waiting for task queue to stop");
    if handle.join().is_err() {
        log::error!("task queue thread panicked");
    }
}

// Make our own error that wraps `AppError`.
#[derive(Debug)]
struct HttpError(AppError);

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::NotSignedIn => StatusCode::UNAUTHORIZED,
            AppError::Http { .. } | AppError::Reqwest(_) => {
                log::error!("{self:?}");
                StatusCode::BAD_GATEWAY
            }
            AppError::Malformed(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::IO(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    threshold: Option<MatchThreshold>,
}

async fn ask(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, HttpError> {
    tokio::task::block_in_place(move || {
        let user = state.store.require_user()?;
        let threshold = payload.threshold.unwrap_or(state.default_threshold);

        Ok(Json(state.dispatcher.ask(&user.id, &payload.question, threshold)))
    })
}

#[derive(Deserialize)]
struct SyncInitRequest {
    tree: Vec<BookmarkTreeNode>,
}

#[derive(Serialize)]
struct SyncInitResponse {
    pending: usize,
}

async fn sync_init(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SyncInitRequest>,
) -> Result<Json<SyncInitResponse>, HttpError> {
    tokio::task::block_in_place(move || {
        match state.queue.request(Task::InitSync { tree: payload.tree })? {
            TaskReport::Diff { pending } => Ok(Json(SyncInitResponse { pending })),
            TaskReport::Failed { error } => Err(AppError::Other(anyhow::anyhow!(error)).into()),
            other => Err(AppError::Other(anyhow::anyhow!("unexpected report {other:?}")).into()),
        }
    })
}

#[derive(Deserialize)]
struct SyncRequest {
    #[serde(default)]
    tree: Option<Vec<BookmarkTreeNode>>,
}

async fn sync(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<SyncRequest>>,
) -> Result<Json<TaskReport>, HttpError> {
    let tree = payload.and_then(|Json(payload)| payload.tree);

    tokio::task::block_in_place(move || Ok(Json(state.queue.request(Task::Sync { tree })?)))
}

#[derive(Serialize)]
struct StatusResponse {
    status: SyncStatus,
    pending: Vec<BookmarkRecord>,
}

async fn sync_status(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<StatusResponse>, HttpError> {
    tokio::task::block_in_place(move || {
        Ok(Json(StatusResponse {
            status: state.store.status()?,
            pending: state.store.pending()?,
        }))
    })
}

async fn sync_reset(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<SyncStatus>, HttpError> {
    // straight to the store: the queue may be stuck behind the very drain being reset
    tokio::task::block_in_place(move || Ok(Json(state.store.reset_status()?)))
}

async fn bookmark_created(
    State(state): State<Arc<SharedState>>,
    Json(record): Json<BookmarkRecord>,
) -> Result<StatusCode, HttpError> {
    state.queue.push(Task::BookmarkCreated(record))?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct RemovedRequest {
    id: String,
    /// another local bookmark that still has the removed url
    #[serde(default)]
    survivor: Option<BookmarkRecord>,
}

async fn bookmark_removed(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<RemovedRequest>,
) -> Result<StatusCode, HttpError> {
    state.queue.push(Task::BookmarkRemoved {
        id: payload.id,
        survivor: payload.survivor,
    })?;
    Ok(StatusCode::ACCEPTED)
}

async fn set_user(
    State(state): State<Arc<SharedState>>,
    Json(user): Json<UserIdentity>,
) -> Result<Json<UserIdentity>, HttpError> {
    if user.id.trim().is_empty() {
        return Err(AppError::Malformed("user id is empty".to_string()).into());
    }

    tokio::task::block_in_place(move || {
        state.store.set_user(&user)?;
        log::info!("signed in as {}", user.id);
        Ok(Json(user))
    })
}
