//! HTTP API for running pipelines in the background.
//!
//! Every `POST /api/sota` starts a run as a tokio task with its own store
//! namespace (the task id), its own progress queue and a cancellation flag.
//! Clients follow a run over SSE or poll its status.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/`, `/health` | Health check (returns version) |
//! | `GET`  | `/api/tools` | List the tools exposed to the model |
//! | `POST` | `/api/sota` | Start a run: `{"topic": "..."}` → `{"task_id": "..."}` |
//! | `GET`  | `/api/sota/status/{task_id}` | Task record |
//! | `GET`  | `/api/sota/stream/{task_id}` | Progress events as SSE |
//! | `DELETE` | `/api/sota/{task_id}` | Request cancellation |
//!
//! A cancelled record reads `cancelled` until the run returns; the final
//! status is whatever the run actually reached. Finished tasks are dropped
//! `[server].task_ttl_secs` after they finish.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "topic must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409,
//! the progress stream of a task can be consumed once).
//!
//! # CORS
//!
//! Only the origins listed in `[server].allowed_origins` are allowed.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use sotaforge_core::store::memory::InMemoryDocumentStore;
use sotaforge_core::store::DocumentStore;

use crate::config::Config;
use crate::llm::{ChatProvider, OpenAiChat};
use crate::pipeline::{CancellationFlag, Orchestrator, RunContext, SotaReport};
use crate::progress::{ProgressEvent, ProgressSink, STATUS_CANCELLED, STATUS_FAILED};
use crate::sqlite_store::SqliteDocumentStore;
use crate::tools::{ToolInfo, ToolRegistry};

const STATUS_PENDING: &str = "pending";
const STATUS_RUNNING: &str = "running";

/// Where each run's documents live.
#[derive(Clone)]
pub enum StoreFactory {
    /// One SQLite database, one namespace per run.
    Sqlite(SqlitePool),
    /// A fresh in-memory store per run.
    Memory,
}

impl StoreFactory {
    fn for_run(&self, run_id: &str) -> Arc<dyn DocumentStore> {
        match self {
            StoreFactory::Sqlite(pool) => Arc::new(SqliteDocumentStore::new(pool.clone(), run_id)),
            StoreFactory::Memory => Arc::new(InMemoryDocumentStore::new()),
        }
    }
}

/// Public view of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub topic: String,
    pub status: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SotaReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct TaskEntry {
    record: TaskRecord,
    cancel: CancellationFlag,
    /// Taken by the first stream request.
    events: Option<mpsc::Receiver<ProgressEvent>>,
    finished_at: Option<Instant>,
}

type TaskMap = Arc<Mutex<HashMap<String, TaskEntry>>>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
    /// `None` when no provider could be built; runs then fail up front.
    llm: Option<Arc<dyn ChatProvider>>,
    stores: StoreFactory,
    require_api_keys: bool,
    http: reqwest::Client,
    tasks: TaskMap,
}

impl AppState {
    pub fn new(config: Config, llm: Option<Arc<dyn ChatProvider>>, stores: StoreFactory) -> Self {
        Self {
            config: Arc::new(config),
            tools: Arc::new(ToolRegistry::with_pipeline_tools()),
            llm,
            stores,
            require_api_keys: true,
            http: reqwest::Client::new(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Skip the environment key check before each run. Used when the
    /// provider is not the real OpenAI client.
    pub fn without_api_key_check(mut self) -> Self {
        self.require_api_keys = false;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs migrations first. A missing `OPENAI_API_KEY` does not stop the
/// server; each run reports it as a `failed` event instead.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::migrate_pool(&pool).await?;

    let llm: Option<Arc<dyn ChatProvider>> = match OpenAiChat::from_env(&config.llm) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "chat provider unavailable, runs will fail until configured"
            );
            None
        }
    };

    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config.clone(), llm, StoreFactory::Sqlite(pool));
    let app = build_router(state)?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "SOTAforge API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Router with all routes and the CORS layer.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let origins = state
        .config
        .server
        .allowed_origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("invalid entry in server.allowed_origins: {}", e))?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Ok(Router::new()
        .route("/", get(handle_health))
        .route("/health", get(handle_health))
        .route("/api/tools", get(handle_list_tools))
        .route("/api/sota", post(handle_start))
        .route("/api/sota/status/{task_id}", get(handle_status))
        .route("/api/sota/stream/{task_id}", get(handle_stream))
        .route("/api/sota/{task_id}", delete(handle_cancel))
        .layer(cors)
        .with_state(state))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(task_id: &str) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: format!("task not found: {}", task_id),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/tools ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

// ============ POST /api/sota ============

#[derive(Deserialize)]
struct StartRequest {
    #[serde(default)]
    topic: String,
}

#[derive(Serialize)]
struct StartResponse {
    task_id: String,
}

async fn handle_start(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    let topic = req.topic.trim().to_string();
    if topic.is_empty() {
        return Err(bad_request("topic must not be empty"));
    }

    let task_id = uuid::Uuid::new_v4().to_string();
    let (progress, events) = ProgressSink::channel(state.config.pipeline.progress_capacity);
    let cancel = CancellationFlag::new();

    let mut tasks = state.tasks.lock().await;
    evict_finished(
        &mut tasks,
        Duration::from_secs(state.config.server.task_ttl_secs),
    );
    tasks.insert(
        task_id.clone(),
        TaskEntry {
            record: TaskRecord {
                task_id: task_id.clone(),
                topic: topic.clone(),
                status: STATUS_PENDING.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
                result: None,
                error: None,
            },
            cancel: cancel.clone(),
            events: Some(events),
            finished_at: None,
        },
    );
    drop(tasks);

    tracing::info!(task_id = %task_id, topic = %topic, "accepted SOTA request");
    tokio::spawn(run_task(state, task_id.clone(), topic, progress, cancel));

    Ok(Json(StartResponse { task_id }))
}

async fn run_task(
    state: AppState,
    task_id: String,
    topic: String,
    progress: ProgressSink,
    cancel: CancellationFlag,
) {
    let missing = if state.require_api_keys {
        Config::missing_api_keys()
    } else {
        Vec::new()
    };
    let llm = match (&state.llm, missing.is_empty()) {
        (Some(llm), true) => llm.clone(),
        _ => {
            let message = if missing.is_empty() {
                "Chat provider is not configured".to_string()
            } else {
                format!("Missing required API keys: {}", missing.join(", "))
            };
            tracing::error!(task_id = %task_id, "{}", message);
            progress.emit(STATUS_FAILED, message.clone(), "");
            finish_task(&state.tasks, &task_id, Err(message)).await;
            return;
        }
    };

    set_status(&state.tasks, &task_id, STATUS_RUNNING).await;

    let orchestrator = Orchestrator::new(llm, state.tools.clone(), state.config.clone())
        .with_http(state.http.clone());
    let run = RunContext::new(task_id.clone(), state.stores.for_run(&task_id), progress)
        .with_cancel(cancel);

    let outcome = orchestrator
        .run(&topic, &run)
        .await
        .map_err(|e| e.to_string());
    finish_task(&state.tasks, &task_id, outcome).await;
}

async fn set_status(tasks: &TaskMap, task_id: &str, status: &str) {
    if let Some(entry) = tasks.lock().await.get_mut(task_id) {
        if entry.record.status != STATUS_CANCELLED {
            entry.record.status = status.to_string();
        }
    }
}

async fn finish_task(tasks: &TaskMap, task_id: &str, outcome: Result<SotaReport, String>) {
    let mut tasks = tasks.lock().await;
    let Some(entry) = tasks.get_mut(task_id) else {
        return;
    };
    entry.finished_at = Some(Instant::now());
    match outcome {
        Ok(report) => {
            entry.record.status = report.status.clone();
            entry.record.result = Some(report);
        }
        Err(message) => {
            entry.record.status = STATUS_FAILED.to_string();
            entry.record.error = Some(message);
        }
    }
}

/// Drop tasks that finished more than `ttl` ago, along with any progress
/// nobody streamed.
fn evict_finished(tasks: &mut HashMap<String, TaskEntry>, ttl: Duration) {
    let before = tasks.len();
    tasks.retain(|_, entry| match entry.finished_at {
        Some(at) => at.elapsed() < ttl,
        None => true,
    });
    let evicted = before - tasks.len();
    if evicted > 0 {
        tracing::debug!(evicted, "evicted finished tasks");
    }
}

// ============ GET /api/sota/status/{task_id} ============

async fn handle_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, AppError> {
    let tasks = state.tasks.lock().await;
    tasks
        .get(&task_id)
        .map(|entry| Json(entry.record.clone()))
        .ok_or_else(|| not_found(&task_id))
}

// ============ GET /api/sota/stream/{task_id} ============

/// Progress events up to and including the first terminal one.
fn progress_stream(
    events: mpsc::Receiver<ProgressEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(events)
        .scan(false, |finished, event| {
            let item = if *finished {
                None
            } else {
                *finished = event.is_terminal();
                Some(event)
            };
            futures::future::ready(item)
        })
        .map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok(Event::default().event(event.status.clone()).data(data))
        })
}

async fn handle_stream(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let events = {
        let mut tasks = state.tasks.lock().await;
        let entry = tasks.get_mut(&task_id).ok_or_else(|| not_found(&task_id))?;
        entry
            .events
            .take()
            .ok_or_else(|| conflict("progress stream already consumed"))?
    };
    Ok(Sse::new(progress_stream(events)).keep_alive(KeepAlive::default()))
}

// ============ DELETE /api/sota/{task_id} ============

async fn handle_cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, AppError> {
    let mut tasks = state.tasks.lock().await;
    let entry = tasks.get_mut(&task_id).ok_or_else(|| not_found(&task_id))?;
    if matches!(entry.record.status.as_str(), STATUS_PENDING | STATUS_RUNNING) {
        entry.cancel.cancel();
        entry.record.status = STATUS_CANCELLED.to_string();
        tracing::info!(task_id = %task_id, "cancellation requested");
    }
    Ok(Json(entry.record.clone()))
}
