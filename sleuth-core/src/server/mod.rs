//! HTTP API for running research over conversation threads.
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /docs`
//! - `POST /threads`
//! - `GET  /threads/{thread_id}`
//! - `POST /threads/{thread_id}/runs` (background)
//! - `POST /threads/{thread_id}/runs/wait`
//! - `GET  /threads/{thread_id}/runs/{run_id}`

pub mod store;

use crate::brain::LlmClient;
use crate::config::ResearchConfig;
use crate::error::{GraphError, ServerError};
use crate::research::{OverallState, ResearchGraph};
use crate::types::Message;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

pub use store::{Run, RunStatus, Thread, ThreadStore};

/// State shared by every handler.
pub struct ServerState {
    store: RwLock<ThreadStore>,
    client: Arc<LlmClient>,
    research: ResearchConfig,
    started_at: chrono::DateTime<Utc>,
}

impl ServerState {
    pub fn new(client: Arc<LlmClient>, research: ResearchConfig) -> Self {
        Self {
            store: RwLock::new(ThreadStore::new()),
            client,
            research,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

/// Thread-safe shared server reference for axum handlers.
pub type SharedServer = Arc<ServerState>;

/// Per-run overrides, sent as `config.configurable`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configurable {
    pub query_generator_model: Option<String>,
    pub reflection_model: Option<String>,
    pub answer_model: Option<String>,
    pub reasoning_model: Option<String>,
    pub number_of_initial_queries: Option<usize>,
    pub initial_search_query_count: Option<usize>,
    pub max_research_loops: Option<usize>,
}

impl Configurable {
    /// Apply the overrides to a copy of `base`.
    pub fn apply(&self, base: &ResearchConfig) -> ResearchConfig {
        let mut config = base.clone();
        if let Some(model) = &self.query_generator_model {
            config.query_generator_model = model.clone();
        }
        if let Some(model) = &self.reflection_model {
            config.reflection_model = model.clone();
        }
        if let Some(model) = &self.answer_model {
            config.answer_model = model.clone();
        }
        if let Some(n) = self.number_of_initial_queries {
            config.number_of_initial_queries = n;
        }
        if let Some(n) = self.max_research_loops {
            config.max_research_loops = n;
        }
        config
    }

    /// Seed a run's initial state.
    pub fn initial_state(&self, messages: Vec<Message>) -> OverallState {
        OverallState {
            initial_search_query_count: self.initial_search_query_count,
            max_research_loops: self.max_research_loops,
            reasoning_model: self.reasoning_model.clone(),
            ..OverallState::from_messages(messages)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub configurable: Configurable,
}

/// Body of `POST /threads/{id}/runs`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunRequest {
    pub messages: Vec<Message>,
    pub config: RunConfig,
}

/// Error responses rendered as `{"error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Server(ServerError),
    Graph(GraphError),
}

impl From<ServerError> for ApiError {
    fn from(e: ServerError) -> Self {
        ApiError::Server(e)
    }
}

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        ApiError::Graph(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Server(ServerError::ThreadNotFound { .. })
            | ApiError::Server(ServerError::RunNotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Server(ServerError::BadRequest { .. })
            | ApiError::Graph(GraphError::EmptyTopic) => StatusCode::BAD_REQUEST,
            ApiError::Graph(GraphError::NodeFailed { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Server(ServerError::RunAborted { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self {
            ApiError::Server(e) => e.to_string(),
            ApiError::Graph(e) => e.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Build the axum router.
pub fn router(shared: SharedServer) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/docs", get(docs_handler))
        .route("/threads", post(create_thread_handler))
        .route("/threads/{thread_id}", get(get_thread_handler))
        .route("/threads/{thread_id}/runs", post(create_run_handler))
        .route("/threads/{thread_id}/runs/wait", post(wait_run_handler))
        .route("/threads/{thread_id}/runs/{run_id}", get(get_run_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared)
}

async fn health_handler(State(server): State<SharedServer>) -> impl IntoResponse {
    let store = server.store.read().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "threads": store.thread_count(),
        "runs": store.run_count(),
        "llm_calls": server.client.call_count(),
        "uptime_secs": server.uptime_secs(),
    }))
}

async fn docs_handler() -> &'static str {
    "Sleuth research API\n\
     \n\
     GET  /health                              service status\n\
     POST /threads                             create a thread\n\
     GET  /threads/{thread_id}                 thread with messages\n\
     POST /threads/{thread_id}/runs            start a research run in the background\n\
     POST /threads/{thread_id}/runs/wait       run research and return the final state\n\
     GET  /threads/{thread_id}/runs/{run_id}   run status, answer and sources\n"
}

async fn create_thread_handler(State(server): State<SharedServer>) -> impl IntoResponse {
    let mut store = server.store.write().await;
    let thread = store.create_thread();
    info!(thread_id = %thread.thread_id, "Thread created");
    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "thread_id": thread.thread_id,
            "created_at": thread.created_at,
        })),
    )
}

async fn get_thread_handler(
    State(server): State<SharedServer>,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<Thread>, ApiError> {
    let store = server.store.read().await;
    Ok(Json(store.thread(thread_id)?.clone()))
}

async fn get_run_handler(
    State(server): State<SharedServer>,
    Path((thread_id, run_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Run>, ApiError> {
    let store = server.store.read().await;
    Ok(Json(store.run(thread_id, run_id)?.clone()))
}

/// Register a run and build the graph and initial state for it.
async fn prepare_run(
    server: &ServerState,
    thread_id: Uuid,
    request: RunRequest,
) -> Result<(Run, ResearchGraph, OverallState), ApiError> {
    if request.messages.is_empty() {
        return Err(ServerError::BadRequest {
            message: "messages must not be empty".to_string(),
        }
        .into());
    }
    let configurable = request.config.configurable;
    let (run, history) = server
        .store
        .write()
        .await
        .start_run(thread_id, request.messages)?;
    let graph = ResearchGraph::new(
        Arc::clone(&server.client),
        configurable.apply(&server.research),
    );
    Ok((run, graph, configurable.initial_state(history)))
}

/// Execute a prepared run and record the outcome in the store.
async fn execute_run(
    server: &ServerState,
    run_id: Uuid,
    graph: ResearchGraph,
    state: OverallState,
) -> Result<(Run, OverallState), ApiError> {
    server.store.write().await.mark_running(run_id)?;
    info!(%run_id, "Research run started");

    match graph.invoke(state).await {
        Ok(final_state) => {
            let answer = final_state
                .answer()
                .cloned()
                .unwrap_or_else(|| Message::assistant(""));
            let run = server.store.write().await.complete_run(
                run_id,
                answer,
                final_state.sources_gathered.clone(),
                final_state.search_query.clone(),
            )?;
            info!(%run_id, "Research run finished");
            Ok((run, final_state))
        }
        Err(e) => {
            error!(%run_id, error = %e, "Research run failed");
            server
                .store
                .write()
                .await
                .fail_run(run_id, e.to_string())?;
            Err(e.into())
        }
    }
}

/// Run on its own task so the run finishes even if the caller goes away.
///
/// A task that panics leaves its run marked as failed.
fn spawn_run(
    server: &SharedServer,
    run_id: Uuid,
    graph: ResearchGraph,
    state: OverallState,
) -> JoinHandle<Result<(Run, OverallState), ApiError>> {
    let worker = Arc::clone(server);
    let task = tokio::spawn(async move { execute_run(&worker, run_id, graph, state).await });

    let server = Arc::clone(server);
    tokio::spawn(async move {
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                error!(%run_id, error = %message, "Research run aborted");
                server
                    .store
                    .write()
                    .await
                    .fail_run(run_id, message.clone())?;
                Err(ServerError::RunAborted {
                    run_id: run_id.to_string(),
                    message,
                }
                .into())
            }
        }
    })
}

async fn create_run_handler(
    State(server): State<SharedServer>,
    Path(thread_id): Path<Uuid>,
    Json(request): Json<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (run, graph, state) = prepare_run(&server, thread_id, request).await?;
    let run_id = run.run_id;

    // Failures are recorded on the run.
    drop(spawn_run(&server, run_id, graph, state));

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "run_id": run_id,
            "thread_id": thread_id,
            "status": run.status,
        })),
    ))
}

async fn wait_run_handler(
    State(server): State<SharedServer>,
    Path(thread_id): Path<Uuid>,
    Json(request): Json<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (run, graph, state) = prepare_run(&server, thread_id, request).await?;
    let run_id = run.run_id;
    let (run, final_state) = spawn_run(&server, run_id, graph, state)
        .await
        .map_err(|e| ServerError::RunAborted {
            run_id: run_id.to_string(),
            message: e.to_string(),
        })??;
    Ok(Json(serde_json::json!({
        "run_id": run.run_id,
        "thread_id": thread_id,
        "status": run.status,
        "messages": final_state.messages,
        "search_query": final_state.search_query,
        "web_research_result": final_state.web_research_result,
        "sources_gathered": final_state.sources_gathered,
        "research_loop_count": final_state.research_loop_count,
    })))
}

/// Start the API server on `addr`.
///
/// Runs until Ctrl-C; in-flight requests are allowed to finish.
pub async fn run(shared: SharedServer, addr: &str) -> Result<(), std::io::Error> {
    let app = router(shared);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Research API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down research API");
        })
        .await?;
    Ok(())
}
