//! HTTP/SSE server.
//!
//! One Axum `Router` exposing the chat/trace/conversation/feedback/
//! document-selection/ingestion surface. `AppState` holds everything a
//! handler needs to run a turn end to end: the catalog, the chunk index,
//! the chat store, the configured pipelines/providers, and the scheduler.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use futures_util::stream::{Stream, StreamExt};
use meridian_core::budget::HistoryMessage;
use meridian_core::model::{AbPreference, FeedbackFlags, FeedbackKind, Sender, TraceEvent, TraceTotals};
use meridian_core::search::SearchParams;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::ReactAgent;
use crate::catalog::ContentStore;
use crate::chat_store::ChatStore;
use crate::collectors::UploadCollector;
use crate::config::{Config, RuntimeConfig};
use crate::embedding_provider::Embedder;
use crate::error::AppError;
use crate::index::SqliteChunkStore;
use crate::ingest;
use crate::llm::LlmProvider;
use crate::pipeline::{self, PipelineInput};
use crate::safety::SafetyChecker;
use crate::schedule::Scheduler;
use crate::tools::Tool;

#[derive(Clone)]
pub struct AppState(pub Arc<Inner>);

pub struct Inner {
    pub config: Arc<Config>,
    pub catalog: Arc<ContentStore>,
    pub chunk_store: Arc<SqliteChunkStore>,
    pub chat_store: Arc<ChatStore>,
    pub pool: sqlx::SqlitePool,
    pub providers: std::collections::HashMap<String, Arc<dyn LlmProvider>>,
    pub embedder: Arc<Option<Box<dyn Embedder>>>,
    pub tools: Arc<Vec<Box<dyn Tool>>>,
    pub safety: Arc<dyn SafetyChecker>,
    pub scheduler: Arc<Scheduler>,
    pub active_traces: Arc<DashMap<String, CancellationToken>>,
    pub search_params: SearchParams,
    /// Runtime-changeable fields, settable via `POST /admin/runtime-config`
    /// and effective immediately for subsequent turns.
    pub runtime: tokio::sync::RwLock<RuntimeConfig>,
}

pub fn router(state: AppState) -> Router {
    let cors = if state.0.config.services.cors_any {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/chat/stream", post(handle_chat_stream))
        .route("/chat/cancel", post(handle_chat_cancel))
        .route("/trace/{trace_id}", get(handle_get_trace))
        .route("/trace/by-message/{message_id}", get(handle_get_trace_by_message))
        .route("/conversations", post(handle_create_conversation).get(handle_list_conversations))
        .route("/conversations/load", post(handle_load_conversation))
        .route("/conversations/delete", post(handle_delete_conversation))
        .route("/feedback", post(handle_feedback))
        .route("/ab/preference", post(handle_ab_preference))
        .route("/documents", get(handle_list_documents))
        .route("/documents/enable", post(handle_enable_document))
        .route("/documents/disable", post(handle_disable_document))
        .route("/documents/bulk-enable", post(handle_bulk_enable_documents))
        .route("/documents/bulk-disable", post(handle_bulk_disable_documents))
        .route("/upload", post(handle_upload))
        .route("/ingest/reload-schedules", post(handle_reload_schedules))
        .route("/ingestion/status", get(handle_ingestion_status))
        .route("/admin/runtime-config", post(handle_runtime_config))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

pub async fn run(config: Config, state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.services.host, config.services.port);
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn admin_authorized(state: &AppState, header: &axum::http::HeaderMap) -> bool {
    let Some(expected) = &state.0.config.services.admin_token else { return true };
    let Some(provided) = header.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else { return false };
    let provided = provided.strip_prefix("Bearer ").unwrap_or(provided);
    constant_time_eq(provided.as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ============ POST /chat/stream ============

#[derive(Deserialize)]
struct AbRequest {
    config_a: String,
    config_b: String,
}

#[derive(Deserialize)]
struct ChatStreamRequest {
    conversation_id: Option<String>,
    prompt: String,
    config_id: Option<String>,
    ab: Option<AbRequest>,
}

/// Resolves a configured pipeline, its provider, and the shared per-turn
/// inputs, then spawns its execution in the background. Returns the trace
/// id (for `/trace/{id}` lookups and `/chat/cancel`) and the event stream
/// the SSE response (or the A/B merge) consumes.
async fn spawn_turn(
    state: &AppState,
    conversation_id: String,
    config_id: String,
    question: String,
    history: Vec<HistoryMessage>,
    enabled_resources: HashSet<String>,
    user_message_id: i64,
) -> Result<(String, mpsc::Receiver<TraceEvent>, tokio::sync::oneshot::Receiver<Option<i64>>), AppError> {
    let pipeline_config = state
        .0
        .config
        .a2rchi
        .pipelines
        .get(&config_id)
        .ok_or_else(|| AppError::bad_request(format!("unknown pipeline config: {config_id}")))?
        .clone();
    let provider = resolve_provider(state, &pipeline_config.chat_model)?;
    let runtime = state.0.runtime.read().await.clone();

    let trace = state.0.chat_store.start_trace(&conversation_id, Some(user_message_id), &config_id).await?;
    let cancel = CancellationToken::new();
    state.0.active_traces.insert(trace.trace_id.clone(), cancel.clone());

    let (tx, rx) = mpsc::channel::<TraceEvent>(64);
    let (message_tx, message_rx) = tokio::sync::oneshot::channel();
    let state_for_task = state.clone();
    let trace_id_for_task = trace.trace_id.clone();

    tokio::spawn(async move {
        let input = PipelineInput {
            question,
            history,
            enabled_resources: Some(enabled_resources),
            retrieval_k: runtime.retrieval_k,
            temperature: runtime.temperature,
            top_p: runtime.top_p,
        };

        let result = pipeline::run(
            pipeline_config.kind,
            &pipeline_config,
            state_for_task.0.config.a2rchi.max_tool_steps,
            std::time::Duration::from_secs(state_for_task.0.config.a2rchi.tool_timeout_secs),
            provider.as_ref(),
            state_for_task.0.tools.as_slice(),
            state_for_task.0.chunk_store.as_ref(),
            &state_for_task.0.search_params,
            state_for_task.0.safety.as_ref(),
            input,
            &tx,
            &cancel,
        )
        .await;

        let (status, answer, sources, safety_blocked) = match result {
            Ok(Some(output)) if !cancel.is_cancelled() => {
                (meridian_core::model::TraceStatus::Completed, Some(output.answer), output.sources, output.safety_blocked)
            }
            Ok(Some(_)) | Ok(None) => (meridian_core::model::TraceStatus::Cancelled, None, Vec::new(), false),
            Err(e) => {
                let _ = tx.send(TraceEvent::Error { status: "pipeline_error".to_string(), message: e.to_string(), timestamp: chrono::Utc::now() }).await;
                (meridian_core::model::TraceStatus::Failed, None, Vec::new(), false)
            }
        };

        let mut message_id = None;
        if let Some(answer) = answer {
            let context = if sources.is_empty() { None } else { serde_json::to_value(&sources).ok() };
            if let Ok(message) = state_for_task
                .0
                .chat_store
                .append_message(&conversation_id, Sender::Assistant, &answer, Some(&pipeline_config.chat_model), Some(&config_id), None, context)
                .await
            {
                message_id = Some(message.message_id);
            }
        }
        let totals = TraceTotals { safety_blocked, ..TraceTotals::default() };
        let _ = state_for_task.0.chat_store.finish_trace(&trace_id_for_task, status, totals).await;
        state_for_task.0.active_traces.remove(&trace_id_for_task);
        let _ = message_tx.send(message_id);
    });

    Ok((trace.trace_id, rx, message_rx))
}

type BoxedEventStream = std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

fn event_stream(chat_store: Arc<ChatStore>, trace_id: String, rx: mpsc::Receiver<TraceEvent>) -> BoxedEventStream {
    Box::pin(ReceiverStream::new(rx).then(move |event| {
        let chat_store = chat_store.clone();
        let trace_id = trace_id.clone();
        async move {
            let _ = chat_store.append_trace_event(&trace_id, event.clone()).await;
            let payload = serde_json::to_string(&event).unwrap_or_default();
            Ok(Event::default().id(trace_id.clone()).data(payload))
        }
    }))
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatStreamRequest>,
) -> Result<Sse<KeepAliveStream<BoxedEventStream>>, AppError> {
    if req.prompt.trim().is_empty() {
        return Err(AppError::bad_request("prompt must not be empty"));
    }

    let conversation_id = match &req.conversation_id {
        Some(id) => id.clone(),
        None => state.0.chat_store.create_conversation(None, "anonymous".to_string(), None).await?.conversation_id,
    };

    let (_, messages) = state
        .0
        .chat_store
        .load_conversation(&conversation_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("unknown conversation: {conversation_id}")))?;
    let history: Vec<HistoryMessage> = messages.iter().map(|m| HistoryMessage { content: m.content.clone() }).collect();

    let user_message = state
        .0
        .chat_store
        .append_message(&conversation_id, Sender::User, &req.prompt, None, None, None, None)
        .await?;

    let selection = state.0.chat_store.document_selection(&conversation_id).await?;
    let enabled_resources: HashSet<String> =
        state.0.catalog.all_resources().into_iter().map(|r| r.hash).filter(|h| selection.is_enabled(h)).collect();

    if let Some(ab) = req.ab {
        let comparison = state
            .0
            .chat_store
            .create_ab_comparison(&conversation_id, user_message.message_id, serde_json::json!({"config_id": ab.config_a}), serde_json::json!({"config_id": ab.config_b}), true)
            .await?;

        let (trace_a, rx_a, done_a) =
            spawn_turn(&state, conversation_id.clone(), ab.config_a, req.prompt.clone(), history.clone(), enabled_resources.clone(), user_message.message_id).await?;
        let (trace_b, rx_b, done_b) =
            spawn_turn(&state, conversation_id.clone(), ab.config_b, req.prompt, history, enabled_resources, user_message.message_id).await?;

        let chat_store = state.0.chat_store.clone();
        let comparison_id = comparison.comparison_id.clone();
        tokio::spawn(async move {
            let (message_a, message_b) = tokio::join!(done_a, done_b);
            let _ = chat_store
                .set_ab_responses(&comparison_id, message_a.unwrap_or(None), message_b.unwrap_or(None))
                .await;
        });

        let merged: BoxedEventStream =
            Box::pin(futures_util::stream::select(event_stream(state.0.chat_store.clone(), trace_a, rx_a), event_stream(state.0.chat_store.clone(), trace_b, rx_b)));
        return Ok(Sse::new(merged).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))));
    }

    let config_id = req.config_id.unwrap_or_else(|| "default".to_string());
    let (trace_id, rx, _done) = spawn_turn(&state, conversation_id, config_id, req.prompt, history, enabled_resources, user_message.message_id).await?;
    let stream = event_stream(state.0.chat_store.clone(), trace_id, rx);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn resolve_provider(state: &AppState, model_key: &str) -> Result<Arc<dyn LlmProvider>, AppError> {
    state.0.providers.get(model_key).cloned().ok_or_else(|| AppError::internal(format!("no provider configured for model {model_key}")))
}

// ============ POST /chat/cancel ============

#[derive(Deserialize)]
struct CancelRequest {
    trace_id: String,
}

async fn handle_chat_cancel(State(state): State<AppState>, Json(req): Json<CancelRequest>) -> Result<axum::http::StatusCode, AppError> {
    if let Some(token) = state.0.active_traces.get(&req.trace_id) {
        token.cancel();
    }
    state.0.chat_store.cancel_trace(&req.trace_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ============ GET /trace/{id} ============

async fn handle_get_trace(State(state): State<AppState>, Path(trace_id): Path<String>) -> Result<Json<meridian_core::model::Trace>, AppError> {
    let trace = state.0.chat_store.load_trace(&trace_id).await?.ok_or_else(|| AppError::not_found(format!("unknown trace: {trace_id}")))?;
    Ok(Json(trace))
}

async fn handle_get_trace_by_message(State(state): State<AppState>, Path(message_id): Path<i64>) -> Result<Json<meridian_core::model::Trace>, AppError> {
    let trace_id = state.0.chat_store.trace_id_for_message(message_id).await?.ok_or_else(|| AppError::not_found(format!("no trace for message {message_id}")))?;
    let trace = state.0.chat_store.load_trace(&trace_id).await?.ok_or_else(|| AppError::not_found(format!("unknown trace: {trace_id}")))?;
    Ok(Json(trace))
}

// ============ Conversations ============

#[derive(Deserialize)]
struct CreateConversationRequest {
    client_id: String,
    user_id: Option<String>,
    title: Option<String>,
}

async fn handle_create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<meridian_core::model::Conversation>, AppError> {
    let convo = state.0.chat_store.create_conversation(req.user_id, req.client_id, req.title).await?;
    Ok(Json(convo))
}

#[derive(Deserialize)]
struct ListConversationsQuery {
    client_id: String,
}

async fn handle_list_conversations(
    State(state): State<AppState>,
    Query(q): Query<ListConversationsQuery>,
) -> Result<Json<Vec<meridian_core::model::Conversation>>, AppError> {
    let conversations = state.0.chat_store.list_conversations(&q.client_id).await?;
    Ok(Json(conversations))
}

#[derive(Deserialize)]
struct ConversationIdRequest {
    conversation_id: String,
}

#[derive(Serialize)]
struct LoadConversationResponse {
    conversation: meridian_core::model::Conversation,
    messages: Vec<meridian_core::model::Message>,
}

async fn handle_load_conversation(
    State(state): State<AppState>,
    Json(req): Json<ConversationIdRequest>,
) -> Result<Json<LoadConversationResponse>, AppError> {
    let (conversation, messages) = state
        .0
        .chat_store
        .load_conversation(&req.conversation_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("unknown conversation: {}", req.conversation_id)))?;
    Ok(Json(LoadConversationResponse { conversation, messages }))
}

async fn handle_delete_conversation(State(state): State<AppState>, Json(req): Json<ConversationIdRequest>) -> Result<axum::http::StatusCode, AppError> {
    state.0.chat_store.delete_conversation(&req.conversation_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ============ POST /feedback ============

#[derive(Deserialize)]
struct FeedbackRequest {
    message_id: i64,
    kind: FeedbackKind,
    #[serde(default)]
    flags: FeedbackFlags,
    text: Option<String>,
}

async fn handle_feedback(State(state): State<AppState>, Json(req): Json<FeedbackRequest>) -> Result<Json<meridian_core::model::Feedback>, AppError> {
    let feedback = state.0.chat_store.record_feedback(req.message_id, req.kind, req.flags, req.text).await?;
    Ok(Json(feedback))
}

// ============ POST /ab/preference ============

#[derive(Deserialize)]
struct AbPreferenceRequest {
    comparison_id: String,
    preference: AbPreference,
}

async fn handle_ab_preference(State(state): State<AppState>, Json(req): Json<AbPreferenceRequest>) -> Result<axum::http::StatusCode, AppError> {
    state.0.chat_store.record_ab_preference(&req.comparison_id, req.preference).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ============ Documents ============

#[derive(Deserialize)]
struct DocumentsQuery {
    conversation_id: String,
}

#[derive(Serialize)]
struct DocumentStatus {
    resource_hash: String,
    display_name: String,
    enabled: bool,
}

async fn handle_list_documents(State(state): State<AppState>, Query(q): Query<DocumentsQuery>) -> Result<Json<Vec<DocumentStatus>>, AppError> {
    let selection = state.0.chat_store.document_selection(&q.conversation_id).await?;
    let resources = state.0.catalog.all_resources();
    let out = resources
        .into_iter()
        .filter(|r| !r.deleted)
        .map(|r| DocumentStatus { enabled: selection.is_enabled(&r.hash), resource_hash: r.hash, display_name: r.display_name })
        .collect();
    Ok(Json(out))
}

#[derive(Deserialize)]
struct DocumentToggleRequest {
    conversation_id: String,
    resource_hash: String,
}

async fn handle_enable_document(State(state): State<AppState>, Json(req): Json<DocumentToggleRequest>) -> Result<axum::http::StatusCode, AppError> {
    state.0.chat_store.set_document_enabled(&req.conversation_id, &req.resource_hash, true).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn handle_disable_document(State(state): State<AppState>, Json(req): Json<DocumentToggleRequest>) -> Result<axum::http::StatusCode, AppError> {
    state.0.chat_store.set_document_enabled(&req.conversation_id, &req.resource_hash, false).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct BulkDocumentToggleRequest {
    conversation_id: String,
    resource_hashes: Vec<String>,
}

async fn handle_bulk_enable_documents(State(state): State<AppState>, Json(req): Json<BulkDocumentToggleRequest>) -> Result<axum::http::StatusCode, AppError> {
    for hash in &req.resource_hashes {
        state.0.chat_store.set_document_enabled(&req.conversation_id, hash, true).await?;
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn handle_bulk_disable_documents(State(state): State<AppState>, Json(req): Json<BulkDocumentToggleRequest>) -> Result<axum::http::StatusCode, AppError> {
    for hash in &req.resource_hashes {
        state.0.chat_store.set_document_enabled(&req.conversation_id, hash, false).await?;
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ============ POST /upload ============

#[derive(Deserialize)]
struct UploadRequest {
    display_name: String,
    suffix: String,
    content_base64: String,
}

#[derive(Serialize)]
struct UploadResponse {
    resource_hash: String,
}

async fn handle_upload(State(state): State<AppState>, Json(req): Json<UploadRequest>) -> Result<Json<UploadResponse>, AppError> {
    if !state.0.config.sources.uploads_enabled {
        return Err(AppError::bad_request("uploads are disabled"));
    }
    use base64::Engine;
    let content = base64::engine::general_purpose::STANDARD.decode(&req.content_base64).map_err(|e| AppError::bad_request(format!("invalid base64: {e}")))?;
    let resource_hash = meridian_core::hash::hash_upload(&content);

    let collector = UploadCollector::new(req.display_name, req.suffix, content);
    let embedder_ref = state.0.embedder.as_ref().as_ref().map(|e| e.as_ref());
    ingest::run_collector(&collector, false, &state.0.catalog, &state.0.pool, &state.0.config, embedder_ref).await?;
    Ok(Json(UploadResponse { resource_hash }))
}

// ============ Ingestion control ============

async fn handle_reload_schedules(State(state): State<AppState>) -> Result<axum::http::StatusCode, AppError> {
    state.0.scheduler.reload();
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct IngestionStatus {
    resource_count: usize,
    indexed_resource_count: usize,
}

async fn handle_ingestion_status(State(state): State<AppState>) -> Result<Json<IngestionStatus>, AppError> {
    let resource_count = state.0.catalog.all_resources().into_iter().filter(|r| !r.deleted).count();
    let indexed_resource_count = state.0.chunk_store.indexed_resource_hashes().await?.len();
    Ok(Json(IngestionStatus { resource_count, indexed_resource_count }))
}

// ============ Admin runtime config ============

#[derive(Deserialize)]
struct RuntimeConfigPatch {
    model_selection: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    retrieval_k: Option<usize>,
    prompt_selection: Option<String>,
    verbosity: Option<String>,
}

async fn handle_runtime_config(
    State(state): State<AppState>,
    header: axum::http::HeaderMap,
    Json(patch): Json<RuntimeConfigPatch>,
) -> Result<axum::http::StatusCode, AppError> {
    if !admin_authorized(&state, &header) {
        return Err(AppError::new(axum::http::StatusCode::UNAUTHORIZED, "unauthorized", "invalid or missing admin token"));
    }

    let mut runtime = state.0.runtime.write().await;
    if let Some(v) = patch.model_selection {
        runtime.model_selection = v;
    }
    if let Some(v) = patch.temperature {
        runtime.temperature = v;
    }
    if let Some(v) = patch.top_p {
        runtime.top_p = v;
    }
    if let Some(v) = patch.top_k {
        runtime.top_k = v;
    }
    if let Some(v) = patch.retrieval_k {
        runtime.retrieval_k = v;
    }
    if let Some(v) = patch.prompt_selection {
        runtime.prompt_selection = v;
    }
    if let Some(v) = patch.verbosity {
        runtime.verbosity = v;
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}
