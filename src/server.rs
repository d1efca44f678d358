//! JSON HTTP API.
//!
//! Exposes the content store and the generation workflow to the learning app
//! frontend. Generation endpoints share one [`GenerationEngine`] (and thus one
//! quota window) across all requests.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/dictionary/populate` | Bulk-generate unique dictionary entries |
//! | `GET`  | `/api/dictionary` | List/search dictionary entries |
//! | `GET`  | `/api/dictionary/{id}` | Fetch one entry |
//! | `POST` | `/api/exercise/createVocabs` | Generate vocabulary exercises |
//! | `POST` | `/api/exercise/createSentence` | Generate sentence exercises |
//! | `POST` | `/api/exercise/createFillInTheBlank` | Generate fill-in-the-blank exercises |
//! | `GET`  | `/api/exercises` | List exercises |
//! | `POST` | `/api/lessons/generate` | Generate a lesson |
//! | `GET`  | `/api/lessons`, `/api/lessons/{id}` | List / fetch lessons |
//! | `POST` | `/api/resources/resource/generate` | Generate a cultural resource |
//! | `GET`  | `/api/resources` | List cultural resources |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every response carries a `success` boolean. Failures add a human-readable
//! `message`; quota-class failures also report `quota_remaining` and
//! `quota_reset_in_secs` so a caller can decide when to retry:
//!
//! ```json
//! { "success": false, "message": "generation quota exhausted", "quota_remaining": 0, "quota_reset_in_secs": 41 }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the browser frontend is
//! served from a different origin in every deployment we run.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::GenerationError;
use crate::generator::{create_provider, GenerationProvider};
use crate::models::{is_valid_level, CulturalResource, DictionaryEntry, ExerciseKind, LEVELS};
use crate::populate::GenerationEngine;
use crate::store;

/// Shared application state passed to all route handlers via Axum's `State`
/// extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    engine: Arc<GenerationEngine>,
    /// Root token; each generation request runs under a child so process
    /// shutdown stops in-flight bulk runs between iterations.
    shutdown: CancellationToken,
}

/// Starts the HTTP server with the provider named in the configuration.
///
/// Binds to `[server].bind` and runs until the process receives Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let provider = create_provider(&config.generation)?;
    run_server_with_provider(config, provider).await
}

/// Starts the HTTP server with a caller-supplied provider.
///
/// This is the seam integration tests use to serve a stub provider instead of
/// a live generation API.
pub async fn run_server_with_provider(
    config: &Config,
    provider: Arc<dyn GenerationProvider>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let engine = Arc::new(GenerationEngine::new(config, provider));
    let shutdown = CancellationToken::new();

    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        engine,
        shutdown: shutdown.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/dictionary", get(handle_list_dictionary))
        .route("/api/dictionary/populate", post(handle_populate_dictionary))
        .route("/api/dictionary/{id}", get(handle_get_entry))
        .route("/api/exercise/createVocabs", post(handle_create_vocabs))
        .route("/api/exercise/createSentence", post(handle_create_sentence))
        .route(
            "/api/exercise/createFillInTheBlank",
            post(handle_create_fill_in_blank),
        )
        .route("/api/exercises", get(handle_list_exercises))
        .route("/api/lessons", get(handle_list_lessons))
        .route("/api/lessons/generate", post(handle_generate_lesson))
        .route("/api/lessons/{id}", get(handle_get_lesson))
        .route("/api/resources", get(handle_list_resources))
        .route(
            "/api/resources/resource/generate",
            post(handle_generate_resource),
        )
        .layer(cors)
        .with_state(state);

    info!("adesua listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

// ============ Error response ============

/// Internal error type that converts into the `success: false` envelope.
struct AppError {
    status: StatusCode,
    message: String,
    quota_remaining: Option<u32>,
    quota_reset_in_secs: Option<u64>,
}

#[derive(Serialize)]
struct FailureBody {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    quota_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quota_reset_in_secs: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = FailureBody {
            success: false,
            message: self.message,
            quota_remaining: self.quota_remaining,
            quota_reset_in_secs: self.quota_reset_in_secs,
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, message: impl Into<String>) -> AppError {
    AppError {
        status,
        message: message.into(),
        quota_remaining: None,
        quota_reset_in_secs: None,
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, message)
}

fn internal(err: anyhow::Error) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Maps a generation failure to a status and, for quota-class errors,
/// attaches the current quota diagnostics.
fn classify_generation_error(engine: &GenerationEngine, err: anyhow::Error) -> AppError {
    match err.downcast_ref::<GenerationError>() {
        Some(GenerationError::Disabled) => bad_request(err.to_string()),
        Some(GenerationError::QuotaExceeded { .. }) | Some(GenerationError::Exhausted { .. }) => {
            let quota = engine.quota_snapshot();
            AppError {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: err.to_string(),
                quota_remaining: Some(quota.remaining),
                quota_reset_in_secs: Some(quota.reset_in.as_secs()),
            }
        }
        Some(GenerationError::Parse { .. }) | Some(GenerationError::Provider { .. }) => {
            app_error(StatusCode::BAD_GATEWAY, err.to_string())
        }
        None => internal(err),
    }
}

fn validate_level(level: &str) -> Result<(), AppError> {
    if is_valid_level(level) {
        return Ok(());
    }
    Err(bad_request(format!(
        "unknown level '{}'; expected one of {}",
        level,
        LEVELS.join(", ")
    )))
}

fn effective_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, 500)
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

// ============ Dictionary ============

#[derive(Deserialize)]
struct PopulateRequest {
    count: Option<usize>,
}

#[derive(Serialize)]
struct PopulateResponse {
    success: bool,
    inserted: usize,
    requested: usize,
    attempts: u32,
    /// First inserted entry, as a sample of the batch.
    data: Option<DictionaryEntry>,
    quota_remaining: u32,
    quota_reset_in_secs: u64,
}

async fn handle_populate_dictionary(
    State(state): State<AppState>,
    body: Option<Json<PopulateRequest>>,
) -> Result<Json<PopulateResponse>, AppError> {
    let count = body
        .and_then(|Json(b)| b.count)
        .unwrap_or(state.config.content.populate_count);
    if count == 0 {
        return Err(bad_request("count must be >= 1"));
    }

    let cancel = state.shutdown.child_token();
    let outcome = state
        .engine
        .populate_dictionary(&state.pool, count, &cancel)
        .await
        .map_err(|e| classify_generation_error(&state.engine, e))?;

    Ok(Json(PopulateResponse {
        success: true,
        inserted: outcome.accepted.len(),
        requested: outcome.requested,
        attempts: outcome.attempts,
        data: outcome.accepted.first().cloned(),
        quota_remaining: outcome.quota.remaining,
        quota_reset_in_secs: outcome.quota.reset_in.as_secs(),
    }))
}

#[derive(Deserialize)]
struct DictionaryQuery {
    search: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct ListResponse<T: Serialize> {
    success: bool,
    count: usize,
    data: Vec<T>,
}

async fn handle_list_dictionary(
    State(state): State<AppState>,
    Query(query): Query<DictionaryQuery>,
) -> Result<Json<ListResponse<DictionaryEntry>>, AppError> {
    let entries = store::list_entries(
        &state.pool,
        query.search.as_deref(),
        effective_limit(query.limit),
    )
    .await
    .map_err(internal)?;

    Ok(Json(ListResponse {
        success: true,
        count: entries.len(),
        data: entries,
    }))
}

#[derive(Serialize)]
struct SingleResponse<T: Serialize> {
    success: bool,
    data: T,
}

async fn handle_get_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SingleResponse<DictionaryEntry>>, AppError> {
    let entry = store::get_entry(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no dictionary entry with id {}", id)))?;

    Ok(Json(SingleResponse {
        success: true,
        data: entry,
    }))
}

// ============ Exercises ============

#[derive(Deserialize)]
struct ExerciseRequest {
    level: String,
    count: Option<usize>,
}

#[derive(Serialize)]
struct ExerciseView {
    id: String,
    kind: ExerciseKind,
    level: String,
    content: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn exercise_view(exercise: crate::models::Exercise) -> ExerciseView {
    let content = serde_json::from_str(&exercise.content_json).unwrap_or(serde_json::Value::Null);
    ExerciseView {
        id: exercise.id,
        kind: exercise.kind,
        level: exercise.level,
        content,
        created_at: exercise.created_at,
    }
}

#[derive(Serialize)]
struct ExerciseResponse {
    success: bool,
    message: String,
    inserted: usize,
    data: Vec<ExerciseView>,
}

async fn create_exercises(
    state: AppState,
    kind: ExerciseKind,
    request: ExerciseRequest,
) -> Result<Json<ExerciseResponse>, AppError> {
    validate_level(&request.level)?;
    let count = request.count.unwrap_or(1);
    if count == 0 {
        return Err(bad_request("count must be >= 1"));
    }

    let cancel = state.shutdown.child_token();
    let exercises = state
        .engine
        .generate_exercises(&state.pool, kind, &request.level, count, &cancel)
        .await
        .map_err(|e| classify_generation_error(&state.engine, e))?;

    Ok(Json(ExerciseResponse {
        success: true,
        message: format!(
            "generated {} {} exercise set(s) at {} level",
            exercises.len(),
            kind,
            request.level
        ),
        inserted: exercises.len(),
        data: exercises.into_iter().map(exercise_view).collect(),
    }))
}

async fn handle_create_vocabs(
    State(state): State<AppState>,
    Json(request): Json<ExerciseRequest>,
) -> Result<Json<ExerciseResponse>, AppError> {
    create_exercises(state, ExerciseKind::Vocabulary, request).await
}

async fn handle_create_sentence(
    State(state): State<AppState>,
    Json(request): Json<ExerciseRequest>,
) -> Result<Json<ExerciseResponse>, AppError> {
    create_exercises(state, ExerciseKind::Sentence, request).await
}

async fn handle_create_fill_in_blank(
    State(state): State<AppState>,
    Json(request): Json<ExerciseRequest>,
) -> Result<Json<ExerciseResponse>, AppError> {
    create_exercises(state, ExerciseKind::FillInBlank, request).await
}

#[derive(Deserialize)]
struct ExercisesQuery {
    kind: Option<String>,
    level: Option<String>,
    limit: Option<i64>,
}

async fn handle_list_exercises(
    State(state): State<AppState>,
    Query(query): Query<ExercisesQuery>,
) -> Result<Json<ListResponse<ExerciseView>>, AppError> {
    let kind = match query.kind.as_deref() {
        None => None,
        Some(raw) => Some(
            ExerciseKind::parse(raw)
                .ok_or_else(|| bad_request(format!("unknown exercise kind '{}'", raw)))?,
        ),
    };
    if let Some(level) = query.level.as_deref() {
        validate_level(level)?;
    }

    let exercises = store::list_exercises(
        &state.pool,
        kind,
        query.level.as_deref(),
        effective_limit(query.limit),
    )
    .await
    .map_err(internal)?;

    Ok(Json(ListResponse {
        success: true,
        count: exercises.len(),
        data: exercises.into_iter().map(exercise_view).collect(),
    }))
}

// ============ Lessons ============

#[derive(Deserialize)]
struct LessonRequest {
    topic: String,
    level: String,
}

#[derive(Serialize)]
struct LessonSummary {
    id: String,
    title: String,
    level: String,
}

#[derive(Serialize)]
struct LessonResponse {
    success: bool,
    lesson: LessonSummary,
}

async fn handle_generate_lesson(
    State(state): State<AppState>,
    Json(request): Json<LessonRequest>,
) -> Result<Json<LessonResponse>, AppError> {
    if request.topic.trim().is_empty() {
        return Err(bad_request("topic must not be empty"));
    }
    validate_level(&request.level)?;

    let lesson = state
        .engine
        .generate_lesson(&state.pool, request.topic.trim(), &request.level)
        .await
        .map_err(|e| classify_generation_error(&state.engine, e))?;

    Ok(Json(LessonResponse {
        success: true,
        lesson: LessonSummary {
            id: lesson.id,
            title: lesson.title,
            level: lesson.level,
        },
    }))
}

#[derive(Serialize)]
struct LessonView {
    id: String,
    title: String,
    topic: String,
    level: String,
    content: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn lesson_view(lesson: crate::models::Lesson) -> LessonView {
    let content = serde_json::from_str(&lesson.content_json).unwrap_or(serde_json::Value::Null);
    LessonView {
        id: lesson.id,
        title: lesson.title,
        topic: lesson.topic,
        level: lesson.level,
        content,
        created_at: lesson.created_at,
    }
}

#[derive(Deserialize)]
struct LessonsQuery {
    level: Option<String>,
    limit: Option<i64>,
}

async fn handle_list_lessons(
    State(state): State<AppState>,
    Query(query): Query<LessonsQuery>,
) -> Result<Json<ListResponse<LessonView>>, AppError> {
    if let Some(level) = query.level.as_deref() {
        validate_level(level)?;
    }

    let lessons = store::list_lessons(
        &state.pool,
        query.level.as_deref(),
        effective_limit(query.limit),
    )
    .await
    .map_err(internal)?;

    Ok(Json(ListResponse {
        success: true,
        count: lessons.len(),
        data: lessons.into_iter().map(lesson_view).collect(),
    }))
}

async fn handle_get_lesson(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SingleResponse<LessonView>>, AppError> {
    let lesson = store::get_lesson(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("no lesson with id {}", id)))?;

    Ok(Json(SingleResponse {
        success: true,
        data: lesson_view(lesson),
    }))
}

// ============ Cultural resources ============

#[derive(Deserialize)]
struct ResourceRequest {
    topic: String,
}

async fn handle_generate_resource(
    State(state): State<AppState>,
    Json(request): Json<ResourceRequest>,
) -> Result<Json<SingleResponse<CulturalResource>>, AppError> {
    if request.topic.trim().is_empty() {
        return Err(bad_request("topic must not be empty"));
    }

    let resource = state
        .engine
        .generate_resource(&state.pool, request.topic.trim())
        .await
        .map_err(|e| classify_generation_error(&state.engine, e))?;

    Ok(Json(SingleResponse {
        success: true,
        data: resource,
    }))
}

#[derive(Deserialize)]
struct ResourcesQuery {
    limit: Option<i64>,
}

async fn handle_list_resources(
    State(state): State<AppState>,
    Query(query): Query<ResourcesQuery>,
) -> Result<Json<ListResponse<CulturalResource>>, AppError> {
    let resources = store::list_resources(&state.pool, effective_limit(query.limit))
        .await
        .map_err(internal)?;

    Ok(Json(ListResponse {
        success: true,
        count: resources.len(),
        data: resources,
    }))
}
