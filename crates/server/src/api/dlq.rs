// Dead-letter queue administration routes
//
// Decision: Operator outcomes (unknown id, empty batch) are 200 responses with `ok: false`.
// Only store connectivity faults become HTTP errors.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use courier_queue::dead_letter::{
    BatchOutcome, DebugAddOutcome, DebugInfo, InspectOptions, InspectedJob, QueueStats,
    DEFAULT_BATCH_LIMIT,
};
use courier_queue::{DeadLetterManager, JobId, JobState, ReprocessOutcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use super::common::{store_error, ApiError, ErrorResponse};

/// App state for dead-letter routes
#[derive(Clone)]
pub struct AppState {
    pub dead_letters: Arc<DeadLetterManager>,
}

impl AppState {
    pub fn new(dead_letters: Arc<DeadLetterManager>) -> Self {
        Self { dead_letters }
    }
}

/// Create dead-letter routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/dlq/inspect", get(inspect))
        .route("/dlq/reprocess", post(reprocess))
        .route("/dlq/reprocess-many", post(reprocess_many))
        .route("/dlq/reprocess-all", post(reprocess_all))
        .route("/dlq/purge", post(purge))
        .route("/dlq/stats", get(stats))
        .route("/dlq/debug", get(debug))
        .route("/dlq/debug-add", post(debug_add))
        .with_state(state)
}

/// Query parameters for listing dead-letter entries
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct InspectQuery {
    /// Case-insensitive substring to match
    pub query: Option<String>,
    /// First position (default 0)
    pub start: Option<usize>,
    /// Last position, inclusive (default 49)
    pub end: Option<usize>,
    /// Comma-separated states (default "waiting")
    #[param(example = "waiting,delayed")]
    pub states: Option<String>,
    /// Include the original payload
    pub verbose: Option<bool>,
}

impl InspectQuery {
    fn into_options(self) -> Result<InspectOptions, ErrorResponse> {
        let defaults = InspectOptions::default();

        let states = match self.states.as_deref().map(str::trim) {
            Some(states) if !states.is_empty() => states
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    JobState::parse(s)
                        .ok_or_else(|| ErrorResponse::new(format!("unknown state: {}", s)))
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => defaults.states,
        };

        Ok(InspectOptions {
            states,
            start: self.start.unwrap_or(defaults.start),
            end: self.end.unwrap_or(defaults.end),
            query: self.query,
            verbose: self.verbose.unwrap_or(defaults.verbose),
        })
    }
}

/// Request to reprocess one entry
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReprocessRequest {
    pub job_id: JobId,
}

/// Request naming several entries
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobIdsRequest {
    #[serde(default)]
    pub job_ids: Vec<JobId>,
}

/// GET /dlq/inspect - List dead-letter entries
#[utoipa::path(
    get,
    path = "/dlq/inspect",
    params(InspectQuery),
    responses(
        (status = 200, description = "Dead-letter entries", body = Vec<InspectedJob>),
        (status = 400, description = "Invalid state filter", body = ErrorResponse),
        (status = 503, description = "Dead-letter queue unavailable", body = ErrorResponse),
    ),
    tag = "dlq"
)]
pub async fn inspect(
    State(state): State<AppState>,
    Query(query): Query<InspectQuery>,
) -> Result<Json<Vec<InspectedJob>>, ApiError> {
    let options = query
        .into_options()
        .map_err(|e| e.into_response(axum::http::StatusCode::BAD_REQUEST))?;

    let jobs = state
        .dead_letters
        .inspect(&options)
        .await
        .map_err(store_error)?;
    Ok(Json(jobs))
}

/// POST /dlq/reprocess - Put one entry back on the primary queue
#[utoipa::path(
    post,
    path = "/dlq/reprocess",
    request_body = ReprocessRequest,
    responses(
        (status = 200, description = "Reprocess outcome", body = ReprocessOutcome),
        (status = 503, description = "Queue unavailable", body = ErrorResponse),
    ),
    tag = "dlq"
)]
pub async fn reprocess(
    State(state): State<AppState>,
    Json(request): Json<ReprocessRequest>,
) -> Result<Json<ReprocessOutcome>, ApiError> {
    let outcome = state
        .dead_letters
        .reprocess(&request.job_id)
        .await
        .map_err(store_error)?;
    Ok(Json(outcome))
}

/// POST /dlq/reprocess-many - Reprocess several entries
#[utoipa::path(
    post,
    path = "/dlq/reprocess-many",
    request_body = JobIdsRequest,
    responses(
        (status = 200, description = "Per-entry outcomes", body = BatchOutcome),
    ),
    tag = "dlq"
)]
pub async fn reprocess_many(
    State(state): State<AppState>,
    Json(request): Json<JobIdsRequest>,
) -> Json<BatchOutcome> {
    Json(
        state
            .dead_letters
            .reprocess_many(&request.job_ids, DEFAULT_BATCH_LIMIT)
            .await,
    )
}

/// POST /dlq/reprocess-all - Reprocess the oldest waiting entries
#[utoipa::path(
    post,
    path = "/dlq/reprocess-all",
    responses(
        (status = 200, description = "Per-entry outcomes", body = BatchOutcome),
        (status = 503, description = "Dead-letter queue unavailable", body = ErrorResponse),
    ),
    tag = "dlq"
)]
pub async fn reprocess_all(State(state): State<AppState>) -> Result<Json<BatchOutcome>, ApiError> {
    let outcome = state
        .dead_letters
        .reprocess_all(DEFAULT_BATCH_LIMIT)
        .await
        .map_err(store_error)?;
    Ok(Json(outcome))
}

/// POST /dlq/purge - Delete entries
#[utoipa::path(
    post,
    path = "/dlq/purge",
    request_body = JobIdsRequest,
    responses(
        (status = 200, description = "Per-entry outcomes", body = BatchOutcome),
    ),
    tag = "dlq"
)]
pub async fn purge(
    State(state): State<AppState>,
    Json(request): Json<JobIdsRequest>,
) -> Json<BatchOutcome> {
    Json(state.dead_letters.purge(&request.job_ids).await)
}

/// GET /dlq/stats - Dead-letter counts per state
#[utoipa::path(
    get,
    path = "/dlq/stats",
    responses(
        (status = 200, description = "Counts per state", body = QueueStats),
        (status = 503, description = "Dead-letter queue unavailable", body = ErrorResponse),
    ),
    tag = "dlq"
)]
pub async fn stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    let stats = state.dead_letters.stats().await.map_err(store_error)?;
    Ok(Json(stats))
}

/// GET /dlq/debug - Connection details and counts
#[utoipa::path(
    get,
    path = "/dlq/debug",
    responses(
        (status = 200, description = "Diagnostics", body = DebugInfo),
        (status = 503, description = "Dead-letter queue unavailable", body = ErrorResponse),
    ),
    tag = "dlq"
)]
pub async fn debug(State(state): State<AppState>) -> Result<Json<DebugInfo>, ApiError> {
    let info = state.dead_letters.debug().await.map_err(store_error)?;
    Ok(Json(info))
}

/// POST /dlq/debug-add - Insert a synthetic entry
#[utoipa::path(
    post,
    path = "/dlq/debug-add",
    responses(
        (status = 200, description = "Entry added", body = DebugAddOutcome),
        (status = 503, description = "Dead-letter queue unavailable", body = ErrorResponse),
    ),
    tag = "dlq"
)]
pub async fn debug_add(State(state): State<AppState>) -> Result<Json<DebugAddOutcome>, ApiError> {
    let outcome = state
        .dead_letters
        .debug_add(json!({"to": "debug@example.com", "subject": "debug"}))
        .await
        .map_err(store_error)?;
    Ok(Json(outcome))
}
