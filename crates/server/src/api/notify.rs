// Producer HTTP routes
//
// Decision: Payloads are enqueued as sent. Missing fields are not rejected here;
// the worker classifies them as permanent failures and dead-letters the job.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use courier_queue::{JobKind, JobOptions, NewJob, QueueStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::common::{store_error, ApiError, ErrorResponse};

/// App state for producer routes
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueStore>,
    /// Retry options given to every new job
    pub options: JobOptions,
}

impl AppState {
    pub fn new(queue: Arc<dyn QueueStore>) -> Self {
        Self {
            queue,
            options: JobOptions::default(),
        }
    }
}

/// Create producer routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/notify/email", post(send_email))
        .route("/notify/sms", post(send_sms))
        .with_state(state)
}

/// Request to send an email
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    /// Recipient address
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "user@example.com")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Template name passed through to the relay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Template variables passed through to the relay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Extra message headers, sent as given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Fail the first `n` attempts with a transient error (demo only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_times: Option<u32>,
    /// Fail every attempt (demo only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_fail: Option<bool>,
}

/// Request to send an SMS
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SendSmsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "+15550100")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Response for an accepted notification
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: String,
}

async fn enqueue<T: Serialize>(
    state: &AppState,
    kind: JobKind,
    request: &T,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let payload = serde_json::to_value(request).map_err(|e| {
        ErrorResponse::new(e.to_string()).into_response(axum::http::StatusCode::BAD_REQUEST)
    })?;

    let job = NewJob::new(kind, payload).with_options(state.options.clone());
    let job_id = state.queue.enqueue(job).await.map_err(store_error)?;

    Ok(Json(EnqueueResponse { job_id }))
}

/// POST /notify/email - Queue an email
#[utoipa::path(
    post,
    path = "/notify/email",
    request_body = SendEmailRequest,
    responses(
        (status = 200, description = "Email queued", body = EnqueueResponse),
        (status = 503, description = "Queue unavailable", body = ErrorResponse),
    ),
    tag = "notify"
)]
pub async fn send_email(
    State(state): State<AppState>,
    Json(request): Json<SendEmailRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let response = enqueue(&state, JobKind::Email, &request).await?;
    tracing::info!(job_id = %response.job_id, "Email queued");
    Ok(response)
}

/// POST /notify/sms - Queue an SMS
#[utoipa::path(
    post,
    path = "/notify/sms",
    request_body = SendSmsRequest,
    responses(
        (status = 200, description = "SMS queued", body = EnqueueResponse),
        (status = 503, description = "Queue unavailable", body = ErrorResponse),
    ),
    tag = "notify"
)]
pub async fn send_sms(
    State(state): State<AppState>,
    Json(request): Json<SendSmsRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let response = enqueue(&state, JobKind::Sms, &request).await?;
    tracing::info!(job_id = %response.job_id, "SMS queued");
    Ok(response)
}
