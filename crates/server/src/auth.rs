// Internal API key check
// Decision: A single shared secret for service-to-service calls; no key configured means open

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::ErrorResponse;

/// Header carrying the shared secret
pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

/// Expected key, if one is configured
#[derive(Clone, Default)]
pub struct InternalAuth {
    key: Option<Arc<str>>,
}

impl InternalAuth {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Returns true if no key is configured or the request carries the right one
    pub fn check(&self, request: &Request) -> bool {
        let Some(expected) = &self.key else {
            return true;
        };

        request
            .headers()
            .get(INTERNAL_API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|key| key == expected.as_ref())
            .unwrap_or(false)
    }
}

/// Reject requests without a valid `x-internal-api-key`
pub async fn require_internal_key(
    State(auth): State<InternalAuth>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.check(&request) {
        tracing::warn!(uri = %request.uri(), "Rejected request with missing or invalid API key");
        return ErrorResponse::new("invalid or missing internal API key")
            .into_response(StatusCode::UNAUTHORIZED)
            .into_response();
    }
    next.run(request).await
}
