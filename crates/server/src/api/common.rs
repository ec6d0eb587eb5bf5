// Common DTOs and error mapping for the HTTP API

use axum::http::StatusCode;
use axum::Json;
use courier_queue::StoreError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Convert to axum response tuple
    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

/// Error half of every fallible handler
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a store failure to an HTTP error.
///
/// Only infrastructure faults reach this point; operator mistakes such as an
/// unknown dead-letter id are reported in the response body instead.
pub fn store_error(e: StoreError) -> ApiError {
    let status = match &e {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::LeaseLost(_) => StatusCode::CONFLICT,
        StoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!(status = status.as_u16(), "Store error: {}", e);
    ErrorResponse::new(e.to_string()).into_response(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_status() {
        let (status, body) = store_error(StoreError::Unavailable("connection refused".into()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error, "store unavailable: connection refused");

        let (status, _) = store_error(StoreError::NotFound("42".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = store_error(StoreError::LeaseLost("42".into()));
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = store_error(StoreError::Serialization("bad json".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
