// OpenAPI specification generation
//
// Used by the server (Swagger UI) and by the export-openapi binary.

use courier_queue::dead_letter::{
    BatchItem, BatchOutcome, DebugAddOutcome, DebugInfo, InspectedJob, QueueStats,
};
use courier_queue::persistence::{ConnectionInfo, JobCounts};
use courier_queue::{JobState, ReprocessOutcome};
use utoipa::OpenApi;

use crate::api;

/// OpenAPI documentation for the Courier API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::notify::send_email,
        api::notify::send_sms,
        api::dlq::inspect,
        api::dlq::reprocess,
        api::dlq::reprocess_many,
        api::dlq::reprocess_all,
        api::dlq::purge,
        api::dlq::stats,
        api::dlq::debug,
        api::dlq::debug_add,
    ),
    components(
        schemas(
            api::ErrorResponse,
            api::notify::SendEmailRequest, api::notify::SendSmsRequest,
            api::notify::EnqueueResponse,
            api::dlq::ReprocessRequest, api::dlq::JobIdsRequest,
            InspectedJob, ReprocessOutcome, BatchItem, BatchOutcome,
            QueueStats, DebugInfo, DebugAddOutcome,
            JobCounts, ConnectionInfo, JobState,
        )
    ),
    tags(
        (name = "notify", description = "Queue email and SMS notifications"),
        (name = "dlq", description = "Dead-letter queue administration")
    ),
    info(
        title = "Courier API",
        version = "0.2.0",
        description = "Durable notification delivery with retries and a dead-letter queue",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lists_all_routes() {
        let spec = ApiDoc::openapi();
        let paths: Vec<&str> = spec.paths.paths.keys().map(String::as_str).collect();
        for path in [
            "/notify/email",
            "/notify/sms",
            "/dlq/inspect",
            "/dlq/reprocess",
            "/dlq/reprocess-many",
            "/dlq/reprocess-all",
            "/dlq/purge",
            "/dlq/stats",
            "/dlq/debug",
            "/dlq/debug-add",
        ] {
            assert!(paths.contains(&path), "missing {}", path);
        }
    }

    #[test]
    fn test_to_json() {
        let json = ApiDoc::to_json().unwrap();
        assert!(json.contains("\"title\": \"Courier API\""));
    }
}
