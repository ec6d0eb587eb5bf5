// Router assembly
// Decision: /health and Swagger UI stay outside the API prefix and the API key check

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::{middleware, routing::get, Json, Router};
use courier_queue::{DeadLetterManager, QueueStore};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::auth::{require_internal_key, InternalAuth, INTERNAL_API_KEY_HEADER};
use crate::openapi::ApiDoc;

/// Everything the HTTP layer needs
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn QueueStore>,
    pub dead_letters: Arc<DeadLetterManager>,
}

/// Router settings taken from the server configuration
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub api_prefix: String,
    pub internal_api_key: Option<String>,
    pub cors_allowed_origins: Vec<HeaderValue>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the complete application router
pub fn build_app(state: AppState, options: &RouterOptions) -> Router {
    let auth = InternalAuth::new(options.internal_api_key.clone());

    let mut api_routes = Router::new()
        .merge(api::notify::routes(api::notify::AppState::new(
            state.queue.clone(),
        )))
        .merge(api::dlq::routes(api::dlq::AppState::new(
            state.dead_letters.clone(),
        )));

    if auth.is_enabled() {
        api_routes = api_routes.route_layer(middleware::from_fn_with_state(
            auth,
            require_internal_key,
        ));
    }

    let app = Router::new()
        .route("/health", get(health))
        .merge(build_router_with_prefix(api_routes, &options.api_prefix))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    let app = if options.cors_allowed_origins.is_empty() {
        app
    } else {
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(options.cors_allowed_origins.clone()))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::ORIGIN,
                    HeaderName::from_static(INTERNAL_API_KEY_HEADER),
                ]),
        )
    };

    app.layer(TraceLayer::new_for_http())
}

/// Build router with optional API prefix
pub fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_routes() -> Router {
        Router::new().route("/dlq/test", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn test_api_prefix_empty() {
        let app = build_router_with_prefix(test_routes(), "");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/dlq/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_api_prefix_set() {
        let app = build_router_with_prefix(test_routes(), "/internal/notify");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/internal/notify/dlq/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/dlq/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
