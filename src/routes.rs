use crate::handlers::{self, AppState};
use crate::openapi::ApiDoc;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, map_response_body::MapResponseBodyLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Request bodies are tiny; 1 MiB is generous.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// CORS for the configured front-end origins. Cookies are allowed, so the
/// origin list is explicit.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// All application routes with body limit, CORS and request tracing.
/// Rate limiting and the overall timeout are added by the server binary.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/api/me", get(handlers::get_me))
        .route("/api/candidates", get(handlers::list_candidates))
        .route("/api/candidates/:slug", get(handlers::get_candidate))
        .route(
            "/api/candidates/:slug/unlock",
            post(handlers::unlock_candidate),
        )
        .route("/api/audit-logs", get(handlers::get_audit_logs))
        .route(
            "/internal/cache/skills/:candidate_id",
            delete(handlers::invalidate_skills),
        )
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(MapResponseBodyLayer::new(axum::body::Body::new))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
}
