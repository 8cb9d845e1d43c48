//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    cancel_dispatch, complete_upload, dispatch_session, get_playback, get_session, get_status,
    health, initiate_session, ready, refresh_credentials, report_chunk,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging, security_headers};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let session_routes = Router::new()
        .route("/sessions", post(initiate_session))
        .route("/sessions/:session_id", get(get_session))
        .route("/sessions/:session_id/status", get(get_status))
        .route("/sessions/:session_id/chunks/:index", post(report_chunk))
        .route("/sessions/:session_id/credentials", post(refresh_credentials))
        .route("/sessions/:session_id/complete", post(complete_upload))
        .route(
            "/sessions/:session_id/dispatch",
            post(dispatch_session).delete(cancel_dispatch),
        )
        .route("/sessions/:session_id/playback", get(get_playback));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", session_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
