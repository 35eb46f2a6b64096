//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/inference/project", post(handlers::create_inference))
        .route(
            "/v1/inference/project/{owner}/{project_id}/last-commit",
            get(handlers::get_last_commit),
        )
        .route(
            "/v1/inference/project/{owner}/{project_id}/{instance_id}",
            get(handlers::get_inference),
        )
        // Backend status reports
        .route(
            "/v1/internal/inference/{instance_id}",
            put(handlers::update_inference_detail),
        );

    let mut router = Router::new().merge(api_routes);

    // When enabled, /metrics must be network-restricted to scrapers.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
