//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/events", post(handlers::ingest_events));

    let crawler_routes = Router::new()
        .route("/robots.txt", get(handlers::get_robots))
        .route("/sitemaps/sitemap/{file_name}", get(handlers::get_sitemap_file))
        .route("/sitemaps/index/{file_name}", get(handlers::get_index_file));

    let mut router = Router::new().merge(api_routes).merge(crawler_routes);

    // Unauthenticated; keep it off public listeners.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
