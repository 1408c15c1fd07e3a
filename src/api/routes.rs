//! API Routes
//!
//! Configures the Axum router with all chart cache endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    add_pool_handler, clear_pool_handler, create_report_handler, empty_queue_handler,
    flush_owner_cache_handler, health_handler, image_handler, list_pool_handler,
    remove_pool_handler, remove_report_charts_handler, remove_report_handler,
    report_charts_handler, save_report_chart_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/owners/:owner/image", get(image_handler))
        .route(
            "/owners/:owner/pool",
            get(list_pool_handler)
                .post(add_pool_handler)
                .delete(remove_pool_handler),
        )
        .route("/owners/:owner/pool/clear", post(clear_pool_handler))
        .route("/owners/:owner/pool/all", delete(empty_queue_handler))
        .route("/owners/:owner/reports", post(create_report_handler))
        .route("/owners/:owner/cache", delete(flush_owner_cache_handler))
        .route(
            "/reports/:report_id/charts",
            get(report_charts_handler).delete(remove_report_charts_handler),
        )
        .route(
            "/reports/:report_id/charts/:ordering",
            put(save_report_chart_handler),
        )
        .route("/reports/:report_id", delete(remove_report_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
