use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{batches, handlers, middleware::auth_middleware, middleware::metrics_middleware, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Routes that need an authenticated identity
    let protected_routes = Router::new()
        // Batches
        .route("/batches", get(batches::list_batches))
        .route("/batches/{id}", get(batches::get_batch))
        .route("/batches/{id}/uploads", get(batches::list_uploads))
        .route("/batches/{id}/cancel", post(batches::cancel_batch))
        .route("/batches/{id}/retry", post(batches::retry_batch))
        // Admin
        .route("/admin/retry", post(batches::admin_retry))
        // Real-time protocol
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    // API routes
    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        .merge(protected_routes)
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
