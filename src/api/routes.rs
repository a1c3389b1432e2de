//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    access_handler, clear_handler, delete_handler, focus_handler, get_handler, health_handler,
    load_handler, pause_handler, predict_handler, prefetch_handler, put_handler, resume_handler,
    stats_handler, visibility_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /cache` - Store a value
/// - `DELETE /cache` - Clear tiers, statistics and access patterns
/// - `GET /cache/:key` - Look up a value
/// - `DELETE /cache/:key` - Invalidate a key
/// - `GET /load/:key` - Get or load from the content origin
/// - `POST /access` - Record an access
/// - `GET /predict/:subject` - Ranked predictions for a subject
/// - `POST /prefetch` - Start prefetching for a subject
/// - `POST /prefetch/pause`, `POST /prefetch/resume`
/// - `POST /events/focus`, `POST /events/visibility` - Interaction signals
/// - `GET /stats` - Cache statistics
/// - `GET /health` - Health check
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/cache", put(put_handler).delete(clear_handler))
        .route("/cache/:key", get(get_handler).delete(delete_handler))
        .route("/load/:key", get(load_handler))
        .route("/access", post(access_handler))
        .route("/predict/:subject", get(predict_handler))
        .route("/prefetch", post(prefetch_handler))
        .route("/prefetch/pause", post(pause_handler))
        .route("/prefetch/resume", post(resume_handler))
        .route("/events/focus", post(focus_handler))
        .route("/events/visibility", post(visibility_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
