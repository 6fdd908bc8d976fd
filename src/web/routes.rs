use axum::{
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::ws::ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::status))
        .route("/config", get(handlers::get_config))
        .route("/snapshot", get(handlers::snapshot))
        .route(
            "/mapping/:profile",
            get(handlers::mapping_get).delete(handlers::mapping_delete),
        )
        .route("/mapping/:profile/reset", post(handlers::mapping_reset));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stream/mjpeg", get(handlers::mjpeg_stream))
        // Audio push and control channel
        .route("/ws", any(ws_handler))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
