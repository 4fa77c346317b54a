use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Mic control
        .route("/voice/state", get(handlers::voice_state))
        .route("/voice/start", post(handlers::voice_start))
        .route("/voice/stop", post(handlers::voice_stop))
        .route("/voice/toggle", post(handlers::voice_toggle))
        .route("/conversation", get(handlers::conversation))
        // Text companion
        .route("/chat", post(handlers::chat))
        .route("/companion/tags", get(handlers::companion_tags))
        // Profile and memories
        .route(
            "/profile",
            get(handlers::get_profile)
                .put(handlers::put_profile)
                .delete(handlers::delete_profile),
        )
        .route(
            "/memories",
            get(handlers::list_memories).post(handlers::create_memory),
        )
        .route(
            "/memories/:id",
            patch(handlers::update_memory).delete(handlers::delete_memory),
        )
        // The web app runs on another origin during development
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
