//! HTTP API for the companion app
//!
//! This module provides a REST API over the voice session and the store:
//! - GET /voice/state, POST /voice/start|stop|toggle - Mic control
//! - GET /conversation - Voice conversation history
//! - POST /chat, GET /companion/tags - Text companion
//! - GET|PUT|DELETE /profile - User profile
//! - GET|POST /memories, PATCH|DELETE /memories/:id - Memories
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
