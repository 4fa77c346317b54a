use super::state::AppState;
use crate::assistant;
use crate::error::VoiceError;
use crate::session::{CommandOutcome, SessionStats, VoiceState};
use crate::store::{MemoryUpdate, NewMemory, UserProfile};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct VoiceStatusResponse {
    pub session_id: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub outcome: CommandOutcome,
    pub state: VoiceState,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            kind: None,
        }),
    )
        .into_response()
}

fn voice_error_response(e: &VoiceError) -> Response {
    let status = match e {
        VoiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        VoiceError::DeviceUnavailable(_) | VoiceError::SessionClosed => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        VoiceError::Connection(_) | VoiceError::NotConnected | VoiceError::Server(_) => {
            StatusCode::BAD_GATEWAY
        }
        VoiceError::ResponseTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            kind: Some(e.kind()),
        }),
    )
        .into_response()
}

fn command_response(state: &AppState, result: Result<CommandOutcome, VoiceError>) -> Response {
    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(CommandResponse {
                outcome,
                state: state.session.state(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Voice command failed: {}", e);
            voice_error_response(&e)
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /voice/state
pub async fn voice_state(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.session.get_stats().await;
    Json(VoiceStatusResponse {
        session_id: state.session.session_id().to_string(),
        stats,
    })
}

/// POST /voice/start
/// Start listening (ignored unless idle)
pub async fn voice_start(State(state): State<AppState>) -> Response {
    info!("Mic start requested");
    let result = state.session.start().await;
    command_response(&state, result)
}

/// POST /voice/stop
/// Finish the current utterance now
pub async fn voice_stop(State(state): State<AppState>) -> Response {
    info!("Mic stop requested");
    let result = state.session.stop().await;
    command_response(&state, result)
}

/// POST /voice/toggle
/// Mic button press
pub async fn voice_toggle(State(state): State<AppState>) -> Response {
    let result = state.session.toggle().await;
    command_response(&state, result)
}

/// GET /conversation
/// Voice conversation history of the running session
pub async fn conversation(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.conversation().await)
}

/// POST /chat
/// Text companion exchange
pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let text = req.text.trim();
    if text.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Message text is empty");
    }

    match assistant::chat(state.assistant.as_ref(), &state.store, text).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(e) => {
            error!("Failed to record chat: {}", e);
            voice_error_response(&e)
        }
    }
}

/// GET /profile
pub async fn get_profile(State(state): State<AppState>) -> Response {
    let store = state.store.read().await;
    match store.profile() {
        Some(profile) => (StatusCode::OK, Json(profile.clone())).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No profile has been set up"),
    }
}

/// PUT /profile
pub async fn put_profile(
    State(state): State<AppState>,
    Json(profile): Json<UserProfile>,
) -> Response {
    if profile.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Profile name is required");
    }

    let mut store = state.store.write().await;
    match store.set_profile(profile).await {
        Ok(profile) => (StatusCode::OK, Json(profile)).into_response(),
        Err(e) => {
            error!("Failed to save profile: {}", e);
            voice_error_response(&e)
        }
    }
}

/// DELETE /profile
pub async fn delete_profile(State(state): State<AppState>) -> Response {
    let mut store = state.store.write().await;
    match store.clear_profile().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => voice_error_response(&e),
    }
}

/// GET /memories
pub async fn list_memories(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.read().await;
    Json(store.memories().to_vec())
}

/// POST /memories
pub async fn create_memory(
    State(state): State<AppState>,
    Json(memory): Json<NewMemory>,
) -> Response {
    if memory.title.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Memory title is required");
    }

    let mut store = state.store.write().await;
    match store.add_memory(memory).await {
        Ok(entry) => {
            info!("Memory added: {}", entry.id);
            (StatusCode::CREATED, Json(entry)).into_response()
        }
        Err(e) => voice_error_response(&e),
    }
}

/// PATCH /memories/:id
pub async fn update_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<MemoryUpdate>,
) -> Response {
    let mut store = state.store.write().await;
    match store.update_memory(&id, update).await {
        Ok(Some(entry)) => (StatusCode::OK, Json(entry)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Memory {} not found", id)),
        Err(e) => voice_error_response(&e),
    }
}

/// DELETE /memories/:id
pub async fn delete_memory(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let mut store = state.store.write().await;
    match store.delete_memory(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Memory {} not found", id)),
        Err(e) => voice_error_response(&e),
    }
}

/// GET /companion/tags
/// Interests picked up from the companion conversation
pub async fn companion_tags(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.read().await;
    Json(store.companion_tags().to_vec())
}
