use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde_json::json;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::agent::conversation::Conversation;
use crate::agent::gateway::CompletionGateway;
use crate::entity::FieldErrors;
use crate::error::StateError;

pub mod chat;
pub mod events;
pub mod personas;
pub mod sessions;
pub mod validation;
pub mod views;

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

pub struct AppState {
    /// Answers `POST /api/chat`.
    pub chat_gateway: Arc<dyn CompletionGateway>,
    /// Drives turns and store edits for the presentation layer.
    pub conversation: Arc<Conversation>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat::chat_handler))
        .route("/api/state", get(views::get_state))
        .route("/api/events", get(events::sse_handler))
        .route(
            "/api/personas",
            get(personas::list_personas).post(personas::create_persona),
        )
        .route("/api/personas/current", put(personas::set_current_persona))
        .route(
            "/api/personas/:id",
            put(personas::update_persona).delete(personas::delete_persona),
        )
        .route(
            "/api/sessions",
            post(sessions::create_session).delete(sessions::clear_all_sessions),
        )
        .route(
            "/api/sessions/current/clear",
            post(sessions::clear_current_session),
        )
        .route("/api/sessions/:id", delete(sessions::delete_session))
        .route("/api/sessions/:id/switch", post(sessions::switch_session))
        .route(
            "/api/messages/:id",
            patch(sessions::update_message).delete(sessions::delete_message),
        )
        .route("/api/conversation/send", post(sessions::send_message))
        .route("/api/conversation/persona", post(sessions::change_persona))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Invalid persona")]
    InvalidPersona(FieldErrors),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            ApiError::NotFound(_) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Conflict(_) => {
                (StatusCode::CONFLICT, Json(json!({ "error": message }))).into_response()
            }
            ApiError::State(StateError::BuiltInPersona(_)) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": message }))).into_response()
            }
            ApiError::InvalidPersona(fields) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message, "fields": fields })),
            )
                .into_response(),
        }
    }
}
