use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, info, warn};

use super::validation::parse_chat_request;
use super::AppState;
use crate::agent::gateway::PromptMessage;

/// `POST /api/chat`: one completion for the given messages.
///
/// The body is read raw so that a missing content type or a non-JSON body is
/// reported as invalid request data.
pub async fn chat_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let messages = match parse_chat_request(&body) {
        Ok(messages) => messages,
        Err(details) => {
            warn!("Rejected chat request with {} issue(s)", details.len());
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid request data", "details": details })),
            )
                .into_response();
        }
    };

    let prompt: Vec<PromptMessage> = messages.iter().map(PromptMessage::from).collect();
    info!("Chat request with {} messages", prompt.len());

    match state.chat_gateway.complete(&prompt).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => {
            error!("Completion failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to generate response" })),
            )
                .into_response()
        }
    }
}
