use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::personas::PersonaSelection;
use super::views::StateView;
use super::{ApiError, AppState};
use crate::agent::conversation::{SkipReason, TurnOutcome};
use crate::chat::{MessagePatch, MessageView};

// -----------------------------------------------------------------------------
// Sessions
// -----------------------------------------------------------------------------

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(selection): Json<PersonaSelection>,
) -> Result<(StatusCode, Json<StateView>), ApiError> {
    state
        .conversation
        .manager()
        .create_session(&selection.persona_id)
        .ok_or_else(|| {
            ApiError::NotFound(format!("Persona not found: {}", selection.persona_id))
        })?;
    Ok((
        StatusCode::CREATED,
        Json(StateView::capture(&state.conversation)),
    ))
}

pub async fn switch_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StateView>, ApiError> {
    if !state.conversation.manager().switch_session(&id) {
        return Err(ApiError::NotFound(format!("Session not found: {}", id)));
    }
    Ok(Json(StateView::capture(&state.conversation)))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StateView>, ApiError> {
    if !state.conversation.manager().delete_session(&id) {
        return Err(ApiError::NotFound(format!("Session not found: {}", id)));
    }
    Ok(Json(StateView::capture(&state.conversation)))
}

pub async fn clear_all_sessions(State(state): State<Arc<AppState>>) -> Json<StateView> {
    state.conversation.manager().clear_all_sessions();
    Json(StateView::capture(&state.conversation))
}

pub async fn clear_current_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StateView>, ApiError> {
    if !state.conversation.manager().clear_current_session() {
        return Err(ApiError::Conflict("No active session".into()));
    }
    Ok(Json(StateView::capture(&state.conversation)))
}

// -----------------------------------------------------------------------------
// Messages of the current session
// -----------------------------------------------------------------------------

pub async fn update_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<MessagePatch>,
) -> Result<Json<StateView>, ApiError> {
    if !state.conversation.manager().update_message(&id, &patch) {
        return Err(ApiError::NotFound(format!("Message not found: {}", id)));
    }
    Ok(Json(StateView::capture(&state.conversation)))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StateView>, ApiError> {
    if !state.conversation.manager().delete_message(&id) {
        return Err(ApiError::NotFound(format!("Message not found: {}", id)));
    }
    Ok(Json(StateView::capture(&state.conversation)))
}

// -----------------------------------------------------------------------------
// Conversation turns
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub input: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnView {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<MessageView>,
    pub state: StateView,
}

/// Turn failures are reported in the body (`state.error`), never as an HTTP error.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> Json<TurnView> {
    let outcome = state.conversation.send(&request.input).await;
    let (outcome, reason, reply) = match outcome {
        TurnOutcome::Replied(message) => ("replied", None, Some(MessageView::from(&message))),
        TurnOutcome::Failed => ("failed", None, None),
        TurnOutcome::Skipped(reason) => ("skipped", Some(reason), None),
    };
    Json(TurnView {
        outcome,
        reason,
        reply,
        state: StateView::capture(&state.conversation),
    })
}

pub async fn change_persona(
    State(state): State<Arc<AppState>>,
    Json(selection): Json<PersonaSelection>,
) -> Json<StateView> {
    state.conversation.change_persona(&selection.persona_id);
    Json(StateView::capture(&state.conversation))
}
