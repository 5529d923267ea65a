use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::agent::conversation::Conversation;
use crate::chat::{ChatSession, MessageView};
use crate::entity::Persona;
use crate::state::ChatState;

/// Label used for sessions whose persona has been deleted.
pub const UNKNOWN_PERSONA_LABEL: &str = "Unknown persona";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub persona_id: String,
    pub persona_name: String,
    pub messages: Vec<MessageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionView {
    fn new(session: &ChatSession, state: &ChatState) -> Self {
        Self {
            id: session.id.clone(),
            persona_id: session.persona_id.clone(),
            persona_name: state
                .persona(&session.persona_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| UNKNOWN_PERSONA_LABEL.to_string()),
            messages: session.messages.iter().map(MessageView::from).collect(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// Everything the presentation layer renders.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub personas: Vec<Persona>,
    pub current_persona_id: String,
    pub current_persona: Option<Persona>,
    pub sessions: Vec<SessionView>,
    pub current_session_id: Option<String>,
    pub current_messages: Vec<MessageView>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl StateView {
    pub fn capture(conversation: &Conversation) -> Self {
        let (is_loading, error) = (conversation.is_loading(), conversation.error());
        conversation.manager().read(|state| Self {
            personas: state.personas().to_vec(),
            current_persona_id: state.current_persona_id().to_string(),
            current_persona: state.current_persona().cloned(),
            sessions: state
                .sessions()
                .iter()
                .map(|s| SessionView::new(s, state))
                .collect(),
            current_session_id: state.current_session_id().map(str::to_string),
            current_messages: state.current_messages().iter().map(MessageView::from).collect(),
            is_loading,
            error,
        })
    }
}

pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateView> {
    Json(StateView::capture(&state.conversation))
}
