use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::views::StateView;
use super::{ApiError, AppState};
use crate::entity::{Persona, PersonaDraft};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSelection {
    pub persona_id: String,
}

pub async fn list_personas(State(state): State<Arc<AppState>>) -> Json<Vec<Persona>> {
    Json(
        state
            .conversation
            .manager()
            .read(|s| s.personas().to_vec()),
    )
}

pub async fn create_persona(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<PersonaDraft>,
) -> Result<(StatusCode, Json<Persona>), ApiError> {
    draft.validate().map_err(ApiError::InvalidPersona)?;

    let persona = Persona::from_draft(draft);
    info!("Creating persona {}", persona);
    state.conversation.manager().add_persona(persona.clone());

    Ok((StatusCode::CREATED, Json(persona)))
}

/// Replaces the editable fields of a custom persona with a validated form.
pub async fn update_persona(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(draft): Json<PersonaDraft>,
) -> Result<Json<Persona>, ApiError> {
    draft.validate().map_err(ApiError::InvalidPersona)?;

    let manager = state.conversation.manager();
    if !manager.update_persona(&id, &draft.into_patch())? {
        return Err(ApiError::NotFound(format!("Persona not found: {}", id)));
    }

    manager
        .read(|s| s.persona(&id).cloned())
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Persona not found: {}", id)))
}

pub async fn delete_persona(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StateView>, ApiError> {
    if !state.conversation.manager().delete_persona(&id)? {
        return Err(ApiError::NotFound(format!("Persona not found: {}", id)));
    }
    info!("Deleted persona {}", id);
    Ok(Json(StateView::capture(&state.conversation)))
}

pub async fn set_current_persona(
    State(state): State<Arc<AppState>>,
    Json(selection): Json<PersonaSelection>,
) -> Json<StateView> {
    state
        .conversation
        .manager()
        .set_current_persona(&selection.persona_id);
    Json(StateView::capture(&state.conversation))
}
