//! Persona handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

use cdedb_backend::NewPersona;
use cdedb_core::{Lastschrift, Persona, PersonaId};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Manual balance correction.
#[derive(Debug, Deserialize)]
pub struct BalanceChangeRequest {
    /// Amount added; negative to deduct.
    pub delta: Decimal,
    /// Reason, stored in the finance log.
    pub note: String,
}

/// Create a persona.
pub async fn create_persona(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<NewPersona>,
) -> Result<Json<Persona>, ApiError> {
    let persona = state.backend.finance.create_persona(&caller.ctx, &body)?;
    Ok(Json(persona))
}

/// List all personas.
pub async fn list_personas(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
) -> Result<Json<Vec<Persona>>, ApiError> {
    Ok(Json(state.backend.finance.list_personas()?))
}

/// Get one persona.
pub async fn get_persona(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(persona_id): Path<PersonaId>,
) -> Result<Json<Persona>, ApiError> {
    Ok(Json(state.backend.finance.get_persona(persona_id)?))
}

/// Correct a persona's balance.
pub async fn change_balance(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(persona_id): Path<PersonaId>,
    Json(body): Json<BalanceChangeRequest>,
) -> Result<Json<Persona>, ApiError> {
    if body.note.trim().is_empty() {
        return Err(ApiError::BadRequest("a note is required".into()));
    }
    let persona =
        state
            .backend
            .finance
            .change_balance(&caller.ctx, persona_id, body.delta, &body.note)?;
    Ok(Json(persona))
}

/// Direct-debit permits of a persona, active or not.
pub async fn list_lastschrift(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(persona_id): Path<PersonaId>,
) -> Result<Json<Vec<Lastschrift>>, ApiError> {
    Ok(Json(state.backend.lastschrift.list_of(persona_id)?))
}
