//! Event and registration handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cdedb_backend::{
    BatchOutcome, FeePayment, FeePreview, FeeUpdate, NewEvent, NewRegistration,
    RegistrationUpdate,
};
use cdedb_core::{Event, EventId, EventLogEntry, Registration, RegistrationId};

use super::OutcomeResponse;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Offline lock toggle.
#[derive(Debug, Deserialize)]
pub struct LockRequest {
    /// Whether the event is locked for offline use.
    pub locked: bool,
}

/// Result of a fee preview.
#[derive(Debug, Serialize)]
pub struct FeePreviewResponse {
    /// The event.
    pub event_id: EventId,
    /// The fee the registration would owe.
    pub fee: Decimal,
}

/// Create an event.
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<NewEvent>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = state.backend.event.create_event(&caller.ctx, &body)?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// List all events.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(state.backend.event.list_events()?))
}

/// Get one event.
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(event_id): Path<EventId>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.backend.event.get_event(event_id)?))
}

/// Lock or unlock an event for offline use.
pub async fn set_lock(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(event_id): Path<EventId>,
    Json(body): Json<LockRequest>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(
        state.backend.event.set_offline_lock(event_id, body.locked)?,
    ))
}

/// Change the fee configuration and recompute every registration.
pub async fn set_fees(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(event_id): Path<EventId>,
    Json(body): Json<FeeUpdate>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(
        state
            .backend
            .event
            .set_event_fees(&caller.ctx, event_id, &body)?,
    ))
}

/// Compute a fee without storing anything.
pub async fn preview_fee(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(event_id): Path<EventId>,
    Json(body): Json<FeePreview>,
) -> Result<Json<FeePreviewResponse>, ApiError> {
    let fee = state.backend.event.calculate_fee(event_id, &body)?;
    Ok(Json(FeePreviewResponse { event_id, fee }))
}

/// Book received payments.
pub async fn book_fees(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(event_id): Path<EventId>,
    Json(body): Json<Vec<FeePayment>>,
) -> Result<Json<BatchOutcome<Vec<Registration>>>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("no payments given".into()));
    }
    Ok(Json(
        state.backend.event.book_fees(&caller.ctx, event_id, &body)?,
    ))
}

/// Register a persona.
pub async fn create_registration(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(event_id): Path<EventId>,
    Json(body): Json<NewRegistration>,
) -> Result<Json<OutcomeResponse<Registration>>, ApiError> {
    let outcome = state
        .backend
        .event
        .create_registration(&caller.ctx, event_id, &body)?;
    Ok(Json(outcome.into()))
}

/// All registrations of an event.
pub async fn list_registrations(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(event_id): Path<EventId>,
) -> Result<Json<Vec<Registration>>, ApiError> {
    Ok(Json(state.backend.event.list_registrations(event_id)?))
}

/// Get one registration.
pub async fn get_registration(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(registration_id): Path<RegistrationId>,
) -> Result<Json<Registration>, ApiError> {
    Ok(Json(state.backend.event.get_registration(registration_id)?))
}

/// Update parts of a registration.
pub async fn update_registration(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(registration_id): Path<RegistrationId>,
    Json(body): Json<RegistrationUpdate>,
) -> Result<Json<Registration>, ApiError> {
    Ok(Json(state.backend.event.set_registration(
        &caller.ctx,
        registration_id,
        &body,
    )?))
}

/// Delete a registration.
pub async fn delete_registration(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(registration_id): Path<RegistrationId>,
) -> Result<StatusCode, ApiError> {
    state
        .backend
        .event
        .delete_registration(&caller.ctx, registration_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// The event log.
pub async fn log(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(event_id): Path<EventId>,
) -> Result<Json<Vec<EventLogEntry>>, ApiError> {
    Ok(Json(state.backend.event.event_log(event_id)?))
}
