//! Partial export and import handlers for offline event tools.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use cdedb_core::{EventId, PartialExport, PartialImportData, PartialImportResult};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Partial import request.
///
/// The usual flow is a dry run first, whose token is then sent along with
/// the real import. If the event changed in between, the real import is
/// rejected with `409`.
#[derive(Debug, Deserialize)]
pub struct PartialImportRequest {
    /// The delta.
    pub data: PartialImportData,
    /// Token of a previous dry run.
    #[serde(default)]
    pub token: Option<String>,
    /// Discard the changes after computing them.
    #[serde(default)]
    pub dryrun: bool,
}

/// Snapshot of an event for offline editing.
pub async fn export(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(event_id): Path<EventId>,
) -> Result<Json<PartialExport>, ApiError> {
    Ok(Json(
        state
            .backend
            .event
            .partial_export_event(&caller.ctx, event_id)?,
    ))
}

/// Apply (or dry-run) an offline delta.
pub async fn import(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(event_id): Path<EventId>,
    Json(body): Json<PartialImportRequest>,
) -> Result<Json<PartialImportResult>, ApiError> {
    if body.data.id != event_id {
        return Err(ApiError::BadRequest(format!(
            "delta is for event {}, not {event_id}",
            body.data.id
        )));
    }
    let result = state.backend.partial_import.partial_import(
        &caller.ctx,
        &body.data,
        body.token.as_deref(),
        body.dryrun,
    )?;
    tracing::info!(
        event_id = %event_id,
        service = %caller.service_name,
        dryrun = body.dryrun,
        "Partial import handled"
    );
    Ok(Json(result))
}
