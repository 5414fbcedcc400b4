//! Finance batch handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use cdedb_backend::{BatchOutcome, MoneyTransfer, NewPersona, TransferReceipt};
use cdedb_core::{CdeLogEntry, PersonaId};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Maximum rows per batch request.
const MAX_BATCH_ROWS: usize = 1000;

fn check_batch_size(rows: usize) -> Result<(), ApiError> {
    if rows == 0 {
        return Err(ApiError::BadRequest("empty batch".into()));
    }
    if rows > MAX_BATCH_ROWS {
        return Err(ApiError::BadRequest(format!(
            "batch of {rows} rows exceeds limit of {MAX_BATCH_ROWS}"
        )));
    }
    Ok(())
}

/// Book bank transfers.
pub async fn money_transfers(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<Vec<MoneyTransfer>>,
) -> Result<Json<BatchOutcome<Vec<TransferReceipt>>>, ApiError> {
    check_batch_size(body.len())?;
    let outcome = state
        .backend
        .finance
        .perform_money_transfers(&caller.ctx, &body)?;
    if outcome.is_retryable() {
        tracing::warn!(rows = body.len(), "Money transfer batch hit a conflict");
    }
    Ok(Json(outcome))
}

/// Admit new members.
pub async fn batch_admission(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<Vec<NewPersona>>,
) -> Result<Json<BatchOutcome<Vec<PersonaId>>>, ApiError> {
    check_batch_size(body.len())?;
    let outcome = state
        .backend
        .finance
        .perform_batch_admission(&caller.ctx, &body)?;
    if outcome.is_retryable() {
        tracing::warn!(rows = body.len(), "Batch admission hit a conflict");
    }
    Ok(Json(outcome))
}

/// The finance log.
pub async fn log(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
) -> Result<Json<Vec<CdeLogEntry>>, ApiError> {
    Ok(Json(state.backend.finance.cde_log()?))
}
