//! Direct-debit handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cdedb_backend::{BatchOutcome, NewLastschrift, TransactionOutcome};
use cdedb_core::{DeletionBlocker, Lastschrift, LastschriftId, LastschriftTransaction, TransactionId};

use super::OutcomeResponse;
use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Filter for transaction listings.
#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    /// Only transactions of this permit.
    pub lastschrift_id: Option<LastschriftId>,
}

/// Bank outcome of a returned collection.
#[derive(Debug, Default, Deserialize)]
pub struct RollbackRequest {
    /// Amount the bank booked for the return; defaults to minus its charge.
    #[serde(default)]
    pub tally: Option<Decimal>,
}

/// Whether a permit may skip this period.
#[derive(Debug, Serialize)]
pub struct MaySkipResponse {
    /// The permit.
    pub lastschrift_id: LastschriftId,
    /// Whether skipping is allowed.
    pub may_skip: bool,
}

/// Blockers preventing deletion of a permit.
#[derive(Debug, Serialize)]
pub struct DeleteBlockersResponse {
    /// The permit.
    pub lastschrift_id: LastschriftId,
    /// Empty if the permit may be deleted.
    pub blockers: Vec<DeletionBlocker>,
}

/// Grant a new permit.
pub async fn create(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<NewLastschrift>,
) -> Result<Json<OutcomeResponse<Lastschrift>>, ApiError> {
    let outcome = state.backend.lastschrift.create(&caller.ctx, &body)?;
    Ok(Json(outcome.into()))
}

/// Get one permit.
pub async fn get(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Path(lastschrift_id): Path<LastschriftId>,
) -> Result<Json<Lastschrift>, ApiError> {
    Ok(Json(state.backend.lastschrift.get(lastschrift_id)?))
}

/// Revoke a permit.
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(lastschrift_id): Path<LastschriftId>,
) -> Result<Json<Lastschrift>, ApiError> {
    Ok(Json(
        state.backend.lastschrift.revoke(&caller.ctx, lastschrift_id)?,
    ))
}

/// What stands in the way of deleting a permit.
pub async fn delete_blockers(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(lastschrift_id): Path<LastschriftId>,
) -> Result<Json<DeleteBlockersResponse>, ApiError> {
    let blockers = state
        .backend
        .lastschrift
        .delete_blockers(&caller.ctx, lastschrift_id)?;
    Ok(Json(DeleteBlockersResponse {
        lastschrift_id,
        blockers,
    }))
}

/// Delete a permit and its transactions.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(lastschrift_id): Path<LastschriftId>,
) -> Result<Json<OutcomeResponse<()>>, ApiError> {
    let outcome = state.backend.lastschrift.delete(&caller.ctx, lastschrift_id)?;
    Ok(Json(outcome.into()))
}

/// Issue a transaction for the current period.
pub async fn issue_transaction(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(lastschrift_id): Path<LastschriftId>,
) -> Result<Json<LastschriftTransaction>, ApiError> {
    Ok(Json(
        state
            .backend
            .lastschrift
            .issue_transaction(&caller.ctx, lastschrift_id)?,
    ))
}

/// Whether the permit may skip the current period.
pub async fn may_skip(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(lastschrift_id): Path<LastschriftId>,
) -> Result<Json<MaySkipResponse>, ApiError> {
    let may_skip = state
        .backend
        .lastschrift
        .may_skip(&caller.ctx, lastschrift_id)?;
    Ok(Json(MaySkipResponse {
        lastschrift_id,
        may_skip,
    }))
}

/// Skip the current period.
pub async fn skip(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(lastschrift_id): Path<LastschriftId>,
) -> Result<Json<OutcomeResponse<LastschriftTransaction>>, ApiError> {
    let outcome = state.backend.lastschrift.skip(&caller.ctx, lastschrift_id)?;
    Ok(Json(outcome.into()))
}

/// List transactions, optionally of one permit.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Vec<LastschriftTransaction>>, ApiError> {
    Ok(Json(
        state
            .backend
            .lastschrift
            .list_transactions(query.lastschrift_id)?,
    ))
}

/// Record bank outcomes for a batch of transactions.
pub async fn finalize_transactions(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<Vec<TransactionOutcome>>,
) -> Result<Json<BatchOutcome<Vec<LastschriftTransaction>>>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("no transactions given".into()));
    }
    Ok(Json(
        state
            .backend
            .lastschrift
            .finalize_transactions(&caller.ctx, &body)?,
    ))
}

/// Undo the outcome of a successful transaction.
pub async fn rollback_transaction(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(transaction_id): Path<TransactionId>,
    body: Option<Json<RollbackRequest>>,
) -> Result<Json<LastschriftTransaction>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    Ok(Json(state.backend.lastschrift.rollback_transaction(
        &caller.ctx,
        transaction_id,
        body.tally,
    )?))
}
