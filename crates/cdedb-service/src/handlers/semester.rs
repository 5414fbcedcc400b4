//! Semester and ExPuls period handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use cdedb_backend::StepReport;
use cdedb_core::{ExpulsPeriod, Period, PeriodStep};

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

/// Current period plus which steps may start now.
#[derive(Debug, Serialize)]
pub struct SemesterStatus {
    /// The current period.
    pub period: Period,
    /// Steps that may start now, in execution order.
    pub startable: Vec<PeriodStep>,
}

/// Whether a single step may start.
#[derive(Debug, Serialize)]
pub struct MayStartResponse {
    /// The step asked about.
    pub step: PeriodStep,
    /// Whether it may start.
    pub may_start: bool,
}

/// Current ExPuls period plus whether the address check may start.
#[derive(Debug, Serialize)]
pub struct ExpulsStatus {
    /// The current ExPuls period.
    pub period: ExpulsPeriod,
    /// Whether the address check may start.
    pub may_start_addresscheck: bool,
}

/// Current semester period.
pub async fn status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<SemesterStatus>, ApiError> {
    let semester = &state.backend.semester;
    let period = semester.current_period(&caller.ctx)?;
    let startable = PeriodStep::ALL
        .into_iter()
        .filter(|step| period.may_start(*step))
        .collect();
    Ok(Json(SemesterStatus { period, startable }))
}

/// Whether `step` may start.
pub async fn may_start(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(step): Path<PeriodStep>,
) -> Result<Json<MayStartResponse>, ApiError> {
    let may_start = state.backend.semester.may_start(&caller.ctx, step)?;
    Ok(Json(MayStartResponse { step, may_start }))
}

/// Process and finish `step`.
pub async fn run_step(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(step): Path<PeriodStep>,
) -> Result<Json<StepReport>, ApiError> {
    Ok(Json(state.backend.semester.run_step(&caller.ctx, step)?))
}

/// Mark `step` done without processing.
pub async fn finish_step(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(step): Path<PeriodStep>,
) -> Result<Json<Period>, ApiError> {
    Ok(Json(state.backend.semester.finish_step(&caller.ctx, step)?))
}

/// Close the period and open the next one.
pub async fn advance(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<Period>, ApiError> {
    Ok(Json(state.backend.semester.advance_semester(&caller.ctx)?))
}

/// Current ExPuls period.
pub async fn expuls_status(
    State(state): State<Arc<AppState>>,
    _caller: Caller,
) -> Result<Json<ExpulsStatus>, ApiError> {
    let semester = &state.backend.semester;
    Ok(Json(ExpulsStatus {
        period: semester.current_expuls()?,
        may_start_addresscheck: semester.may_start_expuls_addresscheck()?,
    }))
}

/// Run the ExPuls address check.
pub async fn expuls_addresscheck(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<ExpulsPeriod>, ApiError> {
    Ok(Json(state.backend.semester.expuls_addresscheck(&caller.ctx)?))
}

/// Mark the ExPuls address check done without running it.
pub async fn finish_expuls_addresscheck(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<ExpulsPeriod>, ApiError> {
    Ok(Json(
        state
            .backend
            .semester
            .finish_expuls_addresscheck(&caller.ctx)?,
    ))
}

/// Close the ExPuls period and open the next one.
pub async fn advance_expuls(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<ExpulsPeriod>, ApiError> {
    Ok(Json(state.backend.semester.advance_expuls(&caller.ctx)?))
}
