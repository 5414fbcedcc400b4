//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, patch, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{events, finance, health, lastschrift, partial_import, personas, semester};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for batch and period endpoints.
/// These run long transactions over many rows and conflict with each other.
const BATCH_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Personas (service API key)
/// - `POST /v1/personas`, `GET /v1/personas`, `GET /v1/personas/:id`
/// - `POST /v1/personas/:id/balance` - Manual balance correction
/// - `GET /v1/personas/:id/lastschrift` - Permits of a persona
///
/// ## Semester (service API key, batch limit)
/// - `GET /v1/semester` - Current period and startable steps
/// - `GET /v1/semester/steps/:step` - Whether a step may start
/// - `POST /v1/semester/steps/:step/run`, `POST /v1/semester/steps/:step/finish`
/// - `POST /v1/semester/advance`
/// - `GET /v1/expuls`, `POST /v1/expuls/addresscheck`,
///   `POST /v1/expuls/addresscheck/finish`, `POST /v1/expuls/advance`
///
/// ## Lastschrift (service API key)
/// - `POST /v1/lastschrift`, `GET|DELETE /v1/lastschrift/:id`
/// - `POST /v1/lastschrift/:id/revoke`, `GET /v1/lastschrift/:id/blockers`
/// - `POST /v1/lastschrift/:id/transactions` - Issue a transaction
/// - `GET|POST /v1/lastschrift/:id/skip`
/// - `GET /v1/transactions`, `POST /v1/transactions/finalize`,
///   `POST /v1/transactions/:id/rollback`
///
/// ## Finance (service API key, batch limit)
/// - `POST /v1/finance/transfers`, `POST /v1/finance/admissions`
/// - `GET /v1/finance/log`
///
/// ## Events (service API key)
/// - `POST|GET /v1/events`, `GET /v1/events/:id`, `PUT /v1/events/:id/lock`
/// - `PATCH /v1/events/:id/fees`, `POST /v1/events/:id/fees/preview`,
///   `POST /v1/events/:id/fees/payments`
/// - `POST|GET /v1/events/:id/registrations`,
///   `GET|PATCH|DELETE /v1/registrations/:id`
/// - `GET /v1/events/:id/log`
/// - `GET /v1/events/:id/export`, `POST /v1/events/:id/import`
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let semester_routes = Router::new()
        .route("/semester", get(semester::status))
        .route("/semester/steps/:step", get(semester::may_start))
        .route("/semester/steps/:step/run", post(semester::run_step))
        .route("/semester/steps/:step/finish", post(semester::finish_step))
        .route("/semester/advance", post(semester::advance))
        .route("/expuls", get(semester::expuls_status))
        .route("/expuls/addresscheck", post(semester::expuls_addresscheck))
        .route(
            "/expuls/addresscheck/finish",
            post(semester::finish_expuls_addresscheck),
        )
        .route("/expuls/advance", post(semester::advance_expuls))
        .route("/finance/transfers", post(finance::money_transfers))
        .route("/finance/admissions", post(finance::batch_admission))
        .route("/transactions/finalize", post(lastschrift::finalize_transactions))
        .layer(ConcurrencyLimitLayer::new(BATCH_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Personas
        .route(
            "/personas",
            post(personas::create_persona).get(personas::list_personas),
        )
        .route("/personas/:id", get(personas::get_persona))
        .route("/personas/:id/balance", post(personas::change_balance))
        .route("/personas/:id/lastschrift", get(personas::list_lastschrift))
        // Lastschrift
        .route("/lastschrift", post(lastschrift::create))
        .route(
            "/lastschrift/:id",
            get(lastschrift::get).delete(lastschrift::delete),
        )
        .route("/lastschrift/:id/revoke", post(lastschrift::revoke))
        .route("/lastschrift/:id/blockers", get(lastschrift::delete_blockers))
        .route(
            "/lastschrift/:id/transactions",
            post(lastschrift::issue_transaction),
        )
        .route(
            "/lastschrift/:id/skip",
            get(lastschrift::may_skip).post(lastschrift::skip),
        )
        .route("/transactions", get(lastschrift::list_transactions))
        .route(
            "/transactions/:id/rollback",
            post(lastschrift::rollback_transaction),
        )
        // Finance
        .route("/finance/log", get(finance::log))
        // Events
        .route(
            "/events",
            post(events::create_event).get(events::list_events),
        )
        .route("/events/:id", get(events::get_event))
        .route("/events/:id/lock", put(events::set_lock))
        .route("/events/:id/fees", patch(events::set_fees))
        .route("/events/:id/fees/preview", post(events::preview_fee))
        .route("/events/:id/fees/payments", post(events::book_fees))
        .route(
            "/events/:id/registrations",
            post(events::create_registration).get(events::list_registrations),
        )
        .route(
            "/registrations/:id",
            get(events::get_registration)
                .patch(events::update_registration)
                .delete(events::delete_registration),
        )
        .route("/events/:id/log", get(events::log))
        // Offline tools
        .route("/events/:id/export", get(partial_import::export))
        .route("/events/:id/import", post(partial_import::import))
        // Batch and period routes (with their own concurrency limit)
        .merge(semester_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
