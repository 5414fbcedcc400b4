//! CdEDB HTTP API Service.
//!
//! This crate exposes the finance and event core as a JSON API:
//!
//! - Personas and manual balance corrections
//! - Semester and ExPuls period steps
//! - Direct-debit permits and transactions
//! - Money transfer and admission batches
//! - Events, registrations, fees and the offline partial import
//!
//! # Authentication
//!
//! All `/v1` routes require the service API key in `x-api-key`. The calling
//! frontend names the acting persona in `x-persona-id`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers call the synchronous backend

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::{ServiceConfig, StoreBackend};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
