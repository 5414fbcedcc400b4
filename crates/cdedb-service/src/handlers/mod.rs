//! API handlers.
//!
//! Backend operations are synchronous and short; handlers call them directly
//! and map their results into JSON responses.

pub mod events;
pub mod finance;
pub mod health;
pub mod lastschrift;
pub mod partial_import;
pub mod personas;
pub mod semester;

use cdedb_backend::{Outcome, Refusal};
use serde::Serialize;

/// Response for operations that may be refused.
///
/// A refusal is not an error: the request was understood and the data is
/// unchanged, so it is answered with `200` and `"granted": false`.
#[derive(Debug, Serialize)]
pub struct OutcomeResponse<T> {
    /// Whether the operation took effect.
    pub granted: bool,
    /// The result, if granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    /// Why it was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<Refusal>,
}

impl<T> From<Outcome<T>> for OutcomeResponse<T> {
    fn from(outcome: Outcome<T>) -> Self {
        match outcome {
            Outcome::Granted(result) => Self {
                granted: true,
                result: Some(result),
                refusal: None,
            },
            Outcome::Refused(refusal) => {
                tracing::warn!(%refusal, "Request refused");
                Self {
                    granted: false,
                    result: None,
                    refusal: Some(refusal),
                }
            }
        }
    }
}
