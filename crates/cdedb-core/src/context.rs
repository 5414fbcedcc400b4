//! Per-request context passed explicitly to every backend operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::PersonaId;

/// Who is asking, and when.
///
/// `now` is taken once when the request starts, so every timestamp written
/// by one operation agrees, the way a database transaction timestamp would.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlation id for logs.
    pub request_id: Uuid,

    /// The acting persona, if known.
    pub submitted_by: Option<PersonaId>,

    /// Request timestamp.
    pub now: DateTime<Utc>,

    /// Preferred language for messages.
    pub locale: String,
}

impl RequestContext {
    /// Context for a request by `submitted_by`, timestamped now.
    #[must_use]
    pub fn new(submitted_by: Option<PersonaId>) -> Self {
        Self::at(submitted_by, Utc::now())
    }

    /// Context with an explicit timestamp.
    #[must_use]
    pub fn at(submitted_by: Option<PersonaId>, now: DateTime<Utc>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            submitted_by,
            now,
            locale: "de".into(),
        }
    }

    /// Context for background jobs without an acting persona.
    #[must_use]
    pub fn system() -> Self {
        Self::new(None)
    }

    /// Override the locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}
