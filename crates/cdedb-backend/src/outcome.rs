//! Non-exceptional results of backend operations.

use cdedb_core::{DeletionBlocker, EventId, LastschriftId, PersonaId, RegistrationId};
use serde::Serialize;

/// Result of an operation that may be refused for an expected business reason.
///
/// A refusal leaves the data untouched, like an error, but is part of the
/// normal flow and therefore returned as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation took effect.
    Granted(T),
    /// The operation was refused.
    Refused(Refusal),
}

impl<T> Outcome<T> {
    /// Whether the operation took effect.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    /// The value, if granted.
    #[must_use]
    pub fn granted(self) -> Option<T> {
        match self {
            Self::Granted(value) => Some(value),
            Self::Refused(_) => None,
        }
    }

    /// The refusal, if refused.
    #[must_use]
    pub const fn refusal(&self) -> Option<&Refusal> {
        match self {
            Self::Granted(_) => None,
            Self::Refused(refusal) => Some(refusal),
        }
    }
}

/// Why an operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum Refusal {
    /// The persona already has an active permit.
    #[error("persona {persona_id} already has active lastschrift {existing}")]
    DuplicateLastschrift {
        /// The persona.
        persona_id: PersonaId,
        /// The active permit.
        existing: LastschriftId,
    },

    /// The permit has not paid recently enough to skip a collection.
    #[error("lastschrift {lastschrift_id} may not skip this period")]
    SkipNotAllowed {
        /// The permit.
        lastschrift_id: LastschriftId,
    },

    /// The permit cannot be deleted yet.
    #[error("lastschrift {lastschrift_id} cannot be deleted")]
    DeletionBlocked {
        /// The permit.
        lastschrift_id: LastschriftId,
        /// Everything standing in the way.
        blockers: Vec<DeletionBlocker>,
    },

    /// The persona is already registered for the event.
    #[error("persona {persona_id} is already registered for event {event_id}")]
    DuplicateRegistration {
        /// The persona.
        persona_id: PersonaId,
        /// The event.
        event_id: EventId,
        /// The existing registration.
        existing: RegistrationId,
    },
}

/// Result of a batch operation applied in one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome<T> {
    /// Every row was applied.
    Success {
        /// Per-batch result.
        result: T,
    },
    /// A concurrent change got in the way; nothing was applied and the
    /// batch may be resubmitted unchanged.
    Conflict,
    /// A row could not be applied; nothing was applied.
    Failed {
        /// Zero-based index of the failing row.
        row: usize,
        /// What went wrong.
        reason: String,
    },
}

impl<T> BatchOutcome<T> {
    /// Whether the batch was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether the caller may simply retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
