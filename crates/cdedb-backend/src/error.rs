//! Error types for backend operations.
//!
//! Errors abort the surrounding transaction. Expected business outcomes that
//! leave state untouched are not errors; see [`crate::outcome`].

use cdedb_core::{
    CoreError, EventId, LastschriftId, PersonaId, StepViolation, TransactionId,
    TransactionStatus, TransactionViolation,
};
use cdedb_store::StoreError;

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Raw id looked up.
        id: i64,
    },

    /// A state transition was attempted out of order.
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionKind),

    /// A direct-debit transaction already has its final outcome.
    #[error("transaction {id} is already tallied ({status})")]
    AlreadyTallied {
        /// The transaction.
        id: TransactionId,
        /// Its current status.
        status: TransactionStatus,
    },

    /// The partial import token does not match the current data.
    #[error("partial import conflict: data changed since the token was issued")]
    PartialImportConflict {
        /// Token sent by the client.
        expected: String,
        /// Token computed against the current data.
        actual: String,
    },

    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BackendError {
    /// Whether the operation may succeed when retried unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict))
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<CoreError> for BackendError {
    fn from(err: CoreError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<StepViolation> for BackendError {
    fn from(violation: StepViolation) -> Self {
        Self::Precondition(PreconditionKind::Period(violation))
    }
}

impl From<TransactionViolation> for BackendError {
    fn from(violation: TransactionViolation) -> Self {
        match violation {
            TransactionViolation::AlreadyTallied { id, status } => {
                Self::AlreadyTallied { id, status }
            }
            other => Self::Precondition(PreconditionKind::Transaction(other)),
        }
    }
}

/// Which precondition was violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionKind {
    /// Semester step order.
    #[error(transparent)]
    Period(StepViolation),

    /// Direct-debit transaction lifecycle.
    #[error(transparent)]
    Transaction(TransactionViolation),

    /// The ExPuls address check was already done in this period.
    #[error("ExPuls address check is already done")]
    AddresscheckDone,

    /// The ExPuls period cannot advance before the address check.
    #[error("ExPuls address check is still pending")]
    AddresscheckPending,

    /// The permit has been revoked.
    #[error("lastschrift {0} is revoked")]
    PermitRevoked(LastschriftId),

    /// The permit already awaits the outcome of a transaction.
    #[error("lastschrift {0} has an open transaction")]
    OpenTransaction(LastschriftId),

    /// The permit already has a transaction in the current period.
    #[error("lastschrift {lastschrift_id} already has a transaction in this period")]
    AlreadyCollected {
        /// The permit.
        lastschrift_id: LastschriftId,
    },

    /// The persona is archived and cannot be changed.
    #[error("persona {0} is archived")]
    Archived(PersonaId),

    /// The event is locked for offline use.
    #[error("event {0} is locked for offline use")]
    OfflineLock(EventId),
}
