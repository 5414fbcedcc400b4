//! Error types for CdEDB storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found")]
    NotFound,

    /// A concurrent transaction changed data this transaction read.
    ///
    /// Nothing was written; running the operation again may succeed.
    #[error("serialization conflict, transaction aborted")]
    Conflict,
}

impl StoreError {
    /// Whether the failed operation may succeed when retried.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
