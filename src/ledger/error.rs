//! Error types for the moderation ledger

use thiserror::Error;

/// Errors that can occur while reading or writing the ledger
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected or failed the statement
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a record
    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}

/// Result type for ledger operations
pub type StoreResult<T> = Result<T, StoreError>;
