use thiserror::Error;

/// Errors that can occur in the reservation engine.
///
/// Expected protocol outcomes (insufficient stock, no hold, debit conflict)
/// are not errors; they are variants of the per-operation outcome enums.
/// This enum covers validation failures and infrastructure faults only.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The requested quantity was not a positive integer.
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    /// The requested lease extension was not a positive number of seconds.
    #[error("extension must be positive, got {0}s")]
    InvalidExtension(i64),

    /// A database error occurred at the ledger store or system of record.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

/// Result type for reservation operations.
pub type Result<T> = std::result::Result<T, ReservationError>;
