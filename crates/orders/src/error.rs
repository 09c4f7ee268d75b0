use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
