use uuid::Uuid;

/// Error types shared across the pipeline's store operations.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Invalid transfer request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Infrastructure error: {message}")]
    Infrastructure { message: String },
}

impl DomainError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}
