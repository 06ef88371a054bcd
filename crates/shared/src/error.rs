//! Error types for Livedesk

use thiserror::Error;

/// Failures reported by a session store backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule was violated (second open session, second agent per account)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back to a domain value
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // PostgreSQL unique violation / check violation
            if matches!(db_err.code().as_deref(), Some("23505") | Some("23514")) {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Database(err.to_string())
    }
}

impl From<crate::types::ParseEnumError> for StoreError {
    fn from(err: crate::types::ParseEnumError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Domain failures surfaced by the chat core
#[derive(Debug, Error)]
pub enum ChatError {
    /// Entity id does not resolve, or resolves but does not belong to the caller
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate open session for a user, or agent at capacity
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Mutation attempted on a closed session
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChatError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ChatError::NotFound(what.into())
    }

    /// Short machine-readable code, shared by REST and websocket error payloads
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::NotFound(_) => "NOT_FOUND",
            ChatError::Conflict(_) => "CONFLICT",
            ChatError::InvalidState(_) => "INVALID_STATE",
            ChatError::Validation(_) => "VALIDATION_ERROR",
            ChatError::Store(_) => "STORE_ERROR",
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_passes_through_as_store_error() {
        let err: ChatError = StoreError::Conflict("dup".into()).into();
        assert!(matches!(err, ChatError::Store(StoreError::Conflict(_))));
        assert_eq!(err.code(), "STORE_ERROR");
    }

    #[test]
    fn test_row_not_found_is_database_error() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
