//! Typed error hierarchy for the board service.
//!
//! `BoardError` covers the failures that are returned synchronously to a
//! caller. Viewer delivery failures and notification channel failures are
//! absorbed inside the core and never show up here.

use thiserror::Error;

/// Errors surfaced by board, idea and feedback operations.
#[derive(Debug, Error)]
pub enum BoardError {
    /// A requested value is outside its allowed domain. No side effects.
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// The record is absent or not owned by the requester. The two cases are
    /// reported identically so other owners' boards cannot be discovered.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Too many feedback events, try again later")]
    RateLimited,

    /// The atomic unit of work failed and was rolled back. Safe to retry.
    #[error("Transaction aborted: {0}")]
    Transaction(#[source] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl BoardError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn board_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "Board",
            id: id.to_string(),
        }
    }

    pub fn idea_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "Idea",
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field() {
        let err = BoardError::validation("column", "unknown column 'icebox'");
        assert!(matches!(err, BoardError::Validation { field: "column", .. }));
        assert_eq!(err.to_string(), "Invalid column: unknown column 'icebox'");
    }

    #[test]
    fn test_not_found_carries_entity_and_id() {
        let err = BoardError::board_not_found(42);
        assert_eq!(err.to_string(), "Board 42 not found");
        let err = BoardError::idea_not_found(7);
        assert_eq!(err.to_string(), "Idea 7 not found");
    }

    #[test]
    fn test_only_transaction_errors_are_retryable() {
        assert!(BoardError::Transaction(anyhow::anyhow!("busy")).is_retryable());
        assert!(!BoardError::Database(anyhow::anyhow!("io")).is_retryable());
        assert!(!BoardError::RateLimited.is_retryable());
        assert!(!BoardError::idea_not_found(1).is_retryable());
    }

    #[test]
    fn test_board_error_survives_anyhow_round_trip() {
        let wrapped: anyhow::Error = BoardError::idea_not_found(3).into();
        let recovered = wrapped
            .downcast_ref::<BoardError>()
            .expect("typed error should be recoverable");
        assert!(matches!(recovered, BoardError::NotFound { entity: "Idea", .. }));
    }

    #[test]
    fn test_board_error_implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BoardError::RateLimited);
    }
}
