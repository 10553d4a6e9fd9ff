//! Unified error types for fluxpool core.

use serde::Serialize;
use thiserror::Error;

use crate::coordination::CoordinationError;
use crate::modules::repository::RepositoryError;

/// Main error type for all fluxpool core operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    /// Account repository operation failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Redis, advisory lock or bounded-call failure.
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    /// Repository call exceeded its budget.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },
}

impl AppError {
    /// Retry on the next tick rather than surfacing to an operator.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Coordination(_) | Self::Timeout { .. } | Self::Repository(RepositoryError::Database(_))
        )
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

/// Result type alias for fluxpool core operations.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_message() {
        let err = AppError::from(RepositoryError::NotFound(3));
        assert_eq!(serde_json::to_string(&err).unwrap(), "\"Repository error: Account not found: 3\"");
        assert!(!err.is_transient());
        assert!(AppError::Timeout { operation: "set_error", secs: 5 }.is_transient());
    }
}
