//! Error taxonomy of the Parley core.

use thiserror::Error;

use crate::store::StoreError;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core errors.
///
/// Request/response paths turn these into a status code and a message;
/// channel paths drop the intent and log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Missing, invalid or expired credential.
    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated but not allowed to touch the target.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Room or message id did not resolve.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Malformed or empty input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The target is in a state that forbids the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn access_denied(reason: impl Into<String>) -> Self {
        CoreError::AccessDenied(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        CoreError::Validation(reason.into())
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        CoreError::InvalidState(reason.into())
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Unauthorized => "unauthorized",
            CoreError::AccessDenied(_) => "access_denied",
            CoreError::NotFound(_) => "not_found",
            CoreError::Validation(_) => "validation",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::Storage(_) => "storage",
        }
    }

    /// Whether the error was caused by the caller rather than the server.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CoreError::Storage(_))
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CoreError::NotFound(what),
            StoreError::Conflict(reason) => CoreError::InvalidState(reason),
            StoreError::Backend(reason) => CoreError::Storage(reason),
        }
    }
}
