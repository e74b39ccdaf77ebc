use crate::infrastructure::error::InfraError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("session expired; sign in again")]
    SessionExpired,
    #[error("temporary failure: {0}")]
    Transient(String),
    #[error("request rejected (http {status}): {message}")]
    Validation { status: u16, message: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl SyncError {
    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The UI must route to the login flow.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::SessionExpired)
    }
}

/// Outcome of a failed token refresh. Cloneable so one in-flight refresh can
/// hand the same failure to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh token is held")]
    NoRefreshToken,
    #[error("refresh token rejected: {0}")]
    Rejected(String),
    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("refreshed tokens could not be persisted: {0}")]
    Persistence(String),
    #[error("session ended while the refresh was in flight")]
    Superseded,
}
