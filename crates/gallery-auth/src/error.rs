//! Authentication error types.

use crate::token::TokenError;
use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Username/password or OAuth token rejected
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Account exists but its email address has not been confirmed
    #[error("Account not confirmed: {0}")]
    UnconfirmedAccount(String),

    /// Too many failed login attempts
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Token could not be decoded locally
    #[error("Malformed token: {0}")]
    MalformedToken(#[from] TokenError),

    /// Token refresh rejected by the server
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// Refresh retries exhausted
    #[error("Token refresh failed after {0} attempts")]
    RefreshExhausted(u32),

    /// No credentials are stored
    #[error("Not logged in")]
    NotLoggedIn,

    /// Session was rejected server-side or replaced locally
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] gallery_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Server-side failure (5xx)
    #[error("Server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// Response could not be interpreted
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Connection failures and timeouts
    /// - HTTP 5xx responses
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Timeout => true,
            AuthError::Server { .. } => true,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }

    /// Whether this is a rejection of what the user typed, as opposed to a
    /// transport or server failure.
    pub fn is_credential_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials(_)
                | AuthError::UnconfirmedAccount(_)
                | AuthError::RateLimited(_)
        )
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
