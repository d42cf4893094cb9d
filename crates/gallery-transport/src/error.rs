use gallery_auth::AuthError;
use reqwest::StatusCode;
use thiserror::Error;

/// Error type for authenticated API requests.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unauthorized - session is no longer valid")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid response body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Maximum length for error response bodies in error messages.
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl TransportError {
    /// Truncate a response body to avoid carrying excessive data.
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => TransportError::Unauthorized,
            403 => TransportError::AccessDenied(truncated),
            404 => TransportError::NotFound(truncated),
            429 => TransportError::RateLimited,
            500..=599 => TransportError::Server {
                status: status.as_u16(),
                body: truncated,
            },
            code => TransportError::UnexpectedStatus {
                status: code,
                body: truncated,
            },
        }
    }

    /// True when the session is gone and the user has to log in again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            TransportError::Unauthorized
                | TransportError::Auth(
                    AuthError::NotLoggedIn
                        | AuthError::TokenRefresh(_)
                        | AuthError::RefreshExhausted(_)
                        | AuthError::SessionInvalid(_)
                )
        )
    }
}
