use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::models::ProcessingState;

/// Type alias for Result with AutoReplyError
pub type Result<T> = std::result::Result<T, AutoReplyError>;

/// Error types for the auto-analysis and reply engine
#[derive(Error, Debug)]
pub enum AutoReplyError {
    /// Mail provider could not list messages (discovery step)
    #[error("Mail provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Remote classifier could not analyze a message
    #[error("Classification unavailable: {0}")]
    ClassificationUnavailable(String),

    /// A ledger transition was requested from the wrong predecessor state.
    /// Always a core-logic or collaborator contract fault.
    #[error("Invalid transition for message {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ProcessingState,
        to: ProcessingState,
    },

    /// A single reply job could not be delivered
    #[error("Failed to send reply for message {id}: {reason}")]
    SendFailed { id: String, reason: String },

    /// Message id is not tracked by the ledger
    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AutoReplyError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AutoReplyError::RateLimitExceeded { .. }
                | AutoReplyError::ServerError { .. }
                | AutoReplyError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Programming-level faults that must never be swallowed
    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            AutoReplyError::InvalidTransition { .. } | AutoReplyError::UnknownMessage(_)
        )
    }
}

/// Read a delay-seconds Retry-After header, defaulting to 5 seconds.
fn retry_after_secs(headers: &HeaderMap) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

impl From<google_gmail1::Error> for AutoReplyError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => AutoReplyError::RateLimitExceeded {
                        retry_after: retry_after_secs(response.headers()),
                    },
                    404 => AutoReplyError::MessageNotFound("Resource not found".to_string()),
                    400 => AutoReplyError::BadRequest(message),
                    401 => AutoReplyError::AuthError(message),
                    403 => AutoReplyError::Forbidden(message),
                    500..=599 => AutoReplyError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => AutoReplyError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => {
                AutoReplyError::BadRequest(format!("{}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                AutoReplyError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => AutoReplyError::NetworkError(err.to_string()),
            _ => AutoReplyError::ApiError(error.to_string()),
        }
    }
}

impl From<reqwest::Error> for AutoReplyError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => AutoReplyError::ClassificationUnavailable(format!(
                "analyzer returned HTTP {}",
                status.as_u16()
            )),
            None => AutoReplyError::ClassificationUnavailable(error.to_string()),
        }
    }
}
