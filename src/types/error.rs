//! Error types for Courier
//!
//! Job-terminal kinds (`Transport`, `UpstreamRejected`, `CopyFailure`,
//! `Encode`) invoke the job's cancel callback. `NodeResolution` and
//! `SigningUnavailable` are logged and recovered where they occur.

use reqwest::StatusCode;

/// Main error type for Courier operations
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Upstream rejected request with status {status}")]
    UpstreamRejected { status: StatusCode },

    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("Node resolution failure: {0}")]
    NodeResolution(String),

    #[error("Copy failure: {0}")]
    CopyFailure(String),

    #[error("Encoder failure: {0}")]
    Encode(String),

    #[error("Extraction of '{key}' timed out after {seconds}s")]
    ExtractionTimeout { key: String, seconds: u64 },

    #[error("Context value '{0}' is not readable")]
    NotReadable(String),

    #[error("Context value '{0}' is not writable")]
    NotWritable(String),

    #[error("Context value '{0}' not found")]
    NotFound(String),

    #[error("Pipe closed")]
    Closed,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CourierError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamRejected { status } => *status,
            Self::SigningUnavailable(_) => StatusCode::UNAUTHORIZED,
            Self::NodeResolution(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::CopyFailure(_) | Self::Encode(_) => StatusCode::BAD_GATEWAY,
            Self::ExtractionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidRequest(_) | Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::NotReadable(_)
            | Self::NotWritable(_)
            | Self::Closed
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for the kinds that end a job and trigger its cancel callback
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::UpstreamRejected { .. }
                | Self::CopyFailure(_)
                | Self::Encode(_)
        )
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for CourierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Result type alias for Courier operations
pub type Result<T> = std::result::Result<T, CourierError>;
