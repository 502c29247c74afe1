use thiserror::Error;

use crate::retry::Retryable;

/// Failure of a call to the AI service, normalized at the network boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AiError {
    /// HTTP 429: the service is applying backpressure
    #[error("AI service rate limit hit")]
    RateLimited,
    /// The call did not settle within its deadline
    #[error("{label} timed out after {timeout_ms}ms")]
    Timeout { label: String, timeout_ms: u64 },
    #[error("AI service error ({status}): {message}")]
    Server { status: u16, message: String },
    /// 4xx other than 429: a defect in the request
    #[error("AI request rejected ({status}): {message}")]
    Client { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid AI response: {0}")]
    Parse(String),
    #[error("AI gateway is shut down")]
    GatewayClosed,
}

impl AiError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => AiError::RateLimited,
            500..=599 => AiError::Server { status, message },
            _ => AiError::Client { status, message },
        }
    }
}

impl Retryable for AiError {
    fn is_retryable(&self) -> bool {
        match self {
            AiError::RateLimited | AiError::Network(_) => true,
            AiError::Server { status, .. } => (500..=504).contains(status),
            AiError::Timeout { .. }
            | AiError::Client { .. }
            | AiError::Parse(_)
            | AiError::GatewayClosed => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            AiError::from_status(status.as_u16(), e.to_string())
        } else if e.is_decode() {
            AiError::Parse(e.to_string())
        } else {
            AiError::Network(e.to_string())
        }
    }
}
