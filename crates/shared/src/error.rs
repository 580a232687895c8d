//! Error taxonomy shared by every component of the assistant.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stable error codes carried in protocol responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidFormat,
    NotConfigured,
    AuthenticationFailed,
    UpstreamError,
    TransportError,
    RestrictedPage,
    Timeout,
    UnknownAction,
    Storage,
    Injection,
    Messaging,
    Initialization,
    InvalidRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssistantError {
    #[error("Invalid Claude API key format. Should start with sk-ant- or sk-")]
    InvalidFormat,

    #[error("Claude API key is not set. Please configure your API key in the extension settings.")]
    NotConfigured,

    #[error("Authentication failed. Please check your API key and try again.")]
    AuthenticationFailed,

    #[error("Claude API Error ({status}): {body}")]
    UpstreamError { status: u16, body: String },

    #[error("Network error: {0}")]
    TransportError(String),

    #[error("Cannot inject into {0}")]
    RestrictedPage(String),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Injection failed: {0}")]
    Injection(String),

    #[error("Messaging failed: {0}")]
    Messaging(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AssistantError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssistantError::InvalidFormat => ErrorKind::InvalidFormat,
            AssistantError::NotConfigured => ErrorKind::NotConfigured,
            AssistantError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            AssistantError::UpstreamError { .. } => ErrorKind::UpstreamError,
            AssistantError::TransportError(_) => ErrorKind::TransportError,
            AssistantError::RestrictedPage(_) => ErrorKind::RestrictedPage,
            AssistantError::Timeout { .. } => ErrorKind::Timeout,
            AssistantError::UnknownAction(_) => ErrorKind::UnknownAction,
            AssistantError::Storage(_) => ErrorKind::Storage,
            AssistantError::Injection(_) => ErrorKind::Injection,
            AssistantError::Messaging(_) => ErrorKind::Messaging,
            AssistantError::Initialization(_) => ErrorKind::Initialization,
            AssistantError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Wrap a storage backend failure.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        AssistantError::Storage(err.to_string())
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        AssistantError::Timeout { operation, after }
    }
}

pub type AssistantResult<T> = Result<T, AssistantError>;
