//! Error types for queue operations.

use crate::message::BatchEntryError;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue transport operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message not found or receipt expired: {receipt}")]
    MessageNotFound { receipt: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Permission denied for operation: {operation}")]
    PermissionDenied { operation: String },

    #[error("Request throttled: {message}")]
    Throttled { message: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("{} batch entries failed", .failed.len())]
    PartialBatchFailure { failed: Vec<BatchEntryError> },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::PermissionDenied { .. } => false,
            Self::Throttled { .. } => true,
            Self::MessageTooLarge { .. } => false,
            Self::BatchTooLarge { .. } => false,
            Self::PartialBatchFailure { failed } => failed.iter().any(|e| !e.sender_fault),
            Self::ProviderError { .. } => true, // Provider-specific errors are usually transient
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }

    /// Check if the error comes from rejected credentials
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::PermissionDenied { .. }
        )
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Timeout { .. } => Some(Duration::from_secs(1)),
            Self::ConnectionFailed { .. } => Some(Duration::from_secs(5)),
            Self::Throttled { .. } => Some(Duration::from_secs(2)),
            _ => None,
        }
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("XML parsing failed: {message}")]
    Xml { message: String },

    #[error("Message attribute '{key}' has invalid value")]
    InvalidAttribute { key: String },

    #[error("Expected element '{element}' missing from response")]
    MissingElement { element: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Errors raised by a consumer's lifecycle operations
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Consumer for '{queue_name}' is not running")]
    NotRunning { queue_name: String },

    #[error("Polling task for '{queue_name}' failed: {message}")]
    TaskFailed { queue_name: String, message: String },

    #[error("Consumer for '{queue_name}' could not be started: {message}")]
    StartFailed { queue_name: String, message: String },
}

/// Error returned by application message handlers
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Create a handler error from a plain description
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Get the error description
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            source: Some(error.into()),
        }
    }
}

impl From<QueueError> for HandlerError {
    fn from(error: QueueError) -> Self {
        Self::from(anyhow::Error::new(error))
    }
}

/// Text of a caught panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
