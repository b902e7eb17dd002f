//! Error types for registry construction, lifecycle and control-plane calls.

use queue_binder_runtime::{ConsumerError, QueueError, SerializationError};
use thiserror::Error;

/// Errors raised by the [`QueueRegistry`](crate::registry::QueueRegistry)
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two consumer declarations share a name
    #[error("Consumer '{queue_name}' is declared more than once")]
    DuplicateConsumer { queue_name: String },

    /// Two producer declarations share a name
    #[error("Producer '{queue_name}' is declared more than once")]
    DuplicateProducer { queue_name: String },

    /// The name is registered in neither role
    #[error("Queue '{queue_name}' is not registered")]
    QueueNotFound { queue_name: String },

    /// The operation needs a consumer and none is registered under the name
    #[error("No consumer is registered for queue '{queue_name}'")]
    ConsumerNotFound { queue_name: String },

    /// The operation needs a producer and none is registered under the name
    #[error("No producer is registered for queue '{queue_name}'")]
    ProducerNotFound { queue_name: String },

    #[error("Failed to construct client for queue '{queue_name}': {source}")]
    Construction {
        queue_name: String,
        #[source]
        source: QueueError,
    },

    #[error("Lifecycle operation failed: {0}")]
    Lifecycle(#[from] ConsumerError),

    #[error("Message serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    /// The backend rejected or failed a command
    #[error(transparent)]
    Transport(#[from] QueueError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl RegistryError {
    /// True for the three call-time lookup failures
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::QueueNotFound { .. } | Self::ConsumerNotFound { .. } | Self::ProducerNotFound { .. }
        )
    }

    /// True when a backend failure is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<config::ConfigError> for RegistryError {
    fn from(error: config::ConfigError) -> Self {
        Self::Configuration {
            message: error.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for RegistryError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: error.to_string(),
        }
    }
}
