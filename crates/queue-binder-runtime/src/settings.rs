//! Poller, sender and shutdown settings.
//!
//! All durations are plain integers (seconds or milliseconds, as the field
//! name says) so the types deserialize from YAML, TOML, JSON and environment
//! variables alike.

use crate::error::ValidationError;
use crate::message::{QueueUrl, ReceiveOptions};
use crate::transport::{MAX_BATCH_SIZE, MAX_VISIBILITY_TIMEOUT_SECONDS, MAX_WAIT_TIME_SECONDS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a consumer is asked to shut down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopPolicy {
    /// Maximum time to wait for the in-flight poll and handler to finish
    pub timeout_ms: u64,
    /// Abort the polling task immediately instead of draining
    pub abort: bool,
}

impl StopPolicy {
    /// Drain for at most `timeout`
    pub fn graceful(timeout: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            abort: false,
        }
    }

    /// Terminate without waiting
    pub fn abort() -> Self {
        Self {
            timeout_ms: 0,
            abort: true,
        }
    }

    /// Drain timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            abort: false,
        }
    }
}

/// Optional per-queue override of the backend connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

/// Settings of a polling consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    pub queue_url: Option<QueueUrl>,
    /// Messages fetched per receive call (1-10)
    pub batch_size: u32,
    /// Long-poll wait in seconds (0-20)
    pub wait_time_seconds: u32,
    pub visibility_timeout: Option<u32>,
    /// Pause between polls when the queue is empty or a poll failed
    pub polling_wait_time_ms: u64,
    /// Pause after an authentication failure
    pub authentication_error_timeout_ms: u64,
    /// Upper bound on one handler invocation
    pub handle_message_timeout_ms: Option<u64>,
    pub should_delete_messages: bool,
    /// Delete messages even when the handler fails
    pub always_acknowledge: bool,
    /// Visibility timeout applied to a message whose handler failed
    pub terminate_visibility_timeout: Option<u32>,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
    pub transport: Option<TransportSettings>,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            queue_url: None,
            batch_size: 1,
            wait_time_seconds: 20,
            visibility_timeout: None,
            polling_wait_time_ms: 0,
            authentication_error_timeout_ms: 10_000,
            handle_message_timeout_ms: None,
            should_delete_messages: true,
            always_acknowledge: false,
            terminate_visibility_timeout: None,
            attribute_names: vec!["All".to_string()],
            message_attribute_names: vec!["All".to_string()],
            transport: None,
        }
    }
}

impl ConsumerSettings {
    /// Settings for the given queue with all other values defaulted
    pub fn for_queue(queue_url: QueueUrl) -> Self {
        Self {
            queue_url: Some(queue_url),
            ..Default::default()
        }
    }

    /// Check value ranges accepted by the backend
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.queue_url.is_none() {
            return Err(ValidationError::Required {
                field: "queue_url".to_string(),
            });
        }

        if self.batch_size == 0 || self.batch_size as usize > MAX_BATCH_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "batch_size".to_string(),
                message: format!("must be 1-{}", MAX_BATCH_SIZE),
            });
        }

        if self.wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(ValidationError::OutOfRange {
                field: "wait_time_seconds".to_string(),
                message: format!("must be 0-{}", MAX_WAIT_TIME_SECONDS),
            });
        }

        for (field, value) in [
            ("visibility_timeout", self.visibility_timeout),
            (
                "terminate_visibility_timeout",
                self.terminate_visibility_timeout,
            ),
        ] {
            if value.is_some_and(|v| v > MAX_VISIBILITY_TIMEOUT_SECONDS) {
                return Err(ValidationError::OutOfRange {
                    field: field.to_string(),
                    message: format!("must be 0-{}", MAX_VISIBILITY_TIMEOUT_SECONDS),
                });
            }
        }

        Ok(())
    }

    /// Receive parameters derived from these settings
    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.batch_size,
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout: self.visibility_timeout,
            attribute_names: self.attribute_names.clone(),
            message_attribute_names: self.message_attribute_names.clone(),
        }
    }
}

/// Settings of a batching producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    pub queue_url: Option<QueueUrl>,
    /// Messages per send call (1-10)
    pub batch_size: u32,
    pub transport: Option<TransportSettings>,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            queue_url: None,
            batch_size: MAX_BATCH_SIZE as u32,
            transport: None,
        }
    }
}

impl ProducerSettings {
    /// Settings for the given queue with all other values defaulted
    pub fn for_queue(queue_url: QueueUrl) -> Self {
        Self {
            queue_url: Some(queue_url),
            ..Default::default()
        }
    }

    /// Check value ranges accepted by the backend
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.queue_url.is_none() {
            return Err(ValidationError::Required {
                field: "queue_url".to_string(),
            });
        }

        if self.batch_size == 0 || self.batch_size as usize > MAX_BATCH_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "batch_size".to_string(),
                message: format!("must be 1-{}", MAX_BATCH_SIZE),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
