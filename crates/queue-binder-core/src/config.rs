//! Declarative queue configuration.
//!
//! A [`RegistryConfig`] is an ordered list of queue declarations plus the
//! process-wide default stop policy. Each declaration names one queue in one
//! role and carries the poller or sender settings for it:
//!
//! ```yaml
//! default_stop_policy:
//!   timeout_ms: 10000
//! sqs:
//!   region: eu-west-1
//! queues:
//!   - role: consumer
//!     name: orders
//!     queue_url: https://sqs.eu-west-1.amazonaws.com/123456789012/orders
//!     batch_size: 10
//!     stop_policy:
//!       timeout_ms: 2000
//!   - role: producer
//!     name: invoices
//!     queue_url: https://sqs.eu-west-1.amazonaws.com/123456789012/invoices
//! ```

use crate::error::RegistryError;
use queue_binder_runtime::{ConsumerSettings, ProducerSettings, QueueName, SqsConfig, StopPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment prefix for configuration overrides, e.g. `QUEUE_BINDER__SQS__REGION`
pub const ENV_PREFIX: &str = "QUEUE_BINDER";

/// A consumer queue declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerDeclaration {
    pub name: QueueName,
    /// Overrides the registry's default stop policy
    #[serde(default)]
    pub stop_policy: Option<StopPolicy>,
    #[serde(flatten)]
    pub settings: ConsumerSettings,
}

/// A producer queue declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerDeclaration {
    pub name: QueueName,
    #[serde(flatten)]
    pub settings: ProducerSettings,
}

/// One configured queue in one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum QueueDeclaration {
    Consumer(ConsumerDeclaration),
    Producer(ProducerDeclaration),
}

impl QueueDeclaration {
    /// Logical name of the declared queue
    pub fn name(&self) -> &QueueName {
        match self {
            Self::Consumer(c) => &c.name,
            Self::Producer(p) => &p.name,
        }
    }
}

impl From<ConsumerDeclaration> for QueueDeclaration {
    fn from(declaration: ConsumerDeclaration) -> Self {
        Self::Consumer(declaration)
    }
}

impl From<ProducerDeclaration> for QueueDeclaration {
    fn from(declaration: ProducerDeclaration) -> Self {
        Self::Producer(declaration)
    }
}

/// Registry configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Stop policy for consumers that do not declare their own
    pub default_stop_policy: StopPolicy,
    /// Connection settings used to build the default SQS transport
    pub sqs: Option<SqsConfig>,
    pub queues: Vec<QueueDeclaration>,
}

impl RegistryConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// Sources are applied in order, later ones overriding earlier ones:
    /// 1. `path`, if given (format chosen by extension)
    /// 2. Environment variables prefixed `QUEUE_BINDER__`, e.g.
    ///    `QUEUE_BINDER__DEFAULT_STOP_POLICY__TIMEOUT_MS=5000`
    ///
    /// The loaded configuration is validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Self, RegistryError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading queue configuration");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        debug!(queues = config.queues.len(), "Queue configuration loaded");
        Ok(config)
    }

    /// Parse and validate YAML configuration
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RegistryError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder-style helper appending a declaration
    pub fn with_queue(mut self, declaration: impl Into<QueueDeclaration>) -> Self {
        self.queues.push(declaration.into());
        self
    }

    /// Consumer declarations in configuration order
    pub fn consumers(&self) -> impl Iterator<Item = &ConsumerDeclaration> {
        self.queues.iter().filter_map(|q| match q {
            QueueDeclaration::Consumer(c) => Some(c),
            QueueDeclaration::Producer(_) => None,
        })
    }

    /// Producer declarations in configuration order
    pub fn producers(&self) -> impl Iterator<Item = &ProducerDeclaration> {
        self.queues.iter().filter_map(|q| match q {
            QueueDeclaration::Producer(p) => Some(p),
            QueueDeclaration::Consumer(_) => None,
        })
    }

    /// Reject duplicate names per role
    ///
    /// A name may appear once as a consumer and once as a producer.
    pub fn check_unique_names(&self) -> Result<(), RegistryError> {
        let mut consumers = HashSet::new();
        for c in self.consumers() {
            if !consumers.insert(&c.name) {
                return Err(RegistryError::DuplicateConsumer {
                    queue_name: c.name.to_string(),
                });
            }
        }

        let mut producers = HashSet::new();
        for p in self.producers() {
            if !producers.insert(&p.name) {
                return Err(RegistryError::DuplicateProducer {
                    queue_name: p.name.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Check names and every declaration's settings
    pub fn validate(&self) -> Result<(), RegistryError> {
        self.check_unique_names()?;

        for declaration in &self.queues {
            let result = match declaration {
                QueueDeclaration::Consumer(c) => c.settings.validate(),
                QueueDeclaration::Producer(p) => p.settings.validate(),
            };
            result.map_err(|e| RegistryError::Configuration {
                message: format!("queue '{}': {}", declaration.name(), e),
            })?;
        }

        Ok(())
    }
}
