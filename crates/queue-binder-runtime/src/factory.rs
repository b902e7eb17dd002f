//! Construction of consumers and producers from settings.

use crate::consumer::{Consumer, PollingConsumer};
use crate::error::QueueError;
use crate::handler::MessageHandler;
use crate::message::QueueName;
use crate::producer::{BatchingProducer, Producer};
use crate::providers::{SqsConfig, SqsTransport};
use crate::settings::{ConsumerSettings, ProducerSettings, TransportSettings};
use crate::transport::QueueTransport;
use std::sync::Arc;
use tracing::debug;

/// Builds consumer and producer instances without contacting the backend
pub trait ClientFactory: Send + Sync {
    /// Create a consumer wired to exactly one handler
    fn create_consumer(
        &self,
        queue_name: &QueueName,
        settings: &ConsumerSettings,
        handler: MessageHandler,
    ) -> Result<Arc<dyn Consumer>, QueueError>;

    /// Create a producer
    fn create_producer(
        &self,
        queue_name: &QueueName,
        settings: &ProducerSettings,
    ) -> Result<Arc<dyn Producer>, QueueError>;
}

/// Factory building [`PollingConsumer`]s and [`BatchingProducer`]s
///
/// Queues share the default transport unless their settings carry a
/// [`TransportSettings`] override, in which case a dedicated
/// [`SqsTransport`] is built from the default SQS configuration with the
/// overridden region or endpoint.
pub struct DefaultClientFactory {
    transport: Arc<dyn QueueTransport>,
    sqs_defaults: Option<SqsConfig>,
}

impl DefaultClientFactory {
    /// Every queue uses `transport`
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            transport,
            sqs_defaults: None,
        }
    }

    /// Build the shared transport from SQS configuration
    pub fn from_sqs_config(config: SqsConfig) -> Result<Self, QueueError> {
        let transport = SqsTransport::new(config.clone()).map_err(|e| e.to_queue_error())?;
        Ok(Self {
            transport: Arc::new(transport),
            sqs_defaults: Some(config),
        })
    }

    fn transport_for(
        &self,
        queue_name: &QueueName,
        overrides: Option<&TransportSettings>,
    ) -> Result<Arc<dyn QueueTransport>, QueueError> {
        let Some(overrides) = overrides else {
            return Ok(self.transport.clone());
        };

        let mut config = self.sqs_defaults.clone().unwrap_or_default();
        if let Some(region) = &overrides.region {
            config.region = region.clone();
        }
        if let Some(endpoint) = &overrides.endpoint {
            config.endpoint = Some(endpoint.clone());
        }

        debug!(queue = %queue_name, region = %config.region, "Building dedicated transport");
        let transport = SqsTransport::new(config).map_err(|e| e.to_queue_error())?;
        Ok(Arc::new(transport))
    }
}

impl ClientFactory for DefaultClientFactory {
    fn create_consumer(
        &self,
        queue_name: &QueueName,
        settings: &ConsumerSettings,
        handler: MessageHandler,
    ) -> Result<Arc<dyn Consumer>, QueueError> {
        let transport = self.transport_for(queue_name, settings.transport.as_ref())?;
        let consumer =
            PollingConsumer::new(queue_name.clone(), settings.clone(), handler, transport)?;
        Ok(Arc::new(consumer))
    }

    fn create_producer(
        &self,
        queue_name: &QueueName,
        settings: &ProducerSettings,
    ) -> Result<Arc<dyn Producer>, QueueError> {
        let transport = self.transport_for(queue_name, settings.transport.as_ref())?;
        let producer = BatchingProducer::new(queue_name.clone(), settings.clone(), transport)?;
        Ok(Arc::new(producer))
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
