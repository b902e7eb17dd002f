//! Queue producers.
//!
//! A [`Producer`] dispatches outbound messages to one queue on demand. There
//! is no background loop: every [`Producer::send`] call splits its messages
//! into backend-sized batches and awaits each of them.

use crate::error::QueueError;
use crate::message::{OutboundMessage, QueueName, QueueUrl, SendResultEntry};
use crate::settings::ProducerSettings;
use crate::transport::QueueTransport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// A sender bound to one queue
#[async_trait]
pub trait Producer: Send + Sync {
    /// Transport used for every backend call of this producer
    fn transport(&self) -> Arc<dyn QueueTransport>;

    /// Address of the target queue
    fn queue_url(&self) -> &QueueUrl;

    /// Send messages whose bodies are already serialized
    async fn send(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<SendResultEntry>, QueueError>;

    /// Messages accepted by `send` that the backend has not acknowledged yet
    fn queue_size(&self) -> usize;
}

/// Default producer splitting sends into fixed-size batches
pub struct BatchingProducer {
    queue_name: QueueName,
    queue_url: QueueUrl,
    batch_size: usize,
    transport: Arc<dyn QueueTransport>,
    pending: AtomicUsize,
}

impl BatchingProducer {
    /// Create a producer; no backend call is made until the first send
    pub fn new(
        queue_name: QueueName,
        settings: ProducerSettings,
        transport: Arc<dyn QueueTransport>,
    ) -> Result<Self, QueueError> {
        settings.validate()?;
        let queue_url =
            settings
                .queue_url
                .ok_or_else(|| crate::error::ValidationError::Required {
                    field: "queue_url".to_string(),
                })?;

        Ok(Self {
            queue_name,
            queue_url,
            batch_size: settings.batch_size as usize,
            transport,
            pending: AtomicUsize::new(0),
        })
    }

    /// Logical name of the target queue
    pub fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }
}

/// Releases the pending count of a batch even when the send future is dropped
struct PendingGuard<'a> {
    counter: &'a AtomicUsize,
    count: usize,
}

impl<'a> PendingGuard<'a> {
    fn new(counter: &'a AtomicUsize, count: usize) -> Self {
        counter.fetch_add(count, Ordering::SeqCst);
        Self { counter, count }
    }

    fn release(&mut self, count: usize) {
        let count = count.min(self.count);
        self.counter.fetch_sub(count, Ordering::SeqCst);
        self.count -= count;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(self.count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Producer for BatchingProducer {
    fn transport(&self) -> Arc<dyn QueueTransport> {
        self.transport.clone()
    }

    fn queue_url(&self) -> &QueueUrl {
        &self.queue_url
    }

    async fn send(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<SendResultEntry>, QueueError> {
        let mut pending = PendingGuard::new(&self.pending, messages.len());
        let mut sent = Vec::with_capacity(messages.len());

        for batch in messages.chunks(self.batch_size) {
            let result = self
                .transport
                .send_message_batch(&self.queue_url, batch)
                .await?;
            pending.release(batch.len());

            if !result.failed.is_empty() {
                warn!(
                    queue = %self.queue_name,
                    failed = result.failed.len(),
                    "Batch send partially failed"
                );
                return Err(QueueError::PartialBatchFailure {
                    failed: result.failed,
                });
            }

            debug!(queue = %self.queue_name, count = batch.len(), "Batch sent");
            sent.extend(result.successful);
        }

        Ok(sent)
    }

    fn queue_size(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for BatchingProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingProducer")
            .field("queue_name", &self.queue_name)
            .field("queue_url", &self.queue_url)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
