//! Queue binding and lifecycle registry.
//!
//! [`QueueRegistry`] owns one consumer or producer per configured logical
//! queue name, starts every consumer once the whole registry is wired, stops
//! them at shutdown and resolves names for the control-plane operations.
//!
//! # Lifecycle
//!
//! ```text
//! QueueRegistry::new()  ->  start()  ->  control-plane calls  ->  stop()
//!   (no network I/O)        (consumers      (send, purge, ...)     (best effort,
//!                            begin polling)                         every consumer)
//! ```
//!
//! The name mappings are written only during construction and are read-only
//! afterwards, so control-plane calls need no locking.
//!
//! # Role checks
//!
//! `send` and `get_producer_queue_size` require a producer. Visibility changes
//! and deletes act on received messages and require a consumer. Purge and
//! attribute inspection accept either role and prefer the consumer when a
//! name is registered in both.

use crate::bindings::{EventHandlerBinding, HandlerBinding, HandlerDiscovery};
use crate::config::{ConsumerDeclaration, ProducerDeclaration, QueueDeclaration, RegistryConfig};
use crate::error::RegistryError;
use queue_binder_runtime::{
    panic_message, ClientFactory, Consumer, DefaultClientFactory, DeleteBatchEntry,
    DeleteBatchResult, Message, OutboundMessage, Producer, QueueAttributes, QueueTransport,
    QueueUrl, ReceiptHandle, ReceivedMessage, ResponseMetadata, SendResultEntry, SqsConfig,
    StopOutcome, StopPolicy,
};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Extra time granted on top of a stop policy before a stop call is abandoned
const STOP_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Entries
// ============================================================================

/// A registered consumer and the policy used to stop it
#[derive(Clone)]
pub struct ConsumerEntry {
    instance: Arc<dyn Consumer>,
    stop_policy: StopPolicy,
}

impl ConsumerEntry {
    pub fn instance(&self) -> &Arc<dyn Consumer> {
        &self.instance
    }

    pub fn stop_policy(&self) -> &StopPolicy {
        &self.stop_policy
    }
}

/// A registered producer
#[derive(Clone)]
pub struct ProducerEntry {
    instance: Arc<dyn Producer>,
}

impl ProducerEntry {
    pub fn instance(&self) -> &Arc<dyn Producer> {
        &self.instance
    }
}

/// Transport handle and address a queue name resolves to
#[derive(Clone)]
pub struct QueueInfo {
    pub transport: Arc<dyn QueueTransport>,
    pub queue_url: QueueUrl,
}

impl std::fmt::Debug for QueueInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueInfo")
            .field("provider", &self.transport.provider_name())
            .field("queue_url", &self.queue_url)
            .finish()
    }
}

/// One message or a sequence of messages for [`QueueRegistry::send`]
#[derive(Debug, Clone)]
pub enum SendPayload {
    One(Message),
    Many(Vec<Message>),
}

impl SendPayload {
    fn into_messages(self) -> Vec<Message> {
        match self {
            Self::One(message) => vec![message],
            Self::Many(messages) => messages,
        }
    }
}

impl From<Message> for SendPayload {
    fn from(message: Message) -> Self {
        Self::One(message)
    }
}

impl From<Vec<Message>> for SendPayload {
    fn from(messages: Vec<Message>) -> Self {
        Self::Many(messages)
    }
}

/// What happened to each consumer during [`QueueRegistry::stop`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Consumers that drained within their stop policy
    pub graceful: Vec<String>,
    /// Consumers whose polling loop had to be terminated
    pub forced: Vec<String>,
    /// Consumers that were not running
    pub not_running: Vec<String>,
    /// Consumers whose stop call failed, with the error
    pub failed: Vec<(String, String)>,
}

impl StopReport {
    /// True when no consumer failed to stop
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of consumers a stop was requested from
    pub fn total(&self) -> usize {
        self.graceful.len() + self.forced.len() + self.not_running.len() + self.failed.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Created,
    Running,
    Stopped,
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of consumers and producers keyed by logical queue name
pub struct QueueRegistry {
    consumers: HashMap<String, ConsumerEntry>,
    consumer_order: Vec<String>,
    producers: HashMap<String, ProducerEntry>,
    producer_order: Vec<String>,
    state: Mutex<LifecycleState>,
}

impl QueueRegistry {
    /// Build the registry from configuration and discovered bindings
    ///
    /// Names and settings are validated before the factory is called, so a
    /// duplicate declaration fails without creating any client. A consumer
    /// declaration without a matching handler binding is skipped with a
    /// warning. No backend call is made.
    pub fn new(
        config: &RegistryConfig,
        discovery: &dyn HandlerDiscovery,
        factory: &dyn ClientFactory,
    ) -> Result<Self, RegistryError> {
        config.validate()?;

        let handlers = discovery.message_handlers();
        let events = discovery.event_handlers();

        let mut registry = Self {
            consumers: HashMap::new(),
            consumer_order: Vec::new(),
            producers: HashMap::new(),
            producer_order: Vec::new(),
            state: Mutex::new(LifecycleState::Created),
        };

        for declaration in &config.queues {
            match declaration {
                QueueDeclaration::Consumer(c) => registry.register_consumer(
                    c,
                    &handlers,
                    &events,
                    factory,
                    &config.default_stop_policy,
                )?,
                QueueDeclaration::Producer(p) => registry.register_producer(p, factory)?,
            }
        }

        info!(
            consumers = registry.consumer_order.len(),
            producers = registry.producer_order.len(),
            "Queue registry constructed"
        );
        Ok(registry)
    }

    /// Build the registry with the default SQS-backed client factory
    ///
    /// Connection settings come from the configuration's `sqs` section, or
    /// from the standard AWS environment variables when it is absent.
    pub fn from_config(
        config: &RegistryConfig,
        discovery: &dyn HandlerDiscovery,
    ) -> Result<Self, RegistryError> {
        let sqs = config.sqs.clone().unwrap_or_else(SqsConfig::from_env);
        let factory = DefaultClientFactory::from_sqs_config(sqs)?;
        Self::new(config, discovery, &factory)
    }

    fn register_consumer(
        &mut self,
        declaration: &ConsumerDeclaration,
        handlers: &[HandlerBinding],
        events: &[EventHandlerBinding],
        factory: &dyn ClientFactory,
        default_stop_policy: &StopPolicy,
    ) -> Result<(), RegistryError> {
        let name = declaration.name.as_str();
        if self.consumers.contains_key(name) {
            return Err(RegistryError::DuplicateConsumer {
                queue_name: name.to_string(),
            });
        }

        let mut matching = handlers.iter().filter(|b| b.queue_name == name);
        let Some(binding) = matching.next() else {
            warn!(queue = %name, "No message handler bound to consumer queue; skipping");
            return Ok(());
        };
        let ignored = matching.count();
        if ignored > 0 {
            warn!(queue = %name, ignored, "Several handlers bound to one queue; using the first");
        }

        let instance = factory
            .create_consumer(&declaration.name, &declaration.settings, binding.handler.clone())
            .map_err(|source| RegistryError::Construction {
                queue_name: name.to_string(),
                source,
            })?;

        let mut listeners = 0;
        for event in events.iter().filter(|e| e.queue_name == name) {
            instance.add_listener(event.event, event.callback.clone());
            listeners += 1;
        }

        let stop_policy = declaration
            .stop_policy
            .clone()
            .unwrap_or_else(|| default_stop_policy.clone());

        debug!(
            queue = %name,
            batch = binding.is_batch(),
            listeners,
            "Consumer registered"
        );
        self.consumers.insert(
            name.to_string(),
            ConsumerEntry {
                instance,
                stop_policy,
            },
        );
        self.consumer_order.push(name.to_string());
        Ok(())
    }

    fn register_producer(
        &mut self,
        declaration: &ProducerDeclaration,
        factory: &dyn ClientFactory,
    ) -> Result<(), RegistryError> {
        let name = declaration.name.as_str();
        if self.producers.contains_key(name) {
            return Err(RegistryError::DuplicateProducer {
                queue_name: name.to_string(),
            });
        }

        let instance = factory
            .create_producer(&declaration.name, &declaration.settings)
            .map_err(|source| RegistryError::Construction {
                queue_name: name.to_string(),
                source,
            })?;

        debug!(queue = %name, "Producer registered");
        self.producers
            .insert(name.to_string(), ProducerEntry { instance });
        self.producer_order.push(name.to_string());
        Ok(())
    }

    fn set_state(&self, next: LifecycleState) -> LifecycleState {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *state, next)
    }

    fn ordered_consumers(&self) -> impl Iterator<Item = (&str, &ConsumerEntry)> {
        self.consumer_order
            .iter()
            .filter_map(|name| self.consumers.get(name).map(|e| (name.as_str(), e)))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start every registered consumer
    ///
    /// Every consumer is asked to start even if an earlier one fails; the
    /// first failure is returned. Calling `start` again is a no-op.
    pub fn start(&self) -> Result<(), RegistryError> {
        let previous = self.set_state(LifecycleState::Running);
        if previous != LifecycleState::Created {
            self.set_state(previous);
            debug!(state = ?previous, "Queue registry already started");
            return Ok(());
        }

        let mut first_error = None;
        for (name, entry) in self.ordered_consumers() {
            match entry.instance.start() {
                Ok(()) => debug!(queue = %name, "Consumer start requested"),
                Err(e) => {
                    error!(queue = %name, error = %e, "Consumer failed to start");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        info!(consumers = self.consumer_order.len(), "Queue registry started");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Stop every registered consumer with its stop policy
    ///
    /// Consumers are stopped concurrently and one consumer's failure, or a
    /// panic inside its stop call, never prevents the others from being
    /// stopped. Each stop call is bounded by its policy's timeout plus a short
    /// grace period. Calling `stop` again returns an empty report.
    pub async fn stop(&self) -> StopReport {
        let mut report = StopReport::default();
        if self.set_state(LifecycleState::Stopped) == LifecycleState::Stopped {
            debug!("Queue registry already stopped");
            return report;
        }

        let stops = self.ordered_consumers().map(|(name, entry)| async move {
            let bound = entry.stop_policy.timeout() + STOP_GRACE;
            let stop = AssertUnwindSafe(entry.instance.stop(&entry.stop_policy)).catch_unwind();
            (name, entry, bound, tokio::time::timeout(bound, stop).await)
        });

        for (name, entry, bound, outcome) in join_all(stops).await {
            match outcome {
                Ok(Ok(Ok(StopOutcome::Graceful))) => {
                    debug!(queue = %name, "Consumer stopped");
                    report.graceful.push(name.to_string());
                }
                Ok(Ok(Ok(StopOutcome::Forced))) => {
                    warn!(queue = %name, timeout_ms = entry.stop_policy.timeout_ms, "Consumer stop was forced");
                    report.forced.push(name.to_string());
                }
                Ok(Ok(Ok(StopOutcome::NotRunning))) => {
                    debug!(queue = %name, "Consumer was not running");
                    report.not_running.push(name.to_string());
                }
                Ok(Ok(Err(e))) => {
                    error!(queue = %name, error = %e, "Consumer failed to stop");
                    report.failed.push((name.to_string(), e.to_string()));
                }
                Ok(Err(payload)) => {
                    let message = panic_message(payload.as_ref());
                    error!(queue = %name, panic = %message, "Consumer stop panicked");
                    report
                        .failed
                        .push((name.to_string(), format!("stop panicked: {}", message)));
                }
                Err(_) => {
                    error!(queue = %name, after = ?bound, "Consumer stop did not return; abandoning it");
                    report
                        .failed
                        .push((name.to_string(), format!("stop did not return within {:?}", bound)));
                }
            }
        }

        info!(
            graceful = report.graceful.len(),
            forced = report.forced.len(),
            failed = report.failed.len(),
            "Queue registry stopped"
        );
        report
    }

    /// True between a successful `start` and `stop`
    pub fn is_started(&self) -> bool {
        let state = match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        state == LifecycleState::Running
    }

    // ------------------------------------------------------------------------
    // Resolution and introspection
    // ------------------------------------------------------------------------

    /// Resolve a name to its transport and address, preferring the consumer
    pub fn queue_info(&self, name: &str) -> Result<QueueInfo, RegistryError> {
        if let Some(entry) = self.consumers.get(name) {
            return Ok(QueueInfo {
                transport: entry.instance.transport(),
                queue_url: entry.instance.queue_url().clone(),
            });
        }
        if let Some(entry) = self.producers.get(name) {
            return Ok(QueueInfo {
                transport: entry.instance.transport(),
                queue_url: entry.instance.queue_url().clone(),
            });
        }
        Err(RegistryError::QueueNotFound {
            queue_name: name.to_string(),
        })
    }

    /// Consumer registered under the name
    pub fn consumer(&self, name: &str) -> Result<&ConsumerEntry, RegistryError> {
        self.consumers
            .get(name)
            .ok_or_else(|| RegistryError::ConsumerNotFound {
                queue_name: name.to_string(),
            })
    }

    /// Producer registered under the name
    pub fn producer(&self, name: &str) -> Result<&ProducerEntry, RegistryError> {
        self.producers
            .get(name)
            .ok_or_else(|| RegistryError::ProducerNotFound {
                queue_name: name.to_string(),
            })
    }

    /// Consumer names in configuration order
    pub fn consumer_names(&self) -> Vec<&str> {
        self.consumer_order.iter().map(String::as_str).collect()
    }

    /// Producer names in configuration order
    pub fn producer_names(&self) -> Vec<&str> {
        self.producer_order.iter().map(String::as_str).collect()
    }

    pub fn has_consumer(&self, name: &str) -> bool {
        self.consumers.contains_key(name)
    }

    pub fn has_producer(&self, name: &str) -> bool {
        self.producers.contains_key(name)
    }

    /// True while the named consumer's polling loop is active
    pub fn is_running(&self, name: &str) -> bool {
        self.consumers
            .get(name)
            .is_some_and(|entry| entry.instance.is_running())
    }

    // ------------------------------------------------------------------------
    // Control plane
    // ------------------------------------------------------------------------

    /// Remove every message from the queue
    pub async fn purge_queue(&self, name: &str) -> Result<ResponseMetadata, RegistryError> {
        let info = self.queue_info(name)?;
        debug!(queue = %name, queue_url = %info.queue_url, "Purging queue");
        Ok(info.transport.purge_queue(&info.queue_url).await?)
    }

    /// Fetch every attribute the backend reports for the queue
    pub async fn get_queue_attributes(
        &self,
        name: &str,
    ) -> Result<QueueAttributes, RegistryError> {
        let info = self.queue_info(name)?;
        Ok(info.transport.get_queue_attributes(&info.queue_url).await?)
    }

    /// Messages accepted by the producer but not yet acknowledged
    pub fn get_producer_queue_size(&self, name: &str) -> Result<usize, RegistryError> {
        Ok(self.producer(name)?.instance.queue_size())
    }

    /// Send one or more messages through the named producer
    ///
    /// Structured bodies are serialized to JSON text; string bodies and all
    /// other message fields are passed through unchanged.
    pub async fn send(
        &self,
        name: &str,
        payload: impl Into<SendPayload>,
    ) -> Result<Vec<SendResultEntry>, RegistryError> {
        let producer = self.producer(name)?;

        let messages = payload
            .into()
            .into_messages()
            .into_iter()
            .map(Message::into_outbound)
            .collect::<Result<Vec<OutboundMessage>, _>>()?;

        debug!(queue = %name, count = messages.len(), "Sending messages");
        Ok(producer.instance.send(messages).await?)
    }

    /// Change how long a received message stays hidden
    pub async fn change_message_visibility(
        &self,
        name: &str,
        receipt: &ReceiptHandle,
        timeout_seconds: u32,
    ) -> Result<ResponseMetadata, RegistryError> {
        let consumer = self.consumer(name)?;
        let transport = consumer.instance.transport();
        Ok(transport
            .change_message_visibility(consumer.instance.queue_url(), receipt, timeout_seconds)
            .await?)
    }

    /// Delete one received message
    pub async fn delete_message(
        &self,
        name: &str,
        receipt: &ReceiptHandle,
    ) -> Result<ResponseMetadata, RegistryError> {
        let consumer = self.consumer(name)?;
        let transport = consumer.instance.transport();
        Ok(transport
            .delete_message(consumer.instance.queue_url(), receipt)
            .await?)
    }

    /// Delete received messages in one batch call
    pub async fn delete_message_batch(
        &self,
        name: &str,
        messages: &[ReceivedMessage],
    ) -> Result<DeleteBatchResult, RegistryError> {
        let consumer = self.consumer(name)?;
        let entries: Vec<DeleteBatchEntry> = messages.iter().map(DeleteBatchEntry::from).collect();
        let transport = consumer.instance.transport();
        Ok(transport
            .delete_message_batch(consumer.instance.queue_url(), &entries)
            .await?)
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("consumers", &self.consumer_order)
            .field("producers", &self.producer_order)
            .finish()
    }
}
