//! # Queue Binder Runtime
//!
//! Queue clients used by the registry: a backend transport, a polling
//! consumer that drives one message handler, and a batching producer.
//!
//! This library provides:
//! - A [`QueueTransport`] abstraction over SQS-style queue backends
//! - An AWS SQS transport speaking the signed HTTP query API
//! - An in-memory transport with visibility timeouts for tests
//! - [`PollingConsumer`] with lifecycle events and graceful or forced stop
//! - [`BatchingProducer`] splitting sends into backend-sized batches
//! - [`ClientFactory`] building consumers and producers from settings
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Identifiers, messages and backend results
//! - [`transport`] - The backend trait and its limits
//! - [`providers`] - SQS and in-memory transports
//! - [`settings`] - Consumer, producer and stop settings
//! - [`handler`] - Message handlers and consumer events
//! - [`consumer`] / [`producer`] - Queue clients
//! - [`factory`] - Client construction

pub mod consumer;
pub mod error;
pub mod factory;
pub mod handler;
pub mod message;
pub mod producer;
pub mod providers;
pub mod settings;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use consumer::{Consumer, PollingConsumer, StopOutcome};
pub use error::{
    panic_message, ConfigurationError, ConsumerError, HandlerError, QueueError, SerializationError,
    ValidationError,
};
pub use factory::{ClientFactory, DefaultClientFactory};
pub use handler::{
    ConsumerEvent, ConsumerEventData, EventCallback, HandleMessage, HandleMessageBatch,
    MessageHandler,
};
pub use message::{
    BatchEntryError, DeleteBatchEntry, DeleteBatchResult, Message, MessageBody, MessageId,
    OutboundMessage, QueueAttributeName, QueueAttributes, QueueName, QueueUrl, ReceiptHandle,
    ReceiveOptions, ReceivedMessage, ResponseMetadata, SendBatchResult, SendResultEntry,
};
pub use producer::{BatchingProducer, Producer};
pub use providers::{InMemoryTransport, SqsConfig, SqsError, SqsTransport};
pub use settings::{ConsumerSettings, ProducerSettings, StopPolicy, TransportSettings};
pub use transport::QueueTransport;
