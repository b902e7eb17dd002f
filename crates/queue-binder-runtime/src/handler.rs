//! Message handlers and consumer lifecycle events.
//!
//! Handlers are fully bound values: closures or trait objects that already
//! carry whatever state they need. A consumer holds exactly one
//! [`MessageHandler`], which is either a single-message handler or a batch
//! handler, never both.

use crate::error::{HandlerError, ValidationError};
use crate::message::ReceivedMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

// ============================================================================
// Handlers
// ============================================================================

/// Handler invoked once per received message
#[async_trait]
pub trait HandleMessage: Send + Sync {
    async fn handle_message(&self, message: ReceivedMessage) -> Result<(), HandlerError>;
}

/// Handler invoked once per received batch, in backend delivery order
#[async_trait]
pub trait HandleMessageBatch: Send + Sync {
    async fn handle_message_batch(&self, messages: Vec<ReceivedMessage>)
        -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> HandleMessage for F
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle_message(&self, message: ReceivedMessage) -> Result<(), HandlerError> {
        (self)(message).await
    }
}

#[async_trait]
impl<F, Fut> HandleMessageBatch for F
where
    F: Fn(Vec<ReceivedMessage>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle_message_batch(
        &self,
        messages: Vec<ReceivedMessage>,
    ) -> Result<(), HandlerError> {
        (self)(messages).await
    }
}

/// The callback wired into a consumer
#[derive(Clone)]
pub enum MessageHandler {
    Single(Arc<dyn HandleMessage>),
    Batch(Arc<dyn HandleMessageBatch>),
}

impl MessageHandler {
    /// Wrap a single-message handler
    pub fn single<H: HandleMessage + 'static>(handler: H) -> Self {
        Self::Single(Arc::new(handler))
    }

    /// Wrap a batch handler
    pub fn batch<H: HandleMessageBatch + 'static>(handler: H) -> Self {
        Self::Batch(Arc::new(handler))
    }

    /// Wrap an async closure taking one message
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self::Single(Arc::new(f))
    }

    /// Wrap an async closure taking a whole batch
    pub fn batch_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<ReceivedMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Self::Batch(Arc::new(f))
    }

    /// True for batch handlers
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(_) => f.write_str("MessageHandler::Single"),
            Self::Batch(_) => f.write_str("MessageHandler::Batch"),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Lifecycle events emitted by a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerEvent {
    Started,
    Stopped,
    Empty,
    MessageReceived,
    MessageProcessed,
    ResponseProcessed,
    Error,
    ProcessingError,
    TimeoutError,
    Aborted,
}

impl ConsumerEvent {
    pub const ALL: [ConsumerEvent; 10] = [
        Self::Started,
        Self::Stopped,
        Self::Empty,
        Self::MessageReceived,
        Self::MessageProcessed,
        Self::ResponseProcessed,
        Self::Error,
        Self::ProcessingError,
        Self::TimeoutError,
        Self::Aborted,
    ];

    /// Event name used in bindings and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Empty => "empty",
            Self::MessageReceived => "message_received",
            Self::MessageProcessed => "message_processed",
            Self::ResponseProcessed => "response_processed",
            Self::Error => "error",
            Self::ProcessingError => "processing_error",
            Self::TimeoutError => "timeout_error",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for ConsumerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsumerEvent {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "event_name".to_string(),
                message: format!("unknown consumer event '{}'", s),
            })
    }
}

/// Payload delivered to event callbacks
#[derive(Debug, Clone)]
pub struct ConsumerEventData {
    pub event: ConsumerEvent,
    pub queue_name: String,
    pub message: Option<ReceivedMessage>,
    pub error: Option<String>,
}

impl ConsumerEventData {
    pub(crate) fn new(event: ConsumerEvent, queue_name: &str) -> Self {
        Self {
            event,
            queue_name: queue_name.to_string(),
            message: None,
            error: None,
        }
    }

    pub(crate) fn with_message(mut self, message: &ReceivedMessage) -> Self {
        self.message = Some(message.clone());
        self
    }

    pub(crate) fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Callback attached to a consumer event
pub type EventCallback = Arc<dyn Fn(&ConsumerEventData) + Send + Sync>;

/// Listener table shared between a consumer and its polling task
#[derive(Default)]
pub struct EventListeners {
    listeners: RwLock<HashMap<ConsumerEvent, Vec<EventCallback>>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a callback to an event
    pub fn add(&self, event: ConsumerEvent, callback: EventCallback) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.entry(event).or_default().push(callback),
            Err(poisoned) => poisoned
                .into_inner()
                .entry(event)
                .or_default()
                .push(callback),
        }
    }

    /// Number of callbacks attached to an event
    pub fn count(&self, event: ConsumerEvent) -> usize {
        self.snapshot(event).len()
    }

    /// Invoke every callback attached to the event
    pub fn emit(&self, data: ConsumerEventData) {
        for callback in self.snapshot(data.event) {
            callback(&data);
        }
    }

    fn snapshot(&self, event: ConsumerEvent) -> Vec<EventCallback> {
        let listeners = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.get(&event).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
