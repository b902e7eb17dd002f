//! Handler bindings and their discovery.
//!
//! Application modules register their handlers explicitly, before the
//! registry is built. A [`HandlerBinding`] ties one message handler (single or
//! batch) to a logical queue name; an [`EventHandlerBinding`] ties a consumer
//! lifecycle callback to a queue name and event.
//!
//! ```rust
//! use queue_binder_core::Bindings;
//! use queue_binder_runtime::{ConsumerEvent, HandlerError, ReceivedMessage};
//!
//! let mut bindings = Bindings::new();
//! bindings
//!     .on_message("orders", |message: ReceivedMessage| async move {
//!         println!("order {}", message.body);
//!         Ok::<(), HandlerError>(())
//!     })
//!     .on_event("orders", ConsumerEvent::Error, |data| {
//!         eprintln!("orders consumer error: {:?}", data.error);
//!     });
//! ```

use queue_binder_runtime::{
    ConsumerEvent, ConsumerEventData, EventCallback, HandlerError, MessageHandler,
    ReceivedMessage,
};
use std::future::Future;
use std::sync::Arc;

#[cfg(test)]
#[path = "bindings_tests.rs"]
mod tests;

/// A message handler bound to a logical queue name
#[derive(Debug, Clone)]
pub struct HandlerBinding {
    pub queue_name: String,
    pub handler: MessageHandler,
}

impl HandlerBinding {
    /// True when the handler receives whole batches
    pub fn is_batch(&self) -> bool {
        self.handler.is_batch()
    }
}

/// A lifecycle callback bound to a queue name and event
#[derive(Clone)]
pub struct EventHandlerBinding {
    pub queue_name: String,
    pub event: ConsumerEvent,
    pub callback: EventCallback,
}

impl std::fmt::Debug for EventHandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlerBinding")
            .field("queue_name", &self.queue_name)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

/// Source of handler bindings consumed once while the registry is built
pub trait HandlerDiscovery {
    /// Message-handler bindings in registration order
    fn message_handlers(&self) -> Vec<HandlerBinding>;

    /// Lifecycle-event bindings in registration order
    fn event_handlers(&self) -> Vec<EventHandlerBinding>;
}

/// Explicit registration of handlers and event callbacks
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    handlers: Vec<HandlerBinding>,
    events: Vec<EventHandlerBinding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler invoked once per message
    pub fn on_message<F, Fut>(&mut self, queue_name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.with_handler(queue_name, MessageHandler::from_fn(handler))
    }

    /// Bind a handler invoked once per received batch
    pub fn on_batch<F, Fut>(&mut self, queue_name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Vec<ReceivedMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.with_handler(queue_name, MessageHandler::batch_fn(handler))
    }

    /// Bind an already constructed handler
    pub fn with_handler(
        &mut self,
        queue_name: impl Into<String>,
        handler: MessageHandler,
    ) -> &mut Self {
        self.handlers.push(HandlerBinding {
            queue_name: queue_name.into(),
            handler,
        });
        self
    }

    /// Bind a lifecycle event callback
    pub fn on_event<F>(
        &mut self,
        queue_name: impl Into<String>,
        event: ConsumerEvent,
        callback: F,
    ) -> &mut Self
    where
        F: Fn(&ConsumerEventData) + Send + Sync + 'static,
    {
        self.events.push(EventHandlerBinding {
            queue_name: queue_name.into(),
            event,
            callback: Arc::new(callback),
        });
        self
    }

    /// Number of message-handler bindings
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Number of event bindings
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl HandlerDiscovery for Bindings {
    fn message_handlers(&self) -> Vec<HandlerBinding> {
        self.handlers.clone()
    }

    fn event_handlers(&self) -> Vec<EventHandlerBinding> {
        self.events.clone()
    }
}
