//! Common test utilities for queue-binder integration tests
//!
//! This module provides:
//! - Tracing setup for test output
//! - In-memory queue fixtures and declarations
//! - Recording handlers and event listeners
//! - Polling helpers for asynchronous assertions

use queue_binder_core::{ConsumerDeclaration, ProducerDeclaration};
use queue_binder_runtime::{
    ConsumerEvent, ConsumerEventData, ConsumerSettings, InMemoryTransport, ProducerSettings,
    QueueName, QueueUrl, ReceivedMessage,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Tracing
// ============================================================================

/// Install a test subscriber honouring `RUST_LOG`; repeated calls are ignored
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Fixtures
// ============================================================================

/// In-memory transport with the given queues created
#[allow(dead_code)]
pub async fn memory_transport(queues: &[&str]) -> (Arc<InMemoryTransport>, Vec<QueueUrl>) {
    let transport = Arc::new(InMemoryTransport::new());
    let mut urls = Vec::with_capacity(queues.len());
    for name in queues {
        urls.push(
            transport
                .create_queue(name)
                .await
                .expect("queue should be created"),
        );
    }
    (transport, urls)
}

/// Consumer declaration polling quickly enough for tests
pub fn consumer_declaration(name: &str, queue_url: &QueueUrl) -> ConsumerDeclaration {
    ConsumerDeclaration {
        name: QueueName::new(name).expect("valid queue name"),
        stop_policy: None,
        settings: ConsumerSettings {
            wait_time_seconds: 1,
            ..ConsumerSettings::for_queue(queue_url.clone())
        },
    }
}

#[allow(dead_code)]
pub fn producer_declaration(name: &str, queue_url: &QueueUrl) -> ProducerDeclaration {
    ProducerDeclaration {
        name: QueueName::new(name).expect("valid queue name"),
        settings: ProducerSettings::for_queue(queue_url.clone()),
    }
}

// ============================================================================
// Recorders
// ============================================================================

/// Collects messages seen by a handler
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct MessageRecorder {
    messages: Arc<Mutex<Vec<ReceivedMessage>>>,
    batches: Arc<Mutex<Vec<usize>>>,
}

#[allow(dead_code)]
impl MessageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, message: ReceivedMessage) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn record_batch(&self, messages: Vec<ReceivedMessage>) {
        self.batches.lock().unwrap().push(messages.len());
        self.messages.lock().unwrap().extend(messages);
    }

    pub fn messages(&self) -> Vec<ReceivedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.body).collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

/// Collects consumer lifecycle events
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<ConsumerEvent>>>,
}

#[allow(dead_code)]
impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback suitable for `Bindings::on_event`
    pub fn callback(&self) -> impl Fn(&ConsumerEventData) + Send + Sync + 'static {
        let events = self.events.clone();
        move |data: &ConsumerEventData| events.lock().unwrap().push(data.event)
    }

    pub fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, event: ConsumerEvent) -> bool {
        self.events.lock().unwrap().contains(&event)
    }
}

// ============================================================================
// Waiting
// ============================================================================

/// Poll `condition` until it holds or `timeout` elapses
#[allow(dead_code)]
pub async fn wait_for<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
