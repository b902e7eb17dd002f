//! Queue consumers.
//!
//! A [`Consumer`] owns one background polling loop bound to one queue. The
//! default [`PollingConsumer`] long-polls the transport, hands each batch to
//! its [`MessageHandler`], acknowledges successfully handled messages and
//! reports progress through [`ConsumerEvent`] listeners. A handler that
//! panics is settled like one that returned an error and polling continues.
//!
//! Stopping is cooperative. The loop checks a stop signal between polls and
//! while waiting on the backend, so an in-flight handler always finishes
//! unless the stop policy's timeout expires, at which point the task is
//! aborted and the stop is reported as [`StopOutcome::Forced`].

use crate::error::{panic_message, ConsumerError, QueueError};
use crate::handler::{
    ConsumerEvent, ConsumerEventData, EventCallback, EventListeners, MessageHandler,
};
use crate::message::{DeleteBatchEntry, QueueName, QueueUrl, ReceivedMessage};
use crate::settings::{ConsumerSettings, StopPolicy};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// How a consumer came to a halt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The polling loop finished on its own within the stop policy
    Graceful,
    /// The polling loop was terminated
    Forced,
    /// The consumer was not running
    NotRunning,
}

/// A running poller bound to one queue
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Transport used for every backend call of this consumer
    fn transport(&self) -> Arc<dyn QueueTransport>;

    /// Address of the consumed queue
    fn queue_url(&self) -> &QueueUrl;

    /// Attach a lifecycle event callback
    fn add_listener(&self, event: ConsumerEvent, callback: EventCallback);

    /// Start the background polling loop; starting twice is a no-op
    fn start(&self) -> Result<(), ConsumerError>;

    /// Stop the polling loop according to the policy
    async fn stop(&self, policy: &StopPolicy) -> Result<StopOutcome, ConsumerError>;

    /// True while the polling loop is active
    fn is_running(&self) -> bool;
}

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Default consumer driving a tokio polling task
pub struct PollingConsumer {
    shared: Arc<PollState>,
    running: Mutex<Option<RunningLoop>>,
}

/// State shared between the consumer handle and its polling task
struct PollState {
    queue_name: QueueName,
    queue_url: QueueUrl,
    settings: ConsumerSettings,
    handler: MessageHandler,
    transport: Arc<dyn QueueTransport>,
    listeners: EventListeners,
}

impl PollingConsumer {
    /// Create a consumer; no backend call is made until [`Consumer::start`]
    pub fn new(
        queue_name: QueueName,
        settings: ConsumerSettings,
        handler: MessageHandler,
        transport: Arc<dyn QueueTransport>,
    ) -> Result<Self, QueueError> {
        settings.validate()?;
        let queue_url = settings
            .queue_url
            .clone()
            .ok_or_else(|| crate::error::ValidationError::Required {
                field: "queue_url".to_string(),
            })?;

        Ok(Self {
            shared: Arc::new(PollState {
                queue_name,
                queue_url,
                settings,
                handler,
                transport,
                listeners: EventListeners::new(),
            }),
            running: Mutex::new(None),
        })
    }

    /// Logical name of the consumed queue
    pub fn queue_name(&self) -> &QueueName {
        &self.shared.queue_name
    }

    /// Number of callbacks attached to an event
    pub fn listener_count(&self, event: ConsumerEvent) -> usize {
        self.shared.listeners.count(event)
    }

    fn take_running(&self) -> Option<RunningLoop> {
        match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl Consumer for PollingConsumer {
    fn transport(&self) -> Arc<dyn QueueTransport> {
        self.shared.transport.clone()
    }

    fn queue_url(&self) -> &QueueUrl {
        &self.shared.queue_url
    }

    fn add_listener(&self, event: ConsumerEvent, callback: EventCallback) {
        self.shared.listeners.add(event, callback);
    }

    fn start(&self) -> Result<(), ConsumerError> {
        let mut running = self.running.lock().map_err(|_| ConsumerError::StartFailed {
            queue_name: self.shared.queue_name.to_string(),
            message: "consumer state lock poisoned".to_string(),
        })?;

        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!(queue = %self.shared.queue_name, "Consumer already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ConsumerError::StartFailed {
                queue_name: self.shared.queue_name.to_string(),
                message: e.to_string(),
            }
        })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let state = self.shared.clone();
        let task = runtime.spawn(async move { state.run(stop_rx).await });

        info!(queue = %self.shared.queue_name, queue_url = %self.shared.queue_url, "Consumer started");
        *running = Some(RunningLoop { stop_tx, task });
        Ok(())
    }

    async fn stop(&self, policy: &StopPolicy) -> Result<StopOutcome, ConsumerError> {
        let Some(RunningLoop { stop_tx, mut task }) = self.take_running() else {
            return Ok(StopOutcome::NotRunning);
        };

        let queue_name = self.shared.queue_name.to_string();

        if policy.abort {
            task.abort();
            let _ = task.await;
            self.shared
                .listeners
                .emit(ConsumerEventData::new(ConsumerEvent::Aborted, &queue_name));
            self.shared
                .listeners
                .emit(ConsumerEventData::new(ConsumerEvent::Stopped, &queue_name));
            info!(queue = %queue_name, "Consumer aborted");
            return Ok(StopOutcome::Forced);
        }

        // The receiver lives in the task; a send error only means it already exited.
        let _ = stop_tx.send(true);

        match tokio::time::timeout(policy.timeout(), &mut task).await {
            Ok(Ok(())) => {
                info!(queue = %queue_name, "Consumer stopped");
                Ok(StopOutcome::Graceful)
            }
            Ok(Err(join_error)) => {
                error!(queue = %queue_name, error = %join_error, "Polling task failed");
                Err(ConsumerError::TaskFailed {
                    queue_name,
                    message: join_error.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    queue = %queue_name,
                    timeout_ms = policy.timeout_ms,
                    "Consumer did not drain in time; aborting polling task"
                );
                task.abort();
                let _ = task.await;
                self.shared
                    .listeners
                    .emit(ConsumerEventData::new(ConsumerEvent::Aborted, &queue_name));
                self.shared
                    .listeners
                    .emit(ConsumerEventData::new(ConsumerEvent::Stopped, &queue_name));
                Ok(StopOutcome::Forced)
            }
        }
    }

    fn is_running(&self) -> bool {
        match self.running.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|r| !r.task.is_finished()),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for PollingConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingConsumer")
            .field("queue_name", &self.shared.queue_name)
            .field("queue_url", &self.shared.queue_url)
            .field("handler", &self.shared.handler)
            .finish()
    }
}

// ============================================================================
// Polling loop
// ============================================================================

impl PollState {
    async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        self.emit(ConsumerEvent::Started);
        let options = self.settings.receive_options();

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let received = tokio::select! {
                result = self.transport.receive_messages(&self.queue_url, &options) => result,
                _ = stop_rx.changed() => break,
            };

            let pause = match received {
                Ok(messages) if messages.is_empty() => {
                    self.emit(ConsumerEvent::Empty);
                    self.polling_wait_time()
                }
                Ok(messages) => {
                    self.dispatch(messages).await;
                    self.emit(ConsumerEvent::ResponseProcessed);
                    self.polling_wait_time()
                }
                Err(e) => {
                    warn!(queue = %self.queue_name, error = %e, "Receive failed");
                    self.listeners.emit(
                        ConsumerEventData::new(ConsumerEvent::Error, self.queue_name.as_str())
                            .with_error(&e),
                    );
                    if e.is_authentication_error() {
                        Duration::from_millis(self.settings.authentication_error_timeout_ms)
                    } else {
                        self.polling_wait_time()
                    }
                }
            };

            if !pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = stop_rx.changed() => break,
                }
            }
        }

        self.emit(ConsumerEvent::Stopped);
        debug!(queue = %self.queue_name, "Polling loop exited");
    }

    async fn dispatch(&self, messages: Vec<ReceivedMessage>) {
        for message in &messages {
            self.emit_for(ConsumerEvent::MessageReceived, message);
        }

        match &self.handler {
            MessageHandler::Single(handler) => {
                for message in messages {
                    let outcome = self
                        .with_timeout(handler.handle_message(message.clone()))
                        .await;
                    self.settle(std::slice::from_ref(&message), outcome).await;
                }
            }
            MessageHandler::Batch(handler) => {
                let outcome = self
                    .with_timeout(handler.handle_message_batch(messages.clone()))
                    .await;
                self.settle(&messages, outcome).await;
            }
        }
    }

    /// Run a handler future, turning a panic into a failed outcome
    async fn with_timeout<F>(&self, handler: F) -> HandlerOutcome
    where
        F: std::future::Future<Output = Result<(), crate::error::HandlerError>>,
    {
        let guarded = AssertUnwindSafe(handler).catch_unwind().map(|result| match result {
            Ok(result) => HandlerOutcome::from(result),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(queue = %self.queue_name, panic = %message, "Message handler panicked");
                HandlerOutcome::Failed(format!("handler panicked: {}", message))
            }
        });

        match self.settings.handle_message_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), guarded).await {
                Ok(outcome) => outcome,
                Err(_) => HandlerOutcome::TimedOut(Duration::from_millis(ms)),
            },
            None => guarded.await,
        }
    }

    /// Acknowledge or release messages after their handler finished
    async fn settle(&self, messages: &[ReceivedMessage], outcome: HandlerOutcome) {
        let succeeded = matches!(outcome, HandlerOutcome::Completed);

        match &outcome {
            HandlerOutcome::Completed => {}
            HandlerOutcome::Failed(message) => {
                warn!(queue = %self.queue_name, error = %message, "Message handler failed");
                for m in messages {
                    self.listeners.emit(
                        ConsumerEventData::new(
                            ConsumerEvent::ProcessingError,
                            self.queue_name.as_str(),
                        )
                        .with_message(m)
                        .with_error(message),
                    );
                }
            }
            HandlerOutcome::TimedOut(after) => {
                warn!(queue = %self.queue_name, timeout = ?after, "Message handler timed out");
                for m in messages {
                    self.listeners.emit(
                        ConsumerEventData::new(ConsumerEvent::TimeoutError, self.queue_name.as_str())
                            .with_message(m)
                            .with_error(format!("handler timed out after {:?}", after)),
                    );
                }
            }
        }

        if succeeded || self.settings.always_acknowledge {
            if self.settings.should_delete_messages {
                self.acknowledge(messages).await;
            }
            if succeeded {
                for m in messages {
                    self.emit_for(ConsumerEvent::MessageProcessed, m);
                }
            }
        } else if let Some(timeout) = self.settings.terminate_visibility_timeout {
            for m in messages {
                if let Err(e) = self
                    .transport
                    .change_message_visibility(&self.queue_url, &m.receipt_handle, timeout)
                    .await
                {
                    self.report_error(&e);
                }
            }
        }
    }

    async fn acknowledge(&self, messages: &[ReceivedMessage]) {
        let result = match messages {
            [single] => self
                .transport
                .delete_message(&self.queue_url, &single.receipt_handle)
                .await
                .map(|_| ()),
            batch => {
                let entries: Vec<DeleteBatchEntry> =
                    batch.iter().map(DeleteBatchEntry::from).collect();
                match self
                    .transport
                    .delete_message_batch(&self.queue_url, &entries)
                    .await
                {
                    Ok(result) if result.is_complete() => Ok(()),
                    Ok(result) => Err(QueueError::PartialBatchFailure {
                        failed: result.failed,
                    }),
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            self.report_error(&e);
        }
    }

    fn report_error(&self, error: &QueueError) {
        warn!(queue = %self.queue_name, error = %error, "Backend call failed");
        self.listeners.emit(
            ConsumerEventData::new(ConsumerEvent::Error, self.queue_name.as_str())
                .with_error(error),
        );
    }

    fn polling_wait_time(&self) -> Duration {
        Duration::from_millis(self.settings.polling_wait_time_ms)
    }

    fn emit(&self, event: ConsumerEvent) {
        self.listeners
            .emit(ConsumerEventData::new(event, self.queue_name.as_str()));
    }

    fn emit_for(&self, event: ConsumerEvent, message: &ReceivedMessage) {
        self.listeners.emit(
            ConsumerEventData::new(event, self.queue_name.as_str()).with_message(message),
        );
    }
}

enum HandlerOutcome {
    Completed,
    Failed(String),
    TimedOut(Duration),
}

impl From<Result<(), crate::error::HandlerError>> for HandlerOutcome {
    fn from(result: Result<(), crate::error::HandlerError>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}
