//! Tests for the polling consumer.

use super::*;
use crate::error::HandlerError;
use crate::message::{
    DeleteBatchResult, OutboundMessage, QueueAttributeName, QueueAttributes, ReceiptHandle,
    ReceiveOptions, ResponseMetadata, SendBatchResult,
};
use crate::providers::InMemoryTransport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Test Helper Functions
// ============================================================================

/// Records every event a consumer emits, in order
#[derive(Clone, Default)]
struct EventRecorder {
    events: Arc<Mutex<Vec<ConsumerEventData>>>,
}

impl EventRecorder {
    fn attach(&self, consumer: &dyn Consumer) {
        for event in ConsumerEvent::ALL {
            let events = self.events.clone();
            consumer.add_listener(
                event,
                Arc::new(move |data: &ConsumerEventData| {
                    events.lock().expect("lock").push(data.clone());
                }),
            );
        }
    }

    fn count(&self, event: ConsumerEvent) -> usize {
        self.events
            .lock()
            .expect("lock")
            .iter()
            .filter(|d| d.event == event)
            .count()
    }

    fn names(&self) -> Vec<ConsumerEvent> {
        self.events.lock().expect("lock").iter().map(|d| d.event).collect()
    }

    async fn wait_for(&self, event: ConsumerEvent, times: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.count(event) < times {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} x{}; saw {:?}",
                event,
                times,
                self.names()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn outbound(body: &str) -> OutboundMessage {
    OutboundMessage {
        id: uuid::Uuid::new_v4().to_string(),
        body: body.to_string(),
        attributes: HashMap::new(),
        group_id: None,
        deduplication_id: None,
        delay_seconds: None,
    }
}

async fn memory_queue(bodies: &[&str]) -> (Arc<InMemoryTransport>, QueueUrl) {
    let transport = Arc::new(InMemoryTransport::new());
    let url = transport.create_queue("orders").await.expect("queue created");
    if !bodies.is_empty() {
        let messages: Vec<_> = bodies.iter().map(|b| outbound(b)).collect();
        transport
            .send_message_batch(&url, &messages)
            .await
            .expect("sent");
    }
    (transport, url)
}

fn settings(url: &QueueUrl) -> ConsumerSettings {
    ConsumerSettings {
        wait_time_seconds: 1,
        ..ConsumerSettings::for_queue(url.clone())
    }
}

fn consumer(
    transport: Arc<dyn QueueTransport>,
    settings: ConsumerSettings,
    handler: MessageHandler,
) -> PollingConsumer {
    PollingConsumer::new(
        QueueName::new("orders").expect("valid name"),
        settings,
        handler,
        transport,
    )
    .expect("consumer should build")
}

fn ok_handler() -> MessageHandler {
    MessageHandler::from_fn(|_message| async { Ok(()) })
}

async fn count_attribute(
    transport: &InMemoryTransport,
    url: &QueueUrl,
    name: QueueAttributeName,
) -> u64 {
    transport
        .get_queue_attributes(url)
        .await
        .expect("attributes")
        .get_u64(name)
        .unwrap_or_default()
}

/// Transport whose receives always fail with the given error
struct FailingTransport {
    receives: AtomicUsize,
    error: fn() -> QueueError,
}

#[async_trait]
impl QueueTransport for FailingTransport {
    async fn get_queue_url(&self, queue_name: &str) -> Result<QueueUrl, QueueError> {
        Err(QueueError::QueueNotFound {
            queue_name: queue_name.to_string(),
        })
    }

    async fn send_message_batch(
        &self,
        _queue_url: &QueueUrl,
        _messages: &[OutboundMessage],
    ) -> Result<SendBatchResult, QueueError> {
        Err((self.error)())
    }

    async fn receive_messages(
        &self,
        _queue_url: &QueueUrl,
        _options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        Err((self.error)())
    }

    async fn delete_message(
        &self,
        _queue_url: &QueueUrl,
        _receipt: &ReceiptHandle,
    ) -> Result<ResponseMetadata, QueueError> {
        Err((self.error)())
    }

    async fn delete_message_batch(
        &self,
        _queue_url: &QueueUrl,
        _entries: &[DeleteBatchEntry],
    ) -> Result<DeleteBatchResult, QueueError> {
        Err((self.error)())
    }

    async fn change_message_visibility(
        &self,
        _queue_url: &QueueUrl,
        _receipt: &ReceiptHandle,
        _timeout_seconds: u32,
    ) -> Result<ResponseMetadata, QueueError> {
        Err((self.error)())
    }

    async fn purge_queue(&self, _queue_url: &QueueUrl) -> Result<ResponseMetadata, QueueError> {
        Err((self.error)())
    }

    async fn get_queue_attributes(
        &self,
        _queue_url: &QueueUrl,
    ) -> Result<QueueAttributes, QueueError> {
        Err((self.error)())
    }

    fn provider_name(&self) -> &'static str {
        "Failing"
    }
}

// ============================================================================
// Construction Tests
// ============================================================================

mod construction_tests {
    use super::*;

    /// Verify invalid settings are rejected at construction
    #[tokio::test]
    async fn test_new_rejects_invalid_settings() {
        let (transport, url) = memory_queue(&[]).await;
        let result = PollingConsumer::new(
            QueueName::new("orders").expect("valid"),
            ConsumerSettings {
                batch_size: 0,
                ..settings(&url)
            },
            ok_handler(),
            transport,
        );

        assert!(matches!(result, Err(QueueError::ValidationError(_))));
    }

    /// Verify construction does not start polling
    #[tokio::test]
    async fn test_new_is_idle() {
        let (transport, url) = memory_queue(&[]).await;
        let consumer = consumer(transport, settings(&url), ok_handler());

        assert!(!consumer.is_running());
        assert_eq!(consumer.queue_url(), &url);
        assert_eq!(consumer.queue_name().as_str(), "orders");
        assert_eq!(consumer.transport().provider_name(), "InMemory");
    }

    /// Verify starting outside a runtime reports an error
    #[test]
    fn test_start_without_runtime_fails() {
        let transport = Arc::new(InMemoryTransport::new());
        let url = QueueUrl::new("https://sqs.memory.local/000000000000/orders").expect("url");
        let consumer = consumer(transport, settings(&url), ok_handler());

        assert!(matches!(
            consumer.start(),
            Err(ConsumerError::StartFailed { .. })
        ));
    }
}

// ============================================================================
// Processing Tests
// ============================================================================

mod processing_tests {
    use super::*;

    /// Verify handled messages are deleted and reported
    #[tokio::test]
    async fn test_successful_messages_are_deleted() {
        let (transport, url) = memory_queue(&["a", "b"]).await;
        let handled = Arc::new(Mutex::new(Vec::new()));
        let sink = handled.clone();
        let handler = MessageHandler::from_fn(move |message| {
            let sink = sink.clone();
            async move {
                sink.lock().expect("lock").push(message.body);
                Ok(())
            }
        });

        let consumer = consumer(transport.clone(), settings(&url), handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::MessageProcessed, 2).await;
        let outcome = consumer
            .stop(&StopPolicy::graceful(Duration::from_secs(5)))
            .await
            .expect("stopped");

        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(*handled.lock().expect("lock"), vec!["a", "b"]);
        assert_eq!(recorder.names().first(), Some(&ConsumerEvent::Started));
        assert_eq!(recorder.names().last(), Some(&ConsumerEvent::Stopped));
        assert_eq!(recorder.count(ConsumerEvent::MessageReceived), 2);
        assert!(recorder.count(ConsumerEvent::ResponseProcessed) >= 2);
        assert_eq!(
            count_attribute(&transport, &url, QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
                .await,
            0
        );
        assert_eq!(
            count_attribute(&transport, &url, QueueAttributeName::ApproximateNumberOfMessages).await,
            0
        );
    }

    /// Verify failed messages stay in flight and are reported
    #[tokio::test]
    async fn test_failed_message_is_not_deleted() {
        let (transport, url) = memory_queue(&["poison"]).await;
        let handler =
            MessageHandler::from_fn(|_message| async { Err(HandlerError::new("cannot parse")) });

        let consumer = consumer(transport.clone(), settings(&url), handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::ProcessingError, 1).await;
        consumer.stop(&StopPolicy::default()).await.expect("stopped");

        let events = recorder.events.lock().expect("lock").clone();
        let failure = events
            .iter()
            .find(|d| d.event == ConsumerEvent::ProcessingError)
            .expect("processing error event");
        assert_eq!(failure.error.as_deref(), Some("cannot parse"));
        assert_eq!(
            failure.message.as_ref().map(|m| m.body.as_str()),
            Some("poison")
        );
        assert_eq!(recorder.count(ConsumerEvent::MessageProcessed), 0);
        assert_eq!(
            count_attribute(&transport, &url, QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
                .await,
            1
        );
    }

    /// Verify always_acknowledge deletes failed messages
    #[tokio::test]
    async fn test_always_acknowledge_deletes_failures() {
        let (transport, url) = memory_queue(&["poison"]).await;
        let handler = MessageHandler::from_fn(|_message| async { Err(HandlerError::new("nope")) });
        let settings = ConsumerSettings {
            always_acknowledge: true,
            ..settings(&url)
        };

        let consumer = consumer(transport.clone(), settings, handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::ResponseProcessed, 1).await;
        consumer.stop(&StopPolicy::default()).await.expect("stopped");

        assert_eq!(
            count_attribute(&transport, &url, QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
                .await,
            0
        );
    }

    /// Verify a terminate visibility timeout makes failures redeliverable
    #[tokio::test]
    async fn test_terminate_visibility_timeout_releases_failures() {
        let (transport, url) = memory_queue(&["retry"]).await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let handler = MessageHandler::from_fn(move |message: ReceivedMessage| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if message.receive_count() < 2 {
                    Err(HandlerError::new("first attempt fails"))
                } else {
                    Ok(())
                }
            }
        });
        let settings = ConsumerSettings {
            terminate_visibility_timeout: Some(0),
            ..settings(&url)
        };

        let consumer = consumer(transport.clone(), settings, handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::MessageProcessed, 1).await;
        consumer.stop(&StopPolicy::default()).await.expect("stopped");

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.count(ConsumerEvent::ProcessingError), 1);
    }

    /// Verify batch handlers receive the whole batch at once
    #[tokio::test]
    async fn test_batch_handler_receives_batch() {
        let (transport, url) = memory_queue(&["a", "b", "c"]).await;
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let handler = MessageHandler::batch_fn(move |messages: Vec<ReceivedMessage>| {
            let sink = sink.clone();
            async move {
                sink.lock().expect("lock").push(messages.len());
                Ok(())
            }
        });
        let settings = ConsumerSettings {
            batch_size: 10,
            ..settings(&url)
        };

        let consumer = consumer(transport.clone(), settings, handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::MessageProcessed, 3).await;
        consumer.stop(&StopPolicy::default()).await.expect("stopped");

        assert_eq!(*batches.lock().expect("lock"), vec![3]);
        assert_eq!(
            count_attribute(&transport, &url, QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
                .await,
            0
        );
    }

    /// Verify slow handlers are reported as timeouts
    #[tokio::test]
    async fn test_handler_timeout() {
        let (transport, url) = memory_queue(&["slow"]).await;
        let handler = MessageHandler::from_fn(|_message| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        let settings = ConsumerSettings {
            handle_message_timeout_ms: Some(20),
            ..settings(&url)
        };

        let consumer = consumer(transport, settings, handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::TimeoutError, 1).await;
        consumer.stop(&StopPolicy::default()).await.expect("stopped");

        assert_eq!(recorder.count(ConsumerEvent::MessageProcessed), 0);
    }

    /// Verify a panicking handler fails only its own message and polling continues
    #[tokio::test]
    async fn test_handler_panic_is_processing_error() {
        let (transport, url) = memory_queue(&["boom", "two", "three"]).await;
        let handled = Arc::new(Mutex::new(Vec::new()));
        let sink = handled.clone();
        let handler = MessageHandler::from_fn(move |message: ReceivedMessage| {
            let sink = sink.clone();
            async move {
                if message.body == "boom" {
                    panic!("handler bug");
                }
                sink.lock().expect("lock").push(message.body);
                Ok(())
            }
        });
        let settings = ConsumerSettings {
            batch_size: 10,
            ..settings(&url)
        };

        let consumer = consumer(transport.clone(), settings, handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::MessageProcessed, 2).await;
        assert!(consumer.is_running());
        let outcome = consumer
            .stop(&StopPolicy::graceful(Duration::from_secs(5)))
            .await
            .expect("stopped");

        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(*handled.lock().expect("lock"), vec!["two", "three"]);
        let events = recorder.events.lock().expect("lock").clone();
        let failure = events
            .iter()
            .find(|d| d.event == ConsumerEvent::ProcessingError)
            .expect("processing error event");
        assert_eq!(
            failure.message.as_ref().map(|m| m.body.as_str()),
            Some("boom")
        );
        assert!(failure
            .error
            .as_deref()
            .is_some_and(|e| e.contains("handler bug")));
        assert_eq!(recorder.count(ConsumerEvent::ProcessingError), 1);
    }

    /// Verify a panicking batch handler fails the batch and the loop keeps polling
    #[tokio::test]
    async fn test_batch_handler_panic_keeps_polling() {
        let (transport, url) = memory_queue(&["a", "b"]).await;
        let handler = MessageHandler::batch_fn(|_messages: Vec<ReceivedMessage>| async {
            panic!("batch bug");
        });
        let settings = ConsumerSettings {
            batch_size: 10,
            ..settings(&url)
        };

        let consumer = consumer(transport.clone(), settings, handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::ProcessingError, 2).await;
        recorder.wait_for(ConsumerEvent::ResponseProcessed, 1).await;
        assert!(consumer.is_running());
        let outcome = consumer.stop(&StopPolicy::default()).await.expect("stopped");

        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(recorder.count(ConsumerEvent::MessageProcessed), 0);
        assert_eq!(
            count_attribute(&transport, &url, QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
                .await,
            2
        );
    }

    /// Verify empty polls are reported
    #[tokio::test]
    async fn test_empty_queue_emits_empty() {
        let (transport, url) = memory_queue(&[]).await;
        let settings = ConsumerSettings {
            wait_time_seconds: 0,
            polling_wait_time_ms: 5,
            ..settings(&url)
        };

        let consumer = consumer(transport, settings, ok_handler());
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::Empty, 2).await;
        consumer.stop(&StopPolicy::default()).await.expect("stopped");
    }

    /// Verify receive failures are reported and polling continues
    #[tokio::test]
    async fn test_receive_errors_are_reported() {
        let transport = Arc::new(FailingTransport {
            receives: AtomicUsize::new(0),
            error: || QueueError::ConnectionFailed {
                message: "refused".to_string(),
            },
        });
        let url = QueueUrl::new("https://sqs.memory.local/000000000000/orders").expect("url");
        let settings = ConsumerSettings {
            polling_wait_time_ms: 5,
            ..settings(&url)
        };

        let consumer = consumer(transport.clone(), settings, ok_handler());
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::Error, 2).await;
        consumer.stop(&StopPolicy::default()).await.expect("stopped");

        assert!(transport.receives.load(Ordering::SeqCst) >= 2);
    }

    /// Verify authentication failures pause polling
    #[tokio::test]
    async fn test_authentication_error_pauses_polling() {
        let transport = Arc::new(FailingTransport {
            receives: AtomicUsize::new(0),
            error: || QueueError::AuthenticationFailed {
                message: "expired".to_string(),
            },
        });
        let url = QueueUrl::new("https://sqs.memory.local/000000000000/orders").expect("url");
        let settings = ConsumerSettings {
            polling_wait_time_ms: 0,
            authentication_error_timeout_ms: 60_000,
            ..settings(&url)
        };

        let consumer = consumer(transport.clone(), settings, ok_handler());
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::Error, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let outcome = consumer.stop(&StopPolicy::default()).await.expect("stopped");

        assert_eq!(transport.receives.load(Ordering::SeqCst), 1);
        // The pause is interrupted by the stop signal
        assert_eq!(outcome, StopOutcome::Graceful);
    }
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

mod lifecycle_tests {
    use super::*;

    /// Verify starting twice keeps a single polling loop
    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (transport, url) = memory_queue(&[]).await;
        let consumer = consumer(transport, settings(&url), ok_handler());
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        consumer.start().expect("second start is a no-op");
        recorder.wait_for(ConsumerEvent::Started, 1).await;

        assert!(consumer.is_running());
        consumer.stop(&StopPolicy::default()).await.expect("stopped");
        assert_eq!(recorder.count(ConsumerEvent::Started), 1);
        assert!(!consumer.is_running());
    }

    /// Verify stopping an idle consumer is a no-op
    #[tokio::test]
    async fn test_stop_when_not_running() {
        let (transport, url) = memory_queue(&[]).await;
        let consumer = consumer(transport, settings(&url), ok_handler());

        let outcome = consumer.stop(&StopPolicy::default()).await.expect("ok");
        assert_eq!(outcome, StopOutcome::NotRunning);
    }

    /// Verify a long poll is interrupted by a graceful stop
    #[tokio::test]
    async fn test_stop_interrupts_long_poll() {
        let (transport, url) = memory_queue(&[]).await;
        let settings = ConsumerSettings {
            wait_time_seconds: 20,
            ..settings(&url)
        };
        let consumer = consumer(transport, settings, ok_handler());
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::Started, 1).await;

        let outcome = consumer
            .stop(&StopPolicy::graceful(Duration::from_secs(2)))
            .await
            .expect("stopped");

        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(recorder.count(ConsumerEvent::Stopped), 1);
        assert_eq!(recorder.count(ConsumerEvent::Aborted), 0);
    }

    /// Verify a handler outliving the stop timeout forces termination
    #[tokio::test]
    async fn test_stop_timeout_forces_abort() {
        let (transport, url) = memory_queue(&["stuck"]).await;
        let handler = MessageHandler::from_fn(|_message| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let consumer = consumer(transport, settings(&url), handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::MessageReceived, 1).await;

        let outcome = consumer
            .stop(&StopPolicy::graceful(Duration::from_millis(50)))
            .await
            .expect("stopped");

        assert_eq!(outcome, StopOutcome::Forced);
        assert_eq!(recorder.count(ConsumerEvent::Aborted), 1);
        assert_eq!(recorder.count(ConsumerEvent::Stopped), 1);
        assert!(!consumer.is_running());
    }

    /// Verify abort terminates without waiting
    #[tokio::test]
    async fn test_abort_stop() {
        let (transport, url) = memory_queue(&["stuck"]).await;
        let handler = MessageHandler::from_fn(|_message| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let consumer = consumer(transport, settings(&url), handler);
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        recorder.wait_for(ConsumerEvent::MessageReceived, 1).await;

        let outcome = consumer.stop(&StopPolicy::abort()).await.expect("stopped");

        assert_eq!(outcome, StopOutcome::Forced);
        assert_eq!(recorder.count(ConsumerEvent::Aborted), 1);
    }

    /// Verify a stopped consumer can be started again
    #[tokio::test]
    async fn test_restart_after_stop() {
        let (transport, url) = memory_queue(&[]).await;
        let consumer = consumer(transport.clone(), settings(&url), ok_handler());
        let recorder = EventRecorder::default();
        recorder.attach(&consumer);

        consumer.start().expect("started");
        consumer.stop(&StopPolicy::default()).await.expect("stopped");

        transport
            .send_message_batch(&url, &[outbound("after restart")])
            .await
            .expect("sent");
        consumer.start().expect("restarted");
        recorder.wait_for(ConsumerEvent::MessageProcessed, 1).await;
        consumer.stop(&StopPolicy::default()).await.expect("stopped");

        assert_eq!(recorder.count(ConsumerEvent::Started), 2);
    }
}
