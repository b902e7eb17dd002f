//! Tests for explicit handler registration.

use super::*;
use queue_binder_runtime::{HandleMessage, HandleMessageBatch, MessageId, ReceiptHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

fn received(body: &str) -> ReceivedMessage {
    ReceivedMessage {
        message_id: MessageId::new(),
        receipt_handle: ReceiptHandle::new("receipt"),
        body: body.to_string(),
        attributes: HashMap::new(),
        message_attributes: HashMap::new(),
    }
}

/// Verify single and batch handlers keep their mode and order
#[test]
fn test_handler_modes_recorded() {
    let mut bindings = Bindings::new();
    bindings
        .on_message("orders", |_message: ReceivedMessage| async { Ok(()) })
        .on_batch("invoices", |_messages: Vec<ReceivedMessage>| async { Ok(()) });

    let handlers = bindings.message_handlers();

    assert_eq!(handlers.len(), 2);
    assert_eq!(handlers[0].queue_name, "orders");
    assert!(!handlers[0].is_batch());
    assert_eq!(handlers[1].queue_name, "invoices");
    assert!(handlers[1].is_batch());
}

/// Verify a pre-built handler can be bound
#[test]
fn test_with_handler() {
    let mut bindings = Bindings::new();
    bindings.with_handler(
        "orders",
        MessageHandler::batch_fn(|_messages: Vec<ReceivedMessage>| async { Ok(()) }),
    );

    assert_eq!(bindings.handler_count(), 1);
    assert!(bindings.message_handlers()[0].is_batch());
}

/// Verify event bindings carry queue name and event
#[test]
fn test_event_bindings_recorded() {
    let mut bindings = Bindings::new();
    bindings
        .on_event("orders", ConsumerEvent::Started, |_: &ConsumerEventData| {})
        .on_event("orders", ConsumerEvent::Error, |_: &ConsumerEventData| {});

    let events = bindings.event_handlers();

    assert_eq!(bindings.event_count(), 2);
    assert_eq!(events[0].queue_name, "orders");
    assert_eq!(events[0].event, ConsumerEvent::Started);
    assert_eq!(events[1].event, ConsumerEvent::Error);
}

/// Verify bound closures keep their captured state
#[tokio::test]
async fn test_bound_closure_invoked() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut bindings = Bindings::new();
    bindings.on_message("orders", move |message: ReceivedMessage| {
        let counter = counter.clone();
        async move {
            assert_eq!(message.body, "hello");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let binding = bindings.message_handlers().remove(0);
    match binding.handler {
        MessageHandler::Single(handler) => handler
            .handle_message(received("hello"))
            .await
            .expect("handler should succeed"),
        MessageHandler::Batch(_) => panic!("expected a single-message handler"),
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Verify batch closures receive the whole batch
#[tokio::test]
async fn test_batch_closure_receives_batch() {
    let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorded = sizes.clone();

    let mut bindings = Bindings::new();
    bindings.on_batch("orders", move |messages: Vec<ReceivedMessage>| {
        let recorded = recorded.clone();
        async move {
            recorded.lock().unwrap().push(messages.len());
            Ok(())
        }
    });

    let binding = bindings.message_handlers().remove(0);
    let MessageHandler::Batch(handler) = binding.handler else {
        panic!("expected a batch handler");
    };
    handler
        .handle_message_batch(vec![received("a"), received("b"), received("c")])
        .await
        .expect("handler should succeed");

    assert_eq!(*sizes.lock().unwrap(), vec![3]);
}

/// Verify event callbacks are shared, not copied, between discoveries
#[test]
fn test_event_callback_shared() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut bindings = Bindings::new();
    bindings.on_event("orders", ConsumerEvent::Empty, move |_: &ConsumerEventData| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let data = ConsumerEventData {
        event: ConsumerEvent::Empty,
        queue_name: "orders".to_string(),
        message: None,
        error: None,
    };
    (bindings.event_handlers()[0].callback)(&data);
    (bindings.event_handlers()[0].callback)(&data);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Verify empty bindings discover nothing
#[test]
fn test_empty_bindings() {
    let bindings = Bindings::default();

    assert!(bindings.message_handlers().is_empty());
    assert!(bindings.event_handlers().is_empty());
}
