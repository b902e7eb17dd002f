//! In-memory transport for tests and local development.
//!
//! Queues live in process memory and follow SQS delivery semantics closely
//! enough for consumers to behave the same way against them:
//!
//! - received messages stay in flight until deleted or their visibility
//!   timeout expires, after which they are delivered again with a fresh
//!   receipt handle
//! - only the most recent receipt handle of a message is valid
//! - receives long-poll until a message is available or the wait elapses
//!
//! Timing uses `tokio::time`, so tests running with a paused clock can
//! advance through visibility timeouts deterministically.

use crate::error::{QueueError, ValidationError};
use crate::message::{
    BatchEntryError, DeleteBatchEntry, DeleteBatchResult, MessageId, OutboundMessage,
    QueueAttributeName, QueueAttributes, QueueName, QueueUrl, ReceiptHandle, ReceiveOptions,
    ReceivedMessage, ResponseMetadata, SendBatchResult, SendResultEntry,
};
use crate::providers::sqs::MAX_MESSAGE_SIZE;
use crate::transport::{check_batch_size, QueueTransport};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const URL_PREFIX: &str = "https://sqs.memory.local/000000000000/";
const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: u32 = 30;

struct StoredMessage {
    message_id: MessageId,
    body: String,
    message_attributes: HashMap<String, String>,
    group_id: Option<String>,
    visible_at: Instant,
    receipt: Option<String>,
    receive_count: u32,
    sent_timestamp: i64,
    delayed: bool,
}

struct QueueState {
    name: QueueName,
    messages: Vec<StoredMessage>,
    visibility_timeout: u32,
    created_timestamp: i64,
}

impl QueueState {
    fn find_by_receipt(&mut self, receipt: &ReceiptHandle) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt.as_str()))
    }

    fn take_visible(&mut self, options: &ReceiveOptions, now: Instant) -> Vec<ReceivedMessage> {
        let max = options.max_messages.clamp(1, 10) as usize;
        let visibility = Duration::from_secs(u64::from(
            options.visibility_timeout.unwrap_or(self.visibility_timeout),
        ));

        let mut received = Vec::new();
        for stored in self.messages.iter_mut() {
            if received.len() >= max {
                break;
            }
            if stored.visible_at > now {
                continue;
            }

            let receipt = uuid::Uuid::new_v4().to_string();
            stored.receipt = Some(receipt.clone());
            stored.receive_count += 1;
            stored.visible_at = now + visibility;
            stored.delayed = false;

            let mut attributes = HashMap::new();
            attributes.insert(
                "ApproximateReceiveCount".to_string(),
                stored.receive_count.to_string(),
            );
            attributes.insert("SentTimestamp".to_string(), stored.sent_timestamp.to_string());
            if let Some(group) = &stored.group_id {
                attributes.insert("MessageGroupId".to_string(), group.clone());
            }

            received.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                receipt_handle: ReceiptHandle::new(receipt),
                body: stored.body.clone(),
                attributes,
                message_attributes: stored.message_attributes.clone(),
            });
        }
        received
    }
}

/// Transport keeping queues in process memory
///
/// ```rust
/// use queue_binder_runtime::{InMemoryTransport, QueueTransport, ReceiveOptions};
///
/// # tokio_test::block_on(async {
/// let transport = InMemoryTransport::new();
/// let url = transport.create_queue("orders").await.unwrap();
///
/// let options = ReceiveOptions {
///     wait_time_seconds: 0,
///     ..Default::default()
/// };
/// let received = transport.receive_messages(&url, &options).await.unwrap();
/// assert!(received.is_empty());
/// # });
/// ```
pub struct InMemoryTransport {
    queues: Mutex<HashMap<String, QueueState>>,
    arrivals: Notify,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            arrivals: Notify::new(),
        }
    }

    /// Create a queue with the default 30 second visibility timeout
    ///
    /// Creating an existing queue returns its URL unchanged.
    pub async fn create_queue(&self, name: &str) -> Result<QueueUrl, QueueError> {
        self.create_queue_with_visibility(name, DEFAULT_VISIBILITY_TIMEOUT_SECONDS)
            .await
    }

    /// Create a queue with a specific default visibility timeout
    pub async fn create_queue_with_visibility(
        &self,
        name: &str,
        visibility_timeout: u32,
    ) -> Result<QueueUrl, QueueError> {
        let queue_name = QueueName::new(name)?;
        let url = QueueUrl::new(format!("{}{}", URL_PREFIX, queue_name))?;

        let mut queues = self.queues.lock().await;
        queues
            .entry(url.as_str().to_string())
            .or_insert_with(|| {
                debug!(queue = %queue_name, "Created in-memory queue");
                QueueState {
                    name: queue_name,
                    messages: Vec::new(),
                    visibility_timeout,
                    created_timestamp: Utc::now().timestamp(),
                }
            });
        Ok(url)
    }

    async fn with_queue<T>(
        &self,
        queue_url: &QueueUrl,
        f: impl FnOnce(&mut QueueState) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let mut queues = self.queues.lock().await;
        let queue =
            queues
                .get_mut(queue_url.as_str())
                .ok_or_else(|| QueueError::QueueNotFound {
                    queue_name: queue_url.queue_name().to_string(),
                })?;
        f(queue)
    }

    fn metadata() -> ResponseMetadata {
        ResponseMetadata {
            request_id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    fn validate_outbound(queue: &QueueState, message: &OutboundMessage) -> Option<BatchEntryError> {
        let reject = |code: &str, text: String| BatchEntryError {
            id: message.id.clone(),
            code: code.to_string(),
            message: Some(text),
            sender_fault: true,
        };

        if message.body.len() > MAX_MESSAGE_SIZE {
            return Some(reject(
                "InvalidParameterValue",
                format!(
                    "message of {} bytes exceeds {} bytes",
                    message.body.len(),
                    MAX_MESSAGE_SIZE
                ),
            ));
        }
        if queue.name.is_fifo() && message.group_id.is_none() {
            return Some(reject(
                "MissingParameter",
                "FIFO queues require a message group".to_string(),
            ));
        }
        None
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn get_queue_url(&self, queue_name: &str) -> Result<QueueUrl, QueueError> {
        let url = format!("{}{}", URL_PREFIX, queue_name);
        let queues = self.queues.lock().await;
        if queues.contains_key(&url) {
            Ok(QueueUrl::new(url)?)
        } else {
            Err(QueueError::QueueNotFound {
                queue_name: queue_name.to_string(),
            })
        }
    }

    async fn send_message_batch(
        &self,
        queue_url: &QueueUrl,
        messages: &[OutboundMessage],
    ) -> Result<SendBatchResult, QueueError> {
        check_batch_size(messages.len())?;

        let now = Instant::now();
        let result = self
            .with_queue(queue_url, |queue| {
                let mut result = SendBatchResult::default();
                for message in messages {
                    if let Some(error) = Self::validate_outbound(queue, message) {
                        result.failed.push(error);
                        continue;
                    }

                    let message_id = MessageId::new();
                    let delay = u64::from(message.delay_seconds.unwrap_or(0));
                    queue.messages.push(StoredMessage {
                        message_id: message_id.clone(),
                        body: message.body.clone(),
                        message_attributes: message.attributes.clone(),
                        group_id: message.group_id.clone(),
                        visible_at: now + Duration::from_secs(delay),
                        receipt: None,
                        receive_count: 0,
                        sent_timestamp: Utc::now().timestamp_millis(),
                        delayed: delay > 0,
                    });
                    result.successful.push(SendResultEntry {
                        id: message.id.clone(),
                        message_id,
                        md5_of_body: None,
                    });
                }
                trace!(
                    queue = %queue.name,
                    sent = result.successful.len(),
                    failed = result.failed.len(),
                    "Stored messages"
                );
                Ok(result)
            })
            .await?;

        if !result.successful.is_empty() {
            self.arrivals.notify_waiters();
        }
        Ok(result)
    }

    async fn receive_messages(
        &self,
        queue_url: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline =
            Instant::now() + Duration::from_secs(u64::from(options.wait_time_seconds.min(20)));

        loop {
            // Registered before the check so a concurrent send cannot be missed
            let arrival = self.arrivals.notified();

            let now = Instant::now();
            let (received, next_visible) = self
                .with_queue(queue_url, |queue| {
                    let received = queue.take_visible(options, now);
                    let next_visible = queue.messages.iter().map(|m| m.visible_at).min();
                    Ok((received, next_visible))
                })
                .await?;

            if !received.is_empty() || now >= deadline {
                return Ok(received);
            }

            let wake_at = match next_visible {
                Some(at) if at > now => at.min(deadline),
                _ => deadline,
            };
            tokio::select! {
                _ = arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(
        &self,
        queue_url: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<ResponseMetadata, QueueError> {
        self.with_queue(queue_url, |queue| {
            let idx = queue
                .find_by_receipt(receipt)
                .ok_or_else(|| QueueError::MessageNotFound {
                    receipt: receipt.to_string(),
                })?;
            queue.messages.remove(idx);
            Ok(Self::metadata())
        })
        .await
    }

    async fn delete_message_batch(
        &self,
        queue_url: &QueueUrl,
        entries: &[DeleteBatchEntry],
    ) -> Result<DeleteBatchResult, QueueError> {
        check_batch_size(entries.len())?;

        self.with_queue(queue_url, |queue| {
            let mut result = DeleteBatchResult::default();
            for entry in entries {
                match queue.find_by_receipt(&entry.receipt_handle) {
                    Some(idx) => {
                        queue.messages.remove(idx);
                        result.successful.push(entry.id.clone());
                    }
                    None => result.failed.push(BatchEntryError {
                        id: entry.id.clone(),
                        code: "ReceiptHandleIsInvalid".to_string(),
                        message: Some(format!(
                            "receipt handle '{}' is not valid",
                            entry.receipt_handle
                        )),
                        sender_fault: true,
                    }),
                }
            }
            Ok(result)
        })
        .await
    }

    async fn change_message_visibility(
        &self,
        queue_url: &QueueUrl,
        receipt: &ReceiptHandle,
        timeout_seconds: u32,
    ) -> Result<ResponseMetadata, QueueError> {
        if timeout_seconds > crate::transport::MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(ValidationError::OutOfRange {
                field: "visibility_timeout".to_string(),
                message: format!(
                    "must be at most {} seconds",
                    crate::transport::MAX_VISIBILITY_TIMEOUT_SECONDS
                ),
            }
            .into());
        }

        let now = Instant::now();
        self.with_queue(queue_url, |queue| {
            let idx = queue
                .find_by_receipt(receipt)
                .ok_or_else(|| QueueError::MessageNotFound {
                    receipt: receipt.to_string(),
                })?;
            queue.messages[idx].visible_at = now + Duration::from_secs(u64::from(timeout_seconds));
            Ok(())
        })
        .await?;

        if timeout_seconds == 0 {
            self.arrivals.notify_waiters();
        }
        Ok(Self::metadata())
    }

    async fn purge_queue(&self, queue_url: &QueueUrl) -> Result<ResponseMetadata, QueueError> {
        self.with_queue(queue_url, |queue| {
            debug!(queue = %queue.name, purged = queue.messages.len(), "Purged in-memory queue");
            queue.messages.clear();
            Ok(Self::metadata())
        })
        .await
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &QueueUrl,
    ) -> Result<QueueAttributes, QueueError> {
        let now = Instant::now();
        self.with_queue(queue_url, |queue| {
            let visible = queue.messages.iter().filter(|m| m.visible_at <= now).count();
            let delayed = queue
                .messages
                .iter()
                .filter(|m| m.visible_at > now && m.delayed)
                .count();
            let in_flight = queue.messages.len() - visible - delayed;

            let mut attributes = QueueAttributes::new();
            attributes.insert(QueueAttributeName::ApproximateNumberOfMessages, visible.to_string());
            attributes.insert(
                QueueAttributeName::ApproximateNumberOfMessagesNotVisible,
                in_flight.to_string(),
            );
            attributes.insert(
                QueueAttributeName::ApproximateNumberOfMessagesDelayed,
                delayed.to_string(),
            );
            attributes.insert(
                QueueAttributeName::CreatedTimestamp,
                queue.created_timestamp.to_string(),
            );
            attributes.insert(
                QueueAttributeName::VisibilityTimeout,
                queue.visibility_timeout.to_string(),
            );
            attributes.insert(
                QueueAttributeName::QueueArn,
                format!("arn:aws:sqs:memory:000000000000:{}", queue.name),
            );
            attributes.insert(
                QueueAttributeName::MaximumMessageSize,
                MAX_MESSAGE_SIZE.to_string(),
            );
            if queue.name.is_fifo() {
                attributes.insert(QueueAttributeName::FifoQueue, "true");
            }
            Ok(attributes)
        })
        .await
    }

    fn provider_name(&self) -> &'static str {
        "InMemory"
    }
}
