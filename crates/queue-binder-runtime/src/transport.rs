//! Backend transport abstraction.
//!
//! A [`QueueTransport`] issues one backend command per call against a queue
//! address. It owns connection management and request signing; it never
//! retries on its own.

use crate::error::QueueError;
use crate::message::{
    DeleteBatchEntry, DeleteBatchResult, OutboundMessage, QueueAttributes, QueueUrl,
    ReceiptHandle, ReceiveOptions, ReceivedMessage, ResponseMetadata, SendBatchResult,
};
use async_trait::async_trait;

/// Maximum number of entries in a single batch call
pub const MAX_BATCH_SIZE: usize = 10;

/// Maximum long-poll wait accepted by the backend
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;

/// Maximum visibility timeout accepted by the backend (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u32 = 43_200;

/// Interface implemented by queue backends (SQS, in-memory)
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Resolve a queue name to its address
    async fn get_queue_url(&self, queue_name: &str) -> Result<QueueUrl, QueueError>;

    /// Send up to [`MAX_BATCH_SIZE`] messages in one call
    async fn send_message_batch(
        &self,
        queue_url: &QueueUrl,
        messages: &[OutboundMessage],
    ) -> Result<SendBatchResult, QueueError>;

    /// Receive messages, long-polling up to the configured wait time
    async fn receive_messages(
        &self,
        queue_url: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete one received message
    async fn delete_message(
        &self,
        queue_url: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<ResponseMetadata, QueueError>;

    /// Delete up to [`MAX_BATCH_SIZE`] received messages in one call
    async fn delete_message_batch(
        &self,
        queue_url: &QueueUrl,
        entries: &[DeleteBatchEntry],
    ) -> Result<DeleteBatchResult, QueueError>;

    /// Change how long a received message stays hidden from other receivers
    async fn change_message_visibility(
        &self,
        queue_url: &QueueUrl,
        receipt: &ReceiptHandle,
        timeout_seconds: u32,
    ) -> Result<ResponseMetadata, QueueError>;

    /// Remove every message from the queue
    async fn purge_queue(&self, queue_url: &QueueUrl) -> Result<ResponseMetadata, QueueError>;

    /// Fetch the full ("All") attribute set of the queue
    async fn get_queue_attributes(&self, queue_url: &QueueUrl)
        -> Result<QueueAttributes, QueueError>;

    /// Short label identifying the backend in logs
    fn provider_name(&self) -> &'static str;
}

pub(crate) fn check_batch_size(len: usize) -> Result<(), QueueError> {
    if len > MAX_BATCH_SIZE {
        return Err(QueueError::BatchTooLarge {
            size: len,
            max_size: MAX_BATCH_SIZE,
        });
    }
    Ok(())
}
