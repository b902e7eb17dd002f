//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated logical queue name used as the registry key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let base = name.strip_suffix(".fifo").unwrap_or(&name);

        // Validate length (SQS allows up to 80 characters including the suffix)
        if base.is_empty() || name.len() > 80 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-80 characters".to_string(),
            });
        }

        // Validate characters (ASCII alphanumeric, hyphens, underscores)
        if !base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the name carries the FIFO suffix
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(".fifo")
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Backend address of a queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueUrl(String);

impl QueueUrl {
    /// Create a queue URL, rejecting values that are not absolute URLs
    pub fn new(url: impl Into<String>) -> Result<Self, ValidationError> {
        let url = url.into();
        url::Url::parse(&url).map_err(|e| ValidationError::InvalidFormat {
            field: "queue_url".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self(url))
    }

    /// Get the URL as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the URL, which SQS uses as the queue name
    pub fn queue_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for QueueUrl {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueUrl> for String {
    fn from(url: QueueUrl) -> Self {
        url.0
    }
}

/// Backend-assigned identifier for a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token identifying one delivery of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Wrap a receipt handle returned by the backend
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Body of an outgoing message
///
/// String bodies travel unchanged. Structured bodies are serialized to JSON
/// text right before they are handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    Json(serde_json::Value),
}

impl MessageBody {
    /// Convert the body into its wire string
    pub fn into_wire(self) -> Result<String, SerializationError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Json(value) => Ok(serde_json::to_string(&value)?),
        }
    }

    /// Build a body from any serializable value
    ///
    /// A value that serializes to a JSON string becomes a text body, so it
    /// travels unquoted.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, SerializationError> {
        Ok(serde_json::to_value(value)?.into())
    }
}

impl From<String> for MessageBody {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageBody {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for MessageBody {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }
}

/// A message to be sent through a producer
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Option<String>,
    pub body: MessageBody,
    pub attributes: HashMap<String, String>,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
    pub delay_seconds: Option<u32>,
}

impl Message {
    /// Create new message with body
    pub fn new(body: impl Into<MessageBody>) -> Self {
        Self {
            id: None,
            body: body.into(),
            attributes: HashMap::new(),
            group_id: None,
            deduplication_id: None,
            delay_seconds: None,
        }
    }

    /// Set the batch entry identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the FIFO message group
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the FIFO deduplication ID
    pub fn with_deduplication_id(mut self, id: impl Into<String>) -> Self {
        self.deduplication_id = Some(id.into());
        self
    }

    /// Delay delivery by the given number of seconds
    pub fn with_delay_seconds(mut self, seconds: u32) -> Self {
        self.delay_seconds = Some(seconds);
        self
    }

    /// Serialize the body and freeze the message into its wire form
    pub fn into_outbound(self) -> Result<OutboundMessage, SerializationError> {
        Ok(OutboundMessage {
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            body: self.body.into_wire()?,
            attributes: self.attributes,
            group_id: self.group_id,
            deduplication_id: self.deduplication_id,
            delay_seconds: self.delay_seconds,
        })
    }
}

/// A message whose body is already in its wire representation
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub id: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
    pub delay_seconds: Option<u32>,
}

/// A message received from the queue with processing metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    /// System attributes such as `ApproximateReceiveCount`
    pub attributes: HashMap<String, String>,
    /// Application attributes set by the sender
    pub message_attributes: HashMap<String, String>,
}

impl ReceivedMessage {
    /// Number of times this message has been delivered
    pub fn receive_count(&self) -> u32 {
        self.attributes
            .get("ApproximateReceiveCount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }

    /// FIFO message group, if any
    pub fn group_id(&self) -> Option<&str> {
        self.attributes.get("MessageGroupId").map(String::as_str)
    }

    /// Parse the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, SerializationError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Backend acknowledgment for commands that return no payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub request_id: Option<String>,
}

/// One failed entry of a batch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntryError {
    pub id: String,
    pub code: String,
    pub message: Option<String>,
    pub sender_fault: bool,
}

/// One successfully sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResultEntry {
    pub id: String,
    pub message_id: MessageId,
    pub md5_of_body: Option<String>,
}

/// Outcome of a batch send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendBatchResult {
    pub successful: Vec<SendResultEntry>,
    pub failed: Vec<BatchEntryError>,
}

/// Entry of a batch delete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteBatchEntry {
    pub id: String,
    pub receipt_handle: ReceiptHandle,
}

impl From<&ReceivedMessage> for DeleteBatchEntry {
    fn from(message: &ReceivedMessage) -> Self {
        Self {
            id: message.message_id.as_str().to_string(),
            receipt_handle: message.receipt_handle.clone(),
        }
    }
}

/// Outcome of a batch delete, listing the IDs that succeeded and failed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteBatchResult {
    pub successful: Vec<String>,
    pub failed: Vec<BatchEntryError>,
}

impl DeleteBatchResult {
    /// True when every entry was deleted
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// Queue Attributes
// ============================================================================

/// Queue attribute names reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueAttributeName {
    ApproximateNumberOfMessages,
    ApproximateNumberOfMessagesDelayed,
    ApproximateNumberOfMessagesNotVisible,
    ContentBasedDeduplication,
    CreatedTimestamp,
    DeduplicationScope,
    DelaySeconds,
    FifoQueue,
    FifoThroughputLimit,
    KmsDataKeyReusePeriodSeconds,
    KmsMasterKeyId,
    LastModifiedTimestamp,
    MaximumMessageSize,
    MessageRetentionPeriod,
    Policy,
    QueueArn,
    ReceiveMessageWaitTimeSeconds,
    RedriveAllowPolicy,
    RedrivePolicy,
    SqsManagedSseEnabled,
    VisibilityTimeout,
}

impl QueueAttributeName {
    /// Every known attribute, in wire-name order
    pub const ALL: [QueueAttributeName; 21] = [
        Self::ApproximateNumberOfMessages,
        Self::ApproximateNumberOfMessagesDelayed,
        Self::ApproximateNumberOfMessagesNotVisible,
        Self::ContentBasedDeduplication,
        Self::CreatedTimestamp,
        Self::DeduplicationScope,
        Self::DelaySeconds,
        Self::FifoQueue,
        Self::FifoThroughputLimit,
        Self::KmsDataKeyReusePeriodSeconds,
        Self::KmsMasterKeyId,
        Self::LastModifiedTimestamp,
        Self::MaximumMessageSize,
        Self::MessageRetentionPeriod,
        Self::Policy,
        Self::QueueArn,
        Self::ReceiveMessageWaitTimeSeconds,
        Self::RedriveAllowPolicy,
        Self::RedrivePolicy,
        Self::SqsManagedSseEnabled,
        Self::VisibilityTimeout,
    ];

    /// Wire name of the attribute
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApproximateNumberOfMessages => "ApproximateNumberOfMessages",
            Self::ApproximateNumberOfMessagesDelayed => "ApproximateNumberOfMessagesDelayed",
            Self::ApproximateNumberOfMessagesNotVisible => "ApproximateNumberOfMessagesNotVisible",
            Self::ContentBasedDeduplication => "ContentBasedDeduplication",
            Self::CreatedTimestamp => "CreatedTimestamp",
            Self::DeduplicationScope => "DeduplicationScope",
            Self::DelaySeconds => "DelaySeconds",
            Self::FifoQueue => "FifoQueue",
            Self::FifoThroughputLimit => "FifoThroughputLimit",
            Self::KmsDataKeyReusePeriodSeconds => "KmsDataKeyReusePeriodSeconds",
            Self::KmsMasterKeyId => "KmsMasterKeyId",
            Self::LastModifiedTimestamp => "LastModifiedTimestamp",
            Self::MaximumMessageSize => "MaximumMessageSize",
            Self::MessageRetentionPeriod => "MessageRetentionPeriod",
            Self::Policy => "Policy",
            Self::QueueArn => "QueueArn",
            Self::ReceiveMessageWaitTimeSeconds => "ReceiveMessageWaitTimeSeconds",
            Self::RedriveAllowPolicy => "RedriveAllowPolicy",
            Self::RedrivePolicy => "RedrivePolicy",
            Self::SqsManagedSseEnabled => "SqsManagedSseEnabled",
            Self::VisibilityTimeout => "VisibilityTimeout",
        }
    }
}

impl std::fmt::Display for QueueAttributeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueAttributeName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "attribute_name".to_string(),
                message: format!("unknown queue attribute '{}'", s),
            })
    }
}

/// Attribute values reported for one queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueAttributes {
    values: BTreeMap<QueueAttributeName, String>,
}

impl QueueAttributes {
    /// Create an empty attribute set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attribute value
    pub fn insert(&mut self, name: QueueAttributeName, value: impl Into<String>) {
        self.values.insert(name, value.into());
    }

    /// Look up an attribute value
    pub fn get(&self, name: QueueAttributeName) -> Option<&str> {
        self.values.get(&name).map(String::as_str)
    }

    /// Look up an attribute and parse it as a number
    pub fn get_u64(&self, name: QueueAttributeName) -> Option<u64> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    /// Check whether an attribute was reported
    pub fn contains(&self, name: QueueAttributeName) -> bool {
        self.values.contains_key(&name)
    }

    /// Number of reported attributes
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing was reported
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over reported attributes in name order
    pub fn iter(&self) -> impl Iterator<Item = (QueueAttributeName, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl FromIterator<(QueueAttributeName, String)> for QueueAttributes {
    fn from_iter<I: IntoIterator<Item = (QueueAttributeName, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Receive Options
// ============================================================================

/// Parameters of a single receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Maximum number of messages to receive (1-10)
    pub max_messages: u32,
    /// Long-poll wait in seconds (0-20)
    pub wait_time_seconds: u32,
    /// Visibility timeout applied to the received messages
    pub visibility_timeout: Option<u32>,
    /// System attributes to return with each message
    pub attribute_names: Vec<String>,
    /// Application attributes to return with each message
    pub message_attribute_names: Vec<String>,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait_time_seconds: 20,
            visibility_timeout: None,
            attribute_names: vec!["All".to_string()],
            message_attribute_names: vec!["All".to_string()],
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
