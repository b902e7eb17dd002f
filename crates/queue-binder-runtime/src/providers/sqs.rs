//! AWS SQS transport using the HTTP query API.
//!
//! Requests are signed with AWS Signature Version 4 and sent with `reqwest`;
//! XML responses are parsed with `quick-xml`. Talking to the query API
//! directly keeps the transport testable against a mock HTTP server and
//! lets the endpoint point at local stacks.
//!
//! ## Authentication
//!
//! - **Access keys**: explicit `access_key_id` / `secret_access_key`
//! - **Temporary credentials**: an optional `session_token` is signed and
//!   sent as `x-amz-security-token`
//! - [`SqsConfig::from_env`] reads the standard `AWS_*` variables
//!
//! ## FIFO queues
//!
//! Queues whose URL ends in `.fifo` require a message group ID on every
//! message. When no deduplication ID is supplied one is derived from the
//! body and group with SHA-256.
//!
//! ## Example
//!
//! ```no_run
//! use queue_binder_runtime::providers::{SqsConfig, SqsTransport};
//! use queue_binder_runtime::{QueueTransport, QueueUrl};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = SqsTransport::new(SqsConfig::from_env())?;
//! let url = QueueUrl::new("https://sqs.us-east-1.amazonaws.com/123456789012/orders")?;
//! let attributes = transport.get_queue_attributes(&url).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ConfigurationError, QueueError, SerializationError, ValidationError};
use crate::message::{
    BatchEntryError, DeleteBatchEntry, DeleteBatchResult, MessageId, OutboundMessage,
    QueueAttributeName, QueueAttributes, QueueUrl, ReceiptHandle, ReceiveOptions,
    ReceivedMessage, ResponseMetadata, SendBatchResult, SendResultEntry,
};
use crate::transport::{check_batch_size, QueueTransport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";

/// Maximum message body size accepted by SQS (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for [`SqsTransport`]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Override of `https://sqs.{region}.amazonaws.com`
    pub endpoint: Option<String>,
    /// Upper bound on a single HTTP request; must exceed the long-poll wait
    pub request_timeout_secs: u64,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            endpoint: None,
            request_timeout_secs: 30,
        }
    }
}

impl SqsConfig {
    /// Read region, credentials and endpoint from the standard AWS variables
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            region: var("AWS_REGION")
                .or_else(|| var("AWS_DEFAULT_REGION"))
                .unwrap_or(defaults.region),
            access_key_id: var("AWS_ACCESS_KEY_ID"),
            secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            session_token: var("AWS_SESSION_TOKEN"),
            endpoint: var("AWS_ENDPOINT_URL_SQS").or_else(|| var("AWS_ENDPOINT_URL")),
            request_timeout_secs: defaults.request_timeout_secs,
        }
    }
}

impl fmt::Debug for SqsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum SqsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("SQS service error: {code} - {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SqsError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::Throttled(_) | Self::ServiceError { .. }
        )
    }

    /// Map SQS error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::Authentication(message) => QueueError::AuthenticationFailed { message },
            Self::AccessDenied(operation) => QueueError::PermissionDenied { operation },
            Self::NetworkError(message) => QueueError::ConnectionFailed { message },
            Self::Throttled(message) => QueueError::Throttled { message },
            Self::ServiceError { code, message } => QueueError::ProviderError {
                provider: "AwsSqs".to_string(),
                code,
                message,
            },
            Self::QueueNotFound(queue_name) => QueueError::QueueNotFound { queue_name },
            Self::InvalidReceipt(receipt) => QueueError::MessageNotFound { receipt },
            Self::MessageTooLarge { size, max_size } => {
                QueueError::MessageTooLarge { size, max_size }
            }
            Self::ConfigurationError(message) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message })
            }
            Self::SerializationError(message) => {
                QueueError::SerializationError(SerializationError::Xml { message })
            }
        }
    }
}

impl From<SqsError> for QueueError {
    fn from(error: SqsError) -> Self {
        error.to_queue_error()
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(
        access_key: String,
        secret_key: String,
        session_token: Option<String>,
        region: String,
    ) -> Self {
        Self {
            access_key,
            secret_key,
            session_token,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a request, returning the headers to attach to it
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        query_params: &BTreeMap<String, String>,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_query_string = canonical_query(query_params);

        // Canonical headers (must be sorted)
        let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let mut signed_headers = "host;x-amz-date".to_string();
        if let Some(token) = &self.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }

        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query_string, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = vec![
            ("Authorization".to_string(), authorization_header),
            ("x-amz-date".to_string(), amz_date),
        ];
        if let Some(token) = &self.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers
    }

    /// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes());

        hex::encode(signature)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_query(params: &BTreeMap<String, String>) -> String {
    let mut pairs = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>();
    pairs.sort();
    pairs.join("&")
}

// ============================================================================
// SQS Transport
// ============================================================================

/// SQS transport over the HTTP query API
///
/// The transport is cheap to share behind an `Arc`; the underlying HTTP client
/// pools connections.
pub struct SqsTransport {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    config: SqsConfig,
    endpoint: String,
    host: String,
}

impl SqsTransport {
    /// Create a transport; no request is sent until the first operation
    pub fn new(config: SqsConfig) -> Result<Self, SqsError> {
        if config.region.is_empty() {
            return Err(SqsError::ConfigurationError(
                "Region cannot be empty".to_string(),
            ));
        }

        let signer = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsV4Signer::new(
                access_key.clone(),
                secret_key.clone(),
                config.session_token.clone(),
                config.region.clone(),
            )),
            _ => None,
        };

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://sqs.{}.amazonaws.com", config.region));
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let parsed = url::Url::parse(&endpoint)
            .map_err(|e| SqsError::ConfigurationError(format!("Invalid endpoint: {}", e)))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(SqsError::ConfigurationError(format!(
                    "Endpoint '{}' has no host",
                    endpoint
                )))
            }
        };

        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SqsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            config,
            endpoint,
            host,
        })
    }

    /// Region requests are signed for
    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Base URL requests are sent to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn params(action: &str, queue_url: Option<&QueueUrl>) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("Action".to_string(), action.to_string());
        params.insert("Version".to_string(), API_VERSION.to_string());
        if let Some(url) = queue_url {
            params.insert("QueueUrl".to_string(), url.as_str().to_string());
        }
        params
    }

    /// Send a signed request and return the response body
    async fn make_request(&self, params: &BTreeMap<String, String>) -> Result<String, SqsError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| SqsError::Authentication("No credentials configured".to_string()))?;

        let method = "POST";
        let path = "/";
        let timestamp = Utc::now();
        let auth_headers = signer.sign_request(method, &self.host, path, params, "", &timestamp);

        let url = format!("{}{}?{}", self.endpoint, path, canonical_query(params));
        trace!(action = ?params.get("Action"), "Sending SQS request");

        let mut request = self.http_client.post(&url);
        for (key, value) in auth_headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SqsError::NetworkError(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                SqsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                SqsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| SqsError::NetworkError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }

    fn is_fifo_queue(queue_url: &QueueUrl) -> bool {
        queue_url.as_str().ends_with(".fifo")
    }

    fn add_send_entry(
        params: &mut BTreeMap<String, String>,
        index: usize,
        message: &OutboundMessage,
        fifo: bool,
    ) -> Result<(), QueueError> {
        if message.body.len() > MAX_MESSAGE_SIZE {
            return Err(SqsError::MessageTooLarge {
                size: message.body.len(),
                max_size: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        let prefix = format!("SendMessageBatchRequestEntry.{}", index + 1);
        params.insert(format!("{}.Id", prefix), message.id.clone());
        params.insert(format!("{}.MessageBody", prefix), message.body.clone());

        if let Some(delay) = message.delay_seconds {
            params.insert(format!("{}.DelaySeconds", prefix), delay.to_string());
        }

        // Sorted so the request is stable for a given message
        let attributes: BTreeMap<_, _> = message.attributes.iter().collect();
        for (n, (name, value)) in attributes.into_iter().enumerate() {
            let attr = format!("{}.MessageAttribute.{}", prefix, n + 1);
            params.insert(format!("{}.Name", attr), name.clone());
            params.insert(format!("{}.Value.StringValue", attr), value.clone());
            params.insert(format!("{}.Value.DataType", attr), "String".to_string());
        }

        if fifo {
            let group_id = message.group_id.as_ref().ok_or_else(|| {
                QueueError::ValidationError(ValidationError::Required {
                    field: "group_id".to_string(),
                })
            })?;
            params.insert(format!("{}.MessageGroupId", prefix), group_id.clone());

            let dedup_id = match &message.deduplication_id {
                Some(id) => id.clone(),
                None => {
                    let mut hasher = Sha256::new();
                    hasher.update(message.body.as_bytes());
                    hasher.update(group_id.as_bytes());
                    format!("{:x}", hasher.finalize())
                }
            };
            params.insert(format!("{}.MessageDeduplicationId", prefix), dedup_id);
        } else if message.group_id.is_some() {
            debug!(id = %message.id, "Ignoring message group on a standard queue");
        }

        Ok(())
    }
}

impl fmt::Debug for SqsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsTransport")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    async fn get_queue_url(&self, queue_name: &str) -> Result<QueueUrl, QueueError> {
        let mut params = Self::params("GetQueueUrl", None);
        params.insert("QueueName".to_string(), queue_name.to_string());

        let response = self.make_request(&params).await?;
        let url = parse_queue_url_response(&response)?;
        Ok(QueueUrl::new(url)?)
    }

    async fn send_message_batch(
        &self,
        queue_url: &QueueUrl,
        messages: &[OutboundMessage],
    ) -> Result<SendBatchResult, QueueError> {
        if messages.is_empty() {
            return Ok(SendBatchResult::default());
        }
        check_batch_size(messages.len())?;

        let fifo = Self::is_fifo_queue(queue_url);
        let mut params = Self::params("SendMessageBatch", Some(queue_url));
        for (idx, message) in messages.iter().enumerate() {
            Self::add_send_entry(&mut params, idx, message, fifo)?;
        }

        let response = self.make_request(&params).await?;
        Ok(parse_send_message_batch_response(&response)?)
    }

    async fn receive_messages(
        &self,
        queue_url: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut params = Self::params("ReceiveMessage", Some(queue_url));
        params.insert(
            "MaxNumberOfMessages".to_string(),
            options.max_messages.clamp(1, 10).to_string(),
        );
        params.insert(
            "WaitTimeSeconds".to_string(),
            options.wait_time_seconds.min(20).to_string(),
        );
        if let Some(timeout) = options.visibility_timeout {
            params.insert("VisibilityTimeout".to_string(), timeout.to_string());
        }
        for (n, name) in options.attribute_names.iter().enumerate() {
            params.insert(format!("AttributeName.{}", n + 1), name.clone());
        }
        for (n, name) in options.message_attribute_names.iter().enumerate() {
            params.insert(format!("MessageAttributeName.{}", n + 1), name.clone());
        }

        let response = self.make_request(&params).await?;
        Ok(parse_receive_message_response(&response)?)
    }

    async fn delete_message(
        &self,
        queue_url: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<ResponseMetadata, QueueError> {
        let mut params = Self::params("DeleteMessage", Some(queue_url));
        params.insert("ReceiptHandle".to_string(), receipt.as_str().to_string());

        let response = self.make_request(&params).await?;
        Ok(parse_response_metadata(&response)?)
    }

    async fn delete_message_batch(
        &self,
        queue_url: &QueueUrl,
        entries: &[DeleteBatchEntry],
    ) -> Result<DeleteBatchResult, QueueError> {
        if entries.is_empty() {
            return Ok(DeleteBatchResult::default());
        }
        check_batch_size(entries.len())?;

        let mut params = Self::params("DeleteMessageBatch", Some(queue_url));
        for (idx, entry) in entries.iter().enumerate() {
            let prefix = format!("DeleteMessageBatchRequestEntry.{}", idx + 1);
            params.insert(format!("{}.Id", prefix), entry.id.clone());
            params.insert(
                format!("{}.ReceiptHandle", prefix),
                entry.receipt_handle.as_str().to_string(),
            );
        }

        let response = self.make_request(&params).await?;
        Ok(parse_delete_message_batch_response(&response)?)
    }

    async fn change_message_visibility(
        &self,
        queue_url: &QueueUrl,
        receipt: &ReceiptHandle,
        timeout_seconds: u32,
    ) -> Result<ResponseMetadata, QueueError> {
        let mut params = Self::params("ChangeMessageVisibility", Some(queue_url));
        params.insert("ReceiptHandle".to_string(), receipt.as_str().to_string());
        params.insert("VisibilityTimeout".to_string(), timeout_seconds.to_string());

        let response = self.make_request(&params).await?;
        Ok(parse_response_metadata(&response)?)
    }

    async fn purge_queue(&self, queue_url: &QueueUrl) -> Result<ResponseMetadata, QueueError> {
        let params = Self::params("PurgeQueue", Some(queue_url));
        let response = self.make_request(&params).await?;
        Ok(parse_response_metadata(&response)?)
    }

    async fn get_queue_attributes(
        &self,
        queue_url: &QueueUrl,
    ) -> Result<QueueAttributes, QueueError> {
        let mut params = Self::params("GetQueueAttributes", Some(queue_url));
        params.insert("AttributeName.1".to_string(), "All".to_string());

        let response = self.make_request(&params).await?;
        Ok(parse_queue_attributes_response(&response)?)
    }

    fn provider_name(&self) -> &'static str {
        "AwsSqs"
    }
}

// ============================================================================
// XML Response Parsing
// ============================================================================

/// Element boundary reported while walking a response document
enum XmlNode<'a> {
    Start {
        name: &'a str,
    },
    /// Closing tag with the element's own text; `parents` excludes `name`
    End {
        parents: &'a [String],
        name: &'a str,
        text: String,
    },
}

fn walk_xml<F>(xml: &str, mut visit: F) -> Result<(), SqsError>
where
    F: FnMut(XmlNode<'_>),
{
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut texts: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                visit(XmlNode::Start { name: &name });
                path.push(name);
                texts.push(String::new());
            }
            Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                visit(XmlNode::Start { name: &name });
                visit(XmlNode::End {
                    parents: &path,
                    name: &name,
                    text: String::new(),
                });
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| SqsError::SerializationError(format!("Failed to parse XML: {}", e)))?;
                if let Some(current) = texts.last_mut() {
                    current.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(current) = texts.last_mut() {
                    current.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let (Some(name), Some(text)) = (path.pop(), texts.pop()) {
                    visit(XmlNode::End {
                        parents: &path,
                        name: &name,
                        text,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SqsError::SerializationError(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

fn parent_is(parents: &[String], expected: &str) -> bool {
    parents.last().is_some_and(|p| p == expected)
}

/// Parse the `ResponseMetadata` block shared by every action
fn parse_response_metadata(xml: &str) -> Result<ResponseMetadata, SqsError> {
    let mut metadata = ResponseMetadata::default();
    walk_xml(xml, |node| {
        if let XmlNode::End { name: "RequestId", text, .. } = node {
            metadata.request_id = Some(text.trim().to_string());
        }
    })?;
    Ok(metadata)
}

fn parse_queue_url_response(xml: &str) -> Result<String, SqsError> {
    let mut queue_url = None;
    walk_xml(xml, |node| {
        if let XmlNode::End { name: "QueueUrl", text, .. } = node {
            queue_url = Some(text.trim().to_string());
        }
    })?;

    queue_url.ok_or_else(|| {
        SqsError::SerializationError("QueueUrl not found in response".to_string())
    })
}

/// Parse an error document into the matching [`SqsError`]
fn parse_error_response(xml: &str, status_code: u16) -> SqsError {
    let mut error_code = None;
    let mut error_message = None;

    let parsed = walk_xml(xml, |node| {
        if let XmlNode::End { parents, name, text } = node {
            if parent_is(parents, "Error") {
                match name {
                    "Code" => error_code = Some(text.trim().to_string()),
                    "Message" => error_message = Some(text.trim().to_string()),
                    _ => {}
                }
            }
        }
    });
    if let Err(e) = parsed {
        debug!(error = %e, "Error response body was not valid XML");
    }

    let code = error_code.unwrap_or_else(|| "Unknown".to_string());
    let message = error_message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            SqsError::QueueNotFound(message)
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "MissingAuthenticationToken"
        | "ExpiredToken" => SqsError::Authentication(format!("{}: {}", code, message)),
        "AccessDenied" | "AccessDeniedException" => {
            SqsError::AccessDenied(format!("{}: {}", code, message))
        }
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => SqsError::InvalidReceipt(message),
        "Throttling" | "ThrottlingException" | "RequestThrottled" => {
            SqsError::Throttled(format!("{}: {}", code, message))
        }
        _ if status_code == 401 => SqsError::Authentication(format!("{}: {}", code, message)),
        _ if status_code == 403 => SqsError::AccessDenied(format!("{}: {}", code, message)),
        _ => SqsError::ServiceError { code, message },
    }
}

fn batch_error_entry(
    error: &mut Option<BatchEntryError>,
    parents: &[String],
    name: &str,
    text: String,
) {
    if !parent_is(parents, "BatchResultErrorEntry") {
        return;
    }
    let entry = error.get_or_insert_with(|| BatchEntryError {
        id: String::new(),
        code: String::new(),
        message: None,
        sender_fault: false,
    });
    match name {
        "Id" => entry.id = text,
        "Code" => entry.code = text,
        "Message" => entry.message = Some(text),
        "SenderFault" => entry.sender_fault = text.trim().eq_ignore_ascii_case("true"),
        _ => {}
    }
}

fn parse_send_message_batch_response(xml: &str) -> Result<SendBatchResult, SqsError> {
    let mut result = SendBatchResult::default();
    let mut current: Option<(String, Option<String>, Option<String>)> = None;
    let mut error: Option<BatchEntryError> = None;

    walk_xml(xml, |node| match node {
        XmlNode::Start {
            name: "SendMessageBatchResultEntry",
        } => current = Some((String::new(), None, None)),
        XmlNode::Start {
            name: "BatchResultErrorEntry",
        } => error = None,
        XmlNode::Start { .. } => {}
        XmlNode::End {
            name: "SendMessageBatchResultEntry",
            ..
        } => {
            if let Some((id, Some(message_id), md5)) = current.take() {
                let message_id = MessageId::from_str(&message_id).unwrap_or_default();
                result.successful.push(SendResultEntry {
                    id,
                    message_id,
                    md5_of_body: md5,
                });
            }
        }
        XmlNode::End {
            name: "BatchResultErrorEntry",
            ..
        } => result.failed.extend(error.take()),
        XmlNode::End {
            parents,
            name,
            text,
        } => {
            if parent_is(parents, "SendMessageBatchResultEntry") {
                if let Some(entry) = current.as_mut() {
                    match name {
                        "Id" => entry.0 = text,
                        "MessageId" => entry.1 = Some(text),
                        "MD5OfMessageBody" => entry.2 = Some(text),
                        _ => {}
                    }
                }
            } else {
                batch_error_entry(&mut error, parents, name, text);
            }
        }
    })?;

    Ok(result)
}

fn parse_delete_message_batch_response(xml: &str) -> Result<DeleteBatchResult, SqsError> {
    let mut result = DeleteBatchResult::default();
    let mut error: Option<BatchEntryError> = None;

    walk_xml(xml, |node| match node {
        XmlNode::Start {
            name: "BatchResultErrorEntry",
        } => error = None,
        XmlNode::Start { .. } => {}
        XmlNode::End {
            name: "BatchResultErrorEntry",
            ..
        } => result.failed.extend(error.take()),
        XmlNode::End {
            parents,
            name,
            text,
        } => {
            if parent_is(parents, "DeleteMessageBatchResultEntry") && name == "Id" {
                result.successful.push(text);
            } else {
                batch_error_entry(&mut error, parents, name, text);
            }
        }
    })?;

    Ok(result)
}

#[derive(Default)]
struct MessageBuilder {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: Option<String>,
    attributes: HashMap<String, String>,
    message_attributes: HashMap<String, String>,
    pending_name: Option<String>,
    pending_value: Option<String>,
}

fn parse_receive_message_response(xml: &str) -> Result<Vec<ReceivedMessage>, SqsError> {
    let mut messages = Vec::new();
    let mut current: Option<MessageBuilder> = None;

    walk_xml(xml, |node| match node {
        XmlNode::Start { name: "Message" } => current = Some(MessageBuilder::default()),
        XmlNode::Start { .. } => {}
        XmlNode::End {
            name: "Message", ..
        } => {
            let Some(builder) = current.take() else {
                return;
            };
            match (builder.receipt_handle, builder.body) {
                (Some(receipt), Some(body)) => messages.push(ReceivedMessage {
                    message_id: builder
                        .message_id
                        .as_deref()
                        .and_then(|id| MessageId::from_str(id).ok())
                        .unwrap_or_default(),
                    receipt_handle: ReceiptHandle::new(receipt),
                    body,
                    attributes: builder.attributes,
                    message_attributes: builder.message_attributes,
                }),
                _ => debug!("Skipping message without receipt handle or body"),
            }
        }
        XmlNode::End {
            parents,
            name,
            text,
        } => {
            let Some(builder) = current.as_mut() else {
                return;
            };
            match name {
                "MessageId" if parent_is(parents, "Message") => builder.message_id = Some(text),
                "ReceiptHandle" if parent_is(parents, "Message") => {
                    builder.receipt_handle = Some(text)
                }
                "Body" if parent_is(parents, "Message") => builder.body = Some(text),
                "Name" => builder.pending_name = Some(text),
                "Value" if parent_is(parents, "Attribute") => {
                    builder.pending_value = Some(text);
                }
                "StringValue" | "BinaryValue" => builder.pending_value = Some(text),
                "Attribute" => {
                    if let (Some(n), Some(v)) =
                        (builder.pending_name.take(), builder.pending_value.take())
                    {
                        builder.attributes.insert(n, v);
                    }
                }
                "MessageAttribute" => {
                    if let (Some(n), Some(v)) =
                        (builder.pending_name.take(), builder.pending_value.take())
                    {
                        builder.message_attributes.insert(n, v);
                    }
                }
                _ => {}
            }
        }
    })?;

    Ok(messages)
}

fn parse_queue_attributes_response(xml: &str) -> Result<QueueAttributes, SqsError> {
    let mut attributes = QueueAttributes::new();
    let mut name: Option<String> = None;
    let mut value: Option<String> = None;

    walk_xml(xml, |node| {
        let XmlNode::End {
            parents,
            name: element,
            text,
        } = node
        else {
            return;
        };
        match element {
            "Name" if parent_is(parents, "Attribute") => name = Some(text),
            "Value" if parent_is(parents, "Attribute") => value = Some(text),
            "Attribute" => {
                if let (Some(n), Some(v)) = (name.take(), value.take()) {
                    match QueueAttributeName::from_str(&n) {
                        Ok(key) => attributes.insert(key, v),
                        Err(_) => debug!(attribute = %n, "Ignoring unrecognized queue attribute"),
                    }
                }
            }
            _ => {}
        }
    })?;

    Ok(attributes)
}
