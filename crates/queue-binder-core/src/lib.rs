//! # Queue Binder Core
//!
//! Binds application message handlers to configured queues and owns the
//! consumers and producers built for them.
//!
//! This library provides:
//! - Declarative queue configuration loaded from files and the environment
//! - Explicit handler registration through [`Bindings`]
//! - [`QueueRegistry`] wiring one consumer or producer per logical queue name
//! - Start and best-effort stop of every consumer
//! - Control-plane operations resolved by queue name
//!
//! ## Example
//!
//! ```rust,no_run
//! use queue_binder_core::{Bindings, QueueRegistry, RegistryConfig};
//! use queue_binder_runtime::{HandlerError, Message, ReceivedMessage};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RegistryConfig::load(Some(std::path::Path::new("queues.yaml")))?;
//!
//! let mut bindings = Bindings::new();
//! bindings.on_message("orders", |message: ReceivedMessage| async move {
//!     tracing::info!(id = %message.message_id, "order received");
//!     Ok::<(), HandlerError>(())
//! });
//!
//! let registry = QueueRegistry::from_config(&config, &bindings)?;
//! registry.start()?;
//!
//! registry
//!     .send("invoices", Message::new(serde_json::json!({ "order": 42 })))
//!     .await?;
//!
//! let report = registry.stop().await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Queue declarations and configuration loading
//! - [`bindings`] - Handler bindings and discovery
//! - [`registry`] - The registry, its lifecycle and control plane
//! - [`error`] - Registry error type

pub mod bindings;
pub mod config;
pub mod error;
pub mod registry;

pub use bindings::{Bindings, EventHandlerBinding, HandlerBinding, HandlerDiscovery};
pub use config::{ConsumerDeclaration, ProducerDeclaration, QueueDeclaration, RegistryConfig};
pub use error::RegistryError;
pub use registry::{
    ConsumerEntry, ProducerEntry, QueueInfo, QueueRegistry, SendPayload, StopReport,
};
