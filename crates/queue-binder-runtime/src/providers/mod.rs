//! Queue transport implementations.

pub mod memory;
pub mod sqs;

pub use memory::InMemoryTransport;
pub use sqs::{SqsConfig, SqsError, SqsTransport};
