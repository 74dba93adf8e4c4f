//! Delivery of closed batches.
//!
//! The engine talks to a [`Publisher`]; the daemon uses [`MqttPublisher`],
//! `--dry-run` uses [`LogPublisher`].

mod error;
mod log;
mod mqtt;

use async_trait::async_trait;

use crate::aggregate::Batch;

pub use error::PublishError;
pub use log::LogPublisher;
pub use mqtt::MqttPublisher;

/// Sink for closed batches.
///
/// A publisher makes one delivery attempt per call and does not retry;
/// retry policy belongs to the engine.
#[async_trait]
pub trait Publisher: Send {
    /// Publisher name for logging.
    fn name(&self) -> &str;

    /// Serialize and deliver one batch.
    async fn publish(&mut self, batch: &Batch) -> Result<(), PublishError>;

    /// Release the connection. Called once, when the engine stops.
    async fn disconnect(&mut self) {}
}
