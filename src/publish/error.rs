//! Error types for batch delivery.

use thiserror::Error;

/// Errors from connecting to the broker or delivering a batch.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to connect to broker: {reason}")]
    Connect { reason: String },

    #[error("Timed out connecting to broker")]
    ConnectTimeout,

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Failed to encode payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to send payload: {reason}")]
    Send { reason: String },

    #[error("Timed out sending payload")]
    Timeout,
}
