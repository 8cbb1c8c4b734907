//! Downstream Sinks
//!
//! The relay publishes to sinks through the [`Sink`] trait so the
//! [`SinkManager`] can hold real broker clients and tests can substitute
//! in-memory ones.

mod client;
mod manager;
mod registry;


use async_trait::async_trait;
use bytes::Bytes;

pub use client::SinkClient;
pub use manager::SinkManager;
pub use registry::SinkRegistry;

use crate::transport::{ConnectionState, ConnectionStatus, TransportError};

/// Error type for sink operations
#[derive(Debug, Clone, PartialEq)]
pub enum SinkError {
    /// No sink with this id
    UnknownSink(String),
    /// Sink exists but is not connected; the message was dropped
    NotConnected(String),
    /// Envelope could not be serialized
    Serialize(String),
    /// Underlying client failed
    Transport(TransportError),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::UnknownSink(id) => write!(f, "Unknown sink '{}'", id),
            SinkError::NotConnected(id) => write!(f, "Sink '{}' is not connected", id),
            SinkError::Serialize(msg) => write!(f, "Serialization error: {}", msg),
            SinkError::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<TransportError> for SinkError {
    fn from(e: TransportError) -> Self {
        SinkError::Transport(e)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::Serialize(e.to_string())
    }
}

/// A downstream destination
#[async_trait]
pub trait Sink: Send + Sync {
    /// Unique sink identifier
    fn id(&self) -> &str;

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// State plus the most recent failure
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state(),
            last_error: None,
        }
    }

    /// Hand a serialized envelope to the sink without waiting on the network
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SinkError>;

    /// Release the connection; repeated calls are no-ops
    async fn stop(&self);
}
