//! Broker Connections
//!
//! One [`MqttClient`] per broker. Both the upstream source and every
//! downstream sink are driven by the same client: an MQTT event loop that
//! connects, subscribes, reconnects with exponential backoff, and a
//! publisher task that drains a bounded outbound queue.

mod client;
mod link;
mod options;
mod queue;

use std::fmt;

use serde::Deserialize;

pub use client::{InboundCallback, MqttClient};
pub use options::ClientOptions;

/// Error type for broker connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection to the broker failed or was lost
    ConnectionLost(String),
    /// Broker refused the CONNECT
    Rejected(String),
    /// Connect timed out or the broker stopped answering keepalives
    Timeout,
    /// Publish attempted while the connection is not established
    NotConnected,
    /// Client has been stopped
    Closed,
    /// Options cannot produce a working client
    InvalidConfig(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            TransportError::Rejected(code) => write!(f, "Connection rejected: {}", code),
            TransportError::Timeout => write!(f, "Broker did not respond in time"),
            TransportError::NotConnected => write!(f, "Not connected"),
            TransportError::Closed => write!(f, "Client stopped"),
            TransportError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// MQTT protocol version spoken to a broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum ProtocolVersion {
    /// MQTT v3.1.1 (protocol level 4)
    #[serde(rename = "3.1.1", alias = "v311", alias = "v3")]
    V311,
    /// MQTT v5.0 (protocol level 5)
    #[serde(rename = "5", alias = "v5", alias = "5.0")]
    V5,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V311 => write!(f, "MQTT 3.1.1"),
            ProtocolVersion::V5 => write!(f, "MQTT 5.0"),
        }
    }
}

/// Delivery levels the relay uses. QoS 2 is never requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

impl QoS {
    /// `None` for anything but 0 and 1
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            _ => None,
        }
    }
}

/// State of a broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected: never started, or stopped
    Disconnected,
    /// TCP connect or MQTT handshake in progress
    Connecting,
    /// CONNACK accepted, session operational
    Connected,
    /// Last attempt failed or the session dropped; a retry is scheduled
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Connection state together with the most recent failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Cleared by the next successful CONNACK
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
        }
    }
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
