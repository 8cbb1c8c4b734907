//! Sink Configuration
//!
//! One entry per downstream broker: where to connect, how to authenticate
//! and how sensor categories map onto its topic tree.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use super::source::{
    credentials, default_connect_timeout, default_max_reconnect_interval,
    default_reconnect_interval,
};
use crate::transport::ProtocolVersion;

/// Downstream broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Unique sink identifier, used in logs and as the registry key
    pub id: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Empty or missing means anonymous
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Client ID (defaults to `meteo-relay-<id>`)
    #[serde(default)]
    pub client_id: Option<String>,

    /// Keepalive in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,

    /// MQTT protocol version spoken to this sink
    #[serde(default = "default_protocol")]
    pub protocol: ProtocolVersion,

    /// Publish QoS (0 or 1)
    #[serde(default)]
    pub qos: u8,

    /// Prefix prepended verbatim to the channel name
    #[serde(default = "default_base_topic")]
    pub base_topic: String,

    /// Category name -> channel name
    #[serde(default)]
    pub channels: HashMap<String, String>,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default = "default_reconnect_interval", with = "humantime_serde")]
    pub reconnect_interval: Duration,

    #[serde(default = "default_max_reconnect_interval", with = "humantime_serde")]
    pub max_reconnect_interval: Duration,

    /// Outbound messages buffered while the socket is busy; the oldest is
    /// dropped when full
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Base topic for sinks that do not configure one
pub const DEFAULT_BASE_TOPIC: &str = "meteo/default/";

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u16 {
    60
}

fn default_protocol() -> ProtocolVersion {
    ProtocolVersion::V5
}

fn default_base_topic() -> String {
    DEFAULT_BASE_TOPIC.to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_enabled() -> bool {
    true
}

impl SinkConfig {
    /// Sink with default settings and no channel map
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            username: None,
            password: None,
            client_id: None,
            keepalive: default_keepalive(),
            protocol: default_protocol(),
            qos: 0,
            base_topic: default_base_topic(),
            channels: HashMap::new(),
            connect_timeout: default_connect_timeout(),
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_interval: default_max_reconnect_interval(),
            queue_capacity: default_queue_capacity(),
            enabled: default_enabled(),
        }
    }

    pub fn client_id(&self) -> String {
        match self.client_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => format!("meteo-relay-{}", self.id),
        }
    }

    /// Username/password pair, or `None` when no username is configured
    pub fn credentials(&self) -> Option<(&str, Option<&str>)> {
        credentials(self.username.as_deref(), self.password.as_deref())
    }
}
