//! Source Configuration
//!
//! The single upstream broker the relay subscribes to.

use std::time::Duration;

use serde::Deserialize;

use crate::transport::ProtocolVersion;

/// Upstream broker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Keepalive in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,

    /// Client ID (defaults to `meteo-relay-source-<pid>`)
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// MQTT protocol version spoken to the source
    #[serde(default = "default_protocol")]
    pub protocol: ProtocolVersion,

    /// Subscription QoS (0 or 1)
    #[serde(default)]
    pub qos: u8,

    /// Prefix for the category topics: `<topic_prefix>/<category>`
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Initial reconnect delay
    #[serde(default = "default_reconnect_interval", with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Upper bound for the exponential reconnect delay
    #[serde(default = "default_max_reconnect_interval", with = "humantime_serde")]
    pub max_reconnect_interval: Duration,
}

fn default_host() -> String {
    "broker.hivemq.com".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u16 {
    60
}

fn default_protocol() -> ProtocolVersion {
    ProtocolVersion::V311
}

fn default_topic_prefix() -> String {
    "meteo".to_string()
}

pub(crate) fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

pub(crate) fn default_reconnect_interval() -> Duration {
    Duration::from_secs(1)
}

pub(crate) fn default_max_reconnect_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keepalive: default_keepalive(),
            client_id: None,
            username: None,
            password: None,
            protocol: default_protocol(),
            qos: 0,
            topic_prefix: default_topic_prefix(),
            connect_timeout: default_connect_timeout(),
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_interval: default_max_reconnect_interval(),
        }
    }
}

impl SourceConfig {
    pub fn client_id(&self) -> String {
        match self.client_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => format!("meteo-relay-source-{}", std::process::id()),
        }
    }

    /// Username/password pair, or `None` when no username is configured
    pub fn credentials(&self) -> Option<(&str, Option<&str>)> {
        credentials(self.username.as_deref(), self.password.as_deref())
    }

    /// Topic for one category: `<topic_prefix>/<category>`
    pub fn topic_for(&self, category: &str) -> String {
        let prefix = self.topic_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            category.to_string()
        } else {
            format!("{}/{}", prefix, category)
        }
    }
}

/// Empty usernames mean anonymous; empty passwords are not sent
pub(crate) fn credentials<'a>(
    username: Option<&'a str>,
    password: Option<&'a str>,
) -> Option<(&'a str, Option<&'a str>)> {
    let username = username.filter(|u| !u.is_empty())?;
    Some((username, password.filter(|p| !p.is_empty())))
}
