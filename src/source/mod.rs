//! Source Connection
//!
//! The single upstream broker. Subscribes to one topic per sensor category
//! and hands every text payload to one consumer, in receipt order, on the
//! connection task.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::relay::SensorCategory;
use crate::transport::{
    ClientOptions, ConnectionState, ConnectionStatus, InboundCallback, MqttClient, QoS,
    TransportError,
};

/// Consumer of upstream messages: `(topic, payload)`
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Manages the upstream connection
pub struct SourceManager {
    config: SourceConfig,
    consumer: Option<MessageCallback>,
    client: Option<MqttClient>,
}

impl SourceManager {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            consumer: None,
            client: None,
        }
    }

    /// Register the consumer. Replaces any earlier one; takes effect on the
    /// next `connect`.
    pub fn on_message<F>(&mut self, callback: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.consumer = Some(Arc::new(callback));
    }

    /// Topics subscribed after every successful connect
    pub fn topics(&self) -> Vec<String> {
        SensorCategory::KNOWN
            .iter()
            .map(|category| self.config.topic_for(category.as_str()))
            .collect()
    }

    /// Validate the configuration and start the upstream connection
    ///
    /// Fails when the configuration cannot produce a client or no consumer
    /// has been registered. Connection failures after that are retried in
    /// the background.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.client.is_some() {
            return Err(TransportError::InvalidConfig(
                "source already connected".to_string(),
            ));
        }
        let consumer = self.consumer.clone().ok_or_else(|| {
            TransportError::InvalidConfig("no message consumer registered".to_string())
        })?;

        let options = self.client_options()?;
        let client = MqttClient::spawn(options, Some(decode_utf8(consumer)))?;

        info!(
            "Source: connecting to {}:{}, topics: {}",
            self.config.host,
            self.config.port,
            self.topics().join(", ")
        );
        self.client = Some(client);
        Ok(())
    }

    fn client_options(&self) -> Result<ClientOptions, TransportError> {
        let qos = QoS::from_u8(self.config.qos).ok_or_else(|| {
            TransportError::InvalidConfig(format!(
                "source qos {} is not supported",
                self.config.qos
            ))
        })?;

        let mut options = ClientOptions::new("source", &self.config.host, self.config.port);
        options.client_id = self.config.client_id();
        if let Some((username, password)) = self.config.credentials() {
            options.username = Some(username.to_string());
            options.password = password.map(str::to_string);
        }
        options.keep_alive = self.config.keepalive;
        options.protocol_version = self.config.protocol;
        options.qos = qos;
        options.connect_timeout = self.config.connect_timeout;
        options.reconnect_interval = self.config.reconnect_interval;
        options.max_reconnect_interval = self.config.max_reconnect_interval;
        options.subscriptions = self.topics();
        Ok(options)
    }

    pub fn state(&self) -> ConnectionState {
        self.client
            .as_ref()
            .map(|client| client.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.client
            .as_ref()
            .map(|client| client.status())
            .unwrap_or_default()
    }

    /// Stop the upstream connection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        if let Some(client) = &self.client {
            if client.is_stopped() {
                return;
            }
            client.stop().await;
            info!("Source: disconnected");
        }
    }
}

/// Pass UTF-8 payloads to the consumer; log and drop anything else
fn decode_utf8(consumer: MessageCallback) -> InboundCallback {
    Arc::new(move |topic: &str, payload: Bytes| match std::str::from_utf8(&payload) {
        Ok(text) => consumer(topic, text),
        Err(e) => warn!(
            "Source: dropping non-UTF-8 payload on {} ({} bytes): {}",
            topic,
            payload.len(),
            e
        ),
    })
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_topics_follow_prefix() {
        let mut config = SourceConfig::default();
        config.topic_prefix = "station".to_string();
        let source = SourceManager::new(config);

        assert_eq!(
            source.topics(),
            vec![
                "station/temperature",
                "station/humidity",
                "station/pressure",
                "station/wind",
                "station/rainfall",
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_requires_consumer() {
        let mut source = SourceManager::new(SourceConfig::default());
        assert!(matches!(
            source.connect(),
            Err(TransportError::InvalidConfig(_))
        ));
        assert_eq!(source.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_host() {
        let mut config = SourceConfig::default();
        config.host = String::new();
        let mut source = SourceManager::new(config);
        source.on_message(|_, _| {});

        assert!(matches!(
            source.connect(),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_port_zero() {
        let mut config = SourceConfig::default();
        config.port = 0;
        let mut source = SourceManager::new(config);
        source.on_message(|_, _| {});

        assert!(matches!(
            source.connect(),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let source = SourceManager::new(SourceConfig::default());
        source.disconnect().await;
        source.disconnect().await;
        assert_eq!(source.status(), ConnectionStatus::default());
    }

    #[test]
    fn test_decode_utf8_passes_text() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let callback = decode_utf8(Arc::new(move |topic: &str, payload: &str| {
            sink.lock().push((topic.to_string(), payload.to_string()));
        }));

        callback("meteo/temperature", Bytes::from_static(b"21.5"));
        callback("meteo/humidity", Bytes::from_static(&[0xff, 0xfe, 0x00]));
        callback("meteo/wind", Bytes::from_static("3.2 m/s".as_bytes()));

        assert_eq!(
            *received.lock(),
            vec![
                ("meteo/temperature".to_string(), "21.5".to_string()),
                ("meteo/wind".to_string(), "3.2 m/s".to_string()),
            ]
        );
    }
}
