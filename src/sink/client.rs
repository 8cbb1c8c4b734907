//! Sink Client
//!
//! A [`Sink`] backed by a broker connection.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use super::{Sink, SinkError};
use crate::config::SinkConfig;
use crate::transport::{
    ClientOptions, ConnectionState, ConnectionStatus, MqttClient, QoS, TransportError,
};

/// Connection to one downstream broker
pub struct SinkClient {
    id: String,
    client: MqttClient,
}

impl SinkClient {
    /// Start connecting to the sink's broker
    ///
    /// Returns once the connection task is running; the handshake completes
    /// in the background.
    pub fn connect(descriptor: &SinkConfig) -> Result<Self, SinkError> {
        let client = MqttClient::spawn(client_options(descriptor)?, None)?;
        info!(
            "Sink '{}': connecting to {}:{}",
            descriptor.id, descriptor.host, descriptor.port
        );
        Ok(Self {
            id: descriptor.id.clone(),
            client,
        })
    }

    /// Messages discarded because the outbound queue overflowed
    pub fn dropped_count(&self) -> u64 {
        self.client.dropped_count()
    }
}

/// Transport options for a sink descriptor
pub(crate) fn client_options(descriptor: &SinkConfig) -> Result<ClientOptions, SinkError> {
    let qos = QoS::from_u8(descriptor.qos).ok_or_else(|| {
        TransportError::InvalidConfig(format!(
            "'{}': qos {} is not supported",
            descriptor.id, descriptor.qos
        ))
    })?;

    let mut options = ClientOptions::new(&descriptor.id, &descriptor.host, descriptor.port);
    options.client_id = descriptor.client_id();
    if let Some((username, password)) = descriptor.credentials() {
        options.username = Some(username.to_string());
        options.password = password.map(str::to_string);
    }
    options.keep_alive = descriptor.keepalive;
    options.protocol_version = descriptor.protocol;
    options.qos = qos;
    options.connect_timeout = descriptor.connect_timeout;
    options.reconnect_interval = descriptor.reconnect_interval;
    options.max_reconnect_interval = descriptor.max_reconnect_interval;
    options.queue_capacity = descriptor.queue_capacity;
    Ok(options)
}

#[async_trait]
impl Sink for SinkClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        self.client.state()
    }

    fn status(&self) -> ConnectionStatus {
        self.client.status()
    }

    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SinkError> {
        match self.client.publish(topic, payload) {
            Ok(()) => Ok(()),
            Err(TransportError::NotConnected) | Err(TransportError::Closed) => {
                Err(SinkError::NotConnected(self.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self) {
        if self.client.is_stopped() {
            return;
        }
        self.client.stop().await;
        info!("Sink '{}': disconnected", self.id);
    }
}
