//! Sink Manager
//!
//! Owns one [`Sink`] per enabled descriptor and routes publishes by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info};

use super::{Sink, SinkClient, SinkError};
use crate::config::SinkConfig;
use crate::relay::OutboundEnvelope;
use crate::transport::{ConnectionState, ConnectionStatus};

/// Manages all downstream sink connections
pub struct SinkManager {
    /// Sinks in configuration order
    sinks: Vec<Arc<dyn Sink>>,
    /// Sink id -> index into `sinks`
    index: HashMap<String, usize>,
    /// Set by the first `disconnect_all`
    released: AtomicBool,
}

impl SinkManager {
    /// Start a connection for every enabled descriptor
    ///
    /// A descriptor that cannot produce a client is logged and left out;
    /// the remaining sinks still connect.
    pub fn connect_all<'a>(descriptors: impl IntoIterator<Item = &'a SinkConfig>) -> Self {
        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
        for descriptor in descriptors {
            if !descriptor.enabled {
                info!("Sink '{}': disabled, not connecting", descriptor.id);
                continue;
            }
            match SinkClient::connect(descriptor) {
                Ok(client) => sinks.push(Arc::new(client)),
                Err(e) => error!("Sink '{}': failed to start: {}", descriptor.id, e),
            }
        }
        Self::with_sinks(sinks)
    }

    /// Manage an existing set of sinks. On duplicate ids the first wins.
    pub fn with_sinks(sinks: Vec<Arc<dyn Sink>>) -> Self {
        let mut kept: Vec<Arc<dyn Sink>> = Vec::with_capacity(sinks.len());
        let mut index = HashMap::with_capacity(sinks.len());
        for sink in sinks {
            if index.contains_key(sink.id()) {
                error!("Sink '{}': duplicate id ignored", sink.id());
                continue;
            }
            index.insert(sink.id().to_string(), kept.len());
            kept.push(sink);
        }

        Self {
            sinks: kept,
            index,
            released: AtomicBool::new(false),
        }
    }

    pub fn get(&self, sink_id: &str) -> Option<&Arc<dyn Sink>> {
        self.index.get(sink_id).map(|&i| &self.sinks[i])
    }

    /// Connection state of a sink, `None` if it is not managed
    pub fn state(&self, sink_id: &str) -> Option<ConnectionState> {
        self.get(sink_id).map(|sink| sink.state())
    }

    /// Snapshot of every sink's status, in configuration order
    pub fn status(&self) -> Vec<(String, ConnectionStatus)> {
        self.sinks
            .iter()
            .map(|sink| (sink.id().to_string(), sink.status()))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.sinks
            .iter()
            .filter(|sink| sink.state() == ConnectionState::Connected)
            .count()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Serialize an envelope and hand it to a connected sink
    ///
    /// Nothing is sent unless the sink is connected.
    pub fn publish(
        &self,
        sink_id: &str,
        topic: &str,
        envelope: &OutboundEnvelope,
    ) -> Result<(), SinkError> {
        let sink = self
            .get(sink_id)
            .ok_or_else(|| SinkError::UnknownSink(sink_id.to_string()))?;

        if sink.state() != ConnectionState::Connected {
            debug!("Sink '{}' not connected, dropping message for {}", sink_id, topic);
            return Err(SinkError::NotConnected(sink_id.to_string()));
        }

        let payload = Bytes::from(envelope.to_json()?);
        sink.publish(topic, payload)
    }

    /// Stop every sink. Only the first call does anything.
    pub async fn disconnect_all(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!("Sinks already disconnected");
            return;
        }

        for sink in &self.sinks {
            sink.stop().await;
        }
        info!("Disconnected {} sinks", self.sinks.len());
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}
