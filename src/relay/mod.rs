//! Relay Engine
//!
//! Turns one upstream message into one envelope per connected sink:
//! extract the sensor category from the topic, remember the reading,
//! resolve each sink's channel and publish. A failing sink never affects
//! the others.

mod envelope;


use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use tracing::{debug, error, info};

pub use envelope::{unix_seconds, OutboundEnvelope, RELAY_VERSION};

use crate::sink::{SinkError, SinkManager, SinkRegistry};
use crate::transport::ConnectionState;

/// Sensor category named by the final segment of an upstream topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SensorCategory {
    Temperature,
    Humidity,
    Pressure,
    Wind,
    Rainfall,
    /// Any other final segment, kept verbatim
    Other(String),
}

impl SensorCategory {
    /// Categories the source subscribes to
    pub const KNOWN: [SensorCategory; 5] = [
        SensorCategory::Temperature,
        SensorCategory::Humidity,
        SensorCategory::Pressure,
        SensorCategory::Wind,
        SensorCategory::Rainfall,
    ];

    /// Category of a topic: its last `/`-separated segment. Never fails.
    pub fn from_topic(topic: &str) -> Self {
        let segment = topic.rsplit('/').next().unwrap_or(topic);
        Self::from_name(segment)
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "temperature" => SensorCategory::Temperature,
            "humidity" => SensorCategory::Humidity,
            "pressure" => SensorCategory::Pressure,
            "wind" => SensorCategory::Wind,
            "rainfall" => SensorCategory::Rainfall,
            other => SensorCategory::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SensorCategory::Temperature => "temperature",
            SensorCategory::Humidity => "humidity",
            SensorCategory::Pressure => "pressure",
            SensorCategory::Wind => "wind",
            SensorCategory::Rainfall => "rainfall",
            SensorCategory::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SensorCategory::Other(_))
    }
}

impl fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream message
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub category: SensorCategory,
    /// Payload text, not interpreted
    pub raw_value: String,
    pub received_at: SystemTime,
    pub source_topic: String,
}

/// Outcome of dispatching one message across all sinks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Envelopes handed to a connected sink
    pub delivered: usize,
    /// Sinks that were not connected
    pub skipped: usize,
    /// Sinks whose publish failed
    pub failed: usize,
}

/// Fans upstream readings out to every sink in the registry
pub struct RelayEngine {
    registry: Arc<SinkRegistry>,
    sinks: Arc<SinkManager>,
    /// Latest reading per category
    last_seen: DashMap<SensorCategory, SensorReading>,
}

impl RelayEngine {
    pub fn new(registry: Arc<SinkRegistry>, sinks: Arc<SinkManager>) -> Self {
        Self {
            registry,
            sinks,
            last_seen: DashMap::new(),
        }
    }

    /// Relay one upstream message to all connected sinks
    pub fn handle_message(&self, topic: &str, payload: &str) -> DispatchReport {
        let reading = SensorReading {
            category: SensorCategory::from_topic(topic),
            raw_value: payload.to_string(),
            received_at: SystemTime::now(),
            source_topic: topic.to_string(),
        };

        info!("Received from source - Topic: {}, Payload: {}", topic, payload);
        self.last_seen
            .insert(reading.category.clone(), reading.clone());

        self.dispatch(&reading)
    }

    /// Publish a reading to every sink in registry order
    pub fn dispatch(&self, reading: &SensorReading) -> DispatchReport {
        let mut report = DispatchReport::default();
        let category = reading.category.as_str();

        for descriptor in self.registry.descriptors() {
            let sink_id = descriptor.id.as_str();

            if self.sinks.state(sink_id) != Some(ConnectionState::Connected) {
                debug!("Sink '{}' not connected, skipping {}", sink_id, category);
                report.skipped += 1;
                continue;
            }

            let channel = self.registry.resolve_channel(sink_id, category);
            let full_topic = format!("{}{}", self.registry.base_topic(sink_id), channel);
            let envelope = OutboundEnvelope::new(reading, channel);

            match self.sinks.publish(sink_id, &full_topic, &envelope) {
                Ok(()) => {
                    info!(
                        "Forwarded to {} - Topic: {}, Value: {}",
                        sink_id, full_topic, envelope.value
                    );
                    report.delivered += 1;
                }
                Err(SinkError::NotConnected(_)) => {
                    report.skipped += 1;
                }
                Err(e) => {
                    error!("Error forwarding to {}: {}", sink_id, e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Latest reading for a category
    pub fn last_seen(&self, category: &SensorCategory) -> Option<SensorReading> {
        self.last_seen.get(category).map(|entry| entry.value().clone())
    }

    /// Snapshot of the latest reading per category
    pub fn readings(&self) -> Vec<SensorReading> {
        self.last_seen
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn registry(&self) -> &SinkRegistry {
        &self.registry
    }

    pub fn sinks(&self) -> &SinkManager {
        &self.sinks
    }
}
