//! Outbound Envelope
//!
//! The JSON document published to every sink.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::SensorReading;

/// Version tag carried in every envelope
pub const RELAY_VERSION: &str = "1.0";

/// Payload published to a sink, built once per (reading, sink) pair
///
/// Serialized as
/// `{"value", "sensor_type", "custom_channel", "timestamp", "bridge_version"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEnvelope {
    /// Upstream payload, verbatim
    pub value: String,
    /// Category name as it appeared in the upstream topic
    pub sensor_type: String,
    /// Channel the category resolved to on this sink
    pub custom_channel: String,
    /// Seconds since the Unix epoch, fractional
    pub timestamp: f64,
    pub bridge_version: String,
}

impl OutboundEnvelope {
    pub fn new(reading: &SensorReading, channel: &str) -> Self {
        Self {
            value: reading.raw_value.clone(),
            sensor_type: reading.category.as_str().to_string(),
            custom_channel: channel.to_string(),
            timestamp: unix_seconds(reading.received_at),
            bridge_version: RELAY_VERSION.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Fractional seconds since the Unix epoch; 0.0 for clocks set before it
pub fn unix_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
