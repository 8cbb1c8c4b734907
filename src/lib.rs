//! meteo-relay - MQTT telemetry fan-out
//!
//! Subscribes to weather readings on one upstream MQTT broker and
//! republishes each reading, wrapped in a JSON envelope and renamed per
//! destination, to any number of downstream brokers.

pub mod config;
pub mod relay;
pub mod sink;
pub mod source;
pub mod transport;

pub use config::{Config, SinkConfig, SourceConfig};
pub use relay::{DispatchReport, OutboundEnvelope, RelayEngine, SensorCategory, SensorReading};
pub use sink::{Sink, SinkClient, SinkError, SinkManager, SinkRegistry};
pub use source::SourceManager;
pub use transport::{
    ClientOptions, ConnectionState, ConnectionStatus, MqttClient, ProtocolVersion, QoS,
    TransportError,
};
