//! Client Options

use std::time::Duration;

use super::{ProtocolVersion, QoS, TransportError};

/// Connection parameters for one broker
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Label used in logs ("source", or the sink id)
    pub name: String,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keepalive in seconds; 0 disables PINGREQ
    pub keep_alive: u16,
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    /// QoS used for outbound publishes and for subscriptions
    pub qos: QoS,
    pub connect_timeout: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
    /// Topic filters subscribed after every successful CONNACK
    pub subscriptions: Vec<String>,
    /// Outbound queue capacity; the oldest message is dropped when full
    pub queue_capacity: usize,
}

impl ClientOptions {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        Self {
            client_id: format!("meteo-relay-{}", name),
            name,
            host: host.into(),
            port,
            username: None,
            password: None,
            keep_alive: 60,
            protocol_version: ProtocolVersion::V5,
            clean_start: true,
            qos: QoS::AtMostOnce,
            connect_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(60),
            subscriptions: Vec::new(),
            queue_capacity: 256,
        }
    }

    /// `host:port` as dialed
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn validate(&self) -> Result<(), TransportError> {
        let invalid = |msg: &str| -> Result<(), TransportError> {
            Err(TransportError::InvalidConfig(format!(
                "'{}': {}",
                self.name, msg
            )))
        };

        if self.host.is_empty() {
            return invalid("host is empty");
        }
        if self.port == 0 {
            return invalid("port must be non-zero");
        }
        if self.client_id.is_empty() || self.client_id.starts_with(char::is_whitespace) {
            return invalid("client id must be non-empty and not start with whitespace");
        }
        if self.queue_capacity == 0 {
            return invalid("queue capacity must be non-zero");
        }
        if self.connect_timeout.is_zero() {
            return invalid("connect timeout must be non-zero");
        }
        if self.reconnect_interval.is_zero() {
            return invalid("reconnect interval must be non-zero");
        }
        if self.reconnect_interval > self.max_reconnect_interval {
            return invalid("reconnect interval exceeds max reconnect interval");
        }
        Ok(())
    }

    /// Delay after `current` for the next attempt: doubled, capped at the max
    pub(crate) fn next_retry_interval(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(self.max_reconnect_interval)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;

    fn options() -> ClientOptions {
        ClientOptions::new("client_1", "broker.local", 1883)
    }

    #[test]
    fn test_defaults() {
        let options = options();
        assert_eq!(options.client_id, "meteo-relay-client_1");
        assert_eq!(options.address(), "broker.local:1883");
        assert_eq!(options.protocol_version, ProtocolVersion::V5);
        assert_eq!(options.qos, QoS::AtMostOnce);
        assert!(options.validate().is_ok());
    }

    #[test_case(|o: &mut ClientOptions| o.host.clear() ; "empty host")]
    #[test_case(|o: &mut ClientOptions| o.port = 0 ; "port zero")]
    #[test_case(|o: &mut ClientOptions| o.client_id.clear() ; "empty client id")]
    #[test_case(|o: &mut ClientOptions| o.client_id = " x".to_string() ; "client id leading space")]
    #[test_case(|o: &mut ClientOptions| o.queue_capacity = 0 ; "zero capacity")]
    #[test_case(|o: &mut ClientOptions| o.connect_timeout = Duration::ZERO ; "zero connect timeout")]
    #[test_case(|o: &mut ClientOptions| o.reconnect_interval = Duration::ZERO ; "zero reconnect")]
    #[test_case(|o: &mut ClientOptions| o.reconnect_interval = Duration::from_secs(120) ; "reconnect above max")]
    fn test_validate_rejects(change: fn(&mut ClientOptions)) {
        let mut options = options();
        change(&mut options);
        assert!(matches!(
            options.validate(),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_retry_interval_doubles_up_to_max() {
        let mut options = options();
        options.max_reconnect_interval = Duration::from_secs(5);

        let mut delays = Vec::new();
        let mut current = Duration::from_secs(1);
        for _ in 0..5 {
            delays.push(current.as_secs());
            current = options.next_retry_interval(current);
        }
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_retry_interval_saturates() {
        let mut options = options();
        options.max_reconnect_interval = Duration::MAX;

        assert_eq!(options.next_retry_interval(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(QoS::from_u8(0), Some(QoS::AtMostOnce));
        assert_eq!(QoS::from_u8(1), Some(QoS::AtLeastOnce));
        assert_eq!(QoS::from_u8(2), None);
    }
}
