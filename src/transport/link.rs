//! Broker Link
//!
//! Thin layer over the rumqttc v3.1.1 and v5 clients so the connection
//! task sees one event type regardless of protocol version.

use std::time::Duration;

use bytes::Bytes;
use rumqttc::v5;
use rumqttc::v5::mqttbytes::v5::{Packet as PacketV5, SubscribeReasonCode as SubscribeCodeV5};
use tracing::debug;

use super::{ClientOptions, ProtocolVersion, QoS, TransportError};

/// What the connection task needs to know about one event loop step
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// CONNACK accepted
    Connected { session_present: bool },
    /// SUBACK for a single-filter SUBSCRIBE
    Subscribed { accepted: bool },
    /// PUBLISH from the broker
    Message { topic: String, payload: Bytes },
    /// Anything else (outgoing packets, PINGRESP, PUBACK)
    Other,
}

/// Request side, shared by the connection and publisher tasks
#[derive(Clone)]
pub(crate) enum LinkClient {
    V311(rumqttc::AsyncClient),
    V5(v5::AsyncClient),
}

/// Event loop side, owned by the connection task
pub(crate) enum LinkEvents {
    V311(rumqttc::EventLoop),
    V5(v5::EventLoop),
}

/// Build both halves. Nothing touches the network until the first poll.
pub(crate) fn open(options: &ClientOptions) -> (LinkClient, LinkEvents) {
    let keep_alive = Duration::from_secs(u64::from(options.keep_alive));
    // Room for every queued publish plus the subscriptions and a DISCONNECT
    let capacity = options.queue_capacity + options.subscriptions.len() + 1;

    match options.protocol_version {
        ProtocolVersion::V311 => {
            let mut mqtt =
                rumqttc::MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
            mqtt.set_keep_alive(keep_alive);
            mqtt.set_clean_session(options.clean_start);
            if let Some(username) = &options.username {
                mqtt.set_credentials(username.clone(), options.password.clone().unwrap_or_default());
            }
            let (client, events) = rumqttc::AsyncClient::new(mqtt, capacity);
            (LinkClient::V311(client), LinkEvents::V311(events))
        }
        ProtocolVersion::V5 => {
            let mut mqtt =
                v5::MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
            mqtt.set_keep_alive(keep_alive);
            mqtt.set_clean_start(options.clean_start);
            if let Some(username) = &options.username {
                mqtt.set_credentials(username.clone(), options.password.clone().unwrap_or_default());
            }
            let (client, events) = v5::AsyncClient::new(mqtt, capacity);
            (LinkClient::V5(client), LinkEvents::V5(events))
        }
    }
}

impl LinkClient {
    pub(crate) fn try_subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        let result = match self {
            LinkClient::V311(client) => client
                .try_subscribe(filter, v311_qos(qos))
                .map_err(|e| e.to_string()),
            LinkClient::V5(client) => client
                .try_subscribe(filter, v5_qos(qos))
                .map_err(|e| e.to_string()),
        };
        result.map_err(TransportError::ConnectionLost)
    }

    /// Waits for room in the event loop's request channel
    pub(crate) async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let result = match self {
            LinkClient::V311(client) => client
                .publish(topic, v311_qos(qos), false, payload.to_vec())
                .await
                .map_err(|e| e.to_string()),
            LinkClient::V5(client) => client
                .publish(topic, v5_qos(qos), false, payload.to_vec())
                .await
                .map_err(|e| e.to_string()),
        };
        result.map_err(TransportError::ConnectionLost)
    }

    pub(crate) fn try_disconnect(&self) -> Result<(), TransportError> {
        let result = match self {
            LinkClient::V311(client) => client.try_disconnect().map_err(|e| e.to_string()),
            LinkClient::V5(client) => client.try_disconnect().map_err(|e| e.to_string()),
        };
        result.map_err(TransportError::ConnectionLost)
    }
}

impl LinkEvents {
    /// Drive the event loop one step. After an error the next call
    /// reconnects.
    pub(crate) async fn poll(&mut self) -> Result<LinkEvent, TransportError> {
        match self {
            LinkEvents::V311(events) => match events.poll().await {
                Ok(rumqttc::Event::Incoming(packet)) => Ok(v311_event(packet)),
                Ok(rumqttc::Event::Outgoing(_)) => Ok(LinkEvent::Other),
                Err(e) => Err(v311_error(e)),
            },
            LinkEvents::V5(events) => match events.poll().await {
                Ok(v5::Event::Incoming(packet)) => Ok(v5_event(packet)),
                Ok(v5::Event::Outgoing(_)) => Ok(LinkEvent::Other),
                Err(e) => Err(v5_error(e)),
            },
        }
    }
}

fn v311_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
    }
}

fn v5_qos(qos: QoS) -> v5::mqttbytes::QoS {
    match qos {
        QoS::AtMostOnce => v5::mqttbytes::QoS::AtMostOnce,
        QoS::AtLeastOnce => v5::mqttbytes::QoS::AtLeastOnce,
    }
}

fn v311_event(packet: rumqttc::Packet) -> LinkEvent {
    match packet {
        rumqttc::Packet::ConnAck(ack) => LinkEvent::Connected {
            session_present: ack.session_present,
        },
        rumqttc::Packet::SubAck(ack) => LinkEvent::Subscribed {
            accepted: ack
                .return_codes
                .iter()
                .all(|code| matches!(code, rumqttc::SubscribeReasonCode::Success(_))),
        },
        rumqttc::Packet::Publish(publish) => LinkEvent::Message {
            topic: publish.topic,
            payload: publish.payload,
        },
        _ => LinkEvent::Other,
    }
}

fn v5_event(packet: PacketV5) -> LinkEvent {
    match packet {
        PacketV5::ConnAck(ack) => LinkEvent::Connected {
            session_present: ack.session_present,
        },
        PacketV5::SubAck(ack) => LinkEvent::Subscribed {
            accepted: ack
                .return_codes
                .iter()
                .all(|code| matches!(code, SubscribeCodeV5::Success(_))),
        },
        PacketV5::Publish(publish) => match String::from_utf8(publish.topic.to_vec()) {
            Ok(topic) => LinkEvent::Message {
                topic,
                payload: publish.payload,
            },
            Err(_) => {
                debug!("ignoring PUBLISH with non-UTF-8 topic");
                LinkEvent::Other
            }
        },
        _ => LinkEvent::Other,
    }
}

fn v311_error(e: rumqttc::ConnectionError) -> TransportError {
    use rumqttc::{ConnectionError, StateError};

    match e {
        ConnectionError::ConnectionRefused(code) => TransportError::Rejected(format!("{:?}", code)),
        ConnectionError::NetworkTimeout
        | ConnectionError::MqttState(StateError::AwaitPingResp) => TransportError::Timeout,
        other => TransportError::ConnectionLost(other.to_string()),
    }
}

fn v5_error(e: v5::ConnectionError) -> TransportError {
    use v5::{ConnectionError, StateError};

    match e {
        ConnectionError::ConnectionRefused(code) => TransportError::Rejected(format!("{:?}", code)),
        ConnectionError::Timeout(_)
        | ConnectionError::MqttState(StateError::AwaitPingResp) => TransportError::Timeout,
        other => TransportError::ConnectionLost(other.to_string()),
    }
}
