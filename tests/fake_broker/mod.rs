//! Fake Broker
//!
//! In-process MQTT broker for driving the relay's real clients. Speaks just
//! enough of v3.1.1 and v5 on the broker side: CONNACK, SUBACK, PUBLISH,
//! PUBACK handling and PINGRESP. Serves one connection at a time and
//! reports what it sees as [`Event`]s.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use meteo_relay::transport::{ProtocolVersion, QoS};

pub const WAIT: Duration = Duration::from_secs(5);

/// What the broker observed
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected {
        client_id: String,
        version: ProtocolVersion,
        username: Option<String>,
        password: Option<String>,
    },
    Subscribed(String),
    Published {
        topic: String,
        qos: QoS,
        payload: Bytes,
    },
    /// PUBACK from the client
    Acked(u16),
    Disconnected,
    Closed,
}

enum Command {
    Publish {
        topic: String,
        qos: QoS,
        packet_id: u16,
        payload: Bytes,
    },
    Close,
}

/// Broker behaviour switches
#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    /// Filters answered with a SUBACK failure code
    pub rejected: Vec<String>,
    /// Swallow PINGREQ instead of answering
    pub silent: bool,
}

pub struct FakeBroker {
    addr: SocketAddr,
    events: mpsc::UnboundedReceiver<Event>,
    commands: mpsc::UnboundedSender<Command>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        Self::with_behaviour(Behaviour::default()).await
    }

    pub async fn with_behaviour(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(serve(listener, event_tx, command_rx, behaviour));

        Self {
            addr,
            events,
            commands,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn next_event(&mut self) -> Event {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for broker event")
            .expect("broker stopped")
    }

    /// Skip events until one matches
    pub async fn wait_for(&mut self, mut matches: impl FnMut(&Event) -> bool) -> Event {
        loop {
            let event = self.next_event().await;
            if matches(&event) {
                return event;
            }
        }
    }

    /// QoS 0 PUBLISH to the connected client
    pub fn publish(&self, topic: &str, payload: &'static [u8]) {
        self.publish_with(topic, QoS::AtMostOnce, 0, payload);
    }

    pub fn publish_with(&self, topic: &str, qos: QoS, packet_id: u16, payload: &'static [u8]) {
        self.commands
            .send(Command::Publish {
                topic: topic.to_string(),
                qos,
                packet_id,
                payload: Bytes::from_static(payload),
            })
            .unwrap();
    }

    /// Drop the current connection without a DISCONNECT
    pub fn close(&self) {
        self.commands.send(Command::Close).unwrap();
    }
}

async fn serve(
    listener: TcpListener,
    events: mpsc::UnboundedSender<Event>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    behaviour: Behaviour,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = BytesMut::new();
        let mut out = BytesMut::new();
        let mut version = ProtocolVersion::V311;

        'conn: loop {
            tokio::select! {
                read = reader.read_buf(&mut buf) => {
                    if !matches!(read, Ok(n) if n > 0) {
                        let _ = events.send(Event::Closed);
                        break 'conn;
                    }
                    while let Some((header, body)) = next_frame(&mut buf) {
                        let mut body = Body::new(body);
                        match header >> 4 {
                            1 => {
                                let connected = body.connect();
                                if let Event::Connected { version: v, .. } = &connected {
                                    version = *v;
                                }
                                let connack: &[u8] = match version {
                                    ProtocolVersion::V311 => &[0x20, 2, 0, 0],
                                    ProtocolVersion::V5 => &[0x20, 3, 0, 0, 0],
                                };
                                out.put_slice(connack);
                                let _ = events.send(connected);
                            }
                            8 => {
                                let packet_id = body.u16();
                                if version == ProtocolVersion::V5 {
                                    body.skip_properties();
                                }
                                let mut codes = Vec::new();
                                while body.has_remaining() {
                                    let filter = body.string();
                                    let granted = body.u8() & 0x03;
                                    codes.push(if behaviour.rejected.contains(&filter) {
                                        0x80
                                    } else {
                                        granted
                                    });
                                    let _ = events.send(Event::Subscribed(filter));
                                }
                                write_suback(&mut out, version, packet_id, &codes);
                            }
                            3 => {
                                let qos = match (header >> 1) & 0x03 {
                                    0 => QoS::AtMostOnce,
                                    _ => QoS::AtLeastOnce,
                                };
                                let topic = body.string();
                                if qos == QoS::AtLeastOnce {
                                    let packet_id = body.u16();
                                    out.put_slice(&[0x40, 2]);
                                    out.put_u16(packet_id);
                                }
                                if version == ProtocolVersion::V5 {
                                    body.skip_properties();
                                }
                                let _ = events.send(Event::Published {
                                    topic,
                                    qos,
                                    payload: body.rest(),
                                });
                            }
                            4 => {
                                let _ = events.send(Event::Acked(body.u16()));
                            }
                            12 => {
                                if !behaviour.silent {
                                    out.put_slice(&[0xD0, 0]);
                                }
                            }
                            14 => {
                                let _ = events.send(Event::Disconnected);
                                break 'conn;
                            }
                            _ => {}
                        }
                    }
                    if !out.is_empty() {
                        if writer.write_all(&out).await.is_err() {
                            break 'conn;
                        }
                        out.clear();
                    }
                }
                Some(command) = commands.recv() => {
                    match command {
                        Command::Publish { topic, qos, packet_id, payload } => {
                            write_publish(&mut out, version, &topic, qos, packet_id, &payload);
                            if writer.write_all(&out).await.is_err() {
                                break 'conn;
                            }
                            out.clear();
                        }
                        Command::Close => break 'conn,
                    }
                }
            }
        }
    }
}

/// Split one complete frame off the buffer: `(first header byte, body)`
fn next_frame(buf: &mut BytesMut) -> Option<(u8, Bytes)> {
    let mut length = 0usize;
    let mut shift = 0;
    let mut header_len = 1;
    loop {
        let byte = *buf.get(header_len)?;
        length |= usize::from(byte & 0x7f) << shift;
        header_len += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    if buf.len() < header_len + length {
        return None;
    }
    let header = buf[0];
    buf.advance(header_len);
    Some((header, buf.split_to(length).freeze()))
}

fn put_length(out: &mut BytesMut, mut length: usize) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if length == 0 {
            break;
        }
    }
}

fn write_suback(out: &mut BytesMut, version: ProtocolVersion, packet_id: u16, codes: &[u8]) {
    let properties = usize::from(version == ProtocolVersion::V5);
    out.put_u8(0x90);
    put_length(out, 2 + properties + codes.len());
    out.put_u16(packet_id);
    if properties == 1 {
        out.put_u8(0);
    }
    out.put_slice(codes);
}

fn write_publish(
    out: &mut BytesMut,
    version: ProtocolVersion,
    topic: &str,
    qos: QoS,
    packet_id: u16,
    payload: &[u8],
) {
    let packet_id_len = if qos == QoS::AtLeastOnce { 2 } else { 0 };
    let properties = usize::from(version == ProtocolVersion::V5);
    out.put_u8(match qos {
        QoS::AtMostOnce => 0x30,
        QoS::AtLeastOnce => 0x32,
    });
    put_length(out, 2 + topic.len() + packet_id_len + properties + payload.len());
    out.put_u16(topic.len() as u16);
    out.put_slice(topic.as_bytes());
    if qos == QoS::AtLeastOnce {
        out.put_u16(packet_id);
    }
    if properties == 1 {
        out.put_u8(0);
    }
    out.put_slice(payload);
}

/// Cursor over a frame body
struct Body(Bytes);

impl Body {
    fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    fn has_remaining(&self) -> bool {
        self.0.has_remaining()
    }

    fn u8(&mut self) -> u8 {
        self.0.get_u8()
    }

    fn u16(&mut self) -> u16 {
        self.0.get_u16()
    }

    fn binary(&mut self) -> Bytes {
        let len = usize::from(self.u16());
        self.0.split_to(len)
    }

    fn string(&mut self) -> String {
        String::from_utf8(self.binary().to_vec()).unwrap()
    }

    fn varint(&mut self) -> usize {
        let mut value = 0usize;
        let mut shift = 0;
        loop {
            let byte = self.u8();
            value |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return value;
            }
            shift += 7;
        }
    }

    fn skip_properties(&mut self) {
        let len = self.varint();
        self.0.advance(len);
    }

    fn rest(&mut self) -> Bytes {
        self.0.split_off(0)
    }

    /// CONNECT body into a `Connected` event
    fn connect(&mut self) -> Event {
        let _protocol_name = self.string();
        let version = match self.u8() {
            5 => ProtocolVersion::V5,
            _ => ProtocolVersion::V311,
        };
        let flags = self.u8();
        let _keep_alive = self.u16();
        if version == ProtocolVersion::V5 {
            self.skip_properties();
        }
        let client_id = self.string();
        if flags & 0x04 != 0 {
            if version == ProtocolVersion::V5 {
                self.skip_properties();
            }
            let _will_topic = self.string();
            let _will_payload = self.binary();
        }
        let username = (flags & 0x80 != 0).then(|| self.string());
        let password = (flags & 0x40 != 0)
            .then(|| String::from_utf8_lossy(&self.binary()).into_owned());

        Event::Connected {
            client_id,
            version,
            username,
            password,
        }
    }
}
