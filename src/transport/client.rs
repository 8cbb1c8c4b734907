//! MQTT Client
//!
//! A single broker connection driven by two background tasks. The
//! connection task owns the MQTT event loop; the publisher task drains the
//! outbound queue into it. Callers interact through the queue and a shared
//! status cell.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::link::{self, LinkClient, LinkEvent, LinkEvents};
use super::queue::{Outbound, OutboundQueue};
use super::{ClientOptions, ConnectionState, ConnectionStatus, TransportError};

/// Callback for messages received on subscribed topics
pub type InboundCallback = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// How long `stop` waits for a task to finish before aborting it
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the DISCONNECT may take to go out before the socket is dropped
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// State shared between the handle and its tasks
struct Shared {
    options: ClientOptions,
    status: RwLock<ConnectionStatus>,
    outbound: OutboundQueue,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.status.read().state
    }

    fn transition(&self, state: ConnectionState) {
        let mut status = self.status.write();
        if state == ConnectionState::Connected {
            status.last_error = None;
        }
        status.state = state;
    }

    fn fail(&self, err: &TransportError) {
        let mut status = self.status.write();
        status.state = ConnectionState::Error;
        status.last_error = Some(err.to_string());
    }
}

/// Handle to a broker connection
///
/// Dropping the handle without calling [`MqttClient::stop`] also ends the
/// background tasks.
pub struct MqttClient {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MqttClient {
    /// Validate the options and spawn the connection and publisher tasks
    ///
    /// Returns immediately; the connection is established in the background.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        options: ClientOptions,
        inbound: Option<InboundCallback>,
    ) -> Result<Self, TransportError> {
        options.validate()?;

        let (link, events) = link::open(&options);
        let shared = Arc::new(Shared {
            outbound: OutboundQueue::new(options.queue_capacity),
            options,
            status: RwLock::new(ConnectionStatus::default()),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection = tokio::spawn(connection_loop(
            shared.clone(),
            link.clone(),
            events,
            inbound,
            shutdown_rx.clone(),
        ));
        let publisher = tokio::spawn(publish_loop(shared.clone(), link, shutdown_rx));

        Ok(Self {
            shared,
            shutdown_tx,
            tasks: Mutex::new(vec![connection, publisher]),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.options.name
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.read().clone()
    }

    /// Messages discarded because the outbound queue was full
    pub fn dropped_count(&self) -> u64 {
        self.shared.outbound.dropped()
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Queue a message for the broker
    ///
    /// Accepted only while connected. When the queue is full the oldest
    /// queued message is discarded to make room.
    pub fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.is_stopped() {
            return Err(TransportError::Closed);
        }
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }

        let message = Outbound {
            topic: topic.to_string(),
            payload,
        };
        if let Some(displaced) = self.shared.outbound.push(message) {
            warn!(
                "'{}': outbound queue full, dropped oldest message for {} ({} dropped so far)",
                self.name(),
                displaced.topic,
                self.shared.outbound.dropped()
            );
        }
        Ok(())
    }

    /// Send DISCONNECT if connected and wait for the tasks to end
    ///
    /// Calling `stop` more than once is a no-op.
    pub async fn stop(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let abort = task.abort_handle();
            match timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("'{}': connection task failed: {}", self.name(), e),
                Err(_) => {
                    warn!("'{}': connection task did not stop in time, aborting", self.name());
                    abort.abort();
                }
            }
        }
        self.shared.transition(ConnectionState::Disconnected);
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send_replace(true);
    }
}

/// Poll the event loop until shutdown, backing off between failed attempts
async fn connection_loop(
    shared: Arc<Shared>,
    link: LinkClient,
    mut events: LinkEvents,
    inbound: Option<InboundCallback>,
    mut shutdown: watch::Receiver<bool>,
) {
    let options = &shared.options;
    let mut retry_interval = options.reconnect_interval;
    // Filters still to subscribe; the head is the one awaiting its SUBACK
    let mut pending: VecDeque<String> = VecDeque::new();

    shared.transition(ConnectionState::Connecting);
    debug!("'{}': connecting to {}", options.name, options.address());

    loop {
        let connected = shared.state() == ConnectionState::Connected;

        let event = tokio::select! {
            event = next_event(&mut events, connected, options.connect_timeout) => Some(event),
            _ = shutdown.changed() => None,
        };
        let Some(event) = event else {
            if connected {
                disconnect(&link, &mut events, &options.name).await;
            }
            break;
        };

        match event {
            Ok(LinkEvent::Connected { session_present }) => {
                retry_interval = options.reconnect_interval;
                shared.transition(ConnectionState::Connected);
                info!(
                    "'{}': connected to {} ({}, session_present={})",
                    options.name,
                    options.address(),
                    options.protocol_version,
                    session_present
                );

                pending = options.subscriptions.iter().cloned().collect();
                subscribe_next(&link, &pending, options);
            }
            Ok(LinkEvent::Subscribed { accepted }) => {
                if let Some(filter) = pending.pop_front() {
                    if accepted {
                        info!("'{}': subscribed to {}", options.name, filter);
                    } else {
                        warn!("'{}': subscription to {} rejected", options.name, filter);
                    }
                }
                subscribe_next(&link, &pending, options);
            }
            Ok(LinkEvent::Message { topic, payload }) => match &inbound {
                Some(callback) => callback(&topic, payload),
                None => debug!(
                    "'{}': ignoring PUBLISH on {} (no consumer)",
                    options.name, topic
                ),
            },
            Ok(LinkEvent::Other) => {}
            Err(e) => {
                error!("'{}': connection failed: {}", options.name, e);
                shared.fail(&e);
                pending.clear();

                debug!("'{}': reconnecting in {:?}", options.name, retry_interval);
                tokio::select! {
                    _ = tokio::time::sleep(retry_interval) => {}
                    _ = shutdown.changed() => break,
                }
                retry_interval = options.next_retry_interval(retry_interval);
                shared.transition(ConnectionState::Connecting);
            }
        }
    }

    shared.transition(ConnectionState::Disconnected);
    debug!("'{}': connection task stopped", options.name);
}

/// Next event; the handshake is bounded by the connect timeout
async fn next_event(
    events: &mut LinkEvents,
    connected: bool,
    connect_timeout: Duration,
) -> Result<LinkEvent, TransportError> {
    if connected {
        return events.poll().await;
    }
    timeout(connect_timeout, events.poll())
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// One SUBSCRIBE at a time so a rejection can be attributed to its filter
fn subscribe_next(link: &LinkClient, pending: &VecDeque<String>, options: &ClientOptions) {
    if let Some(filter) = pending.front() {
        debug!("'{}': SUBSCRIBE {}", options.name, filter);
        if let Err(e) = link.try_subscribe(filter, options.qos) {
            warn!("'{}': could not subscribe to {}: {}", options.name, filter, e);
        }
    }
}

/// Queue a DISCONNECT and drive the event loop until the broker hangs up
async fn disconnect(link: &LinkClient, events: &mut LinkEvents, name: &str) {
    if let Err(e) = link.try_disconnect() {
        debug!("'{}': DISCONNECT not queued: {}", name, e);
        return;
    }
    let drained = timeout(DISCONNECT_GRACE, async {
        while events.poll().await.is_ok() {}
    })
    .await;
    if drained.is_err() {
        debug!("'{}': broker kept the connection open after DISCONNECT", name);
    }
}

/// Move queued messages into the event loop until shutdown
async fn publish_loop(shared: Arc<Shared>, link: LinkClient, mut shutdown: watch::Receiver<bool>) {
    let options = &shared.options;

    'run: loop {
        while let Some(message) = shared.outbound.pop() {
            let result = tokio::select! {
                result = link.publish(&message.topic, options.qos, message.payload) => result,
                _ = shutdown.changed() => break 'run,
            };
            if let Err(e) = result {
                warn!("'{}': publish to {} failed: {}", options.name, message.topic, e);
            }
        }

        tokio::select! {
            _ = shared.outbound.ready() => {}
            _ = shutdown.changed() => break 'run,
        }
    }

    debug!("'{}': publisher stopped", options.name);
}
