//! MqttPublisher - Broker Session Owner
//!
//! ## Responsibilities
//!
//! - Connect to the broker with bounded retry (the only blocking call)
//! - Hand payloads to the transport at QoS 1 without waiting for acks
//! - Run the background network task between connect and disconnect
//! - Graceful, idempotent disconnect

mod retry;

pub use retry::retry_bounded;

use crate::config::MqttConfig;
use crate::error::{Error, Result};
use crate::models::ResultPayload;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Requests buffered between `publish()` and the network task
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Back-off after a transport error before polling again
const NETWORK_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Publisher connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Disconnected,
    Connecting,
    Connected,
}

/// Destination for normalized results
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Establish the session. Blocks for the whole retry window; `false`
    /// once every attempt has failed.
    async fn connect(&self) -> bool;

    /// Best-effort, non-blocking handoff. `false` means the result was dropped.
    async fn publish(&self, payload: &ResultPayload) -> bool;

    /// Release the session. Must be idempotent.
    async fn disconnect(&self);
}

struct Session {
    client: AsyncClient,
    network: JoinHandle<()>,
}

/// MQTT publisher instance
pub struct MqttPublisher {
    config: MqttConfig,
    state: RwLock<PublisherState>,
    session: Mutex<Option<Session>>,
    connect_attempts: AtomicU32,
}

impl MqttPublisher {
    /// Create new publisher (does not connect)
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            state: RwLock::new(PublisherState::Disconnected),
            session: Mutex::new(None),
            connect_attempts: AtomicU32::new(0),
        }
    }

    /// One connect attempt: open the transport and wait for CONNACK.
    async fn connect_once(&self, attempt: u32) -> Result<(AsyncClient, EventLoop)> {
        tracing::debug!(
            attempt,
            broker = %self.config.broker,
            port = self.config.port,
            "Connecting to MQTT broker"
        );

        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.broker.clone(),
            self.config.port,
        );
        options
            .set_keep_alive(self.config.keep_alive)
            .set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(Error::Connection(e.to_string())),
                }
            }
        };

        let outcome = tokio::time::timeout(self.config.connect_timeout, handshake).await;
        match outcome {
            Ok(Ok(())) => Ok((client, eventloop)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Connection(format!(
                "no CONNACK within {}s",
                self.config.connect_timeout.as_secs()
            ))),
        }
    }

    /// Current connection state
    pub async fn state(&self) -> PublisherState {
        *self.state.read().await
    }

    /// Total connect attempts made so far
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResultSink for MqttPublisher {
    async fn connect(&self) -> bool {
        if self.state().await == PublisherState::Connected {
            return true;
        }
        *self.state.write().await = PublisherState::Connecting;

        let this = self;
        let outcome = retry_bounded(this.config.retry, "MQTT connection", move |attempt| {
            this.connect_attempts.fetch_add(1, Ordering::Relaxed);
            this.connect_once(attempt)
        })
        .await;

        match outcome {
            Ok((client, eventloop)) => {
                let network = tokio::spawn(drive_network(eventloop));
                *self.session.lock().await = Some(Session { client, network });
                *self.state.write().await = PublisherState::Connected;
                tracing::info!(
                    broker = %self.config.broker,
                    port = self.config.port,
                    "Connected to MQTT broker"
                );
                true
            }
            Err(e) => {
                *self.state.write().await = PublisherState::Disconnected;
                tracing::error!(
                    broker = %self.config.broker,
                    port = self.config.port,
                    attempts = self.connect_attempts(),
                    error = %e,
                    "Failed to connect to MQTT broker"
                );
                false
            }
        }
    }

    async fn publish(&self, payload: &ResultPayload) -> bool {
        if self.state().await != PublisherState::Connected {
            return false;
        }

        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            return false;
        };

        let body = match payload.to_json() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize result payload");
                return false;
            }
        };

        match session
            .client
            .try_publish(self.config.topic.clone(), QoS::AtLeastOnce, false, body)
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(topic = %self.config.topic, error = %e, "Publish dropped");
                false
            }
        }
    }

    async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        *self.state.write().await = PublisherState::Disconnected;

        let Some(Session { client, mut network }) = session else {
            tracing::debug!("Disconnect requested without an active session");
            return;
        };

        if let Err(e) = client.try_disconnect() {
            tracing::debug!(error = %e, "MQTT disconnect request not queued");
        }

        if tokio::time::timeout(self.config.disconnect_grace, &mut network)
            .await
            .is_err()
        {
            tracing::debug!("Network task did not finish in time, aborting");
            network.abort();
        }

        tracing::info!("Disconnected from MQTT broker");
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.network.abort();
        }
    }
}

/// Background network processing. Keeps polling after errors so the
/// transport reconnects on its own; exits once DISCONNECT has been sent.
async fn drive_network(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                tracing::trace!(pkid = ack.pkid, "Publish acknowledged");
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("MQTT session re-established");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(NETWORK_ERROR_BACKOFF).await;
            }
        }
    }
}
