//! Bus session manager
//!
//! Maintains the single session with the message bus broker. The transport
//! itself sits behind the [`BusLink`] trait; production uses the MQTT
//! implementation, tests use [`MockBus`].
//!
//! Two deliberate softnesses, both load-bearing:
//! - an incompletely configured endpoint puts the session into degraded
//!   mode where every publish is silently skipped, so the device keeps
//!   ingesting and logging with no broker configured at all;
//! - `publish` while disconnected is a success-as-no-op, so callers never
//!   treat missing connectivity as fatal.
//!
//! Connecting never stalls the caller: an attempt is started without
//! waiting for the broker and then driven a small budget at a time from
//! subsequent `ensure_connected` calls, holding `Connecting` across ticks
//! until the broker acknowledges or the attempt times out. Radio polling
//! keeps its tick slot even against a black-holing broker.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{BusSettings, ReconnectConfig, Topics};
use crate::error::{BridgeError, Result};
use crate::net::LinkState;
use crate::store::ConfigStore;
use std::sync::Arc;

/// Retained liveness payload published on connect
pub const LIVENESS_PAYLOAD: &str = "connected";

/// Budget for driving an in-flight connect from the tick path
const CONNECT_BUDGET: Duration = Duration::from_millis(2);

/// State of the broker session
///
/// Held only in memory; re-derived from the live link, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session
    Disconnected,
    /// Connect attempt in flight
    Connecting,
    /// Session established
    Connected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
        }
    }
}

/// Trait for bus transports
#[async_trait]
pub trait BusLink: Send {
    /// Begin a connect attempt; must return without waiting for the broker
    async fn start_connect(&mut self, settings: &BusSettings) -> Result<()>;

    /// Drive an in-flight connect for at most `budget`
    ///
    /// Returns `Ok(true)` once the broker has acknowledged the session,
    /// `Ok(false)` while the handshake is still pending.
    async fn drive_connect(&mut self, budget: Duration) -> Result<bool>;

    /// Tear the session down
    async fn disconnect(&mut self) -> Result<()>;

    /// Publish a payload to a channel
    async fn publish(&mut self, channel: &str, payload: &[u8], retained: bool) -> Result<()>;

    /// Service the session (keep-alive traffic); must return quickly
    async fn service(&mut self) -> Result<()>;

    /// Whether a session is currently established
    fn is_connected(&self) -> bool;

    /// Transport name (for logging)
    fn name(&self) -> &str;
}

/// MQTT transport backed by rumqttc
pub struct MqttLink {
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    connected: bool,
}

impl Default for MqttLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttLink {
    /// Keep-alive interval presented to the broker
    const KEEP_ALIVE: Duration = Duration::from_secs(30);

    /// Budget for one service poll; keeps the loop tick bounded
    const SERVICE_BUDGET: Duration = Duration::from_millis(2);

    /// Create an unconnected transport
    pub fn new() -> Self {
        Self {
            client: None,
            eventloop: None,
            connected: false,
        }
    }
}

#[async_trait]
impl BusLink for MqttLink {
    async fn start_connect(&mut self, settings: &BusSettings) -> Result<()> {
        let mut options =
            MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(Self::KEEP_ALIVE);
        if !settings.username.is_empty() {
            options.set_credentials(settings.username.clone(), settings.password.clone());
        }

        // Creating the client does not touch the network yet; the
        // handshake happens as drive_connect polls the event loop
        let (client, eventloop) = AsyncClient::new(options, 32);
        self.client = Some(client);
        self.eventloop = Some(eventloop);
        self.connected = false;
        Ok(())
    }

    async fn drive_connect(&mut self, budget: Duration) -> Result<bool> {
        let Some(eventloop) = self.eventloop.as_mut() else {
            return Err(BridgeError::BusConnectFailed("no connect in flight".to_string()));
        };
        match tokio::time::timeout(budget, eventloop.poll()).await {
            // Still waiting for the broker
            Err(_) => Ok(false),
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                self.connected = true;
                Ok(true)
            }
            Ok(Ok(_)) => Ok(false),
            Ok(Err(e)) => {
                self.client = None;
                self.eventloop = None;
                Err(BridgeError::BusConnectFailed(e.to_string()))
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            let _ = client.disconnect().await;
        }
        self.eventloop = None;
        self.connected = false;
        Ok(())
    }

    async fn publish(&mut self, channel: &str, payload: &[u8], retained: bool) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BridgeError::BusPublishFailed("no session".to_string()))?;
        client
            .publish(channel, QoS::AtMostOnce, retained, payload)
            .await?;
        Ok(())
    }

    async fn service(&mut self) -> Result<()> {
        let Some(eventloop) = self.eventloop.as_mut() else {
            return Ok(());
        };
        match tokio::time::timeout(Self::SERVICE_BUDGET, eventloop.poll()).await {
            // Nothing pending inside the budget is the common case
            Err(_) => Ok(()),
            Ok(Ok(event)) => {
                trace!(?event, "Bus event");
                Ok(())
            }
            Ok(Err(e)) => {
                self.connected = false;
                Err(BridgeError::BusSessionLost(e.to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &str {
        "MqttLink"
    }
}

/// Session statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    /// Payloads handed to the transport
    pub published: u64,
    /// Publishes skipped while disconnected or unconfigured
    pub skipped: u64,
    /// Failed connect attempts
    pub connect_failures: u64,
}

/// Manages the broker session over a [`BusLink`]
pub struct BusSession<B: BusLink> {
    link: B,
    store: Arc<ConfigStore>,
    topics: Topics,
    reconnect: ReconnectConfig,
    state: SessionState,
    attempts: u32,
    next_attempt_at: Option<Instant>,
    connect_deadline: Option<Instant>,
    stats: SessionStats,
}

impl<B: BusLink> BusSession<B> {
    /// Create a session manager reading its endpoint from `store`
    pub fn new(
        link: B,
        store: Arc<ConfigStore>,
        topics: Topics,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            link,
            store,
            topics,
            reconnect,
            state: SessionState::Disconnected,
            attempts: 0,
            next_attempt_at: None,
            connect_deadline: None,
            stats: SessionStats::default(),
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is established
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Session statistics
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Channel layout in use
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Access the underlying transport
    pub fn link(&self) -> &B {
        &self.link
    }

    /// Mutable access to the underlying transport
    pub fn link_mut(&mut self) -> &mut B {
        &mut self.link
    }

    /// Establish the session if possible; one bounded step per invocation
    ///
    /// Returns `true` when a session was newly established this call, so
    /// the caller can re-run the discovery publisher. Connecting requires
    /// the network to be associated; the endpoint is re-read from the
    /// store on every attempt so a configuration save takes effect on the
    /// next boot (or the next attempt, for the endpoint fields).
    ///
    /// Never waits for the broker: starting an attempt only creates the
    /// transport, and the handshake is driven `CONNECT_BUDGET` at a time
    /// while the session holds `Connecting`, until the broker acknowledges
    /// or `ReconnectConfig::connect_timeout` elapses.
    pub async fn ensure_connected(&mut self, link_state: LinkState) -> bool {
        if self.state == SessionState::Connected {
            return false;
        }

        if self.state == SessionState::Connecting {
            if link_state != LinkState::Associated {
                warn!("Network lost during bus connect, aborting attempt");
                self.abort_connect().await;
                return false;
            }
            return self.drive_connect().await;
        }

        if link_state != LinkState::Associated {
            return false;
        }

        let settings = self.store.bus();
        if !settings.is_configured() {
            // Degraded mode: ingest and log locally with no bus at all
            trace!("Bus endpoint not configured, staying in degraded mode");
            return false;
        }

        // Bounded exponential back-off between attempts
        if let Some(at) = self.next_attempt_at {
            if Instant::now() < at {
                return false;
            }
        }

        debug!(host = %settings.host, port = settings.port, "Connecting to bus");
        match self.link.start_connect(&settings).await {
            Ok(()) => {
                self.state = SessionState::Connecting;
                self.connect_deadline = Some(Instant::now() + self.reconnect.connect_timeout);
                // First drive right away so a fast broker connects within
                // the same tick
                self.drive_connect().await
            }
            Err(e) => {
                self.note_connect_failure(e);
                false
            }
        }
    }

    /// One bounded step of the in-flight handshake
    async fn drive_connect(&mut self) -> bool {
        if let Some(deadline) = self.connect_deadline {
            if Instant::now() >= deadline {
                self.abort_connect().await;
                self.note_connect_failure(BridgeError::BusConnectTimeout {
                    duration_ms: self.reconnect.connect_timeout.as_millis() as u64,
                });
                return false;
            }
        }

        match self.link.drive_connect(CONNECT_BUDGET).await {
            Ok(true) => {
                self.state = SessionState::Connected;
                self.attempts = 0;
                self.next_attempt_at = None;
                self.connect_deadline = None;
                info!(transport = self.link.name(), "Bus session established");

                let status = self.topics.status();
                if let Err(e) = self
                    .link
                    .publish(&status, LIVENESS_PAYLOAD.as_bytes(), true)
                    .await
                {
                    warn!(error = %e, "Failed to publish liveness record");
                } else {
                    self.stats.published += 1;
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.note_connect_failure(e);
                false
            }
        }
    }

    /// Drop an in-flight attempt without counting it as a failure
    async fn abort_connect(&mut self) {
        let _ = self.link.disconnect().await;
        self.connect_deadline = None;
        self.state = SessionState::Disconnected;
    }

    fn note_connect_failure(&mut self, e: BridgeError) {
        let delay = self.reconnect.delay_for_attempt(self.attempts);
        warn!(
            error = %e,
            attempt = self.attempts + 1,
            retry_in = ?delay,
            "Bus connect failed"
        );
        self.attempts = self.attempts.saturating_add(1);
        self.stats.connect_failures += 1;
        self.next_attempt_at = Some(Instant::now() + delay);
        self.connect_deadline = None;
        self.state = SessionState::Disconnected;
    }

    /// Publish a payload; success-as-no-op while not connected
    pub async fn publish(&mut self, channel: &str, payload: &[u8], retained: bool) -> Result<()> {
        if self.state != SessionState::Connected {
            self.stats.skipped += 1;
            trace!(channel, "Publish skipped, no session");
            return Ok(());
        }

        match self.link.publish(channel, payload, retained).await {
            Ok(()) => {
                self.stats.published += 1;
                Ok(())
            }
            Err(e) => {
                warn!(channel, error = %e, "Publish failed, dropping session");
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Service the session's keep-alive traffic; one bounded poll per tick
    pub async fn service(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        if let Err(e) = self.link.service().await {
            warn!(error = %e, "Bus session lost");
            self.state = SessionState::Disconnected;
        }
    }

    /// Tear the session down
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.link.disconnect().await {
            debug!(error = %e, "Error disconnecting from bus");
        }
        self.state = SessionState::Disconnected;
    }
}

/// Recording transport for tests
#[derive(Debug, Default)]
pub struct MockBus {
    /// Every payload handed to the transport: (channel, payload, retained)
    pub published: Vec<(String, Vec<u8>, bool)>,
    /// Connect attempts remaining that should fail
    pub fail_connects: u32,
    polls_until_ack: u32,
    pending_polls: u32,
    connecting: bool,
    connected: bool,
}

impl MockBus {
    /// Create a transport whose broker acknowledges on the first drive
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect calls fail
    pub fn fail_next_connects(mut self, n: u32) -> Self {
        self.fail_connects = n;
        self
    }

    /// Make each connect attempt stay pending for `n` drives before the
    /// broker acknowledges
    pub fn connect_after_polls(mut self, n: u32) -> Self {
        self.polls_until_ack = n;
        self
    }

    /// Payloads published to `channel`
    pub fn published_on(&self, channel: &str) -> Vec<&[u8]> {
        self.published
            .iter()
            .filter(|(c, _, _)| c == channel)
            .map(|(_, p, _)| p.as_slice())
            .collect()
    }

    /// Simulate the broker dropping the session
    pub fn drop_session(&mut self) {
        self.connected = false;
    }
}

#[async_trait]
impl BusLink for MockBus {
    async fn start_connect(&mut self, _settings: &BusSettings) -> Result<()> {
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            return Err(BridgeError::BusConnectFailed("simulated refusal".to_string()));
        }
        self.connecting = true;
        self.pending_polls = self.polls_until_ack;
        Ok(())
    }

    async fn drive_connect(&mut self, _budget: Duration) -> Result<bool> {
        if !self.connecting {
            return Err(BridgeError::BusConnectFailed("no connect in flight".to_string()));
        }
        if self.pending_polls == 0 {
            self.connecting = false;
            self.connected = true;
            Ok(true)
        } else {
            self.pending_polls -= 1;
            Ok(false)
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connecting = false;
        self.connected = false;
        Ok(())
    }

    async fn publish(&mut self, channel: &str, payload: &[u8], retained: bool) -> Result<()> {
        if !self.connected {
            return Err(BridgeError::BusPublishFailed("no session".to_string()));
        }
        self.published
            .push((channel.to_string(), payload.to_vec(), retained));
        Ok(())
    }

    async fn service(&mut self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(BridgeError::BusSessionLost("simulated drop".to_string()))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn name(&self) -> &str {
        "MockBus"
    }
}
