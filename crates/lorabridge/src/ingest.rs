//! Ingestion loop
//!
//! The single scheduling authority of the bridge. Each tick, in order:
//!
//! 1. poll the radio for a complete frame; forward its payload
//!    byte-for-byte to the state channel, then a one-field signal record;
//! 2. if the reporting interval elapsed, regenerate and publish the
//!    device status record;
//! 3. poll the network supervisor, then let the bus session connect or
//!    recover, re-announcing discovery on a fresh session; service the
//!    session's keep-alive traffic.
//!
//! Every failure is absorbed here: the loop never terminates on a
//! transient link error. Only a shutdown or restart command (the latter
//! issued by the settings endpoint after a save) ends it.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::bus::{BusLink, BusSession};
use crate::discovery::DiscoveryPublisher;
use crate::error::Result;
use crate::net::{NetworkSupervisor, WirelessDriver};
use crate::radio::{RadioFrame, RadioLink};
use crate::telemetry::{DeviceStatusRecord, SignalRecord};

/// Idle delay between ticks; short enough that radio polling never lags a
/// frame, long enough not to spin
const TICK_INTERVAL: Duration = Duration::from_millis(20);

/// Commands that can be sent to the running loop
#[derive(Debug)]
pub enum LoopCommand {
    /// Get loop statistics
    GetStats(oneshot::Sender<IngestStats>),
    /// Stop the loop and request a full process restart
    Restart,
    /// Stop the loop
    Shutdown,
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Shutdown requested
    Shutdown,
    /// Restart requested (configuration was saved)
    Restart,
}

/// Loop statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    /// Frames received from the radio
    pub frames_received: u64,
    /// Frames forwarded to the bus (payload + signal record pairs)
    pub frames_forwarded: u64,
    /// Device status records published
    pub status_reports: u64,
    /// Radio poll errors
    pub radio_errors: u64,
    /// Bus publish errors on an established session
    pub publish_errors: u64,
    /// Sessions established (first connect and every reconnect)
    pub sessions_established: u64,
}

/// Handle for controlling a running [`IngestLoop`]
#[derive(Clone)]
pub struct LoopHandle {
    command_tx: mpsc::Sender<LoopCommand>,
}

impl LoopHandle {
    /// Get loop statistics
    pub async fn stats(&self) -> Result<IngestStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(LoopCommand::GetStats(tx))
            .await
            .map_err(|_| crate::error::BridgeError::ChannelClosed)?;
        rx.await.map_err(|_| crate::error::BridgeError::ChannelClosed)
    }

    /// Stop the loop and request a process restart
    pub async fn restart(&self) -> Result<()> {
        self.command_tx
            .send(LoopCommand::Restart)
            .await
            .map_err(|_| crate::error::BridgeError::ChannelClosed)
    }

    /// Stop the loop
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(LoopCommand::Shutdown)
            .await
            .map_err(|_| crate::error::BridgeError::ChannelClosed)
    }
}

/// The steady-state control loop
pub struct IngestLoop<R, D, B>
where
    R: RadioLink,
    D: WirelessDriver,
    B: BusLink,
{
    radio: R,
    net: NetworkSupervisor<D>,
    session: BusSession<B>,
    discovery: DiscoveryPublisher,
    report_interval: Duration,
    last_report: Instant,
    started_at: Instant,
    command_rx: mpsc::Receiver<LoopCommand>,
    stats: IngestStats,
}

impl<R, D, B> IngestLoop<R, D, B>
where
    R: RadioLink,
    D: WirelessDriver,
    B: BusLink,
{
    /// Create a loop over already-brought-up components
    pub fn new(
        radio: R,
        net: NetworkSupervisor<D>,
        session: BusSession<B>,
        report_interval: Duration,
    ) -> (Self, LoopHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let handle = LoopHandle { command_tx };
        let now = Instant::now();

        let ingest = Self {
            radio,
            net,
            session,
            discovery: DiscoveryPublisher::new(),
            report_interval,
            last_report: now,
            started_at: now,
            command_rx,
            stats: IngestStats::default(),
        };

        (ingest, handle)
    }

    /// Loop statistics
    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Access the bus session (state and transport inspection)
    pub fn session(&self) -> &BusSession<B> {
        &self.session
    }

    /// Mutable access to the radio link
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Run until shutdown or restart is requested
    pub async fn run(mut self) -> LoopExit {
        info!("Ingestion loop started");

        let exit = loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        LoopCommand::GetStats(tx) => {
                            let _ = tx.send(self.stats);
                        }
                        LoopCommand::Restart => {
                            info!("Restart requested");
                            break LoopExit::Restart;
                        }
                        LoopCommand::Shutdown => {
                            info!("Shutdown requested");
                            break LoopExit::Shutdown;
                        }
                    }
                }

                _ = tokio::time::sleep(TICK_INTERVAL) => {
                    self.tick().await;
                }
            }
        };

        self.session.shutdown().await;
        info!("Ingestion loop stopped");
        exit
    }

    /// One loop iteration; never blocks beyond the tick budget
    pub async fn tick(&mut self) {
        // 1. Radio poll runs every tick regardless of network/bus state
        match self.radio.poll_frame().await {
            Ok(Some(frame)) => {
                self.stats.frames_received += 1;
                self.forward_frame(frame).await;
            }
            Ok(None) => {
                trace!("No radio frame available");
            }
            Err(e) => {
                warn!(error = %e, "Radio poll failed");
                self.stats.radio_errors += 1;
            }
        }

        // 2. Periodic self-telemetry
        let now = Instant::now();
        if now.duration_since(self.last_report) >= self.report_interval {
            self.last_report = now;
            if self.session.is_connected() {
                self.publish_status().await;
            }
        }

        // 3. Network first, then bus: a session is never attempted on a
        // disassociated network
        let link_state = self.net.poll().await;
        if self.session.ensure_connected(link_state).await {
            self.stats.sessions_established += 1;
            if let Err(e) = self.discovery.publish_all(&mut self.session).await {
                warn!(error = %e, "Discovery publication failed");
            }
        }
        self.session.service().await;
    }

    /// Forward a received frame: raw payload first, signal record second
    async fn forward_frame(&mut self, frame: RadioFrame) {
        debug!(
            bytes = frame.payload.len(),
            rssi = frame.rssi,
            "Radio frame received"
        );

        let state = self.session.topics().state();
        if let Err(e) = self.session.publish(&state, &frame.payload, true).await {
            warn!(error = %e, "Failed to forward frame payload");
            self.stats.publish_errors += 1;
            return;
        }

        let record = SignalRecord { signal: frame.rssi };
        match serde_json::to_vec(&record) {
            Ok(payload) => {
                if let Err(e) = self.session.publish(&state, &payload, true).await {
                    warn!(error = %e, "Failed to publish signal record");
                    self.stats.publish_errors += 1;
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to serialize signal record");
                return;
            }
        }

        self.stats.frames_forwarded += 1;
    }

    /// Regenerate and publish the device status record
    async fn publish_status(&mut self) {
        let record = DeviceStatusRecord {
            uptime: self.started_at.elapsed().as_secs(),
            hardware_address: self.net.hardware_addr(),
            hostname: self.net.hostname(),
            wifi_signal: self.net.rssi(),
            local_address: self.net.local_addr().map(|a| a.to_string()),
        };

        let state = self.session.topics().state();
        match serde_json::to_vec(&record) {
            Ok(payload) => {
                if self.session.publish(&state, &payload, true).await.is_ok() {
                    self.stats.status_reports += 1;
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize status record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MockBus, LIVENESS_PAYLOAD};
    use crate::config::{BusSettings, ReconnectConfig, Topics};
    use crate::net::MockWireless;
    use crate::radio::MockRadio;
    use crate::store::ConfigStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    type TestLoop = IngestLoop<MockRadio, MockWireless, MockBus>;

    async fn test_loop(dir: &TempDir, bus_configured: bool) -> (TestLoop, LoopHandle) {
        let store = Arc::new(ConfigStore::open(dir.path()).unwrap());
        if bus_configured {
            store
                .save_bus(&BusSettings {
                    host: "broker.local".to_string(),
                    ..BusSettings::default()
                })
                .unwrap();
        }

        let mut radio = MockRadio::new();
        radio.begin(866_000_000, 0xF3).await.unwrap();

        let net = NetworkSupervisor::new(MockWireless::new(0), store.network());
        let session = BusSession::new(
            MockBus::new(),
            store,
            Topics::default(),
            ReconnectConfig::default(),
        );

        IngestLoop::new(radio, net, session, Duration::from_secs(60))
    }

    async fn test_loop_with_bus(dir: &TempDir, bus: MockBus) -> (TestLoop, LoopHandle) {
        let store = Arc::new(ConfigStore::open(dir.path()).unwrap());
        store
            .save_bus(&BusSettings {
                host: "broker.local".to_string(),
                ..BusSettings::default()
            })
            .unwrap();

        let mut radio = MockRadio::new();
        radio.begin(866_000_000, 0xF3).await.unwrap();

        let net = NetworkSupervisor::new(MockWireless::new(0), store.network());
        let session = BusSession::new(bus, store, Topics::default(), ReconnectConfig::default());

        IngestLoop::new(radio, net, session, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_frame_forwarded_with_signal_record() {
        let dir = TempDir::new().unwrap();
        let (mut ingest, _handle) = test_loop(&dir, true).await;

        // Bring network and session up
        ingest.tick().await;
        ingest.tick().await;
        assert!(ingest.session.is_connected());

        let frame = br#"{"temperature":21.5,"humidity":60,"packet_number":7,"message":"Hello"}"#;
        ingest.radio.push_frame(&frame[..], -42);
        ingest.tick().await;

        let state = ingest.session.link().published_on("lora-gateway/state");
        assert_eq!(state.len(), 2);
        // Exact inbound text first, then the one-field signal record
        assert_eq!(state[0], &frame[..]);
        assert_eq!(state[1], br#"{"signal":-42}"#);
        assert_eq!(ingest.stats().frames_forwarded, 1);
    }

    #[tokio::test]
    async fn test_discovery_runs_on_each_session() {
        let dir = TempDir::new().unwrap();
        let (mut ingest, _handle) = test_loop(&dir, true).await;

        ingest.tick().await;
        ingest.tick().await;
        assert_eq!(ingest.stats().sessions_established, 1);

        let discovery_count = ingest
            .session
            .link()
            .published
            .iter()
            .filter(|(c, _, _)| c.starts_with("discovery/sensor/"))
            .count();
        assert_eq!(discovery_count, crate::discovery::SENSORS.len());

        // Drop and re-establish: descriptors are re-announced
        ingest.session.link_mut().drop_session();
        ingest.tick().await; // service() notices the loss
        ingest.tick().await; // next tick reconnects, no back-off pending
        assert_eq!(ingest.stats().sessions_established, 2);

        let discovery_count = ingest
            .session
            .link()
            .published
            .iter()
            .filter(|(c, _, _)| c.starts_with("discovery/sensor/"))
            .count();
        assert_eq!(discovery_count, 2 * crate::discovery::SENSORS.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_not_stalled_by_slow_broker_handshake() {
        let dir = TempDir::new().unwrap();
        // Broker leaves the handshake pending for many drives
        let (mut ingest, _handle) =
            test_loop_with_bus(&dir, MockBus::new().connect_after_polls(50)).await;

        ingest.tick().await; // association request
        ingest.tick().await; // associated, connect attempt started
        assert_eq!(ingest.session.state(), crate::bus::SessionState::Connecting);

        // Frames arriving mid-handshake still get their poll slot, and no
        // tick waits on the broker (paused clock stays put)
        let before = Instant::now();
        ingest.radio.push_frame(&b"{\"message\":\"mid-handshake\"}"[..], -70);
        for _ in 0..5 {
            ingest.tick().await;
        }
        assert_eq!(Instant::now(), before);
        assert_eq!(ingest.stats().frames_received, 1);
        assert_eq!(ingest.session.state(), crate::bus::SessionState::Connecting);
        assert_eq!(ingest.stats().sessions_established, 0);
    }

    #[tokio::test]
    async fn test_radio_polled_while_disconnected() {
        let dir = TempDir::new().unwrap();
        // No bus configured: degraded mode
        let (mut ingest, _handle) = test_loop(&dir, false).await;

        ingest.radio.push_frame(&b"{\"message\":\"lost\"}"[..], -80);
        ingest.tick().await;

        // Frame was consumed from the radio even though nothing reached
        // the bus, and the tick completed without error
        assert_eq!(ingest.stats().frames_received, 1);
        assert!(ingest.session.link().published.is_empty());
        assert!(ingest.radio.poll_frame().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_report_interval() {
        let dir = TempDir::new().unwrap();
        let (mut ingest, _handle) = test_loop(&dir, true).await;

        ingest.tick().await;
        ingest.tick().await;
        assert!(ingest.session.is_connected());
        assert_eq!(ingest.stats().status_reports, 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        ingest.tick().await;
        assert_eq!(ingest.stats().status_reports, 1);

        // No second report until the interval elapses again
        ingest.tick().await;
        assert_eq!(ingest.stats().status_reports, 1);
    }

    #[tokio::test]
    async fn test_run_exits_on_commands() {
        let dir = TempDir::new().unwrap();
        let (ingest, handle) = test_loop(&dir, true).await;

        let run = tokio::spawn(ingest.run());
        handle.restart().await.unwrap();
        assert_eq!(run.await.unwrap(), LoopExit::Restart);
    }

    #[tokio::test]
    async fn test_liveness_published_before_discovery() {
        let dir = TempDir::new().unwrap();
        let (mut ingest, _handle) = test_loop(&dir, true).await;

        ingest.tick().await;
        ingest.tick().await;

        let published = &ingest.session.link().published;
        assert_eq!(published[0].0, "lora-gateway/status");
        assert_eq!(published[0].1, LIVENESS_PAYLOAD.as_bytes());
    }
}
