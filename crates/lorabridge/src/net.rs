//! Network supervisor
//!
//! Brings up the local wireless network and keeps it associated. With no
//! stored credentials the device starts an access point under the
//! compiled-in fallback name so the settings endpoint stays reachable;
//! otherwise it joins the configured network as a client.
//!
//! Two entry points per the bring-up-once-maintain-forever split:
//! [`NetworkSupervisor::bring_up_blocking`] waits with bounded retries at
//! startup, [`NetworkSupervisor::poll`] is the cheap per-tick check that
//! only re-issues an association request from `Disassociated` and never
//! stalls the ingestion loop.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{NetworkSettings, FALLBACK_AP_PSK, FALLBACK_AP_SSID};
use crate::error::{BridgeError, Result};

/// Association state of the local network link
///
/// Re-derived from the driver on every poll, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No association and none in progress
    Disassociated,
    /// Association request issued, waiting for the driver
    Associating,
    /// Link is up
    Associated,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disassociated => write!(f, "disassociated"),
            LinkState::Associating => write!(f, "associating"),
            LinkState::Associated => write!(f, "associated"),
        }
    }
}

/// How the device is participating in the local network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Joined an existing network with stored credentials
    Client,
    /// Serving the fallback access point for initial setup
    AccessPoint,
}

/// Raw link status reported by a wireless driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// Nothing in progress
    Idle,
    /// Association in progress
    Joining,
    /// Link established
    Up,
}

/// Trait for wireless network drivers
///
/// `join` and `start_access_point` only *initiate*; completion is observed
/// through `status()`, which must be cheap enough to call every tick.
#[async_trait]
pub trait WirelessDriver: Send {
    /// Begin joining `ssid` as a client
    async fn join(&mut self, ssid: &str, password: &str) -> Result<()>;

    /// Begin serving an access point
    async fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<()>;

    /// Current link status
    fn status(&self) -> DriverStatus;

    /// Local address once the link is up
    fn local_addr(&self) -> Option<IpAddr>;

    /// Hardware (MAC) address of the wireless interface
    fn hardware_addr(&self) -> String;

    /// Host name advertised on the network
    fn hostname(&self) -> String;

    /// Signal strength of the association in dBm, if measurable
    fn rssi(&self) -> Option<i32>;

    /// Driver name (for logging)
    fn name(&self) -> &str;
}

/// Supervises the local network link
pub struct NetworkSupervisor<D: WirelessDriver> {
    driver: D,
    settings: NetworkSettings,
    state: LinkState,
    mode: NetworkMode,
    advertised: bool,
}

impl<D: WirelessDriver> NetworkSupervisor<D> {
    /// Create a supervisor over `driver` with the stored credentials
    pub fn new(driver: D, settings: NetworkSettings) -> Self {
        let mode = if settings.is_configured() {
            NetworkMode::Client
        } else {
            NetworkMode::AccessPoint
        };
        Self {
            driver,
            settings,
            state: LinkState::Disassociated,
            mode,
            advertised: false,
        }
    }

    /// Current association state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Access the underlying driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Current participation mode
    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    /// Local address, if associated
    pub fn local_addr(&self) -> Option<IpAddr> {
        self.driver.local_addr()
    }

    /// Hardware address of the wireless interface
    pub fn hardware_addr(&self) -> String {
        self.driver.hardware_addr()
    }

    /// Host name advertised on the network
    pub fn hostname(&self) -> String {
        self.driver.hostname()
    }

    /// Link signal strength in dBm, if measurable
    pub fn rssi(&self) -> Option<i32> {
        self.driver.rssi()
    }

    /// Startup bring-up: issue the association request and wait for the
    /// link with bounded retries and a delay between checks.
    pub async fn bring_up_blocking(
        &mut self,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<()> {
        self.start_association().await?;

        for _ in 0..max_attempts {
            if self.driver.status() == DriverStatus::Up {
                self.mark_associated();
                return Ok(());
            }
            debug!("Waiting for network association...");
            tokio::time::sleep(retry_delay).await;
        }

        self.state = LinkState::Disassociated;
        Err(BridgeError::AssociationTimeout {
            attempts: max_attempts,
        })
    }

    /// Steady-state check, invoked once per loop tick
    ///
    /// Never blocks beyond the driver calls themselves; a failed
    /// association request just leaves the state at `Disassociated` for
    /// the next tick.
    pub async fn poll(&mut self) -> LinkState {
        match self.state {
            LinkState::Associated => {
                if self.driver.status() != DriverStatus::Up {
                    warn!("Network association lost");
                    self.state = LinkState::Disassociated;
                    self.advertised = false;
                }
            }
            LinkState::Associating => {
                if self.driver.status() == DriverStatus::Up {
                    self.mark_associated();
                }
            }
            LinkState::Disassociated => {
                if let Err(e) = self.start_association().await {
                    warn!(error = %e, "Association request failed");
                    self.state = LinkState::Disassociated;
                }
            }
        }
        self.state
    }

    async fn start_association(&mut self) -> Result<()> {
        if self.settings.is_configured() {
            self.mode = NetworkMode::Client;
            info!(ssid = %self.settings.ssid, "Joining network as client");
            self.driver
                .join(&self.settings.ssid, &self.settings.password)
                .await?;
        } else {
            self.mode = NetworkMode::AccessPoint;
            info!(ssid = FALLBACK_AP_SSID, "No credentials stored, starting setup access point");
            self.driver
                .start_access_point(FALLBACK_AP_SSID, FALLBACK_AP_PSK)
                .await?;
        }
        self.state = LinkState::Associating;
        Ok(())
    }

    fn mark_associated(&mut self) {
        self.state = LinkState::Associated;
        if !self.advertised {
            // Advertise the local address once per association
            match self.driver.local_addr() {
                Some(addr) => info!(mode = ?self.mode, %addr, "Network associated"),
                None => info!(mode = ?self.mode, "Network associated"),
            }
            self.advertised = true;
        }
    }
}

/// Driver for hosts whose operating system already manages the network
///
/// Association is considered permanently up; the driver only reports
/// addressing details. Useful when the bridge runs on a Linux box rather
/// than bare-metal hardware.
pub struct HostNetwork {
    hostname: String,
    hardware_addr: String,
}

impl Default for HostNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl HostNetwork {
    /// Create a driver reading the host name from `/etc/hostname` and the
    /// hardware address from sysfs
    pub fn new() -> Self {
        let hostname = std::fs::read_to_string("/etc/hostname")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| crate::config::DEVICE_TYPE.to_string());
        let hardware_addr = first_hardware_addr(std::path::Path::new("/sys/class/net"))
            .unwrap_or_else(|| "00:00:00:00:00:00".to_string());
        Self {
            hostname,
            hardware_addr,
        }
    }
}

/// Hardware address of the first non-loopback interface under `root`
/// (interfaces scanned in name order), or `None` when the host has none.
fn first_hardware_addr(root: &std::path::Path) -> Option<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort_unstable();

    for name in names {
        if name == "lo" {
            continue;
        }
        let Ok(addr) = std::fs::read_to_string(root.join(&name).join("address")) else {
            continue;
        };
        let addr = addr.trim();
        if !addr.is_empty() && addr != "00:00:00:00:00:00" {
            return Some(addr.to_string());
        }
    }
    None
}

#[async_trait]
impl WirelessDriver for HostNetwork {
    async fn join(&mut self, _ssid: &str, _password: &str) -> Result<()> {
        Ok(())
    }

    async fn start_access_point(&mut self, _ssid: &str, _password: &str) -> Result<()> {
        Ok(())
    }

    fn status(&self) -> DriverStatus {
        DriverStatus::Up
    }

    fn local_addr(&self) -> Option<IpAddr> {
        // Routing-table probe; no packets are sent
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:53").ok()?;
        socket.local_addr().ok().map(|a| a.ip())
    }

    fn hardware_addr(&self) -> String {
        self.hardware_addr.clone()
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn rssi(&self) -> Option<i32> {
        None
    }

    fn name(&self) -> &str {
        "HostNetwork"
    }
}

/// Scriptable wireless driver for tests
#[derive(Debug, Default)]
pub struct MockWireless {
    /// Ssid passed to the last `join`
    pub joined: Option<String>,
    /// Ssid passed to the last `start_access_point`
    pub access_point: Option<String>,
    /// Status checks remaining before the link reports up
    polls_until_up: std::cell::Cell<u32>,
    started: bool,
}

impl MockWireless {
    /// Create a driver whose link comes up after `polls_until_up` status
    /// checks following an association request
    pub fn new(polls_until_up: u32) -> Self {
        Self {
            polls_until_up: std::cell::Cell::new(polls_until_up),
            ..Self::default()
        }
    }
}

#[async_trait]
impl WirelessDriver for MockWireless {
    async fn join(&mut self, ssid: &str, _password: &str) -> Result<()> {
        self.joined = Some(ssid.to_string());
        self.started = true;
        Ok(())
    }

    async fn start_access_point(&mut self, ssid: &str, _password: &str) -> Result<()> {
        self.access_point = Some(ssid.to_string());
        self.started = true;
        Ok(())
    }

    fn status(&self) -> DriverStatus {
        if !self.started {
            return DriverStatus::Idle;
        }
        let remaining = self.polls_until_up.get();
        if remaining == 0 {
            DriverStatus::Up
        } else {
            self.polls_until_up.set(remaining - 1);
            DriverStatus::Joining
        }
    }

    fn local_addr(&self) -> Option<IpAddr> {
        Some(IpAddr::from([192, 168, 1, 42]))
    }

    fn hardware_addr(&self) -> String {
        "AA:BB:CC:DD:EE:FF".to_string()
    }

    fn hostname(&self) -> String {
        "test-bridge".to_string()
    }

    fn rssi(&self) -> Option<i32> {
        Some(-55)
    }

    fn name(&self) -> &str {
        "MockWireless"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_state_display() {
        assert_eq!(LinkState::Associated.to_string(), "associated");
        assert_eq!(LinkState::Disassociated.to_string(), "disassociated");
    }

    #[tokio::test]
    async fn test_no_credentials_starts_access_point() {
        let mut supervisor =
            NetworkSupervisor::new(MockWireless::new(0), NetworkSettings::default());

        let state = supervisor.poll().await;
        assert_eq!(state, LinkState::Associating);
        assert_eq!(supervisor.mode(), NetworkMode::AccessPoint);

        let state = supervisor.poll().await;
        assert_eq!(state, LinkState::Associated);

        // Fallback name used, and never a client join
        assert_eq!(
            supervisor.driver().access_point.as_deref(),
            Some(FALLBACK_AP_SSID)
        );
        assert!(supervisor.driver().joined.is_none());
    }

    #[tokio::test]
    async fn test_credentials_join_as_client() {
        let settings = NetworkSettings {
            ssid: "home-net".to_string(),
            password: "hunter2".to_string(),
        };
        let mut supervisor = NetworkSupervisor::new(MockWireless::new(0), settings);

        supervisor.poll().await;
        assert_eq!(supervisor.mode(), NetworkMode::Client);
        assert_eq!(supervisor.driver().joined.as_deref(), Some("home-net"));
        supervisor.poll().await;
        assert_eq!(supervisor.state(), LinkState::Associated);
    }

    #[tokio::test]
    async fn test_bring_up_blocking() {
        let mut supervisor =
            NetworkSupervisor::new(MockWireless::new(2), NetworkSettings::default());
        supervisor
            .bring_up_blocking(5, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(supervisor.state(), LinkState::Associated);
        assert_eq!(supervisor.local_addr(), Some(IpAddr::from([192, 168, 1, 42])));
    }

    #[tokio::test]
    async fn test_bring_up_bounded() {
        let mut supervisor =
            NetworkSupervisor::new(MockWireless::new(100), NetworkSettings::default());
        let err = supervisor
            .bring_up_blocking(3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ASSOCIATION_TIMEOUT");
        assert_eq!(supervisor.state(), LinkState::Disassociated);
    }

    #[test]
    fn test_hardware_addr_skips_loopback() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("lo")).unwrap();
        std::fs::write(dir.path().join("lo/address"), "00:00:00:00:00:00\n").unwrap();
        std::fs::create_dir(dir.path().join("eth0")).unwrap();
        std::fs::write(dir.path().join("eth0/address"), "aa:bb:cc:dd:ee:ff\n").unwrap();

        assert_eq!(
            first_hardware_addr(dir.path()).as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }

    #[test]
    fn test_hardware_addr_absent_without_interfaces() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(first_hardware_addr(dir.path()).is_none());
    }

    #[tokio::test]
    async fn test_association_loss_detected() {
        let mut supervisor =
            NetworkSupervisor::new(MockWireless::new(0), NetworkSettings::default());
        supervisor.poll().await;
        supervisor.poll().await;
        assert_eq!(supervisor.state(), LinkState::Associated);

        // Driver drops the link
        supervisor.driver.polls_until_up.set(5);
        let state = supervisor.poll().await;
        assert_eq!(state, LinkState::Disassociated);
    }
}
