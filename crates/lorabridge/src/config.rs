//! Configuration schema for the bridge
//!
//! This module provides the typed settings structures persisted by the
//! configuration store, the compiled-in defaults used on first boot, and
//! the bus channel layout derived from the device type.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Device type, used for channel names and discovery identifiers
pub const DEVICE_TYPE: &str = "lora-gateway";

/// Default radio frequency in Hz (EU 868 band)
pub const DEFAULT_FREQUENCY_HZ: u64 = 866_000_000;

/// Default channel-isolation code (radio sync word), ranges 0x00-0xFF
pub const DEFAULT_ISOLATION_CODE: u8 = 0xF3;

/// Default bus port (MQTT)
pub const DEFAULT_BUS_PORT: u16 = 1883;

/// Default self-telemetry reporting interval
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Access-point name used when no network credentials are stored
pub const FALLBACK_AP_SSID: &str = "lora-gateway-setup";

/// Access-point secret used when no network credentials are stored
pub const FALLBACK_AP_PSK: &str = "bridge-setup";

/// Configuration namespaces persisted by the store
pub const NAMESPACE_NETWORK: &str = "network";
/// Bus endpoint namespace
pub const NAMESPACE_BUS: &str = "bus";
/// Radio settings namespace
pub const NAMESPACE_RADIO: &str = "radio";

/// Local wireless network credentials
///
/// An empty `ssid` means "nothing configured yet" and puts the network
/// supervisor into access-point mode so the settings endpoint stays
/// reachable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Network name to join as a client
    #[serde(default)]
    pub ssid: String,

    /// Network secret
    #[serde(default)]
    pub password: String,
}

impl NetworkSettings {
    /// Whether a client join can be attempted at all
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

/// Message bus endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSettings {
    /// Broker host name or address; empty = bus publishing disabled
    #[serde(default)]
    pub host: String,

    /// Broker port
    #[serde(default = "default_bus_port")]
    pub port: u16,

    /// Broker user name (optional, empty = anonymous)
    #[serde(default)]
    pub username: String,

    /// Broker secret
    #[serde(default)]
    pub password: String,

    /// Client identifier presented to the broker
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_bus_port() -> u16 {
    DEFAULT_BUS_PORT
}

fn default_client_id() -> String {
    DEVICE_TYPE.to_string()
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_BUS_PORT,
            username: String::new(),
            password: String::new(),
            client_id: DEVICE_TYPE.to_string(),
        }
    }
}

impl BusSettings {
    /// Whether the endpoint is complete enough to attempt a connection
    ///
    /// An incomplete endpoint is not an error: the bridge runs in degraded
    /// mode and skips all publishes.
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

/// Radio link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioSettings {
    /// Carrier frequency in Hz
    #[serde(default = "default_frequency")]
    pub frequency_hz: u64,

    /// Channel-isolation code shared with the sender
    #[serde(default = "default_isolation_code")]
    pub isolation_code: u8,

    /// Self-telemetry reporting interval
    #[serde(with = "humantime_serde", default = "default_report_interval")]
    pub report_interval: Duration,
}

fn default_frequency() -> u64 {
    DEFAULT_FREQUENCY_HZ
}

fn default_isolation_code() -> u8 {
    DEFAULT_ISOLATION_CODE
}

fn default_report_interval() -> Duration {
    DEFAULT_REPORT_INTERVAL
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            isolation_code: DEFAULT_ISOLATION_CODE,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

/// Bus session reconnect behavior
///
/// The bridge retries a failed broker connection forever, but never faster
/// than this back-off allows. The counter resets on a successful connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Upper bound for the doubled delay
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Timeout for a single connect attempt
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt number `attempt` (0-based), doubled per attempt
    /// and capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let delay = self
            .initial_delay
            .saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        delay.min(self.max_delay)
    }
}

/// Bus channel layout derived from the device type
#[derive(Debug, Clone)]
pub struct Topics {
    device_type: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEVICE_TYPE)
    }
}

impl Topics {
    /// Create a channel layout for a device type
    pub fn new(device_type: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
        }
    }

    /// Device type this layout was built for
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Liveness channel, retained `"connected"` payload
    pub fn status(&self) -> String {
        format!("{}/status", self.device_type)
    }

    /// Telemetry channel: forwarded radio payloads, signal records, and
    /// device self-telemetry
    pub fn state(&self) -> String {
        format!("{}/state", self.device_type)
    }

    /// Discovery channel for one sensor field
    pub fn discovery(&self, field: &str) -> String {
        format!("discovery/sensor/{}/{}/config", self.device_type, field)
    }
}

/// Aggregate of all persisted settings, mostly for tests and the settings
/// endpoint; the store reads and writes the namespaces independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Local wireless network credentials
    #[serde(default)]
    pub network: NetworkSettings,

    /// Message bus endpoint
    #[serde(default)]
    pub bus: BusSettings,

    /// Radio link settings
    #[serde(default)]
    pub radio: RadioSettings,
}

/// Builder for [`BridgeConfig`]
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set network credentials
    pub fn network(mut self, ssid: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.network.ssid = ssid.into();
        self.config.network.password = password.into();
        self
    }

    /// Set the bus endpoint host and port
    pub fn bus_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.bus.host = host.into();
        self.config.bus.port = port;
        self
    }

    /// Set broker credentials
    pub fn bus_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.config.bus.username = username.into();
        self.config.bus.password = password.into();
        self
    }

    /// Set the broker client identifier
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.bus.client_id = id.into();
        self
    }

    /// Set the channel-isolation code
    pub fn isolation_code(mut self, code: u8) -> Self {
        self.config.radio.isolation_code = code;
        self
    }

    /// Set the self-telemetry reporting interval
    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.config.radio.report_interval = interval;
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert!(!config.network.is_configured());
        assert!(!config.bus.is_configured());
        assert_eq!(config.radio.isolation_code, DEFAULT_ISOLATION_CODE);
        assert_eq!(config.radio.frequency_hz, DEFAULT_FREQUENCY_HZ);
        assert_eq!(config.bus.client_id, DEVICE_TYPE);
    }

    #[test]
    fn test_builder() {
        let config = BridgeConfigBuilder::new()
            .network("home-net", "hunter2")
            .bus_endpoint("broker.local", 1884)
            .isolation_code(0xA5)
            .build();

        assert!(config.network.is_configured());
        assert!(config.bus.is_configured());
        assert_eq!(config.bus.port, 1884);
        assert_eq!(config.radio.isolation_code, 0xA5);
    }

    #[test]
    fn test_topics() {
        let topics = Topics::default();
        assert_eq!(topics.status(), "lora-gateway/status");
        assert_eq!(topics.state(), "lora-gateway/state");
        assert_eq!(
            topics.discovery("temperature"),
            "discovery/sensor/lora-gateway/temperature/config"
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(reconnect.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(reconnect.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(reconnect.delay_for_attempt(30), Duration::from_secs(60));
    }

    #[test]
    fn test_report_interval_roundtrip() {
        let radio = RadioSettings::default();
        let json = serde_json::to_string(&radio).unwrap();
        let back: RadioSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.report_interval, DEFAULT_REPORT_INTERVAL);
    }
}
