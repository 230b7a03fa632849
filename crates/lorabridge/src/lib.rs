//! LoRa Telemetry Bridge
//!
//! Receives short telemetry packets over a long-range, low-bandwidth radio
//! link and republishes them onto an MQTT message bus for a home-automation
//! platform, announcing its sensors for auto-discovery along the way.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         IngestLoop                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌────────────┐   ┌────────────────────┐   ┌─────────────────┐  │
//! │  │ RadioLink  │──►│ forward + signal   │──►│ BusSession      │  │
//! │  │ (trait)    │   │ record             │   │ (MQTT)          │  │
//! │  └────────────┘   └────────────────────┘   └─────────────────┘  │
//! │                                                 ▲       ▲        │
//! │  ┌─────────────────────┐                        │       │        │
//! │  │ NetworkSupervisor   │── gates connects ──────┘       │        │
//! │  └─────────────────────┘                                │        │
//! │  ┌─────────────────────┐                                │        │
//! │  │ DiscoveryPublisher  │── retained descriptors ────────┘        │
//! │  └─────────────────────┘                                         │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//!            ▲
//!            │ reads endpoint / credentials
//!   ┌─────────────────┐        ┌──────────────────────────────┐
//!   │ ConfigStore     │◄───────│ settings endpoint (separate  │
//!   │ (namespaced)    │  merge │ task, restart after save)    │
//!   └─────────────────┘        └──────────────────────────────┘
//! ```
//!
//! The loop is the single scheduling authority: every component is invoked
//! synchronously from it, one tick at a time. The radio is polled every
//! tick no matter what state the network or broker session is in, so a
//! reconnect never costs an inbound frame its poll slot.
//!
//! # Failure policy
//!
//! Transient link failures (radio, network, broker) are retried forever
//! and never terminate the loop. An unconfigured bus endpoint is a
//! feature switch, not an error: the bridge keeps ingesting and logging
//! with every publish skipped. Storage read faults degrade to compiled-in
//! defaults; write faults surface to the settings endpoint.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bus;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ingest;
pub mod net;
pub mod radio;
pub mod store;
pub mod telemetry;

// Re-exports for convenience
pub use bus::{BusLink, BusSession, MockBus, MqttLink, SessionState, SessionStats};
pub use config::{
    BridgeConfig, BridgeConfigBuilder, BusSettings, NetworkSettings, RadioSettings,
    ReconnectConfig, Topics,
};
pub use discovery::{DiscoveryPublisher, SensorCategory, SensorDescriptor, ValuePath, SENSORS};
pub use error::{BridgeError, Result};
pub use ingest::{IngestLoop, IngestStats, LoopExit, LoopHandle};
pub use net::{
    DriverStatus, HostNetwork, LinkState, MockWireless, NetworkMode, NetworkSupervisor,
    WirelessDriver,
};
pub use radio::{MockRadio, RadioFrame, RadioLink, UdpRadio};
pub use store::{ConfigPatch, ConfigStore};
pub use telemetry::{DeviceStatusRecord, SensorReading, SignalRecord, Watermeter};

// Compiled-in defaults re-exports
pub use config::{
    DEFAULT_BUS_PORT, DEFAULT_FREQUENCY_HZ, DEFAULT_ISOLATION_CODE, DEFAULT_REPORT_INTERVAL,
    DEVICE_TYPE, FALLBACK_AP_PSK, FALLBACK_AP_SSID,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_constants() {
        assert_eq!(DEVICE_TYPE, "lora-gateway");
        assert_eq!(DEFAULT_ISOLATION_CODE, 0xF3);
        assert_eq!(DEFAULT_FREQUENCY_HZ, 866_000_000);
    }
}
