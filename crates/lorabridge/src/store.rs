//! Persistent configuration store
//!
//! Durable key-value records grouped into three namespaces (`network`,
//! `bus`, `radio`), one JSON document per namespace on disk. Writes go
//! through a temp-file-then-rename so a crash never leaves a namespace
//! half-written. On first boot the store seeds every namespace with the
//! compiled-in defaults before returning any value.
//!
//! Read faults degrade to defaults; write faults surface to the caller,
//! who must not assume persistence succeeded.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{
    BridgeConfig, BusSettings, NetworkSettings, RadioSettings, NAMESPACE_BUS, NAMESPACE_NETWORK,
    NAMESPACE_RADIO,
};
use crate::error::{BridgeError, Result};

/// Marker file written once all namespaces have been seeded with defaults
const INIT_MARKER: &str = ".initialized";

/// Durable namespaced configuration store
///
/// There is exactly one runtime mutator (the ingestion loop never writes;
/// the settings endpoint is the only writer), but reads and writes may race
/// across tasks, so all file access is serialized behind one lock.
pub struct ConfigStore {
    root: PathBuf,
    io_lock: Mutex<()>,
}

impl ConfigStore {
    /// Open the store rooted at `root`, seeding defaults on first boot
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let store = Self {
            root,
            io_lock: Mutex::new(()),
        };

        if !store.root.join(INIT_MARKER).exists() {
            info!("First boot: seeding configuration defaults");
            store.write_namespace(NAMESPACE_NETWORK, &NetworkSettings::default())?;
            store.write_namespace(NAMESPACE_BUS, &BusSettings::default())?;
            store.write_namespace(NAMESPACE_RADIO, &RadioSettings::default())?;
            fs::write(store.root.join(INIT_MARKER), b"1")?;
        }

        Ok(store)
    }

    /// Directory holding the namespace documents
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Network credentials; defaults on read fault
    pub fn network(&self) -> NetworkSettings {
        self.read_namespace(NAMESPACE_NETWORK)
    }

    /// Bus endpoint settings; defaults on read fault
    pub fn bus(&self) -> BusSettings {
        self.read_namespace(NAMESPACE_BUS)
    }

    /// Radio settings; defaults on read fault
    pub fn radio(&self) -> RadioSettings {
        self.read_namespace(NAMESPACE_RADIO)
    }

    /// Snapshot of every namespace, for the settings endpoint
    pub fn snapshot(&self) -> BridgeConfig {
        BridgeConfig {
            network: self.network(),
            bus: self.bus(),
            radio: self.radio(),
        }
    }

    /// Persist network credentials
    pub fn save_network(&self, settings: &NetworkSettings) -> Result<()> {
        self.write_namespace(NAMESPACE_NETWORK, settings)
    }

    /// Persist bus endpoint settings
    pub fn save_bus(&self, settings: &BusSettings) -> Result<()> {
        self.write_namespace(NAMESPACE_BUS, settings)
    }

    /// Persist radio settings
    pub fn save_radio(&self, settings: &RadioSettings) -> Result<()> {
        self.write_namespace(NAMESPACE_RADIO, settings)
    }

    /// Merge a partial update into the existing records
    ///
    /// Only fields present in the patch change; everything else keeps its
    /// stored value. Each touched namespace is rewritten atomically.
    pub fn apply_patch(&self, patch: &ConfigPatch) -> Result<()> {
        if patch.touches_network() {
            let mut network = self.network();
            if let Some(ssid) = &patch.ssid {
                network.ssid = ssid.clone();
            }
            if let Some(password) = &patch.network_password {
                network.password = password.clone();
            }
            self.save_network(&network)?;
        }

        if patch.touches_bus() {
            let mut bus = self.bus();
            if let Some(host) = &patch.bus_host {
                bus.host = host.clone();
            }
            if let Some(port) = patch.bus_port {
                bus.port = port;
            }
            if let Some(username) = &patch.bus_username {
                bus.username = username.clone();
            }
            if let Some(password) = &patch.bus_password {
                bus.password = password.clone();
            }
            if let Some(client_id) = &patch.bus_client_id {
                bus.client_id = client_id.clone();
            }
            self.save_bus(&bus)?;
        }

        if patch.touches_radio() {
            let mut radio = self.radio();
            if let Some(code) = patch.isolation_code {
                radio.isolation_code = code;
            }
            if let Some(secs) = patch.report_interval_secs {
                radio.report_interval = Duration::from_secs(secs);
            }
            self.save_radio(&radio)?;
        }

        Ok(())
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{namespace}.json"))
    }

    fn read_namespace<T: DeserializeOwned + Default>(&self, namespace: &str) -> T {
        let _guard = self.io_lock.lock();
        let path = self.namespace_path(namespace);
        match fs::read(&path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!(namespace, error = %e, "Corrupt namespace record, using defaults");
                    T::default()
                }
            },
            Err(e) => {
                // Absent or unreadable key falls back to defaults
                debug!(namespace, error = %e, "Namespace not readable, using defaults");
                T::default()
            }
        }
    }

    fn write_namespace<T: Serialize>(&self, namespace: &str, value: &T) -> Result<()> {
        let _guard = self.io_lock.lock();
        let path = self.namespace_path(namespace);
        let tmp = self.root.join(format!("{namespace}.json.tmp"));

        let raw = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp, &raw).map_err(|e| BridgeError::StoreWriteFailed {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        })?;
        fs::rename(&tmp, &path).map_err(|e| BridgeError::StoreWriteFailed {
            namespace: namespace.to_string(),
            reason: e.to_string(),
        })?;

        debug!(namespace, "Namespace persisted");
        Ok(())
    }
}

/// Partial configuration update from the settings endpoint
///
/// `None` means "leave the stored value alone".
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    /// New network name
    pub ssid: Option<String>,
    /// New network secret
    pub network_password: Option<String>,
    /// New broker host
    pub bus_host: Option<String>,
    /// New broker port
    pub bus_port: Option<u16>,
    /// New broker user
    pub bus_username: Option<String>,
    /// New broker secret
    pub bus_password: Option<String>,
    /// New broker client identifier
    pub bus_client_id: Option<String>,
    /// New channel-isolation code
    pub isolation_code: Option<u8>,
    /// New reporting interval, in seconds
    pub report_interval_secs: Option<u64>,
}

impl ConfigPatch {
    fn touches_network(&self) -> bool {
        self.ssid.is_some() || self.network_password.is_some()
    }

    fn touches_bus(&self) -> bool {
        self.bus_host.is_some()
            || self.bus_port.is_some()
            || self.bus_username.is_some()
            || self.bus_password.is_some()
            || self.bus_client_id.is_some()
    }

    fn touches_radio(&self) -> bool {
        self.isolation_code.is_some() || self.report_interval_secs.is_some()
    }

    /// Whether the patch changes anything at all
    pub fn is_empty(&self) -> bool {
        !self.touches_network() && !self.touches_bus() && !self.touches_radio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_BUS_PORT, DEFAULT_ISOLATION_CODE};
    use tempfile::TempDir;

    #[test]
    fn test_first_boot_seeds_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        assert_eq!(store.network(), NetworkSettings::default());
        assert_eq!(store.bus(), BusSettings::default());
        assert_eq!(store.radio(), RadioSettings::default());
        assert!(dir.path().join(".initialized").exists());
    }

    #[test]
    fn test_save_then_reopen_roundtrip() {
        let dir = TempDir::new().unwrap();
        {
            let store = ConfigStore::open(dir.path()).unwrap();
            store
                .save_network(&NetworkSettings {
                    ssid: "home-net".to_string(),
                    password: "hunter2".to_string(),
                })
                .unwrap();
            store
                .save_bus(&BusSettings {
                    host: "broker.local".to_string(),
                    port: 1884,
                    username: "gw".to_string(),
                    password: "secret".to_string(),
                    client_id: "gw-01".to_string(),
                })
                .unwrap();
        }

        // Simulated restart: a fresh store over the same directory
        let store = ConfigStore::open(dir.path()).unwrap();
        let network = store.network();
        assert_eq!(network.ssid, "home-net");
        assert_eq!(network.password, "hunter2");
        let bus = store.bus();
        assert_eq!(bus.host, "broker.local");
        assert_eq!(bus.port, 1884);
        assert_eq!(bus.client_id, "gw-01");
    }

    #[test]
    fn test_corrupt_namespace_degrades_to_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("bus.json"), b"{not json").unwrap();

        assert_eq!(store.bus(), BusSettings::default());
    }

    #[test]
    fn test_patch_merges_instead_of_replacing() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        store
            .save_network(&NetworkSettings {
                ssid: "home-net".to_string(),
                password: "hunter2".to_string(),
            })
            .unwrap();
        store
            .save_bus(&BusSettings {
                host: "broker.local".to_string(),
                ..BusSettings::default()
            })
            .unwrap();

        // Save only a new reporting interval
        store
            .apply_patch(&ConfigPatch {
                report_interval_secs: Some(120),
                ..ConfigPatch::default()
            })
            .unwrap();

        assert_eq!(store.network().ssid, "home-net");
        assert_eq!(store.bus().host, "broker.local");
        assert_eq!(store.bus().port, DEFAULT_BUS_PORT);
        assert_eq!(store.radio().report_interval, Duration::from_secs(120));
        assert_eq!(store.radio().isolation_code, DEFAULT_ISOLATION_CODE);
    }

    #[test]
    fn test_partial_bus_patch_keeps_other_fields() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        store
            .save_bus(&BusSettings {
                host: "broker.local".to_string(),
                port: 1884,
                username: "gw".to_string(),
                password: "secret".to_string(),
                client_id: "gw-01".to_string(),
            })
            .unwrap();

        store
            .apply_patch(&ConfigPatch {
                bus_host: Some("broker2.local".to_string()),
                ..ConfigPatch::default()
            })
            .unwrap();

        let bus = store.bus();
        assert_eq!(bus.host, "broker2.local");
        assert_eq!(bus.port, 1884);
        assert_eq!(bus.username, "gw");
        assert_eq!(bus.client_id, "gw-01");
    }

    #[test]
    fn test_empty_patch() {
        assert!(ConfigPatch::default().is_empty());
        assert!(!ConfigPatch {
            ssid: Some("x".to_string()),
            ..ConfigPatch::default()
        }
        .is_empty());
    }
}
