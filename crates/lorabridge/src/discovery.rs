//! Sensor discovery publisher
//!
//! On every session establishment the bridge announces each exposed metric
//! on a retained discovery channel so a downstream home-automation platform
//! can configure its display without manual setup. Descriptors are built
//! from a compile-time table and are idempotent: republishing identical
//! content after every reconnect is correct and lets the consumer self-heal
//! after its own restart.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::bus::{BusLink, BusSession};
use crate::config::Topics;
use crate::error::Result;

/// Where a metric's value lives inside the state channel payload
///
/// One level of nesting is supported for grouped metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuePath {
    /// Top-level field of the payload
    Field(&'static str),
    /// Field of a named sub-object
    Nested(&'static str, &'static str),
}

impl ValuePath {
    /// Render the extraction template for the downstream consumer
    pub fn template(&self) -> String {
        match self {
            ValuePath::Field(field) => format!("{{{{ value_json.{field} }}}}"),
            ValuePath::Nested(group, field) => {
                format!("{{{{ value_json.{group}.{field} }}}}")
            }
        }
    }
}

/// How a metric is presented to the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCategory {
    /// Primary measurement, shown by default
    Primary,
    /// Device health metric, tucked into the diagnostic section
    Diagnostic,
    /// Member of a grouped sub-object; addressed through a nested path
    Grouped,
}

/// Static metadata for one exposed metric
///
/// Fixed at compile time; the full set is enumerated once per session
/// establishment.
#[derive(Debug, Clone, Copy)]
pub struct SensorDescriptor {
    /// Stable field key, also used in the discovery channel name
    pub field: &'static str,
    /// Display name
    pub name: &'static str,
    /// Icon identifier
    pub icon: &'static str,
    /// Unit of measurement; empty = unitless
    pub unit: &'static str,
    /// Device class hint; empty = omitted from the descriptor
    pub device_class: &'static str,
    /// State class hint; empty = omitted from the descriptor
    pub state_class: &'static str,
    /// Presentation category
    pub category: SensorCategory,
    /// Value-extraction path within the state payload
    pub path: ValuePath,
}

/// Every metric the bridge exposes
pub const SENSORS: &[SensorDescriptor] = &[
    // Radio telemetry forwarded from the sender
    SensorDescriptor {
        field: "temperature",
        name: "Temperature",
        icon: "mdi:thermometer",
        unit: "°C",
        device_class: "temperature",
        state_class: "measurement",
        category: SensorCategory::Primary,
        path: ValuePath::Field("temperature"),
    },
    SensorDescriptor {
        field: "humidity",
        name: "Humidity",
        icon: "mdi:water-percent",
        unit: "%",
        device_class: "humidity",
        state_class: "measurement",
        category: SensorCategory::Primary,
        path: ValuePath::Field("humidity"),
    },
    SensorDescriptor {
        field: "message",
        name: "Message",
        icon: "mdi:message-text",
        unit: "",
        device_class: "",
        state_class: "",
        category: SensorCategory::Primary,
        path: ValuePath::Field("message"),
    },
    SensorDescriptor {
        field: "packet_number",
        name: "Packet number",
        icon: "mdi:counter",
        unit: "",
        device_class: "",
        state_class: "",
        category: SensorCategory::Diagnostic,
        path: ValuePath::Field("packet_number"),
    },
    SensorDescriptor {
        field: "signal",
        name: "Radio signal strength",
        icon: "mdi:signal",
        unit: "dBm",
        device_class: "signal_strength",
        state_class: "measurement",
        category: SensorCategory::Diagnostic,
        path: ValuePath::Field("signal"),
    },
    // Water meter sub-object
    SensorDescriptor {
        field: "watermeter_current",
        name: "Water meter reading",
        icon: "mdi:water",
        unit: "m³",
        device_class: "water",
        state_class: "total_increasing",
        category: SensorCategory::Grouped,
        path: ValuePath::Nested("watermeter", "current"),
    },
    SensorDescriptor {
        field: "watermeter_previous",
        name: "Water meter previous reading",
        icon: "mdi:water-outline",
        unit: "m³",
        device_class: "",
        state_class: "",
        category: SensorCategory::Grouped,
        path: ValuePath::Nested("watermeter", "previous"),
    },
    SensorDescriptor {
        field: "watermeter_rate",
        name: "Water flow rate",
        icon: "mdi:water-pump",
        unit: "",
        device_class: "",
        state_class: "",
        category: SensorCategory::Grouped,
        path: ValuePath::Nested("watermeter", "rate"),
    },
    SensorDescriptor {
        field: "watermeter_error",
        name: "Water meter error",
        icon: "mdi:alert-circle-outline",
        unit: "",
        device_class: "",
        state_class: "",
        category: SensorCategory::Grouped,
        path: ValuePath::Nested("watermeter", "error"),
    },
    // Device self-telemetry
    SensorDescriptor {
        field: "uptime",
        name: "Uptime",
        icon: "mdi:timer-outline",
        unit: "s",
        device_class: "duration",
        state_class: "total_increasing",
        category: SensorCategory::Diagnostic,
        path: ValuePath::Field("uptime"),
    },
    SensorDescriptor {
        field: "wifi_signal",
        name: "Network signal strength",
        icon: "mdi:wifi",
        unit: "dBm",
        device_class: "signal_strength",
        state_class: "measurement",
        category: SensorCategory::Diagnostic,
        path: ValuePath::Field("wifi_signal"),
    },
    SensorDescriptor {
        field: "local_address",
        name: "Local address",
        icon: "mdi:ip-network",
        unit: "",
        device_class: "",
        state_class: "",
        category: SensorCategory::Diagnostic,
        path: ValuePath::Field("local_address"),
    },
];

/// Builds and publishes the discovery descriptors
pub struct DiscoveryPublisher {
    sensors: &'static [SensorDescriptor],
}

impl Default for DiscoveryPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryPublisher {
    /// Publisher over the full compiled-in sensor table
    pub fn new() -> Self {
        Self { sensors: SENSORS }
    }

    /// Publisher over a custom table (tests)
    pub fn with_sensors(sensors: &'static [SensorDescriptor]) -> Self {
        Self { sensors }
    }

    /// Build the descriptor payload for one sensor
    ///
    /// Key order is deterministic (serde_json maps serialize sorted by
    /// key), so repeated runs produce byte-identical documents.
    pub fn payload(&self, topics: &Topics, sensor: &SensorDescriptor) -> Value {
        let mut doc = Map::new();
        doc.insert(
            "unique_id".to_string(),
            json!(format!("{}_{}", topics.device_type(), sensor.field)),
        );
        doc.insert("name".to_string(), json!(sensor.name));
        doc.insert("icon".to_string(), json!(sensor.icon));
        if !sensor.unit.is_empty() {
            doc.insert("unit_of_measurement".to_string(), json!(sensor.unit));
        }
        doc.insert("state_topic".to_string(), json!(topics.state()));
        doc.insert("value_template".to_string(), json!(sensor.path.template()));
        if !sensor.device_class.is_empty() {
            doc.insert("device_class".to_string(), json!(sensor.device_class));
        }
        if !sensor.state_class.is_empty() {
            doc.insert("state_class".to_string(), json!(sensor.state_class));
        }
        // Only plain diagnostic metrics carry the category attribute;
        // grouped metrics are addressed through their nested path instead.
        if sensor.category == SensorCategory::Diagnostic {
            doc.insert("entity_category".to_string(), json!("diagnostic"));
        }
        Value::Object(doc)
    }

    /// Publish every descriptor, retained
    ///
    /// A no-op per descriptor while the session is not connected (the
    /// session absorbs those), so calling this only makes sense right
    /// after `ensure_connected` reports a fresh session.
    pub async fn publish_all<B: BusLink>(&self, session: &mut BusSession<B>) -> Result<usize> {
        let topics = session.topics().clone();
        let mut count = 0;
        for sensor in self.sensors {
            let channel = topics.discovery(sensor.field);
            let payload = serde_json::to_vec(&self.payload(&topics, sensor))?;
            session.publish(&channel, &payload, true).await?;
            count += 1;
        }
        debug!(count, "Discovery descriptors published");
        Ok(count)
    }
}
