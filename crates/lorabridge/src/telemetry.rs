//! Telemetry payload types
//!
//! The canonical flat payload the remote sender transmits over the radio,
//! and the bridge's own self-telemetry record. The bridge never parses or
//! validates inbound frames (they are forwarded byte-for-byte); these types
//! are the sender-side packaging contract and the outbound status format.

use serde::{Deserialize, Serialize};

/// Canonical sensor payload packaged by the remote sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Relative humidity in percent
    pub humidity: f64,
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Monotonic sender-assigned packet counter; may wrap
    pub packet_number: u64,
    /// Free-form message
    pub message: String,
    /// Optional grouped water meter metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermeter: Option<Watermeter>,
}

impl SensorReading {
    /// Serialize for radio transmission
    pub fn to_frame(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Water meter sub-object
///
/// `current` is only present when the reading has actually advanced; a
/// stalled or rolled-back meter keeps publishing `previous` and the
/// diagnostics without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermeter {
    /// Current reading, present only when greater than `previous`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    /// Last accepted reading
    pub previous: f64,
    /// Raw digit-recognition output
    pub raw: String,
    /// Flow rate as reported by the meter reader
    pub rate: String,
    /// Reader error text, empty when healthy
    pub error: String,
}

impl Watermeter {
    /// Package a meter reading, applying the advance-only rule for
    /// `current`.
    pub fn package(
        current: f64,
        previous: f64,
        raw: impl Into<String>,
        rate: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            current: (current > previous).then_some(current),
            previous,
            raw: raw.into(),
            rate: rate.into(),
            error: error.into(),
        }
    }
}

/// Bridge self-telemetry, regenerated every reporting interval
///
/// Published to the state channel alongside forwarded sensor payloads;
/// never retained in memory between generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusRecord {
    /// Seconds since process start
    pub uptime: u64,
    /// Hardware address of the network interface
    pub hardware_address: String,
    /// Host name advertised on the network
    pub hostname: String,
    /// Local network signal strength in dBm, when measurable
    pub wifi_signal: Option<i32>,
    /// Local network address, when associated
    pub local_address: Option<String>,
}

/// One-field record carrying the signal strength of a received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Received signal strength in dBm
    pub signal: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_reading_roundtrip() {
        let reading = SensorReading {
            humidity: 60.0,
            temperature: 21.5,
            packet_number: 7,
            message: "Hello".to_string(),
            watermeter: None,
        };
        let frame = reading.to_frame().unwrap();
        let back: SensorReading = serde_json::from_slice(&frame).unwrap();
        assert_eq!(back, reading);
        // No watermeter key at all when absent
        assert!(!String::from_utf8(frame).unwrap().contains("watermeter"));
    }

    #[test]
    fn test_watermeter_advance_includes_current() {
        let meter = Watermeter::package(6.5, 6.0, "006.5", "0.5/h", "");
        assert_eq!(meter.current, Some(6.5));

        let json = serde_json::to_value(&meter).unwrap();
        assert_eq!(json["current"], 6.5);
        assert_eq!(json["previous"], 6.0);
    }

    #[test]
    fn test_watermeter_stall_omits_current() {
        // 5.2 is not greater than 6.0: the serialized object must omit
        // `current` but keep everything else unchanged
        let meter = Watermeter::package(5.2, 6.0, "005.2", "0/h", "read error");
        assert_eq!(meter.current, None);

        let json = serde_json::to_value(&meter).unwrap();
        assert!(json.get("current").is_none());
        assert_eq!(json["previous"], 6.0);
        assert_eq!(json["raw"], "005.2");
        assert_eq!(json["rate"], "0/h");
        assert_eq!(json["error"], "read error");
    }

    #[test]
    fn test_watermeter_equal_omits_current() {
        let meter = Watermeter::package(6.0, 6.0, "006.0", "0/h", "");
        assert_eq!(meter.current, None);
    }

    #[test]
    fn test_signal_record_shape() {
        let record = SignalRecord { signal: -42 };
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"signal":-42}"#
        );
    }

    #[test]
    fn test_status_record_keeps_null_fields() {
        let record = DeviceStatusRecord {
            uptime: 120,
            hardware_address: "AA:BB:CC:DD:EE:FF".to_string(),
            hostname: "bridge".to_string(),
            wifi_signal: None,
            local_address: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        // Discovery templates address these fields, so they stay present
        assert!(json.get("wifi_signal").is_some());
        assert!(json.get("local_address").is_some());
    }
}
