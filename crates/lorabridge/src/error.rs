//! Error types for bridge operations
//!
//! The ingestion loop absorbs every failure at the component boundary, so
//! these errors are reported and logged but never propagate out of the
//! steady-state path. The retriable classification decides whether a
//! component simply tries again on the next tick.

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Configuration Store Errors =====
    /// Storage-layer fault while persisting a namespace
    #[error("Failed to persist namespace '{namespace}': {reason}")]
    StoreWriteFailed {
        /// Namespace being written
        namespace: String,
        /// Failure reason
        reason: String,
    },

    /// Unknown configuration namespace
    #[error("Unknown configuration namespace: {0}")]
    UnknownNamespace(String),

    // ===== Radio Errors =====
    /// Radio transceiver did not come up
    #[error("Radio bring-up failed after {attempts} attempts: {reason}")]
    RadioBringUpFailed {
        /// Attempts made before giving up
        attempts: u32,
        /// Last failure reason
        reason: String,
    },

    /// Radio read error
    #[error("Radio read error: {0}")]
    RadioRead(String),

    // ===== Network Errors =====
    /// Wireless association failed
    #[error("Network association failed: {0}")]
    AssociationFailed(String),

    /// Wireless association did not finish within the startup budget
    #[error("Network association timed out after {attempts} attempts")]
    AssociationTimeout {
        /// Attempts made before giving up
        attempts: u32,
    },

    // ===== Bus Errors =====
    /// Broker connect attempt failed
    #[error("Bus connect failed: {0}")]
    BusConnectFailed(String),

    /// Connect attempt exceeded its timeout
    #[error("Bus connect timed out after {duration_ms}ms")]
    BusConnectTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Publish failed on an established session
    #[error("Bus publish failed: {0}")]
    BusPublishFailed(String),

    /// Session dropped by the broker or transport
    #[error("Bus session lost: {0}")]
    BusSessionLost(String),

    // ===== General Errors =====
    /// Payload serialization failed
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Channel closed (loop shut down)
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Check if this error is recoverable by retrying on a later tick
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BridgeError::RadioRead(_)
                | BridgeError::AssociationFailed(_)
                | BridgeError::BusConnectFailed(_)
                | BridgeError::BusConnectTimeout { .. }
                | BridgeError::BusPublishFailed(_)
                | BridgeError::BusSessionLost(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::StoreWriteFailed { .. } => "STORE_WRITE_FAILED",
            BridgeError::UnknownNamespace(_) => "UNKNOWN_NAMESPACE",
            BridgeError::RadioBringUpFailed { .. } => "RADIO_BRING_UP_FAILED",
            BridgeError::RadioRead(_) => "RADIO_READ",
            BridgeError::AssociationFailed(_) => "ASSOCIATION_FAILED",
            BridgeError::AssociationTimeout { .. } => "ASSOCIATION_TIMEOUT",
            BridgeError::BusConnectFailed(_) => "BUS_CONNECT_FAILED",
            BridgeError::BusConnectTimeout { .. } => "BUS_CONNECT_TIMEOUT",
            BridgeError::BusPublishFailed(_) => "BUS_PUBLISH_FAILED",
            BridgeError::BusSessionLost(_) => "BUS_SESSION_LOST",
            BridgeError::Serialize(_) => "SERIALIZE_ERROR",
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

// Conversion from rumqttc client errors
impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::BusPublishFailed(err.to_string())
    }
}

// Conversion from rumqttc connection errors
impl From<rumqttc::ConnectionError> for BridgeError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        BridgeError::BusSessionLost(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = BridgeError::BusConnectFailed("refused".to_string());
        assert_eq!(err.error_code(), "BUS_CONNECT_FAILED");
    }

    #[test]
    fn test_is_retriable() {
        assert!(BridgeError::BusConnectTimeout { duration_ms: 5000 }.is_retriable());
        assert!(BridgeError::RadioRead("noise".to_string()).is_retriable());
        assert!(!BridgeError::UnknownNamespace("misc".to_string()).is_retriable());
    }

    #[test]
    fn test_store_write_message() {
        let err = BridgeError::StoreWriteFailed {
            namespace: "bus".to_string(),
            reason: "disk full".to_string(),
        };
        assert!(err.to_string().contains("bus"));
        assert!(err.to_string().contains("disk full"));
    }
}
