//! Error types for the gatt-engine crate.

use std::time::Duration;

use event_bus::DeviceId;

use crate::transport::TransportError;

/// Terminal failures of a GATT operation.
///
/// Every failed call surfaces exactly one of these. None are retried by the
/// engine.
#[derive(Debug, thiserror::Error)]
pub enum GattError {
    /// The device is disconnected, or disconnected while waiting
    #[error("Device {device_id} is not connected")]
    DeviceNotConnected {
        /// The device the operation targeted
        device_id: DeviceId,
    },

    /// The adapter is off or unavailable
    #[error("Bluetooth adapter is off")]
    AdapterOff,

    /// No matching reply arrived in time
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// The native stack reported a failure
    #[error("{operation} failed: code {}, {}", fmt_code(.code), .message.as_deref().unwrap_or("no message"))]
    RemoteOperationFailed {
        /// Operation that failed
        operation: &'static str,
        /// Native error code
        code: Option<i32>,
        /// Native error string
        message: Option<String>,
    },

    /// The transport refused to issue the request
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The event bus stopped delivering events
    #[error("Event bus closed")]
    EventBusClosed,

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn fmt_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

/// Convenience type alias for Results using GattError.
pub type Result<T> = std::result::Result<T, GattError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gatt_error_display() {
        let error = GattError::DeviceNotConnected {
            device_id: DeviceId::new("AA:BB"),
        };
        assert_eq!(error.to_string(), "Device AA:BB is not connected");

        assert_eq!(GattError::AdapterOff.to_string(), "Bluetooth adapter is off");

        let error = GattError::Timeout {
            operation: "read",
            timeout: Duration::from_secs(15),
        };
        assert_eq!(error.to_string(), "read timed out after 15s");

        let error = GattError::RemoteOperationFailed {
            operation: "write",
            code: Some(133),
            message: Some("GATT_ERROR".to_string()),
        };
        assert_eq!(error.to_string(), "write failed: code 133, GATT_ERROR");

        let error = GattError::RemoteOperationFailed {
            operation: "read",
            code: None,
            message: None,
        };
        assert_eq!(error.to_string(), "read failed: code unknown, no message");
    }

    #[test]
    fn test_error_conversion_from_transport_error() {
        let error: GattError = TransportError::Rejected("busy".to_string()).into();

        match error {
            GattError::Transport(e) => assert_eq!(e.to_string(), "Request rejected: busy"),
            _ => panic!("Expected Transport variant"),
        }
    }
}
