//! Inbound event types delivered by the platform layer

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::identity::{DeviceId, IdentityKey};

/// Outcome reported by the native stack for a completed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Success,
    Failed {
        code: Option<i32>,
        message: Option<String>,
    },
}

impl OperationStatus {
    pub fn failed(code: impl Into<Option<i32>>, message: impl Into<Option<String>>) -> Self {
        OperationStatus::Failed {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationStatus::Success)
    }
}

/// Common view over events that answer a request.
///
/// The executor only needs to know who an event is about and whether the
/// remote side succeeded; everything else is operation specific.
pub trait Completion: Clone + Send + 'static {
    fn device_id(&self) -> &DeviceId;

    /// Attribute the event is about, `None` for device-level events
    fn target(&self) -> Option<&IdentityKey>;

    fn status(&self) -> &OperationStatus;
}

/// A characteristic or descriptor read/write has completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueEvent {
    pub key: IdentityKey,
    pub status: OperationStatus,
    /// Value read, or value written
    pub payload: Option<Bytes>,
}

impl ValueEvent {
    pub fn success(key: IdentityKey, payload: impl Into<Bytes>) -> Self {
        Self {
            key,
            status: OperationStatus::Success,
            payload: Some(payload.into()),
        }
    }

    pub fn failure(key: IdentityKey, code: Option<i32>, message: Option<String>) -> Self {
        Self {
            key,
            status: OperationStatus::failed(code, message),
            payload: None,
        }
    }

    /// Payload of a successful event, if any
    pub fn success_payload(&self) -> Option<&Bytes> {
        if self.status.is_success() {
            self.payload.as_ref()
        } else {
            None
        }
    }
}

impl Completion for ValueEvent {
    fn device_id(&self) -> &DeviceId {
        &self.key.device_id
    }

    fn target(&self) -> Option<&IdentityKey> {
        Some(&self.key)
    }

    fn status(&self) -> &OperationStatus {
        &self.status
    }
}

/// Signal strength read has completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssiEvent {
    pub device_id: DeviceId,
    pub status: OperationStatus,
    pub rssi: i16,
}

impl Completion for RssiEvent {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    fn target(&self) -> Option<&IdentityKey> {
        None
    }

    fn status(&self) -> &OperationStatus {
        &self.status
    }
}

/// MTU negotiation has completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MtuEvent {
    pub device_id: DeviceId,
    pub status: OperationStatus,
    pub mtu: u16,
}

impl Completion for MtuEvent {
    fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    fn target(&self) -> Option<&IdentityKey> {
        None
    }

    fn status(&self) -> &OperationStatus {
        &self.status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Native reason reported alongside a disconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    pub code: Option<i32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub device_id: DeviceId,
    pub state: ConnectionState,
    pub reason: Option<DisconnectReason>,
}

impl ConnectionEvent {
    pub fn connected(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            state: ConnectionState::Connected,
            reason: None,
        }
    }

    pub fn disconnected(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            state: ConnectionState::Disconnected,
            reason: None,
        }
    }

    pub fn with_reason(mut self, code: Option<i32>, description: Option<String>) -> Self {
        self.reason = Some(DisconnectReason { code, description });
        self
    }
}

/// Power/availability state of the local radio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    #[default]
    Unknown,
    Unavailable,
    Unauthorized,
    TurningOn,
    On,
    TurningOff,
    Off,
}

impl AdapterState {
    /// States in which no GATT exchange can complete
    pub fn is_unusable(self) -> bool {
        matches!(
            self,
            AdapterState::Unavailable
                | AdapterState::Unauthorized
                | AdapterState::TurningOff
                | AdapterState::Off
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterEvent {
    pub state: AdapterState,
}

/// Event kinds, one broadcast stream each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ValueRead,
    ValueWritten,
    ConnectionState,
    AdapterState,
    RssiRead,
    MtuChanged,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::ValueRead => write!(f, "value read"),
            EventKind::ValueWritten => write!(f, "value written"),
            EventKind::ConnectionState => write!(f, "connection state"),
            EventKind::AdapterState => write!(f, "adapter state"),
            EventKind::RssiRead => write!(f, "rssi read"),
            EventKind::MtuChanged => write!(f, "mtu changed"),
        }
    }
}

/// Any event the platform layer can publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event", rename_all = "snake_case")]
pub enum BusEvent {
    ValueRead(ValueEvent),
    ValueWritten(ValueEvent),
    ConnectionStateChanged(ConnectionEvent),
    AdapterStateChanged(AdapterEvent),
    RssiRead(RssiEvent),
    MtuChanged(MtuEvent),
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BusEvent::ValueRead(_) => EventKind::ValueRead,
            BusEvent::ValueWritten(_) => EventKind::ValueWritten,
            BusEvent::ConnectionStateChanged(_) => EventKind::ConnectionState,
            BusEvent::AdapterStateChanged(_) => EventKind::AdapterState,
            BusEvent::RssiRead(_) => EventKind::RssiRead,
            BusEvent::MtuChanged(_) => EventKind::MtuChanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use uuid::Uuid;

    fn key() -> IdentityKey {
        IdentityKey::characteristic("dev-1", Uuid::from_u128(1), Uuid::from_u128(2))
    }

    #[test]
    fn test_failed_event_has_no_success_payload() {
        let mut event = ValueEvent::failure(key(), Some(133), Some("GATT_ERROR".to_string()));
        assert!(event.success_payload().is_none());

        // a payload on a failed event is still not a success payload
        event.payload = Some(Bytes::from_static(&[1]));
        assert!(event.success_payload().is_none());
    }

    #[test]
    fn test_success_payload() {
        let event = ValueEvent::success(key(), vec![1, 2, 3]);
        assert_eq!(event.success_payload().map(|p| p.to_vec()), Some(vec![1, 2, 3]));
        assert_eq!(event.target(), Some(&key()));
    }

    #[rstest]
    #[case(AdapterState::Unknown, false)]
    #[case(AdapterState::TurningOn, false)]
    #[case(AdapterState::On, false)]
    #[case(AdapterState::Unavailable, true)]
    #[case(AdapterState::Unauthorized, true)]
    #[case(AdapterState::TurningOff, true)]
    #[case(AdapterState::Off, true)]
    fn test_adapter_unusable_states(#[case] state: AdapterState, #[case] unusable: bool) {
        assert_eq!(state.is_unusable(), unusable);
    }

    #[test]
    fn test_bus_event_decodes_from_platform_json() {
        let json = r#"{
            "kind": "connection_state_changed",
            "event": { "device_id": "dev-1", "state": "Disconnected", "reason": null }
        }"#;
        let event: BusEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.kind(), EventKind::ConnectionState);
        assert_eq!(event, BusEvent::ConnectionStateChanged(ConnectionEvent::disconnected("dev-1")));
    }
}
