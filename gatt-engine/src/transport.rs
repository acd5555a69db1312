//! Outbound request seam to the native stack
//!
//! The engine hands every request to a [`Transport`] and then waits for the
//! matching completion on the event bus. A successful `send` only means the
//! native side accepted the request; it is never treated as the reply.

use async_trait::async_trait;
use bytes::Bytes;
use event_bus::{DeviceId, IdentityKey};

/// How a write is delivered to the remote device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WriteType {
    /// Write request, acknowledged by the remote device
    #[default]
    WithResponse,
    /// Write command, not acknowledged by the remote device
    WithoutResponse,
}

/// A request the engine asks the transport to issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRequest {
    Read {
        key: IdentityKey,
    },
    Write {
        key: IdentityKey,
        payload: Bytes,
        write_type: WriteType,
    },
    ReadRssi {
        device_id: DeviceId,
    },
    RequestMtu {
        device_id: DeviceId,
        mtu: u16,
    },
}

impl TransportRequest {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            TransportRequest::Read { key } | TransportRequest::Write { key, .. } => &key.device_id,
            TransportRequest::ReadRssi { device_id }
            | TransportRequest::RequestMtu { device_id, .. } => device_id,
        }
    }
}

/// Errors a transport can report when refusing a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The native side refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The native side cannot be reached
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Issues requests to the native stack.
///
/// Implementations must not wait for the protocol reply; replies are
/// published on the event bus by the platform layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &TransportRequest) -> Result<(), TransportError>;
}
