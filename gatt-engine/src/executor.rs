//! Serialized request/response execution
//!
//! [`GattEngine`] turns "issue a request, wait for the matching completion"
//! into a single awaitable call. Every operation runs the same exchange:
//!
//! 1. fail fast if the device is already known to be disconnected
//! 2. take the engine's named lock, so the transport never sees two
//!    requests in flight, then check the connection again
//! 3. subscribe to the reply stream and the guard streams
//! 4. hand the request to the [`Transport`]
//! 5. race the first matching reply against the adapter, connection and
//!    timeout guards
//! 6. map a failed remote status to [`GattError::RemoteOperationFailed`]
//! 7. record the value in the [`ValueCache`], unless the device has
//!    disconnected since the reply
//! 8. release the lock, whatever happened above
//!
//! Subscribing happens before the request is sent, so a reply that arrives
//! while `send` is still running is not lost.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use event_bus::{
    Completion, DeviceId, EventBus, IdentityKey, MtuEvent, OperationStatus, RssiEvent, ValueEvent,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{GattError, Result};
use crate::guard::{next_matching, GuardedWait};
use crate::keyed_mutex::KeyedMutex;
use crate::transport::{Transport, TransportRequest, WriteType};
use crate::value_cache::ValueCache;

/// Kind of exchange the engine performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
    ReadRssi,
    RequestMtu,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::ReadRssi => "read rssi",
            OperationKind::RequestMtu => "request mtu",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides which completion events answer a pending request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFilter {
    /// Attribute-level: see [`IdentityKey::matches`]
    Target(IdentityKey),
    /// Device-level: any event about the device
    Device(DeviceId),
}

impl ResponseFilter {
    pub fn accepts<E: Completion>(&self, event: &E) -> bool {
        match self {
            ResponseFilter::Target(key) => event.target().is_some_and(|target| key.matches(target)),
            ResponseFilter::Device(device_id) => event.device_id() == device_id,
        }
    }
}

/// State owned by one in-flight call, dropped when it resolves
#[derive(Debug)]
struct PendingOperation {
    kind: OperationKind,
    filter: ResponseFilter,
    timeout: Duration,
}

impl PendingOperation {
    fn new(kind: OperationKind, filter: ResponseFilter, timeout: Duration) -> Self {
        Self { kind, filter, timeout }
    }
}

/// Orchestrates guarded, serialized GATT exchanges
pub struct GattEngine {
    pub(crate) bus: Arc<EventBus>,
    pub(crate) cache: Arc<ValueCache>,
    locks: Arc<KeyedMutex>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
}

impl GattEngine {
    /// Create an engine with default configuration and its own bus, lock
    /// registry and cache
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let config = EngineConfig::default();
        Self {
            bus: Arc::new(EventBus::new(config.event_buffer_size)),
            cache: Arc::new(ValueCache::new()),
            locks: Arc::new(KeyedMutex::new()),
            transport,
            config,
        }
    }

    /// Create an engine with custom configuration
    pub fn with_config(transport: Arc<dyn Transport>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            bus: Arc::new(EventBus::new(config.event_buffer_size)),
            cache: Arc::new(ValueCache::new()),
            locks: Arc::new(KeyedMutex::new()),
            transport,
            config,
        })
    }

    /// Create an engine on top of shared process-wide components.
    ///
    /// Engines sharing a lock registry and lock name serialize against each
    /// other; `config.event_buffer_size` is ignored since the bus exists.
    pub fn with_shared(
        transport: Arc<dyn Transport>,
        bus: Arc<EventBus>,
        locks: Arc<KeyedMutex>,
        cache: Arc<ValueCache>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            bus,
            cache,
            locks,
            transport,
            config,
        })
    }

    /// Bus the platform layer publishes completions to
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.cache
    }

    pub fn locks(&self) -> &Arc<KeyedMutex> {
        &self.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Last value read from or written to `key`, empty if none
    pub fn last_value(&self, key: &IdentityKey) -> Bytes {
        self.cache.get(key)
    }

    /// Read a characteristic or descriptor using the default timeout
    pub async fn read(&self, key: &IdentityKey) -> Result<Bytes> {
        self.read_with_timeout(key, self.config.default_timeout).await
    }

    pub async fn read_with_timeout(&self, key: &IdentityKey, timeout: Duration) -> Result<Bytes> {
        let pending = PendingOperation::new(
            OperationKind::Read,
            ResponseFilter::Target(key.clone()),
            timeout,
        );
        let request = TransportRequest::Read { key: key.clone() };

        self.execute(pending, request, EventBus::subscribe_value_read, |event: ValueEvent| {
            let value = event.payload.unwrap_or_default();
            self.cache.set_while_connected(key.clone(), value.clone(), &self.bus);
            value
        })
        .await
    }

    /// Write with response using the default timeout
    pub async fn write(&self, key: &IdentityKey, payload: impl Into<Bytes>) -> Result<()> {
        self.write_with(key, payload, WriteType::WithResponse, self.config.default_timeout)
            .await
    }

    /// Write a characteristic or descriptor.
    ///
    /// The call waits for the write-completed event for either write type.
    pub async fn write_with(
        &self,
        key: &IdentityKey,
        payload: impl Into<Bytes>,
        write_type: WriteType,
        timeout: Duration,
    ) -> Result<()> {
        let payload = payload.into();
        let pending = PendingOperation::new(
            OperationKind::Write,
            ResponseFilter::Target(key.clone()),
            timeout,
        );
        let request = TransportRequest::Write {
            key: key.clone(),
            payload: payload.clone(),
            write_type,
        };

        self.execute(pending, request, EventBus::subscribe_value_written, |_: ValueEvent| {
            self.cache.set_while_connected(key.clone(), payload, &self.bus);
        })
        .await
    }

    /// Read the signal strength of a connected device
    pub async fn read_rssi(&self, device_id: &DeviceId) -> Result<i16> {
        let pending = PendingOperation::new(
            OperationKind::ReadRssi,
            ResponseFilter::Device(device_id.clone()),
            self.config.default_timeout,
        );
        let request = TransportRequest::ReadRssi {
            device_id: device_id.clone(),
        };

        self.execute(pending, request, EventBus::subscribe_rssi, |event: RssiEvent| {
            event.rssi
        })
        .await
    }

    /// Negotiate the MTU, returning the value the stack settled on
    pub async fn request_mtu(&self, device_id: &DeviceId, mtu: u16) -> Result<u16> {
        let pending = PendingOperation::new(
            OperationKind::RequestMtu,
            ResponseFilter::Device(device_id.clone()),
            self.config.default_timeout,
        );
        let request = TransportRequest::RequestMtu {
            device_id: device_id.clone(),
            mtu,
        };

        self.execute(pending, request, EventBus::subscribe_mtu, |event: MtuEvent| {
            event.mtu
        })
        .await
    }

    /// Run one guarded exchange. `complete` runs while the lock is held.
    async fn execute<E, T, S, C>(
        &self,
        pending: PendingOperation,
        request: TransportRequest,
        subscribe: S,
        complete: C,
    ) -> Result<T>
    where
        E: Completion,
        S: FnOnce(&EventBus) -> broadcast::Receiver<E>,
        C: FnOnce(E) -> T,
    {
        let operation = pending.kind.as_str();
        let device_id = request.device_id().clone();

        if self.bus.is_known_disconnected(&device_id) {
            debug!(operation, device_id = %device_id, "Device already disconnected");
            return Err(GattError::DeviceNotConnected { device_id });
        }

        let _lock = self.locks.acquire(&self.config.lock_name).await;

        // the device may have dropped while this call queued for the lock
        if self.bus.is_known_disconnected(&device_id) {
            debug!(operation, device_id = %device_id, "Device disconnected while waiting for lock");
            return Err(GattError::DeviceNotConnected { device_id });
        }
        debug!(operation, device_id = %device_id, filter = ?pending.filter, "Lock acquired, issuing request");

        let mut replies = subscribe(self.bus.as_ref());
        let guard = GuardedWait::arm(&self.bus, device_id.clone(), operation, pending.timeout);

        self.transport.send(&request).await?;

        let filter = &pending.filter;
        let event = guard
            .wait(next_matching(&mut replies, |event| filter.accepts(event)))
            .await?;

        if let OperationStatus::Failed { code, message } = event.status() {
            warn!(
                operation,
                device_id = %device_id,
                code = ?code,
                message = message.as_deref().unwrap_or(""),
                "Remote operation failed"
            );
            return Err(GattError::RemoteOperationFailed {
                operation,
                code: *code,
                message: message.clone(),
            });
        }

        debug!(operation, device_id = %device_id, "Operation completed");
        Ok(complete(event))
    }
}

impl fmt::Debug for GattEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GattEngine")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .field("cached_values", &self.cache.len())
            .finish()
    }
}
