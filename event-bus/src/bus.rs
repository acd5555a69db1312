//! Channel-per-kind broadcast bus for inbound platform events
//!
//! Every event kind gets its own `tokio::sync::broadcast` channel. Each
//! subscriber owns an independent receiver and sees every event published
//! after it subscribed; nothing one subscriber does affects another. A
//! subscriber that falls more than the channel capacity behind loses the
//! oldest events instead of blocking the producer.
//!
//! Read and written values are additionally fanned out on one combined
//! channel, so a consumer of both kinds observes them in publish order.
//!
//! The bus also remembers the latest connection state per device and the
//! latest adapter state, so callers can check preconditions without
//! waiting for the next transition.

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use crate::event::{
    AdapterEvent, AdapterState, BusEvent, ConnectionEvent, ConnectionState, EventKind, MtuEvent,
    RssiEvent, ValueEvent,
};
use crate::identity::DeviceId;

/// Default number of events buffered per subscriber and kind
pub const DEFAULT_CAPACITY: usize = 256;

/// Process-wide multiplexed source of inbound events
pub struct EventBus {
    value_read: broadcast::Sender<ValueEvent>,
    value_written: broadcast::Sender<ValueEvent>,
    connection: broadcast::Sender<ConnectionEvent>,
    adapter: broadcast::Sender<AdapterEvent>,
    rssi: broadcast::Sender<RssiEvent>,
    mtu: broadcast::Sender<MtuEvent>,

    /// Read and written values in publish order
    values: broadcast::Sender<(EventKind, ValueEvent)>,

    /// Latest connection state seen per device
    connection_states: DashMap<DeviceId, ConnectionState>,

    /// Latest adapter state seen, `Unknown` until the first event
    adapter_state: RwLock<AdapterState>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber and kind.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, as `tokio::sync::broadcast::channel` does.
    pub fn new(capacity: usize) -> Self {
        Self {
            value_read: broadcast::channel(capacity).0,
            value_written: broadcast::channel(capacity).0,
            connection: broadcast::channel(capacity).0,
            adapter: broadcast::channel(capacity).0,
            rssi: broadcast::channel(capacity).0,
            mtu: broadcast::channel(capacity).0,
            values: broadcast::channel(capacity).0,
            connection_states: DashMap::new(),
            adapter_state: RwLock::new(AdapterState::Unknown),
        }
    }

    /// Publish an event to every current subscriber of its kind.
    ///
    /// Returns the number of subscribers that received it. Events published
    /// while nobody is subscribed are dropped. State-change events update the
    /// last-known state before they are broadcast.
    pub fn publish(&self, event: BusEvent) -> usize {
        let kind = event.kind();
        let delivered = match event {
            BusEvent::ValueRead(e) => {
                let _ = self.values.send((EventKind::ValueRead, e.clone()));
                self.value_read.send(e).unwrap_or(0)
            }
            BusEvent::ValueWritten(e) => {
                let _ = self.values.send((EventKind::ValueWritten, e.clone()));
                self.value_written.send(e).unwrap_or(0)
            }
            BusEvent::ConnectionStateChanged(e) => {
                self.connection_states.insert(e.device_id.clone(), e.state);
                self.connection.send(e).unwrap_or(0)
            }
            BusEvent::AdapterStateChanged(e) => {
                *self.adapter_state.write() = e.state;
                self.adapter.send(e).unwrap_or(0)
            }
            BusEvent::RssiRead(e) => self.rssi.send(e).unwrap_or(0),
            BusEvent::MtuChanged(e) => self.mtu.send(e).unwrap_or(0),
        };

        trace!(kind = %kind, subscribers = delivered, "Published event");
        delivered
    }

    pub fn subscribe_value_read(&self) -> broadcast::Receiver<ValueEvent> {
        self.value_read.subscribe()
    }

    pub fn subscribe_value_written(&self) -> broadcast::Receiver<ValueEvent> {
        self.value_written.subscribe()
    }

    /// Read and written values together, tagged with their kind.
    ///
    /// Unlike subscribing to both kinds separately, events arrive in the
    /// order they were published.
    pub fn subscribe_values(&self) -> broadcast::Receiver<(EventKind, ValueEvent)> {
        self.values.subscribe()
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    pub fn subscribe_adapter(&self) -> broadcast::Receiver<AdapterEvent> {
        self.adapter.subscribe()
    }

    pub fn subscribe_rssi(&self) -> broadcast::Receiver<RssiEvent> {
        self.rssi.subscribe()
    }

    pub fn subscribe_mtu(&self) -> broadcast::Receiver<MtuEvent> {
        self.mtu.subscribe()
    }

    /// Number of live subscribers for a kind
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::ValueRead => self.value_read.receiver_count(),
            EventKind::ValueWritten => self.value_written.receiver_count(),
            EventKind::ConnectionState => self.connection.receiver_count(),
            EventKind::AdapterState => self.adapter.receiver_count(),
            EventKind::RssiRead => self.rssi.receiver_count(),
            EventKind::MtuChanged => self.mtu.receiver_count(),
        }
    }

    /// Latest connection state published for a device, if any
    pub fn connection_state(&self, device_id: &DeviceId) -> Option<ConnectionState> {
        self.connection_states.get(device_id).map(|state| *state)
    }

    /// True only once a disconnect has been published for the device
    pub fn is_known_disconnected(&self, device_id: &DeviceId) -> bool {
        self.connection_state(device_id) == Some(ConnectionState::Disconnected)
    }

    /// Devices whose latest published state is `Disconnected`
    pub fn disconnected_devices(&self) -> Vec<DeviceId> {
        self.connection_states
            .iter()
            .filter(|entry| *entry.value() == ConnectionState::Disconnected)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn adapter_state(&self) -> AdapterState {
        *self.adapter_state.read()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("adapter_state", &self.adapter_state())
            .field("tracked_devices", &self.connection_states.len())
            .finish()
    }
}
