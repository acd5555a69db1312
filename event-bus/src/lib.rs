//! # blelink event bus
//!
//! Identity keys and the multiplexed inbound event bus used by
//! `blelink-engine` to correlate GATT completions with pending requests.
//!
//! The platform layer decodes native callbacks into [`BusEvent`]s and hands
//! them to [`EventBus::publish`]. Consumers subscribe per event kind and
//! filter by [`IdentityKey`].
//!
//! ```rust
//! use event_bus::{BusEvent, EventBus, IdentityKey, ValueEvent};
//! use uuid::Uuid;
//!
//! let bus = EventBus::default();
//! let mut reads = bus.subscribe_value_read();
//!
//! let key = IdentityKey::characteristic("dev-1", Uuid::from_u128(0x180d), Uuid::from_u128(0x2a37));
//! bus.publish(BusEvent::ValueRead(ValueEvent::success(key.clone(), vec![1, 2, 3])));
//!
//! let event = reads.try_recv().unwrap();
//! assert!(key.matches(&event.key));
//! ```

pub mod bus;
pub mod event;
pub mod identity;

pub use bus::{EventBus, DEFAULT_CAPACITY};
pub use event::{
    AdapterEvent, AdapterState, BusEvent, Completion, ConnectionEvent, ConnectionState,
    DisconnectReason, EventKind, MtuEvent, OperationStatus, RssiEvent, ValueEvent,
};
pub use identity::{DeviceId, IdentityKey, InstanceId};
