//! # blelink engine
//!
//! Serialized, guarded request/response correlation for GATT operations
//! whose replies arrive asynchronously on a shared event bus.
//!
//! ## Overview
//!
//! A [`GattEngine`] owns four pieces:
//!
//! - an [`EventBus`] the platform layer publishes completion events to
//! - a [`KeyedMutex`] that lets one exchange at a time reach the transport
//! - a [`ValueCache`] of the last value read from or written to each attribute
//! - a [`Transport`] that issues requests to the native stack
//!
//! Each call takes the lock, subscribes to the reply stream, sends the
//! request, then waits for the first matching completion raced against the
//! adapter, connection and timeout guards. Exactly one outcome comes back:
//! the value, or one [`GattError`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gatt_engine::{GattEngine, IdentityKey};
//!
//! let engine = GattEngine::new(Arc::new(platform_transport));
//! let _handler = engine.spawn_disconnect_handler();
//!
//! // the platform layer forwards native callbacks:
//! // engine.bus().publish(event);
//!
//! let key = IdentityKey::characteristic(device_id, heart_rate_service, measurement);
//! let value = engine.read(&key).await?;
//! engine.write(&key, vec![0x01]).await?;
//!
//! let mut updates = engine.last_value_stream(key);
//! while let Some(value) = updates.next().await {
//!     println!("{:?}", value);
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod keyed_mutex;
pub mod logging;
pub mod monitor;
pub mod stream;
pub mod transport;
pub mod value_cache;

pub use config::{EngineConfig, DEFAULT_LOCK_NAME};
pub use error::{GattError, Result};
pub use executor::{GattEngine, OperationKind, ResponseFilter};
pub use guard::GuardedWait;
pub use keyed_mutex::{KeyedMutex, LockHandle};
pub use monitor::DisconnectHandler;
pub use transport::{Transport, TransportError, TransportRequest, WriteType};
pub use value_cache::ValueCache;

// Re-export commonly used types from the event bus
pub use event_bus::{
    AdapterEvent, AdapterState, BusEvent, ConnectionEvent, ConnectionState, DeviceId, EventBus,
    IdentityKey, InstanceId, MtuEvent, OperationStatus, RssiEvent, ValueEvent,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        BusEvent, DeviceId, EngineConfig, GattEngine, GattError, IdentityKey, Result, Transport,
        TransportRequest, WriteType,
    };
}
