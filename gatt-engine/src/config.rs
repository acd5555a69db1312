//! Configuration types for the gatt-engine crate
//!
//! This module defines the settings that control the engine: the default
//! reply timeout, the event bus buffer size and the lock name that
//! serializes operations.

use std::time::Duration;

use crate::error::{GattError, Result};

/// Lock name shared by every GATT operation of an engine
pub const DEFAULT_LOCK_NAME: &str = "gatt";

/// Configuration for the GattEngine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time to wait for a matching reply before failing with `Timeout`
    /// Default: 15 seconds
    pub default_timeout: Duration,

    /// Events buffered per subscriber and event kind before a slow
    /// subscriber starts skipping events
    /// Default: 256
    pub event_buffer_size: usize,

    /// Name under which the keyed mutex serializes operations
    /// Default: "gatt"
    pub lock_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(15),
            event_buffer_size: event_bus::DEFAULT_CAPACITY,
            lock_name: DEFAULT_LOCK_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a new EngineConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an EngineConfig that gives up quickly on unresponsive devices
    pub fn fast_fail() -> Self {
        Self {
            default_timeout: Duration::from_secs(3),
            ..Default::default()
        }
    }

    /// Set the default timeout in whole seconds
    pub fn with_timeout_secs(mut self, seconds: u64) -> Self {
        self.default_timeout = Duration::from_secs(seconds);
        self
    }

    /// Use a separate lock name, for an independent class of operations
    pub fn with_lock_name(mut self, name: impl Into<String>) -> Self {
        self.lock_name = name.into();
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout == Duration::ZERO {
            return Err(GattError::Configuration(
                "Default timeout must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(GattError::Configuration(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.lock_name.is_empty() {
            return Err(GattError::Configuration(
                "Lock name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
