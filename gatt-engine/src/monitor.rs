//! Cache invalidation on disconnect

use std::sync::Arc;

use event_bus::{ConnectionEvent, ConnectionState, EventBus};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::executor::GattEngine;
use crate::value_cache::ValueCache;

/// Background task clearing cached values of disconnected devices.
///
/// The task stops when this handle is dropped.
#[derive(Debug)]
pub struct DisconnectHandler {
    task: JoinHandle<()>,
}

impl DisconnectHandler {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for DisconnectHandler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl GattEngine {
    /// Clear a device's cached values whenever it disconnects.
    ///
    /// The connection stream is subscribed before this returns, so any
    /// disconnect published afterwards is handled.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_disconnect_handler(&self) -> DisconnectHandler {
        let connection = self.bus.subscribe_connection();
        let bus = Arc::clone(&self.bus);
        let cache = Arc::clone(&self.cache);

        let task = tokio::spawn(async move {
            run_disconnect_loop(bus, cache, connection).await;
        });

        DisconnectHandler { task }
    }
}

async fn run_disconnect_loop(
    bus: Arc<EventBus>,
    cache: Arc<ValueCache>,
    mut connection: broadcast::Receiver<ConnectionEvent>,
) {
    debug!("Disconnect handler started");

    loop {
        match connection.recv().await {
            Ok(event) if event.state == ConnectionState::Disconnected => {
                let removed = cache.clear_device(&event.device_id);
                debug!(
                    device_id = %event.device_id,
                    removed_count = removed,
                    reason = ?event.reason,
                    "Device disconnected"
                );
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Disconnect handler lagged, clearing all disconnected devices");
                for device_id in bus.disconnected_devices() {
                    cache.clear_device(&device_id);
                }
            }
            Err(RecvError::Closed) => {
                info!("Connection stream closed, stopping disconnect handler");
                break;
            }
        }
    }
}
