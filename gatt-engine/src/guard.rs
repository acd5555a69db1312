//! Guards raced against a pending reply
//!
//! A [`GuardedWait`] subscribes to the adapter and connection streams when it
//! is armed, which the executor does before the request goes out. Waiting
//! then races the reply future against three independent conditions:
//!
//! - the adapter becomes unusable → [`GattError::AdapterOff`]
//! - the target device is, or becomes, disconnected → [`GattError::DeviceNotConnected`]
//! - the timeout elapses → [`GattError::Timeout`]
//!
//! The first to resolve decides the outcome; the other futures and their
//! subscriptions are dropped with the guard.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use event_bus::{AdapterEvent, ConnectionEvent, ConnectionState, DeviceId, EventBus};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::error::{GattError, Result};

/// Wait for the first event on `replies` accepted by `accept`.
///
/// Lagging past dropped events is not an error; the reply may still come.
pub(crate) async fn next_matching<E, F>(
    replies: &mut broadcast::Receiver<E>,
    mut accept: F,
) -> Result<E>
where
    E: Clone,
    F: FnMut(&E) -> bool,
{
    loop {
        match replies.recv().await {
            Ok(event) if accept(&event) => return Ok(event),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Reply subscriber lagged, events were dropped");
            }
            Err(RecvError::Closed) => return Err(GattError::EventBusClosed),
        }
    }
}

/// Adapter, connection and timeout guards for one pending operation
pub struct GuardedWait {
    bus: Arc<EventBus>,
    device_id: DeviceId,
    operation: &'static str,
    timeout: Duration,
    adapter: broadcast::Receiver<AdapterEvent>,
    connection: broadcast::Receiver<ConnectionEvent>,
}

impl GuardedWait {
    /// Subscribe to the guard streams. Must happen before the request is issued.
    pub fn arm(
        bus: &Arc<EventBus>,
        device_id: DeviceId,
        operation: &'static str,
        timeout: Duration,
    ) -> Self {
        Self {
            adapter: bus.subscribe_adapter(),
            connection: bus.subscribe_connection(),
            bus: Arc::clone(bus),
            device_id,
            operation,
            timeout,
        }
    }

    /// Race `reply` against the guards.
    ///
    /// A reply that is ready on the same poll as a guard wins.
    pub async fn wait<T, F>(self, reply: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let GuardedWait {
            bus,
            device_id,
            operation,
            timeout,
            mut adapter,
            mut connection,
        } = self;

        tokio::select! {
            biased;

            result = reply => result,

            _ = adapter_unusable(&bus, &mut adapter) => {
                debug!(operation, device_id = %device_id, "Adapter guard fired");
                Err(GattError::AdapterOff)
            }

            _ = device_disconnected(&bus, &mut connection, &device_id) => {
                debug!(operation, device_id = %device_id, "Connection guard fired");
                Err(GattError::DeviceNotConnected {
                    device_id: device_id.clone(),
                })
            }

            _ = tokio::time::sleep(timeout) => {
                debug!(operation, device_id = %device_id, ?timeout, "Timeout guard fired");
                Err(GattError::Timeout { operation, timeout })
            }
        }
    }
}

/// Resolves once the adapter is, or becomes, unusable
async fn adapter_unusable(bus: &EventBus, adapter: &mut broadcast::Receiver<AdapterEvent>) {
    if bus.adapter_state().is_unusable() {
        return;
    }
    loop {
        match adapter.recv().await {
            Ok(event) if event.state.is_unusable() => return,
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => {
                if bus.adapter_state().is_unusable() {
                    return;
                }
            }
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Resolves once `device_id` is, or becomes, disconnected
async fn device_disconnected(
    bus: &EventBus,
    connection: &mut broadcast::Receiver<ConnectionEvent>,
    device_id: &DeviceId,
) {
    if bus.is_known_disconnected(device_id) {
        return;
    }
    loop {
        match connection.recv().await {
            Ok(event)
                if &event.device_id == device_id
                    && event.state == ConnectionState::Disconnected =>
            {
                return
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(_)) => {
                if bus.is_known_disconnected(device_id) {
                    return;
                }
            }
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::{AdapterState, BusEvent};
    use rstest::rstest;
    use std::time::Instant;

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::default())
    }

    fn never<T>() -> impl Future<Output = Result<T>> {
        std::future::pending()
    }

    #[tokio::test]
    async fn test_reply_wins() {
        let bus = bus();
        let guard = GuardedWait::arm(&bus, DeviceId::new("dev-1"), "read", Duration::from_secs(5));

        let result = guard.wait(async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_timeout_fires_after_duration() {
        let bus = bus();
        let guard = GuardedWait::arm(&bus, DeviceId::new("dev-1"), "read", Duration::from_millis(100));

        let start = Instant::now();
        let result = guard.wait(never::<()>()).await;

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(matches!(result, Err(GattError::Timeout { operation: "read", .. })));
    }

    #[tokio::test]
    async fn test_disconnect_of_target_fires() {
        let bus = bus();
        let guard = GuardedWait::arm(&bus, DeviceId::new("dev-1"), "read", Duration::from_secs(5));

        let publisher = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            // other devices do not trip the guard
            publisher.publish(BusEvent::ConnectionStateChanged(ConnectionEvent::disconnected("dev-2")));
            publisher.publish(BusEvent::ConnectionStateChanged(ConnectionEvent::disconnected("dev-1")));
        });

        let result = guard.wait(never::<()>()).await;
        match result {
            Err(GattError::DeviceNotConnected { device_id }) => assert_eq!(device_id.as_str(), "dev-1"),
            other => panic!("Expected DeviceNotConnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_adapter_off_fires() {
        let bus = bus();
        let guard = GuardedWait::arm(&bus, DeviceId::new("dev-1"), "write", Duration::from_secs(5));

        let publisher = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(BusEvent::AdapterStateChanged(AdapterEvent { state: AdapterState::TurningOn }));
            publisher.publish(BusEvent::AdapterStateChanged(AdapterEvent { state: AdapterState::Off }));
        });

        assert!(matches!(guard.wait(never::<()>()).await, Err(GattError::AdapterOff)));
    }

    #[tokio::test]
    async fn test_device_already_disconnected_fires_immediately() {
        let bus = bus();
        bus.publish(BusEvent::ConnectionStateChanged(ConnectionEvent::disconnected("dev-1")));
        let guard = GuardedWait::arm(&bus, DeviceId::new("dev-1"), "read", Duration::from_secs(5));

        let start = Instant::now();
        let result = guard.wait(never::<()>()).await;

        assert!(matches!(result, Err(GattError::DeviceNotConnected { .. })));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_adapter_already_off_fires_immediately() {
        let bus = bus();
        bus.publish(BusEvent::AdapterStateChanged(AdapterEvent { state: AdapterState::Unavailable }));
        let guard = GuardedWait::arm(&bus, DeviceId::new("dev-1"), "read", Duration::from_secs(5));

        let start = Instant::now();
        assert!(matches!(guard.wait(never::<()>()).await, Err(GattError::AdapterOff)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[rstest]
    #[case::unavailable(AdapterState::Unavailable, true)]
    #[case::unauthorized(AdapterState::Unauthorized, true)]
    #[case::turning_off(AdapterState::TurningOff, true)]
    #[case::off(AdapterState::Off, true)]
    #[case::unknown(AdapterState::Unknown, false)]
    #[case::turning_on(AdapterState::TurningOn, false)]
    #[case::on(AdapterState::On, false)]
    #[tokio::test]
    async fn test_adapter_state_outcome(#[case] state: AdapterState, #[case] fires: bool) {
        let bus = bus();
        let guard = GuardedWait::arm(&bus, DeviceId::new("dev-1"), "read", Duration::from_millis(100));
        bus.publish(BusEvent::AdapterStateChanged(AdapterEvent { state }));

        let result = guard.wait(never::<()>()).await;
        if fires {
            assert!(matches!(result, Err(GattError::AdapterOff)));
        } else {
            assert!(matches!(result, Err(GattError::Timeout { .. })));
        }
    }

    #[tokio::test]
    async fn test_next_matching_skips_non_matching() {
        let bus = bus();
        let mut rx = bus.subscribe_connection();

        bus.publish(BusEvent::ConnectionStateChanged(ConnectionEvent::connected("dev-2")));
        bus.publish(BusEvent::ConnectionStateChanged(ConnectionEvent::connected("dev-1")));

        let event = next_matching(&mut rx, |e: &ConnectionEvent| e.device_id.as_str() == "dev-1")
            .await
            .unwrap();
        assert_eq!(event.device_id.as_str(), "dev-1");
    }

    #[tokio::test]
    async fn test_next_matching_reports_closed_bus() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_connection();
        drop(bus);

        let result = next_matching(&mut rx, |_: &ConnectionEvent| true).await;
        assert!(matches!(result, Err(GattError::EventBusClosed)));
    }
}
