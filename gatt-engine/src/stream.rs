//! Live value streams
//!
//! Continuous projections of the value-read and value-written streams onto a
//! single [`IdentityKey`], in publish order. Streams are lazy: nothing is subscribed until the
//! first poll. They never end on their own; drop them to stop listening.

use std::sync::Arc;

use bytes::Bytes;
use event_bus::{EventBus, IdentityKey};
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::executor::GattEngine;

impl GattEngine {
    /// Current cached value of `key`, then every new value read or written.
    ///
    /// The cached value (empty if none) is emitted once, right after the
    /// stream subscribes, so a new listener sees the last known state without
    /// waiting for the next operation. Each call yields an independent stream.
    pub fn last_value_stream(&self, key: IdentityKey) -> BoxStream<'static, Bytes> {
        let bus = Arc::clone(&self.bus);
        let cache = Arc::clone(&self.cache);

        stream::once(async move {
            // subscribe before sampling the cache so no update slips between
            let updates = matching_values(&bus, key.clone());
            let initial = cache.get(&key);
            stream::once(future::ready(initial)).chain(updates)
        })
        .flatten()
        .boxed()
    }

    /// Every new value read from or written to `key`, without the cached one
    pub fn received_values(&self, key: IdentityKey) -> BoxStream<'static, Bytes> {
        let bus = Arc::clone(&self.bus);

        stream::once(async move { matching_values(&bus, key) })
            .flatten()
            .boxed()
    }
}

fn matching_values(bus: &EventBus, key: IdentityKey) -> impl Stream<Item = Bytes> + Send + 'static {
    BroadcastStream::new(bus.subscribe_values()).filter_map(move |item| {
        let value = match item {
            Ok((_, event)) if key.matches(&event.key) => event.success_payload().cloned(),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(key = %key, skipped, "Value stream lagged, events were dropped");
                None
            }
        };
        future::ready(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Transport, TransportError, TransportRequest};
    use async_trait::async_trait;
    use event_bus::{BusEvent, ValueEvent};
    use std::time::Duration;
    use uuid::Uuid;

    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn send(&self, _request: &TransportRequest) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn key() -> IdentityKey {
        IdentityKey::characteristic("dev-1", Uuid::from_u128(1), Uuid::from_u128(2))
    }

    async fn next(stream: &mut BoxStream<'static, Bytes>) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream produced no value in time")
            .expect("stream ended")
            .to_vec()
    }

    #[tokio::test]
    async fn test_last_value_stream_starts_with_cached_value() {
        let engine = GattEngine::new(Arc::new(SilentTransport));
        engine.cache().set(key(), Bytes::from_static(&[9]));

        let mut values = engine.last_value_stream(key());
        assert_eq!(next(&mut values).await, vec![9]);

        engine
            .bus()
            .publish(BusEvent::ValueWritten(ValueEvent::success(key(), vec![10])));
        engine
            .bus()
            .publish(BusEvent::ValueRead(ValueEvent::success(key(), vec![11])));

        assert_eq!(next(&mut values).await, vec![10]);
        assert_eq!(next(&mut values).await, vec![11]);
    }

    #[tokio::test]
    async fn test_last_value_stream_is_empty_without_cache_entry() {
        let engine = GattEngine::new(Arc::new(SilentTransport));
        let mut values = engine.last_value_stream(key());
        assert!(next(&mut values).await.is_empty());
    }

    #[tokio::test]
    async fn test_stream_skips_failures_and_other_keys() {
        let engine = GattEngine::new(Arc::new(SilentTransport));
        let mut values = engine.received_values(key());

        // first poll subscribes; nothing is pending yet
        assert!(tokio::time::timeout(Duration::from_millis(20), values.next())
            .await
            .is_err());

        let other = IdentityKey::characteristic("dev-1", Uuid::from_u128(1), Uuid::from_u128(3));
        let bus = engine.bus();
        bus.publish(BusEvent::ValueRead(ValueEvent::success(other, vec![1])));
        bus.publish(BusEvent::ValueRead(ValueEvent::failure(key(), Some(5), None)));
        bus.publish(BusEvent::ValueRead(ValueEvent::success(key().with_instance(4), vec![2])));

        assert_eq!(next(&mut values).await, vec![2]);
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let engine = GattEngine::new(Arc::new(SilentTransport));
        engine.cache().set(key(), Bytes::from_static(&[1]));

        let mut first = engine.last_value_stream(key());
        assert_eq!(next(&mut first).await, vec![1]);
        drop(first);

        // a restarted stream gets the cached value again
        let mut second = engine.last_value_stream(key());
        assert_eq!(next(&mut second).await, vec![1]);
    }
}
