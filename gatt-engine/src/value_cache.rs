//! Last-known value cache
//!
//! Maps each [`IdentityKey`] to the most recent payload read from or written
//! to it. Entries are overwritten by every successful operation and dropped
//! wholesale for a device when it disconnects. Nothing is persisted.

use bytes::Bytes;
use dashmap::DashMap;
use event_bus::{DeviceId, EventBus, IdentityKey};
use tracing::debug;

#[derive(Debug, Default)]
pub struct ValueCache {
    values: DashMap<IdentityKey, Bytes>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last cached payload, or an empty payload if none was recorded
    pub fn get(&self, key: &IdentityKey) -> Bytes {
        self.values
            .get(key)
            .map(|value| value.value().clone())
            .unwrap_or_default()
    }

    pub fn set(&self, key: IdentityKey, payload: Bytes) {
        self.values.insert(key, payload);
    }

    /// Store `payload` unless the key's device is known to be disconnected.
    ///
    /// The connection check runs while the entry's shard is locked, so a
    /// concurrent [`clear_device`](Self::clear_device) for a disconnect
    /// either sees the new entry or prevents it. Returns whether it was stored.
    pub fn set_while_connected(&self, key: IdentityKey, payload: Bytes, bus: &EventBus) -> bool {
        let entry = self.values.entry(key);
        if bus.is_known_disconnected(&entry.key().device_id) {
            debug!(key = %entry.key(), "Device disconnected, not caching value");
            return false;
        }
        entry.insert(payload);
        true
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.values.contains_key(key)
    }

    /// Remove every entry belonging to `device_id`
    pub fn clear_device(&self, device_id: &DeviceId) -> usize {
        let before = self.values.len();
        self.values.retain(|key, _| &key.device_id != device_id);
        let removed = before.saturating_sub(self.values.len());

        if removed > 0 {
            debug!(device_id = %device_id, removed_count = removed, "Cleared cached values");
        }
        removed
    }

    pub fn clear(&self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::{BusEvent, ConnectionEvent};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn key(device: &str, characteristic: u128) -> IdentityKey {
        IdentityKey::characteristic(device, Uuid::from_u128(0x180d), Uuid::from_u128(characteristic))
    }

    #[test]
    fn test_missing_entry_is_empty() {
        let cache = ValueCache::new();
        assert!(cache.get(&key("dev-1", 1)).is_empty());
        assert!(!cache.contains(&key("dev-1", 1)));
    }

    #[test]
    fn test_get_is_idempotent() {
        let cache = ValueCache::new();
        cache.set(key("dev-1", 1), Bytes::from_static(&[4, 5]));

        let first = cache.get(&key("dev-1", 1));
        let second = cache.get(&key("dev-1", 1));
        assert_eq!(first, second);
        assert_eq!(first.to_vec(), vec![4, 5]);
    }

    #[test]
    fn test_set_overwrites() {
        let cache = ValueCache::new();
        cache.set(key("dev-1", 1), Bytes::from_static(&[1]));
        cache.set(key("dev-1", 1), Bytes::from_static(&[2]));

        assert_eq!(cache.get(&key("dev-1", 1)).to_vec(), vec![2]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_descriptor_and_characteristic_are_separate_entries() {
        let cache = ValueCache::new();
        let characteristic = key("dev-1", 1);
        let descriptor = characteristic.clone().with_descriptor(Uuid::from_u128(0x2902));

        cache.set(characteristic.clone(), Bytes::from_static(&[1]));
        cache.set(descriptor.clone(), Bytes::from_static(&[1, 0]));

        assert_eq!(cache.get(&characteristic).to_vec(), vec![1]);
        assert_eq!(cache.get(&descriptor).to_vec(), vec![1, 0]);
    }

    #[test]
    fn test_clear_device_only_touches_that_device() {
        let cache = ValueCache::new();
        cache.set(key("dev-1", 1), Bytes::from_static(&[1]));
        cache.set(key("dev-1", 2), Bytes::from_static(&[2]));
        cache.set(key("dev-2", 1), Bytes::from_static(&[3]));

        assert_eq!(cache.clear_device(&DeviceId::new("dev-1")), 2);

        assert!(!cache.contains(&key("dev-1", 1)));
        assert!(!cache.contains(&key("dev-1", 2)));
        assert_eq!(cache.get(&key("dev-2", 1)).to_vec(), vec![3]);
        assert_eq!(cache.clear_device(&DeviceId::new("dev-1")), 0);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_while_connected_skips_disconnected_device() {
        let cache = ValueCache::new();
        let bus = EventBus::default();

        // unknown connection state is not a disconnect
        assert!(cache.set_while_connected(key("dev-1", 1), Bytes::from_static(&[1]), &bus));

        bus.publish(BusEvent::ConnectionStateChanged(ConnectionEvent::disconnected("dev-1")));
        cache.clear_device(&DeviceId::new("dev-1"));

        assert!(!cache.set_while_connected(key("dev-1", 1), Bytes::from_static(&[2]), &bus));
        assert!(!cache.contains(&key("dev-1", 1)));
        assert!(cache.set_while_connected(key("dev-2", 1), Bytes::from_static(&[3]), &bus));
    }

    proptest! {
        #[test]
        fn prop_clear_device_removes_exactly_that_device(
            entries in prop::collection::vec((0u8..3, 0u128..8, any::<u8>()), 0..24)
        ) {
            let cache = ValueCache::new();
            for (device, characteristic, value) in &entries {
                cache.set(key(&format!("dev-{device}"), *characteristic), Bytes::from(vec![*value]));
            }
            let total = cache.len();
            let target = DeviceId::new("dev-0");
            let expected = entries
                .iter()
                .filter(|(device, _, _)| *device == 0)
                .map(|(_, characteristic, _)| *characteristic)
                .collect::<std::collections::HashSet<_>>()
                .len();

            prop_assert_eq!(cache.clear_device(&target), expected);
            prop_assert_eq!(cache.len(), total - expected);
            for (device, characteristic, _) in &entries {
                prop_assert_eq!(cache.contains(&key(&format!("dev-{device}"), *characteristic)), *device != 0);
            }
        }
    }
}
