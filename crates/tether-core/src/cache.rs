//! Attribute memoization.
//!
//! The cache deduplicates descriptor reads and remembers the last-seen value
//! of each characteristic so redundant transport deliveries can be
//! suppressed. Pure in-memory state, no failure modes.

use std::collections::HashMap;

use bytes::Bytes;
use uuid::Uuid;

/// Cache key for a descriptor: (characteristic, descriptor).
type DescriptorKey = (Uuid, Uuid);

/// Deduplicating cache of descriptor values and last-seen characteristic
/// values.
#[derive(Debug, Default)]
pub struct AttributeCache {
    descriptors: HashMap<DescriptorKey, String>,
    last_values: HashMap<Uuid, Bytes>,
}

impl AttributeCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a descriptor has already been read this process lifetime.
    pub fn is_descriptor_read(&self, characteristic: Uuid, descriptor: Uuid) -> bool {
        self.descriptors.contains_key(&(characteristic, descriptor))
    }

    /// The cached descriptor value, if one was recorded.
    pub fn cached_descriptor_value(&self, characteristic: Uuid, descriptor: Uuid) -> Option<&str> {
        self.descriptors
            .get(&(characteristic, descriptor))
            .map(String::as_str)
    }

    /// Record a descriptor value, first-write-wins: once a value is cached
    /// it is never overwritten, even by a different value.
    pub fn record_descriptor_value(
        &mut self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: impl Into<String>,
    ) {
        self.descriptors
            .entry((characteristic, descriptor))
            .or_insert_with(|| value.into());
    }

    /// The first cached descriptor string attached to a characteristic, used
    /// as its human-readable label in log lines.
    pub fn label_for(&self, characteristic: Uuid) -> Option<&str> {
        self.descriptors
            .iter()
            .filter(|((c, _), _)| *c == characteristic)
            .map(|(_, v)| v.as_str())
            .next()
    }

    /// Whether the transport already delivered this exact value for the
    /// characteristic.
    pub fn has_seen_characteristic_value(&self, characteristic: Uuid, value: &[u8]) -> bool {
        self.last_values
            .get(&characteristic)
            .is_some_and(|last| last.as_ref() == value)
    }

    /// Remember the last-seen value of a characteristic.
    pub fn record_characteristic_value(&mut self, characteristic: Uuid, value: Bytes) {
        self.last_values.insert(characteristic, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_read_once() {
        let mut cache = AttributeCache::new();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();

        assert!(!cache.is_descriptor_read(c, d));
        cache.record_descriptor_value(c, d, "Label");
        assert!(cache.is_descriptor_read(c, d));
        assert_eq!(cache.cached_descriptor_value(c, d), Some("Label"));
    }

    #[test]
    fn descriptor_first_write_wins() {
        let mut cache = AttributeCache::new();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();

        cache.record_descriptor_value(c, d, "First");
        cache.record_descriptor_value(c, d, "Second");
        assert_eq!(cache.cached_descriptor_value(c, d), Some("First"));
    }

    #[test]
    fn descriptor_keys_are_per_characteristic() {
        let mut cache = AttributeCache::new();
        let d = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();

        cache.record_descriptor_value(c1, d, "One");
        assert!(!cache.is_descriptor_read(c2, d));
    }

    #[test]
    fn label_for_returns_a_cached_descriptor() {
        let mut cache = AttributeCache::new();
        let c = Uuid::new_v4();
        assert_eq!(cache.label_for(c), None);

        cache.record_descriptor_value(c, Uuid::new_v4(), "Heart Rate");
        assert_eq!(cache.label_for(c), Some("Heart Rate"));
    }

    #[test]
    fn characteristic_value_dedup() {
        let mut cache = AttributeCache::new();
        let c = Uuid::new_v4();

        assert!(!cache.has_seen_characteristic_value(c, b"abc"));
        cache.record_characteristic_value(c, Bytes::from_static(b"abc"));
        assert!(cache.has_seen_characteristic_value(c, b"abc"));
        assert!(!cache.has_seen_characteristic_value(c, b"abd"));

        // Unlike descriptors, the last value moves with each update
        cache.record_characteristic_value(c, Bytes::from_static(b"abd"));
        assert!(cache.has_seen_characteristic_value(c, b"abd"));
        assert!(!cache.has_seen_characteristic_value(c, b"abc"));
    }
}
