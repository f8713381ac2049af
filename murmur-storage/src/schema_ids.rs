//! Process-lifetime memoization of schema identifiers.

use dashmap::DashMap;
use murmur_core::{Schema, SchemaId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Memoizes `SchemaId::derive` per canonical schema definition.
///
/// Ids are pure functions of the definition, so entries never expire.
#[derive(Debug, Default)]
pub struct SchemaIdCache {
    ids: DashMap<String, SchemaId>,
    derivations: AtomicU64,
}

impl SchemaIdCache {
    /// Create an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// The id for `schema`, deriving it on first use.
    pub fn get_or_derive(&self, schema: &Schema) -> SchemaId {
        let canonical = schema.canonical();
        if let Some(id) = self.ids.get(&canonical) {
            return *id;
        }
        *self.ids.entry(canonical).or_insert_with(|| {
            self.derivations.fetch_add(1, Ordering::Relaxed);
            let id = SchemaId::derive(schema);
            tracing::debug!(schema = %schema.name, schema_id = %id, "Derived schema id");
            id
        })
    }

    /// How many times an id was actually computed.
    pub fn derivation_count(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }

    /// Number of memoized schema ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if nothing has been memoized yet.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::FieldKind;
    use std::sync::Arc;

    #[test]
    fn test_derives_once_per_schema() {
        let cache = SchemaIdCache::new();
        let first = cache.get_or_derive(&Schema::live_action());
        let second = cache.get_or_derive(&Schema::live_action());
        assert_eq!(first, second);
        assert_eq!(first, SchemaId::derive(&Schema::live_action()));
        assert_eq!(cache.derivation_count(), 1);

        cache.get_or_derive(&Schema::post());
        assert_eq!(cache.derivation_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_same_name_different_fields_get_distinct_ids() {
        let cache = SchemaIdCache::new();
        let a = cache.get_or_derive(&Schema::new("s").field("n", FieldKind::Uint64));
        let b = cache.get_or_derive(&Schema::new("s").field("n", FieldKind::String));
        assert_ne!(a, b);
    }

    #[test]
    fn test_concurrent_lookups_agree() {
        let cache = Arc::new(SchemaIdCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get_or_derive(&Schema::interaction()))
            })
            .collect();
        let ids: Vec<SchemaId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.derivation_count(), 1);
    }
}
