//! Cache keys for record batch reads.

use murmur_core::{Address, SchemaId};
use std::fmt;

/// Identity of one read: (schema, publisher, optional key).
///
/// Two reads share a cache entry and an in-flight fetch exactly when their
/// keys are equal. Fields are private so a key is only ever built from a
/// resolved `SchemaId`, never from a raw schema name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    schema_id: SchemaId,
    publisher: Address,
    key: Option<String>,
}

impl CacheKey {
    /// Build a key for one `(schema, publisher, key)` read.
    pub fn new(schema_id: SchemaId, publisher: Address, key: Option<&str>) -> Self {
        Self {
            schema_id,
            publisher,
            key: key.map(str::to_string),
        }
    }

    /// Schema the read targets.
    pub fn schema_id(&self) -> &SchemaId {
        &self.schema_id
    }

    /// Publisher whose records are read.
    pub fn publisher(&self) -> &Address {
        &self.publisher
    }

    /// Record key filter, if any.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}/{}/{}", self.schema_id, self.publisher, key),
            None => write!(f, "{}/{}", self.schema_id, self.publisher),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::Schema;
    use std::collections::HashSet;

    #[test]
    fn test_keys_distinguish_every_component() {
        let live = SchemaId::derive(&Schema::live_action());
        let post = SchemaId::derive(&Schema::post());
        let a = Address([1u8; 20]);
        let b = Address([2u8; 20]);

        let keys: HashSet<CacheKey> = [
            CacheKey::new(live, a, None),
            CacheKey::new(live, a, Some("post-42")),
            CacheKey::new(live, b, Some("post-42")),
            CacheKey::new(post, a, Some("post-42")),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 4);
        assert_eq!(
            CacheKey::new(live, a, Some("x")),
            CacheKey::new(live, a, Some("x"))
        );
    }

    #[test]
    fn test_display_includes_optional_key() {
        let id = SchemaId([0u8; 32]);
        let key = CacheKey::new(id, Address::ZERO, Some("post-42"));
        assert!(key.to_string().ends_with("/post-42"));
        assert_eq!(key.key(), Some("post-42"));
        assert_eq!(CacheKey::new(id, Address::ZERO, None).key(), None);
    }
}
