//! Murmur Storage - Read Path
//!
//! Everything between callers and `LedgerGateway::read`: schema id
//! memoization, the TTL read cache with request deduplication, and an
//! in-process ledger used for development and tests.

pub mod cache;
pub mod memory_ledger;
pub mod schema_ids;

pub use cache::{CacheKey, CacheRead, CacheStats, Freshness, ReadCache, RecordBatch};
pub use memory_ledger::InMemoryLedger;
pub use schema_ids::SchemaIdCache;
