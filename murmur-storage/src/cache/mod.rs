//! Read cache with explicit freshness and request deduplication.
//!
//! Callers state their staleness tolerance via [`Freshness`] and get back a
//! [`CacheRead<T>`] that says whether the value came from the cache and how
//! old it is.
//!
//! # Example
//!
//! ```ignore
//! // Default read: anything younger than the TTL is served from memory
//! let read = cache.read(&schema, publisher, Some("post-42")).await?;
//!
//! // Reconciliation: skip the cached entry, still share an in-flight fetch
//! let read = cache
//!     .read_with(&schema, publisher, Some("post-42"), Freshness::Consistent)
//!     .await?;
//!
//! if read.staleness() > Duration::from_secs(2) {
//!     tracing::debug!("serving an older batch");
//! }
//! ```

pub mod freshness;
pub mod key;
pub mod read_through;
pub mod stats;

pub use freshness::{CacheRead, Freshness};
pub use key::CacheKey;
pub use read_through::{ReadCache, RecordBatch};
pub use stats::CacheStats;
