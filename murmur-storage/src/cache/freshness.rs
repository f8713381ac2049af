//! Freshness contracts for cache reads.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Staleness tolerance a caller accepts for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve a cached batch if it is younger than both the cache TTL and
    /// `max_staleness`; otherwise fetch.
    BestEffort {
        /// Maximum acceptable age of a cached batch.
        max_staleness: Duration,
    },

    /// Ignore any cached batch and go to the ledger.
    ///
    /// A fetch already in flight for the same key is still shared, so N
    /// consistent readers cost one gateway call.
    Consistent,
}

impl Freshness {
    /// Accept a cached value no older than `max_staleness`.
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    /// Always fetch from the ledger, joining any fetch already in flight.
    pub fn consistent() -> Self {
        Self::Consistent
    }

    /// Check if this requirement bypasses cached entries.
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Max staleness for BestEffort, zero for Consistent.
    pub fn max_staleness(&self) -> Duration {
        match self {
            Self::BestEffort { max_staleness } => *max_staleness,
            Self::Consistent => Duration::ZERO,
        }
    }
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    /// When the value was fetched from the ledger.
    cached_at: DateTime<Utc>,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A value served from a cached entry.
    pub fn from_cache(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// A value produced by a ledger fetch (own or shared in-flight).
    pub fn from_ledger(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at: fetched_at,
            was_cache_hit: false,
        }
    }

    /// Consume the read, returning the value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Borrow the value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Time since the value was fetched from the ledger.
    pub fn staleness(&self) -> Duration {
        let now = Utc::now();
        if now > self.cached_at {
            (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        }
    }

    /// When the value was fetched from the ledger.
    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Whether the value came from a cached entry.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Whether the value came from a ledger fetch.
    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
