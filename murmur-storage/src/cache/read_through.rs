//! TTL read cache with request deduplication.
//!
//! A read first looks for an unexpired entry, then for a fetch already in
//! flight for the same [`CacheKey`], and only then calls the gateway. The
//! fetch runs on its own task, so the in-flight marker is cleared and the
//! result cached even if every caller gives up waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use murmur_core::{
    Address, CacheConfig, LedgerError, LedgerGateway, RecordCodec, Schema, TypedRecord,
};

use super::freshness::{CacheRead, Freshness};
use super::key::CacheKey;
use super::stats::{CacheStats, StatCounters};
use crate::schema_ids::SchemaIdCache;

/// Decoded records returned by one read, shared between all waiters.
pub type RecordBatch = Arc<Vec<TypedRecord>>;

type FetchResult = Result<(RecordBatch, DateTime<Utc>), LedgerError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct CacheEntry {
    batch: RecordBatch,
    stored_at: Instant,
    cached_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    inflight: HashMap<CacheKey, SharedFetch>,
}

/// Read-through cache in front of [`LedgerGateway::read`].
///
/// Entries expire by age only (`now - cached_at < ttl`); writes never touch
/// the cache. Failed fetches are not cached.
#[derive(Clone)]
pub struct ReadCache {
    gateway: Arc<dyn LedgerGateway>,
    schema_ids: Arc<SchemaIdCache>,
    ttl: Duration,
    state: Arc<Mutex<CacheState>>,
    counters: Arc<StatCounters>,
}

impl ReadCache {
    /// Create a cache whose entries live for `ttl`.
    pub fn new(gateway: Arc<dyn LedgerGateway>, schema_ids: Arc<SchemaIdCache>, ttl: Duration) -> Self {
        Self {
            gateway,
            schema_ids,
            ttl,
            state: Arc::new(Mutex::new(CacheState::default())),
            counters: Arc::new(StatCounters::default()),
        }
    }

    /// Create a cache using `cache.read_ttl_ms`.
    pub fn from_config(
        gateway: Arc<dyn LedgerGateway>,
        schema_ids: Arc<SchemaIdCache>,
        config: &CacheConfig,
    ) -> Self {
        Self::new(gateway, schema_ids, config.read_ttl())
    }

    /// Age after which an entry is no longer served.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Schema id memo used to build cache keys.
    pub fn schema_ids(&self) -> &Arc<SchemaIdCache> {
        &self.schema_ids
    }

    /// Read with the default contract: anything younger than the TTL is
    /// served from memory.
    pub async fn read(
        &self,
        schema: &Schema,
        publisher: Address,
        key: Option<&str>,
    ) -> Result<CacheRead<RecordBatch>, LedgerError> {
        self.read_with(schema, publisher, key, Freshness::best_effort(self.ttl))
            .await
    }

    /// Read with an explicit freshness requirement.
    ///
    /// `NotFound` from the gateway is an empty batch. Records that fail to
    /// decode are skipped with a warning.
    pub async fn read_with(
        &self,
        schema: &Schema,
        publisher: Address,
        key: Option<&str>,
        freshness: Freshness,
    ) -> Result<CacheRead<RecordBatch>, LedgerError> {
        let schema_id = self.schema_ids.get_or_derive(schema);
        let cache_key = CacheKey::new(schema_id, publisher, key);

        let fetch = {
            let mut state = self.lock_state();

            if let Freshness::BestEffort { max_staleness } = freshness {
                if let Some(entry) = state.entries.get(&cache_key) {
                    let age = entry.stored_at.elapsed();
                    if age < self.ttl && age <= max_staleness {
                        StatCounters::bump(&self.counters.hits);
                        tracing::debug!(key = %cache_key, age_ms = age.as_millis() as u64, "Read cache hit");
                        return Ok(CacheRead::from_cache(
                            Arc::clone(&entry.batch),
                            entry.cached_at,
                        ));
                    }
                }
            }

            StatCounters::bump(&self.counters.misses);
            match state.inflight.get(&cache_key) {
                Some(fetch) => {
                    StatCounters::bump(&self.counters.dedup_joins);
                    tracing::debug!(key = %cache_key, "Joining in-flight read");
                    fetch.clone()
                }
                None => {
                    let fetch = self.spawn_fetch(schema.clone(), cache_key.clone());
                    state.inflight.insert(cache_key, fetch.clone());
                    fetch
                }
            }
        };

        let (batch, fetched_at) = fetch.await?;
        Ok(CacheRead::from_ledger(batch, fetched_at))
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut state = self.lock_state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before - state.entries.len()
    }

    /// Number of gateway reads currently running.
    pub fn in_flight_count(&self) -> usize {
        self.lock_state().inflight.len()
    }

    /// Snapshot of hit, miss and dedup counters.
    pub fn stats(&self) -> CacheStats {
        let entries = self.lock_state().entries.len();
        self.counters.snapshot(entries)
    }

    /// Start the one gateway call for `cache_key`. Must be called with the
    /// state lock held so the marker is inserted before the task can clear it.
    fn spawn_fetch(&self, schema: Schema, cache_key: CacheKey) -> SharedFetch {
        let gateway = Arc::clone(&self.gateway);
        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        let task_key = cache_key.clone();

        let handle = tokio::spawn(async move {
            StatCounters::bump(&counters.fetches);
            let result = fetch_batch(gateway.as_ref(), &schema, &task_key).await;

            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            guard.inflight.remove(&task_key);
            match &result {
                Ok((batch, fetched_at)) => {
                    guard.entries.insert(
                        task_key,
                        CacheEntry {
                            batch: Arc::clone(batch),
                            stored_at: Instant::now(),
                            cached_at: *fetched_at,
                        },
                    );
                }
                Err(err) => {
                    StatCounters::bump(&counters.fetch_errors);
                    tracing::debug!(key = %task_key, error = %err, "Read failed; not cached");
                }
            }
            result
        });

        let state = Arc::clone(&self.state);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => {
                    state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .inflight
                        .remove(&cache_key);
                    Err(LedgerError::Network {
                        message: format!("read task failed: {}", err),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn fetch_batch(gateway: &dyn LedgerGateway, schema: &Schema, key: &CacheKey) -> FetchResult {
    let raw = match gateway.read(key.schema_id(), key.publisher(), key.key()).await {
        Ok(raw) => raw,
        Err(LedgerError::NotFound { .. }) => Vec::new(),
        Err(err) => return Err(err),
    };

    let mut records = Vec::with_capacity(raw.len());
    for record in &raw {
        match RecordCodec::decode_typed(schema, record) {
            Ok(typed) => records.push(typed),
            Err(err) => tracing::warn!(
                schema = %schema.name,
                ledger_ref = ?record.ledger_ref,
                error = %err,
                "Skipping undecodable record"
            ),
        }
    }
    tracing::debug!(key = %key, records = records.len(), "Fetched record batch");
    Ok((Arc::new(records), Utc::now()))
}
