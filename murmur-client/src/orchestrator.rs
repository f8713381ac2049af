//! The orchestrator facade.
//!
//! Every piece of mutable state (queue lanes, read cache, live store,
//! metrics, periodic tasks) hangs off one explicitly constructed
//! [`Orchestrator`]. Independent instances share nothing.

use crate::QueuedActionSink;
use futures_util::future::FutureExt;
use murmur_core::{
    Address, ConfigError, IntentId, LedgerError, LedgerGateway, LiveAction, MurmurConfig,
    MurmurResult, Operation, Priority, QueueSnapshot, Schema, SubjectId, SubscriptionId,
    TaskScheduler, TxOutcome, ViewerState, WriteIntent, LIVE_ACTION_SCHEMA,
};
use murmur_live::{LiveCallback, OptimisticStateStore, Phase, Reconciler, SubscriptionManager};
use murmur_queue::{BatchScheduler, MetricsSnapshot};
use murmur_storage::{CacheRead, CacheStats, Freshness, ReadCache, RecordBatch, SchemaIdCache};
use std::sync::Arc;
use std::time::Duration;

/// Owner of the write path, the read path and live state.
pub struct Orchestrator {
    config: MurmurConfig,
    tasks: TaskScheduler,
    writes: BatchScheduler,
    cache: ReadCache,
    store: Arc<OptimisticStateStore>,
    reconciler: Reconciler,
    subscriptions: SubscriptionManager,
}

impl Orchestrator {
    /// Wire every component from a validated config. Starts no tasks.
    pub fn new(gateway: Arc<dyn LedgerGateway>, config: MurmurConfig) -> MurmurResult<Self> {
        config.validate()?;
        if config.live.schema_name != LIVE_ACTION_SCHEMA {
            return Err(ConfigError::InvalidValue {
                field: "live.schema_name",
                reason: format!("unsupported live schema '{}'", config.live.schema_name),
            }
            .into());
        }

        let tasks = TaskScheduler::new();
        let schema_ids = Arc::new(SchemaIdCache::new());
        let live_schema = Schema::live_action();
        let live_schema_id = schema_ids.get_or_derive(&live_schema);

        let writes = BatchScheduler::new(Arc::clone(&gateway), &config);
        let cache = ReadCache::from_config(Arc::clone(&gateway), schema_ids, &config.cache);

        let sink = QueuedActionSink::new(writes.clone(), live_schema.clone(), live_schema_id);
        let store = Arc::new(OptimisticStateStore::new(Arc::new(sink)));
        let reconciler = Reconciler::new(
            cache.clone(),
            Arc::clone(&store),
            live_schema,
            config.live.publisher,
        );
        let subscriptions = SubscriptionManager::new(
            reconciler.clone(),
            gateway,
            tasks.clone(),
            Duration::from_millis(config.live.poll_interval_ms),
        );

        tracing::info!(
            batch_interval_ms = config.queue.batch_interval_ms,
            max_batch_size = config.queue.max_batch_size,
            max_retries = config.retry.max_retries,
            read_ttl_ms = config.cache.read_ttl_ms,
            publisher = %config.live.publisher,
            "Orchestrator created"
        );

        Ok(Self {
            config,
            tasks,
            writes,
            cache,
            store,
            reconciler,
            subscriptions,
        })
    }

    /// Start the batch drain, reconciliation loop and housekeeping tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.writes.start(&self.tasks);
        self.reconciler.start(
            &self.tasks,
            Duration::from_millis(self.config.live.reconcile_interval_ms),
        );

        let writes = self.writes.clone();
        let cache = self.cache.clone();
        self.tasks.spawn_periodic(
            "housekeeping",
            Duration::from_secs(self.config.metrics.prune_interval_secs.max(1)),
            None,
            move || {
                let writes = writes.clone();
                let cache = cache.clone();
                async move {
                    let outcomes = writes.outcomes().prune();
                    let entries = cache.purge_expired();
                    if outcomes + entries > 0 {
                        tracing::debug!(outcomes, entries, "Housekeeping pruned");
                    }
                }
                .boxed()
            },
        );
        tracing::info!(tasks = ?self.tasks.task_names(), "Orchestrator started");
    }

    pub fn config(&self) -> &MurmurConfig {
        &self.config
    }

    pub fn tasks(&self) -> &TaskScheduler {
        &self.tasks
    }

    // === Write path ===

    /// Queue a write. Always succeeds.
    pub fn enqueue_write(&self, operation: Operation, priority: Priority) -> IntentId {
        self.writes.enqueue(WriteIntent::new(operation, priority))
    }

    /// Queue a prepared intent, callbacks included.
    pub fn enqueue_intent(&self, intent: WriteIntent) -> IntentId {
        self.writes.enqueue(intent)
    }

    /// Remove a write that has not been dispatched yet.
    pub fn cancel_write(&self, id: IntentId) -> bool {
        self.writes.cancel(id)
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.writes.queue_snapshot()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.writes.metrics()
    }

    /// Terminal outcome of a write, while it is retained.
    pub fn outcome(&self, id: &IntentId) -> Option<TxOutcome> {
        self.writes.outcome(id)
    }

    /// Run one drain tick now, outside the periodic schedule.
    pub async fn flush(&self) -> murmur_queue::TickReport {
        self.writes.tick().await
    }

    // === Read path ===

    /// Cached, deduplicated read. Errors degrade to an empty batch.
    pub async fn read_records(
        &self,
        schema: &Schema,
        publisher: Address,
        key: Option<&str>,
    ) -> RecordBatch {
        match self.cache.read(schema, publisher, key).await {
            Ok(read) => read.into_value(),
            Err(err) => {
                tracing::warn!(schema = %schema.name, publisher = %publisher, error = %err, "Read degraded to empty");
                RecordBatch::default()
            }
        }
    }

    /// Read with an explicit freshness requirement and cache metadata.
    pub async fn read_with(
        &self,
        schema: &Schema,
        publisher: Address,
        key: Option<&str>,
        freshness: Freshness,
    ) -> Result<CacheRead<RecordBatch>, LedgerError> {
        self.cache.read_with(schema, publisher, key, freshness).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // === Live state ===

    /// Apply a presence action locally and persist it in the background.
    pub fn apply_local_action(
        &self,
        subject_id: &SubjectId,
        actor: Address,
        action: LiveAction,
    ) -> ViewerState {
        self.store.apply_local(subject_id, actor, action)
    }

    pub fn live_state(&self, subject_id: &SubjectId) -> Option<ViewerState> {
        self.store.get(subject_id)
    }

    pub fn live_phase(&self, subject_id: &SubjectId) -> Option<Phase> {
        self.store.phase(subject_id)
    }

    /// Re-derive a subject's aggregate from the ledger now.
    pub async fn reconcile(&self, subject_id: &SubjectId) -> Result<ViewerState, LedgerError> {
        self.reconciler.reconcile(subject_id).await
    }

    pub async fn subscribe_live(&self, subject_id: SubjectId, callback: LiveCallback) -> SubscriptionId {
        self.subscriptions.subscribe(subject_id, callback).await
    }

    pub fn unsubscribe_live(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    // === Lifecycle ===

    pub fn pause(&self) {
        self.tasks.pause();
    }

    pub fn resume(&self) {
        self.tasks.resume();
    }

    /// End every subscription and stop every periodic task.
    ///
    /// Queued writes stay queued; in-flight batches finish first.
    pub async fn shutdown(&self) {
        let ended = self.subscriptions.unsubscribe_all();
        self.tasks.shutdown().await;
        tracing::info!(subscriptions = ended, pending = self.queue_snapshot().pending_count, "Orchestrator shut down");
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("writes", &self.writes)
            .field("subscriptions", &self.subscriptions)
            .field("tasks", &self.tasks.task_names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::ErrorKind;
    use murmur_test_utils::fixtures::{addr, op};
    use murmur_test_utils::{shared, FlakyGateway, InMemoryLedger, PendingGateway};

    #[test]
    fn test_new_rejects_invalid_config() {
        let (_, gateway) = shared(FlakyGateway::new());
        let mut config = MurmurConfig::default();
        config.queue.max_batch_size = 0;
        let err = Orchestrator::new(gateway, config).unwrap_err();
        assert!(matches!(err, murmur_core::MurmurError::Config(_)));
    }

    #[test]
    fn test_new_rejects_unknown_live_schema() {
        let (_, gateway) = shared(FlakyGateway::new());
        let mut config = MurmurConfig::default();
        config.live.schema_name = "chat".to_string();
        assert!(Orchestrator::new(gateway, config).is_err());
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let (_, a_gateway) = shared(FlakyGateway::new());
        let (_, b_gateway) = shared(FlakyGateway::new());
        let a = Orchestrator::new(a_gateway, MurmurConfig::default()).unwrap();
        let b = Orchestrator::new(b_gateway, MurmurConfig::default()).unwrap();

        a.enqueue_write(op(1), Priority::High);
        assert_eq!(a.queue_snapshot().pending_count, 1);
        assert_eq!(b.queue_snapshot().pending_count, 0);
    }

    #[tokio::test]
    async fn test_apply_local_action_with_stalled_ledger() {
        let (pending, gateway) = shared(PendingGateway::new());
        let orchestrator = Orchestrator::new(gateway, MurmurConfig::default()).unwrap();
        orchestrator.start();

        let subject = SubjectId::from("post-42");
        let state = orchestrator.apply_local_action(&subject, addr(1), LiveAction::View);
        assert_eq!(state.viewer_count(), 1);
        assert_eq!(orchestrator.live_phase(&subject), Some(Phase::Dirty));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pending.calls() >= 1);
        assert_eq!(orchestrator.live_state(&subject).unwrap().viewer_count(), 1);
    }

    #[tokio::test]
    async fn test_read_records_degrades_to_empty() {
        let ledger = InMemoryLedger::new(addr(9));
        ledger.fail_next_reads(1, ErrorKind::Network);
        let orchestrator =
            Orchestrator::new(Arc::new(ledger), MurmurConfig::default()).unwrap();
        let batch = orchestrator
            .read_records(&Schema::post(), addr(9), None)
            .await;
        assert!(batch.is_empty());
    }
}
