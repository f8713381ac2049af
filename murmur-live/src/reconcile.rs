//! Reconciliation against the ledger.
//!
//! One reconciliation per subject runs at a time. A caller that arrives
//! while one is running waits for it to finish and then joins (or starts)
//! the next one, since the running read may predate the caller's request.

use crate::OptimisticStateStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use murmur_core::{
    Address, LedgerError, Schema, SubjectId, TaskId, TaskScheduler, TypedRecord, ViewerState,
};
use murmur_storage::{Freshness, ReadCache, SchemaIdCache};
use std::sync::Arc;
use std::time::Duration;

type ReconcileResult = Result<ViewerState, LedgerError>;
type SharedReconcile = Shared<BoxFuture<'static, ReconcileResult>>;

/// Re-derives live aggregates from the authoritative record stream.
#[derive(Clone)]
pub struct Reconciler {
    cache: ReadCache,
    store: Arc<OptimisticStateStore>,
    schema: Schema,
    publisher: Address,
    inflight: Arc<DashMap<SubjectId, SharedReconcile>>,
}

impl Reconciler {
    /// Build a reconciler reading `schema` records published by `publisher`.
    pub fn new(
        cache: ReadCache,
        store: Arc<OptimisticStateStore>,
        schema: Schema,
        publisher: Address,
    ) -> Self {
        Self {
            cache,
            store,
            schema,
            publisher,
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// The store whose aggregates this reconciler replaces.
    pub fn store(&self) -> &Arc<OptimisticStateStore> {
        &self.store
    }

    /// Schema of the live action records.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Schema id memo shared with the read cache.
    pub fn schema_ids(&self) -> &Arc<SchemaIdCache> {
        self.cache.schema_ids()
    }

    /// Number of subjects with a reconciliation running.
    pub fn in_flight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Read every live action for the subject, fold, and swap the result in.
    ///
    /// Reads bypass cached entries. When a reconciliation for the subject is
    /// already running, this waits for it and then shares one follow-up
    /// reconciliation with every other caller that arrived meanwhile, so the
    /// returned value always comes from a read issued after the call. On a
    /// read failure the optimistic value stays and the error is returned.
    pub async fn reconcile(&self, subject_id: &SubjectId) -> Result<ViewerState, LedgerError> {
        let running = self.inflight.get(subject_id).map(|flight| flight.value().clone());
        if let Some(running) = running {
            tracing::trace!(subject = %subject_id, "Waiting on in-flight reconcile");
            let _ = running.await;
        }
        self.join_or_start(subject_id).await
    }

    fn join_or_start(&self, subject_id: &SubjectId) -> SharedReconcile {
        match self.inflight.entry(subject_id.clone()) {
            Entry::Occupied(flight) => {
                tracing::trace!(subject = %subject_id, "Joining follow-up reconcile");
                flight.get().clone()
            }
            Entry::Vacant(slot) => {
                let flight = self.spawn_reconcile(subject_id.clone());
                slot.insert(flight.clone());
                flight
            }
        }
    }

    /// Run one reconciliation on its own task. Must be called with the
    /// subject's in-flight slot held so the marker exists before the task
    /// can clear it.
    fn spawn_reconcile(&self, subject_id: SubjectId) -> SharedReconcile {
        let reconciler = self.clone();
        let task_subject = subject_id.clone();
        let handle = tokio::spawn(async move {
            let result = reconciler.reconcile_once(&task_subject).await;
            reconciler.inflight.remove(&task_subject);
            result
        });

        let inflight = Arc::clone(&self.inflight);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => {
                    inflight.remove(&subject_id);
                    Err(LedgerError::Network {
                        message: format!("reconcile task failed: {}", err),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn reconcile_once(&self, subject_id: &SubjectId) -> ReconcileResult {
        let Some(ticket) = self.store.begin_reconcile(subject_id) else {
            // Only reachable when another reconciler shares this store.
            tracing::warn!(subject = %subject_id, "Store already reconciling; returning current value");
            return Ok(self.store.get_or_empty(subject_id));
        };

        let read = self
            .cache
            .read_with(
                &self.schema,
                self.publisher,
                Some(subject_id.as_str()),
                Freshness::consistent(),
            )
            .await;

        match read {
            Ok(batch) => {
                let records = batch.value();
                let state = ViewerState::fold(
                    subject_id.clone(),
                    records.iter().filter_map(TypedRecord::as_live_action),
                );
                Ok(self.store.finish_reconcile(ticket, state))
            }
            Err(err) => {
                tracing::warn!(subject = %subject_id, error = %err, "Reconcile read failed; keeping optimistic value");
                self.store.abort_reconcile(ticket);
                Err(err)
            }
        }
    }

    /// Reconcile every dirty subject once. Returns how many converged reads
    /// succeeded.
    pub async fn reconcile_dirty(&self) -> usize {
        let mut reconciled = 0;
        for subject_id in self.store.dirty_subjects() {
            if self.reconcile(&subject_id).await.is_ok() {
                reconciled += 1;
            }
        }
        reconciled
    }

    /// Start the periodic reconciliation loop for dirty subjects.
    pub fn start(&self, tasks: &TaskScheduler, interval: Duration) -> TaskId {
        let reconciler = self.clone();
        tasks.spawn_periodic("live-reconcile", interval, None, move || {
            let reconciler = reconciler.clone();
            async move {
                let reconciled = reconciler.reconcile_dirty().await;
                if reconciled > 0 {
                    tracing::debug!(reconciled, "Reconciliation pass complete");
                }
            }
            .boxed()
        })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("schema", &self.schema.name)
            .field("publisher", &self.publisher)
            .field("in_flight", &self.inflight.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionSink, GatewaySink, Phase};
    use murmur_core::{ErrorKind, LedgerGateway, LiveAction};
    use murmur_test_utils::assertions::assert_viewers;
    use murmur_test_utils::fixtures::{addr, live_schema, seed_live};
    use murmur_test_utils::generators::arb_live_records;
    use murmur_test_utils::InMemoryLedger;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const PUBLISHER: u8 = 9;

    fn setup() -> (InMemoryLedger, Reconciler) {
        let ledger = InMemoryLedger::new(addr(PUBLISHER));
        let gateway: Arc<dyn LedgerGateway> = Arc::new(ledger.clone());
        let sink: Arc<dyn ActionSink> = Arc::new(GatewaySink::new(Arc::clone(&gateway), live_schema()));
        let store = Arc::new(OptimisticStateStore::new(sink));
        let cache = ReadCache::new(gateway, Arc::new(SchemaIdCache::new()), Duration::from_secs(5));
        let reconciler = Reconciler::new(cache, store, live_schema(), addr(PUBLISHER));
        (ledger, reconciler)
    }

    #[tokio::test]
    async fn test_duplicate_views_count_once() {
        let (ledger, reconciler) = setup();
        let publisher = addr(PUBLISHER);
        seed_live(&ledger, publisher, "post-42", 1, LiveAction::View, 10);
        seed_live(&ledger, publisher, "post-42", 1, LiveAction::View, 20);
        seed_live(&ledger, publisher, "post-42", 2, LiveAction::View, 15);

        let state = reconciler.reconcile(&SubjectId::from("post-42")).await.unwrap();
        assert_eq!(state.viewer_count(), 2);
        assert_eq!(
            reconciler.store().phase(&SubjectId::from("post-42")),
            Some(Phase::Converged)
        );
    }

    #[tokio::test]
    async fn test_typing_last_action_wins() {
        let (ledger, reconciler) = setup();
        let publisher = addr(PUBLISHER);
        seed_live(&ledger, publisher, "s", 1, LiveAction::TypingStart, 10);
        seed_live(&ledger, publisher, "s", 1, LiveAction::TypingStop, 20);
        seed_live(&ledger, publisher, "s", 2, LiveAction::TypingStart, 30);

        let state = reconciler.reconcile(&SubjectId::from("s")).await.unwrap();
        assert_viewers(&state, &[], &[2]);
    }

    #[tokio::test]
    async fn test_read_failure_keeps_optimistic_value() {
        let (ledger, reconciler) = setup();
        let subject = SubjectId::from("s");
        reconciler.store().apply_local(&subject, addr(4), LiveAction::View);

        ledger.fail_next_reads(1, ErrorKind::Network);
        let err = reconciler.reconcile(&subject).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_viewers(&reconciler.store().get(&subject).unwrap(), &[4], &[]);
        assert_eq!(reconciler.store().phase(&subject), Some(Phase::Dirty));
    }

    #[tokio::test]
    async fn test_reconcile_sees_background_write() {
        let (_ledger, reconciler) = setup();
        let subject = SubjectId::from("s");
        reconciler.store().apply_local(&subject, addr(3), LiveAction::View);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let state = reconciler.reconcile(&subject).await.unwrap();
        assert_viewers(&state, &[3], &[]);
        assert_eq!(reconciler.store().phase(&subject), Some(Phase::Converged));
    }

    #[tokio::test]
    async fn test_reconcile_dirty_and_loop() {
        let (ledger, reconciler) = setup();
        let subject = SubjectId::from("s");
        // Persist fails, so only the loop's read can clear the dirty flag.
        ledger.fail_next_submits(1, ErrorKind::Rejected);
        reconciler.store().apply_local(&subject, addr(1), LiveAction::View);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(reconciler.store().dirty_subjects(), vec![subject.clone()]);

        let tasks = TaskScheduler::new();
        reconciler.start(&tasks, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        tasks.shutdown().await;

        assert!(reconciler.store().dirty_subjects().is_empty());
        // The ledger never saw the write; the authoritative value wins.
        assert_viewers(&reconciler.store().get(&subject).unwrap(), &[], &[]);
    }

    #[tokio::test]
    async fn test_concurrent_reconciles_see_ledger_value() {
        let (ledger, reconciler) = setup();
        seed_live(&ledger, addr(PUBLISHER), "post-42", 1, LiveAction::View, 10);
        ledger.set_read_delay(Some(Duration::from_millis(50)));
        let subject = SubjectId::from("post-42");

        let late = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            reconciler.reconcile(&subject).await
        };
        let later = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            reconciler.reconcile(&subject).await
        };
        let (first, second, third) = tokio::join!(reconciler.reconcile(&subject), late, later);

        assert_eq!(first.unwrap().viewer_count(), 1);
        assert_eq!(second.unwrap().viewer_count(), 1);
        assert_eq!(third.unwrap().viewer_count(), 1);
        // One read for the first call, one follow-up shared by the other two.
        assert_eq!(ledger.read_calls(), 2);
        assert_eq!(reconciler.in_flight_count(), 0);
        assert_eq!(reconciler.store().phase(&subject), Some(Phase::Converged));
    }

    #[tokio::test]
    async fn test_waiter_sees_record_landing_during_running_read() {
        let (ledger, reconciler) = setup();
        seed_live(&ledger, addr(PUBLISHER), "s", 1, LiveAction::View, 10);
        ledger.set_read_delay(Some(Duration::from_millis(40)));
        let subject = SubjectId::from("s");

        let waiter = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            seed_live(&ledger, addr(PUBLISHER), "s", 2, LiveAction::View, 20);
            reconciler.reconcile(&subject).await
        };
        let (_, waited) = tokio::join!(reconciler.reconcile(&subject), waiter);
        assert_viewers(&waited.unwrap(), &[1, 2], &[]);
    }

    fn expected_viewers(records: &[murmur_core::LiveActionRecord], subject: &str) -> BTreeSet<Address> {
        records
            .iter()
            .filter(|r| r.subject_id.as_str() == subject && r.action == LiveAction::View)
            .map(|r| r.actor)
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_reconciled_viewers_are_distinct_viewers(records in arb_live_records("live-subject", 30)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (ledger, reconciler) = setup();
            let publisher = addr(PUBLISHER);
            for record in &records {
                seed_live(
                    &ledger,
                    publisher,
                    record.subject_id.as_str(),
                    record.actor.0[0],
                    record.action,
                    record.timestamp,
                );
            }

            let state = runtime
                .block_on(reconciler.reconcile(&SubjectId::from("live-subject")))
                .unwrap();
            prop_assert_eq!(state.viewers, expected_viewers(&records, "live-subject"));
        }
    }
}
