//! Batch scheduler.
//!
//! Each tick drains up to `max_batch_size` intents and runs them
//! concurrently. Ticks are single-flight: a tick that starts while the
//! previous batch is still executing is skipped. Retryable failures go back
//! to the front of their lane once the whole batch has settled, so they are
//! picked up by the next tick.

use crate::{
    Enqueued, MetricsSnapshot, MetricsTracker, OutcomeLog, PriorityWriteQueue, RetryCoordinator,
    RetryDecision, TransactionExecutor,
};
use futures_util::future::{join_all, FutureExt};
use murmur_core::{
    IntentId, LedgerGateway, MurmurConfig, QueueSnapshot, TaskId, TaskScheduler, TxOutcome,
    WriteIntent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Counts from one executed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub requeued: usize,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReport {
    /// A previous batch was still executing.
    Skipped,
    /// Nothing was queued.
    Idle,
    Ran(BatchSummary),
}

struct SchedulerCore {
    queue: PriorityWriteQueue,
    executor: TransactionExecutor,
    retry: RetryCoordinator,
    metrics: Arc<MetricsTracker>,
    outcomes: OutcomeLog,
    max_batch_size: usize,
    batch_interval: Duration,
    drain_on_idle: bool,
    trigger: Arc<Notify>,
    running: AtomicBool,
}

/// Clears the single-flight flag when a tick ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the write queue and drives it through the executor.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct BatchScheduler {
    core: Arc<SchedulerCore>,
}

impl BatchScheduler {
    /// Build a scheduler and its executor, metrics and outcome log from `config`.
    pub fn new(gateway: Arc<dyn LedgerGateway>, config: &MurmurConfig) -> Self {
        let metrics = Arc::new(MetricsTracker::from_config(&config.metrics));
        let executor =
            TransactionExecutor::from_config(gateway, &config.executor, Arc::clone(&metrics));
        Self {
            core: Arc::new(SchedulerCore {
                queue: PriorityWriteQueue::new(),
                executor,
                retry: RetryCoordinator::from_config(&config.retry),
                metrics,
                outcomes: OutcomeLog::from_config(&config.metrics),
                max_batch_size: config.queue.max_batch_size,
                batch_interval: Duration::from_millis(config.queue.batch_interval_ms),
                drain_on_idle: config.queue.drain_on_idle_enqueue,
                trigger: Arc::new(Notify::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Queue an intent. Never fails and never blocks.
    ///
    /// An intent arriving on an idle queue wakes the drain task immediately
    /// when drain-on-idle is enabled.
    pub fn enqueue(&self, intent: WriteIntent) -> IntentId {
        let enqueued: Enqueued = self.core.queue.enqueue(intent);
        if enqueued.was_idle && self.core.drain_on_idle {
            self.core.trigger.notify_one();
        }
        enqueued.id
    }

    /// Drop an intent that has not been dispatched yet. Its callbacks never fire.
    pub fn cancel(&self, id: IntentId) -> bool {
        self.core.queue.cancel(id).is_some()
    }

    /// Point-in-time lane counts.
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.core.queue.snapshot()
    }

    /// Point-in-time write metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Terminal outcome of an intent, while it is retained.
    pub fn outcome(&self, id: &IntentId) -> Option<TxOutcome> {
        self.core.outcomes.get(id)
    }

    /// The outcome log, for pruning.
    pub fn outcomes(&self) -> &OutcomeLog {
        &self.core.outcomes
    }

    /// Drain and execute one batch.
    pub async fn tick(&self) -> TickReport {
        let core = &self.core;
        let Some(_guard) = RunGuard::acquire(&core.running) else {
            tracing::trace!("Previous batch still executing; tick skipped");
            return TickReport::Skipped;
        };

        let batch = core.queue.drain_batch(core.max_batch_size);
        if batch.is_empty() {
            return TickReport::Idle;
        }

        let mut summary = BatchSummary {
            dispatched: batch.len(),
            ..BatchSummary::default()
        };
        tracing::debug!(batch_size = summary.dispatched, "Dispatching batch");

        let attempts = batch
            .into_iter()
            .map(|intent| core.executor.execute_owned(intent));
        let results = join_all(attempts).await;

        let mut requeue = Vec::new();
        for (intent, result) in results {
            match result {
                Ok(outcome) => {
                    core.metrics.record_success(outcome.latency_ms);
                    core.outcomes.record(outcome.clone());
                    core.queue.settle(1);
                    summary.succeeded += 1;
                    intent.complete(&outcome);
                }
                Err(err) => {
                    let latency_ms = err.latency_ms;
                    match core.retry.decide(intent, err.error) {
                        RetryDecision::Requeue(intent) => {
                            core.metrics.record_retry();
                            summary.requeued += 1;
                            requeue.push(intent);
                        }
                        RetryDecision::Fail(intent, failure) => {
                            core.metrics.record_failure();
                            core.outcomes.record(TxOutcome::failed(
                                intent.id,
                                failure.kind,
                                latency_ms,
                                failure.retry_count,
                            ));
                            core.queue.settle(1);
                            summary.failed += 1;
                            tracing::error!(
                                intent_id = %intent.id,
                                method = %intent.operation.method,
                                error_kind = %failure.kind,
                                retry_count = failure.retry_count,
                                "Write failed terminally: {}",
                                failure.error
                            );
                            intent.fail(&failure);
                        }
                    }
                }
            }
        }
        core.queue.requeue_front(requeue);

        tracing::debug!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            requeued = summary.requeued,
            "Batch settled"
        );
        TickReport::Ran(summary)
    }

    /// Register the drain job on `tasks`, ticking every `batch_interval_ms`
    /// and on every idle enqueue.
    pub fn start(&self, tasks: &TaskScheduler) -> TaskId {
        let scheduler = self.clone();
        tasks.spawn_periodic(
            "batch-drain",
            self.core.batch_interval,
            Some(Arc::clone(&self.core.trigger)),
            move || {
                let scheduler = scheduler.clone();
                async move {
                    scheduler.tick().await;
                }
                .boxed()
            },
        )
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("max_batch_size", &self.core.max_batch_size)
            .field("batch_interval", &self.core.batch_interval)
            .field("queue", &self.core.queue.snapshot())
            .finish_non_exhaustive()
    }
}
