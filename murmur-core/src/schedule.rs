//! Periodic task scheduler.
//!
//! One owner for every interval-driven job (batch drain, reconciliation,
//! subscription polling, outcome pruning) so they can be paused, resumed and
//! torn down together. A job is never interrupted mid-run: cancellation and
//! shutdown take effect between runs.

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Identifier of a scheduled task.
pub type TaskId = u64;

type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct TaskEntry {
    name: String,
    handle: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

struct SchedulerInner {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    next_id: AtomicU64,
    paused_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
}

/// Owner of all periodic background tasks.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        let (paused_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                paused_tx,
                shutdown_tx,
            }),
        }
    }

    /// Run `job` every `period` until cancelled or shut down.
    ///
    /// The first run happens immediately. When `trigger` is given, each
    /// `notify_one` on it causes an extra out-of-cycle run. Must be called
    /// from within a tokio runtime.
    pub fn spawn_periodic<F>(
        &self,
        name: impl Into<String>,
        period: Duration,
        trigger: Option<Arc<Notify>>,
        job: F,
    ) -> TaskId
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        if self.is_shut_down() {
            tracing::debug!(task = %name, "Scheduler shut down; task not started");
            return id;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run_periodic(
            name.clone(),
            period,
            trigger,
            Arc::new(job),
            self.inner.shutdown_tx.subscribe(),
            cancel_rx,
            self.inner.paused_tx.subscribe(),
        ));

        tracing::debug!(task = %name, task_id = id, period_ms = period.as_millis() as u64, "Periodic task started");
        self.lock_tasks().insert(
            id,
            TaskEntry {
                name,
                handle,
                cancel_tx,
            },
        );
        id
    }

    /// Stop one task after its current run. Idempotent.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.lock_tasks().remove(&id) {
            Some(entry) => {
                let _ = entry.cancel_tx.send(true);
                tracing::debug!(task = %entry.name, task_id = id, "Periodic task cancelled");
                true
            }
            None => false,
        }
    }

    /// Skip every run until `resume` is called.
    pub fn pause(&self) {
        self.inner.paused_tx.send_replace(true);
        tracing::info!("Task scheduler paused");
    }

    pub fn resume(&self) {
        self.inner.paused_tx.send_replace(false);
        tracing::info!("Task scheduler resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused_tx.borrow()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Names of live tasks, sorted.
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_tasks().values().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }

    /// Stop every task and wait for in-progress runs to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let entries: Vec<TaskEntry> = self.lock_tasks().drain().map(|(_, e)| e).collect();
        let count = entries.len();
        for entry in entries {
            if let Err(err) = entry.handle.await {
                tracing::warn!(task = %entry.name, error = %err, "Periodic task ended abnormally");
            }
        }
        tracing::info!(tasks = count, "Task scheduler shut down");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_periodic(
    name: String,
    period: Duration,
    trigger: Option<Arc<Notify>>,
    job: Job,
    mut shutdown_rx: watch::Receiver<bool>,
    mut cancel_rx: watch::Receiver<bool>,
    paused_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            res = shutdown_rx.changed() => {
                if res.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            res = cancel_rx.changed() => {
                if res.is_err() || *cancel_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
            _ = triggered(trigger.as_deref()) => {}
        }

        if *paused_rx.borrow() {
            continue;
        }
        job().await;
    }

    tracing::debug!(task = %name, "Periodic task stopped");
}

async fn triggered(trigger: Option<&Notify>) {
    match trigger {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}
