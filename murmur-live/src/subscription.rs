//! Live subscriptions.
//!
//! A subscription delivers an initial reconciled value, then re-reconciles
//! and calls back on every push notification and on a fixed poll. Push is
//! best-effort; the poll runs regardless so a lost notification only delays
//! convergence.

use crate::Reconciler;
use dashmap::DashMap;
use futures_util::future::FutureExt;
use futures_util::StreamExt;
use murmur_core::{
    event_id, new_id, LedgerGateway, SubjectId, SubscriptionId, TaskId, TaskScheduler, ViewerState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Subscriber callback, invoked with the aggregate after each reconciliation.
pub type LiveCallback = Arc<dyn Fn(&ViewerState) + Send + Sync + 'static>;

struct Subscription {
    subject_id: SubjectId,
    poll_task: TaskId,
    push_task: Option<JoinHandle<()>>,
}

/// Tracks live subscriptions and their push and poll drivers.
pub struct SubscriptionManager {
    reconciler: Reconciler,
    gateway: Arc<dyn LedgerGateway>,
    tasks: TaskScheduler,
    poll_interval: Duration,
    subscriptions: DashMap<SubscriptionId, Subscription>,
}

impl SubscriptionManager {
    pub fn new(
        reconciler: Reconciler,
        gateway: Arc<dyn LedgerGateway>,
        tasks: TaskScheduler,
        poll_interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            gateway,
            tasks,
            poll_interval,
            subscriptions: DashMap::new(),
        }
    }

    /// Subscribe to a subject's aggregate.
    ///
    /// The callback fires once with the initial value before this returns.
    /// That value comes from a reconciliation started after this call, even
    /// when another one for the subject is already running. If the initial
    /// read fails, the current local value is delivered.
    pub async fn subscribe(&self, subject_id: SubjectId, callback: LiveCallback) -> SubscriptionId {
        let id = new_id();

        let initial = match self.reconciler.reconcile(&subject_id).await {
            Ok(state) => state,
            Err(_) => self.reconciler.store().get_or_empty(&subject_id),
        };
        callback(&initial);

        let push_task = self.register_push(&subject_id, Arc::clone(&callback)).await;

        let reconciler = self.reconciler.clone();
        let poll_subject = subject_id.clone();
        let poll_callback = Arc::clone(&callback);
        let poll_task = self.tasks.spawn_periodic(
            format!("live-poll:{}", subject_id),
            self.poll_interval,
            None,
            move || {
                let reconciler = reconciler.clone();
                let subject_id = poll_subject.clone();
                let callback = Arc::clone(&poll_callback);
                async move {
                    if let Ok(state) = reconciler.reconcile(&subject_id).await {
                        callback(&state);
                    }
                }
                .boxed()
            },
        );

        tracing::info!(
            subscription_id = %id,
            subject = %subject_id,
            push = push_task.is_some(),
            "Live subscription started"
        );
        self.subscriptions.insert(
            id,
            Subscription {
                subject_id,
                poll_task,
                push_task,
            },
        );
        id
    }

    /// Cancel push and poll for a subscription. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscriptions.remove(&id) {
            Some((_, subscription)) => {
                self.tasks.cancel(subscription.poll_task);
                if let Some(push) = subscription.push_task {
                    push.abort();
                }
                tracing::info!(subscription_id = %id, subject = %subscription.subject_id, "Live subscription ended");
                true
            }
            None => false,
        }
    }

    /// Cancel every subscription.
    pub fn unsubscribe_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = self.subscriptions.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.unsubscribe(*id)).count()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Open the push channel for a subject, if the gateway offers one.
    async fn register_push(&self, subject_id: &SubjectId, callback: LiveCallback) -> Option<JoinHandle<()>> {
        let schema_id = self
            .reconciler
            .schema_ids()
            .get_or_derive(self.reconciler.schema());
        let event = event_id(&schema_id, subject_id.as_str());

        let mut stream = match self.gateway.subscribe_event(&event).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(subject = %subject_id, error = %err, "Push unavailable; polling only");
                return None;
            }
        };

        let reconciler = self.reconciler.clone();
        let subject_id = subject_id.clone();
        Some(tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(_) => match reconciler.reconcile(&subject_id).await {
                        Ok(state) => callback(&state),
                        Err(err) => {
                            tracing::debug!(subject = %subject_id, error = %err, "Push-triggered reconcile failed")
                        }
                    },
                    Err(err) => {
                        tracing::warn!(subject = %subject_id, error = %err, "Push channel error");
                    }
                }
            }
            tracing::debug!(subject = %subject_id, "Push stream ended");
        }))
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            self.tasks.cancel(entry.poll_task);
            if let Some(push) = &entry.push_task {
                push.abort();
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.subscriptions.len())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
