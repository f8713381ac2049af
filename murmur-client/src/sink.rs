//! Live action sink backed by the write queue.

use async_trait::async_trait;
use murmur_core::{
    Address, LiveAction, MurmurError, Priority, Schema, SchemaId, SubjectId, WriteIntent,
};
use murmur_live::{live_publish_operation, ActionSink};
use murmur_queue::BatchScheduler;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Persists live actions as queued writes.
///
/// Typing indicators go in the high lane since they go stale within
/// seconds; views go in the low lane. `persist` resolves with the intent's
/// terminal outcome.
#[derive(Debug, Clone)]
pub struct QueuedActionSink {
    scheduler: BatchScheduler,
    schema: Schema,
    schema_id: SchemaId,
}

impl QueuedActionSink {
    pub fn new(scheduler: BatchScheduler, schema: Schema, schema_id: SchemaId) -> Self {
        Self {
            scheduler,
            schema,
            schema_id,
        }
    }

    pub fn priority_for(action: LiveAction) -> Priority {
        if action.is_typing() {
            Priority::High
        } else {
            Priority::Low
        }
    }
}

#[async_trait]
impl ActionSink for QueuedActionSink {
    async fn persist(
        &self,
        subject_id: &SubjectId,
        actor: Address,
        action: LiveAction,
    ) -> Result<(), MurmurError> {
        let operation =
            live_publish_operation(&self.schema, &self.schema_id, subject_id, actor, action)?;

        let (tx, rx) = oneshot::channel::<Result<(), MurmurError>>();
        let failure_tx = Arc::new(Mutex::new(Some(tx)));
        let success_tx = Arc::clone(&failure_tx);

        let intent = WriteIntent::new(operation, Self::priority_for(action))
            .on_success(move |_| {
                if let Some(tx) = take_sender(&success_tx) {
                    let _ = tx.send(Ok(()));
                }
            })
            .on_failure(move |failure| {
                if let Some(tx) = take_sender(&failure_tx) {
                    let _ = tx.send(Err(failure.error.clone().into()));
                }
            });
        self.scheduler.enqueue(intent);

        rx.await.map_err(|_| MurmurError::Task {
            reason: "write intent dropped before completing".to_string(),
        })?
    }
}

type SharedSender = Arc<Mutex<Option<oneshot::Sender<Result<(), MurmurError>>>>>;

fn take_sender(slot: &SharedSender) -> Option<oneshot::Sender<Result<(), MurmurError>>> {
    slot.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::{ErrorKind, MurmurConfig};
    use murmur_test_utils::fixtures::{addr, live_schema};
    use murmur_test_utils::{shared, FlakyGateway};

    fn sink(gateway: FlakyGateway) -> (Arc<FlakyGateway>, QueuedActionSink, BatchScheduler) {
        let (flaky, erased) = shared(gateway);
        let scheduler = BatchScheduler::new(erased, &MurmurConfig::default());
        let schema = live_schema();
        let schema_id = SchemaId::derive(&schema);
        let sink = QueuedActionSink::new(scheduler.clone(), schema, schema_id);
        (flaky, sink, scheduler)
    }

    #[test]
    fn test_priority_for_actions() {
        assert_eq!(QueuedActionSink::priority_for(LiveAction::TypingStart), Priority::High);
        assert_eq!(QueuedActionSink::priority_for(LiveAction::TypingStop), Priority::High);
        assert_eq!(QueuedActionSink::priority_for(LiveAction::View), Priority::Low);
    }

    #[tokio::test]
    async fn test_persist_resolves_on_success() {
        let (flaky, sink, scheduler) = sink(FlakyGateway::new());
        let persist = tokio::spawn(async move {
            sink.persist(&SubjectId::from("s"), addr(1), LiveAction::View).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(scheduler.queue_snapshot().low_count, 1);

        scheduler.tick().await;
        persist.await.unwrap().unwrap();
        assert_eq!(flaky.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_persist_surfaces_terminal_failure() {
        let (_, sink, scheduler) = sink(FlakyGateway::always_failing(ErrorKind::Rejected));
        let persist = tokio::spawn(async move {
            sink.persist(&SubjectId::from("s"), addr(1), LiveAction::TypingStart).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(scheduler.queue_snapshot().high_count, 1);

        scheduler.tick().await;
        let err = persist.await.unwrap().unwrap_err();
        assert_eq!(err.ledger_kind(), Some(ErrorKind::Rejected));
    }
}
