//! Three-lane priority write queue.
//!
//! Lanes are unbounded FIFOs; `enqueue` never fails and gives no
//! backpressure signal. Draining takes the whole high lane before touching
//! medium, and medium before low. Retried intents re-enter at the front of
//! their lane.

use murmur_core::{IntentId, Priority, QueueSnapshot, WriteIntent};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: IntentId,
    /// Nothing was queued or executing before this intent.
    pub was_idle: bool,
}

#[derive(Debug, Default)]
struct Lanes {
    high: VecDeque<WriteIntent>,
    medium: VecDeque<WriteIntent>,
    low: VecDeque<WriteIntent>,
    /// Intents handed out by `drain_batch` and not yet settled or requeued.
    in_flight: usize,
}

impl Lanes {
    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<WriteIntent> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }

    fn queued(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }
}

/// Pending write intents, one FIFO lane per priority.
#[derive(Debug, Default)]
pub struct PriorityWriteQueue {
    lanes: Mutex<Lanes>,
}

impl PriorityWriteQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an intent to the back of its lane.
    pub fn enqueue(&self, intent: WriteIntent) -> Enqueued {
        let mut lanes = self.lock();
        let was_idle = lanes.queued() == 0 && lanes.in_flight == 0;
        let id = intent.id;
        tracing::debug!(intent_id = %id, priority = %intent.priority, "Intent enqueued");
        lanes.lane_mut(intent.priority).push_back(intent);
        Enqueued { id, was_idle }
    }

    /// Take up to `max` intents, high lane first, FIFO within a lane.
    ///
    /// Taken intents count as in flight until `settle` or `requeue_front`.
    pub fn drain_batch(&self, max: usize) -> Vec<WriteIntent> {
        let mut lanes = self.lock();
        let mut batch = Vec::with_capacity(max.min(lanes.queued()));
        for priority in Priority::DRAIN_ORDER {
            let lane = lanes.lane_mut(priority);
            while batch.len() < max {
                match lane.pop_front() {
                    Some(intent) => batch.push(intent),
                    None => break,
                }
            }
        }
        lanes.in_flight += batch.len();
        batch
    }

    /// Put retried intents back at the front of their lanes.
    ///
    /// Relative order among `intents` of the same lane is preserved, and they
    /// all land ahead of anything already queued in that lane.
    pub fn requeue_front(&self, intents: Vec<WriteIntent>) {
        if intents.is_empty() {
            return;
        }
        let mut lanes = self.lock();
        lanes.in_flight = lanes.in_flight.saturating_sub(intents.len());
        for intent in intents.into_iter().rev() {
            tracing::debug!(intent_id = %intent.id, retry_count = intent.retry_count, "Intent requeued");
            lanes.lane_mut(intent.priority).push_front(intent);
        }
    }

    /// Mark `count` drained intents as terminally finished.
    pub fn settle(&self, count: usize) {
        let mut lanes = self.lock();
        lanes.in_flight = lanes.in_flight.saturating_sub(count);
    }

    /// Remove a still-queued intent. In-flight intents cannot be cancelled.
    pub fn cancel(&self, id: IntentId) -> Option<WriteIntent> {
        let mut lanes = self.lock();
        for priority in Priority::DRAIN_ORDER {
            let lane = lanes.lane_mut(priority);
            if let Some(pos) = lane.iter().position(|intent| intent.id == id) {
                return lane.remove(pos);
            }
        }
        None
    }

    /// Point-in-time lane counts. `pending_count` includes in-flight intents.
    pub fn snapshot(&self) -> QueueSnapshot {
        let lanes = self.lock();
        QueueSnapshot {
            high_count: lanes.high.len(),
            medium_count: lanes.medium.len(),
            low_count: lanes.low.len(),
            pending_count: lanes.queued() + lanes.in_flight,
        }
    }

    /// Intents waiting in lanes.
    pub fn len(&self) -> usize {
        self.lock().queued()
    }

    /// Check if every lane is empty. In-flight intents are not counted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Intents drained but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        // Enqueue must always succeed, so a poisoned lock is recovered.
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_test_utils::fixtures::intent;
    use murmur_test_utils::generators::arb_priorities;
    use proptest::prelude::*;

    fn methods(batch: &[WriteIntent]) -> Vec<String> {
        batch.iter().map(|i| i.operation.method.clone()).collect()
    }

    fn seq(intent: &WriteIntent) -> usize {
        intent.operation.method["op-".len()..].parse().unwrap()
    }

    #[test]
    fn test_drain_three_high_two_medium_one_low_batch_four() {
        let queue = PriorityWriteQueue::new();
        queue.enqueue(intent(1, Priority::Low));
        queue.enqueue(intent(2, Priority::Medium));
        queue.enqueue(intent(3, Priority::High));
        queue.enqueue(intent(4, Priority::High));
        queue.enqueue(intent(5, Priority::Medium));
        queue.enqueue(intent(6, Priority::High));

        let batch = queue.drain_batch(4);
        assert_eq!(methods(&batch), vec!["op-3", "op-4", "op-6", "op-2"]);

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.high_count, 0);
        assert_eq!(snapshot.medium_count, 1);
        assert_eq!(snapshot.low_count, 1);
        assert_eq!(snapshot.pending_count, 6);
    }

    #[test]
    fn test_enqueue_reports_idle() {
        let queue = PriorityWriteQueue::new();
        assert!(queue.enqueue(intent(1, Priority::Low)).was_idle);
        assert!(!queue.enqueue(intent(2, Priority::Low)).was_idle);

        let batch = queue.drain_batch(10);
        assert!(!queue.enqueue(intent(3, Priority::Low)).was_idle);
        queue.drain_batch(10);
        queue.settle(batch.len() + 1);
        assert!(queue.enqueue(intent(4, Priority::Low)).was_idle);
    }

    #[test]
    fn test_requeue_front_preserves_relative_order() {
        let queue = PriorityWriteQueue::new();
        queue.enqueue(intent(1, Priority::Medium));
        queue.enqueue(intent(2, Priority::Medium));
        let batch = queue.drain_batch(2);
        queue.enqueue(intent(3, Priority::Medium));

        queue.requeue_front(batch);
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(methods(&queue.drain_batch(10)), vec!["op-1", "op-2", "op-3"]);
    }

    #[test]
    fn test_cancel_only_queued() {
        let queue = PriorityWriteQueue::new();
        let a = queue.enqueue(intent(1, Priority::High)).id;
        let b = queue.enqueue(intent(2, Priority::Low)).id;
        assert!(queue.cancel(b).is_some());
        assert!(queue.cancel(b).is_none());

        let _in_flight = queue.drain_batch(1);
        assert!(queue.cancel(a).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_empty_drain() {
        let queue = PriorityWriteQueue::new();
        assert!(queue.drain_batch(50).is_empty());
        assert_eq!(queue.snapshot(), QueueSnapshot::default());
    }

    proptest! {
        #[test]
        fn prop_drain_respects_lanes_and_fifo(
            priorities in arb_priorities(40),
            max in 1usize..20,
        ) {
            let queue = PriorityWriteQueue::new();
            for (n, priority) in priorities.iter().enumerate() {
                queue.enqueue(intent(n, *priority));
            }

            let batch = queue.drain_batch(max);
            prop_assert_eq!(batch.len(), max.min(priorities.len()));

            // Lanes never go backwards within a batch.
            for pair in batch.windows(2) {
                prop_assert!(pair[0].priority <= pair[1].priority);
                if pair[0].priority == pair[1].priority {
                    prop_assert!(seq(&pair[0]) < seq(&pair[1]));
                }
            }

            // Nothing left behind outranks the last drained intent.
            if let Some(last) = batch.last() {
                let rest = queue.drain_batch(usize::MAX);
                prop_assert!(rest.iter().all(|i| i.priority >= last.priority));
            }
        }
    }
}
