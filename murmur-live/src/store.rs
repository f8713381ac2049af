//! Optimistic live state.
//!
//! Each subject moves through `Dirty -> Reconciling -> Converged`. A local
//! action is applied to the in-memory aggregate before anything touches the
//! network and is remembered in a per-subject log. When a reconciliation
//! finishes, actions applied after it started are replayed over the
//! authoritative value, so a reconcile never erases a newer local action.

use crate::ActionSink;
use dashmap::DashMap;
use murmur_core::{Address, LiveAction, SubjectId, ViewerState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Convergence phase of one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Local actions exist that the ledger may not reflect yet.
    Dirty,
    /// A reconciliation is in flight and nothing local happened since it began.
    Reconciling,
    /// Matches the last authoritative read.
    Converged,
}

#[derive(Debug, Clone, Copy)]
struct LocalAction {
    seq: u64,
    actor: Address,
    action: LiveAction,
}

#[derive(Debug)]
struct SubjectEntry {
    state: ViewerState,
    phase: Phase,
    log: Vec<LocalAction>,
    /// Sequence number at which the in-flight reconciliation started.
    reconcile_mark: Option<u64>,
}

impl SubjectEntry {
    fn new(subject_id: SubjectId) -> Self {
        Self {
            state: ViewerState::empty(subject_id),
            phase: Phase::Converged,
            log: Vec::new(),
            reconcile_mark: None,
        }
    }
}

/// Proof that a reconciliation was started. Hand it back to finish or abort.
#[derive(Debug)]
#[must_use = "a started reconciliation must be finished or aborted"]
pub struct ReconcileTicket {
    subject_id: SubjectId,
    mark: u64,
}

impl ReconcileTicket {
    pub fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }
}

/// In-memory live aggregates, keyed by subject.
pub struct OptimisticStateStore {
    subjects: DashMap<SubjectId, SubjectEntry>,
    seq: AtomicU64,
    sink: Arc<dyn ActionSink>,
}

impl OptimisticStateStore {
    pub fn new(sink: Arc<dyn ActionSink>) -> Self {
        Self {
            subjects: DashMap::new(),
            seq: AtomicU64::new(0),
            sink,
        }
    }

    /// Apply a local action and return the updated aggregate.
    ///
    /// Never awaits. Persisting the action is handed to
    /// [`persist_in_background`]; its failure is logged and the optimistic
    /// value is kept.
    pub fn apply_local(&self, subject_id: &SubjectId, actor: Address, action: LiveAction) -> ViewerState {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let state = {
            let mut entry = self
                .subjects
                .entry(subject_id.clone())
                .or_insert_with(|| SubjectEntry::new(subject_id.clone()));
            entry.state.apply(actor, action);
            entry.log.push(LocalAction { seq, actor, action });
            entry.phase = Phase::Dirty;
            entry.state.clone()
        };

        tracing::debug!(subject = %subject_id, actor = %actor, action = %action, "Local action applied");
        persist_in_background(Arc::clone(&self.sink), subject_id.clone(), actor, action);
        state
    }

    /// Current aggregate, if the subject has been seen.
    pub fn get(&self, subject_id: &SubjectId) -> Option<ViewerState> {
        self.subjects.get(subject_id).map(|entry| entry.state.clone())
    }

    /// Current aggregate, or an empty one.
    pub fn get_or_empty(&self, subject_id: &SubjectId) -> ViewerState {
        self.get(subject_id)
            .unwrap_or_else(|| ViewerState::empty(subject_id.clone()))
    }

    pub fn phase(&self, subject_id: &SubjectId) -> Option<Phase> {
        self.subjects.get(subject_id).map(|entry| entry.phase)
    }

    /// Subjects with local actions not yet covered by a reconciliation.
    pub fn dirty_subjects(&self) -> Vec<SubjectId> {
        let mut dirty: Vec<SubjectId> = self
            .subjects
            .iter()
            .filter(|entry| entry.phase == Phase::Dirty && entry.reconcile_mark.is_none())
            .map(|entry| entry.key().clone())
            .collect();
        dirty.sort();
        dirty
    }

    /// Local actions still waiting to be covered by a reconciliation.
    pub fn pending_local(&self, subject_id: &SubjectId) -> usize {
        self.subjects
            .get(subject_id)
            .map(|entry| entry.log.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Mark the start of a reconciliation.
    ///
    /// Returns `None` when one is already in flight for this subject.
    pub fn begin_reconcile(&self, subject_id: &SubjectId) -> Option<ReconcileTicket> {
        let mut entry = self
            .subjects
            .entry(subject_id.clone())
            .or_insert_with(|| SubjectEntry::new(subject_id.clone()));
        if entry.reconcile_mark.is_some() {
            return None;
        }
        let mark = self.seq.load(Ordering::SeqCst);
        entry.reconcile_mark = Some(mark);
        entry.phase = Phase::Reconciling;
        Some(ReconcileTicket {
            subject_id: subject_id.clone(),
            mark,
        })
    }

    /// Replace the aggregate with the authoritative value, then replay local
    /// actions newer than the ticket on top of it.
    pub fn finish_reconcile(&self, ticket: ReconcileTicket, authoritative: ViewerState) -> ViewerState {
        let mut entry = self
            .subjects
            .entry(ticket.subject_id.clone())
            .or_insert_with(|| SubjectEntry::new(ticket.subject_id.clone()));

        entry.log.retain(|local| local.seq > ticket.mark);
        let mut state = authoritative;
        for local in &entry.log {
            state.apply(local.actor, local.action);
        }
        entry.phase = if entry.log.is_empty() {
            Phase::Converged
        } else {
            Phase::Dirty
        };
        entry.state = state;
        entry.reconcile_mark = None;

        tracing::debug!(
            subject = %ticket.subject_id,
            viewers = entry.state.viewer_count(),
            typing = entry.state.typing_count(),
            replayed = entry.log.len(),
            "Reconciled"
        );
        entry.state.clone()
    }

    /// Give up on a reconciliation. The optimistic value is kept and the
    /// subject returns to `Dirty` so the next pass retries.
    pub fn abort_reconcile(&self, ticket: ReconcileTicket) {
        if let Some(mut entry) = self.subjects.get_mut(&ticket.subject_id) {
            entry.reconcile_mark = None;
            entry.phase = Phase::Dirty;
        }
    }
}

impl std::fmt::Debug for OptimisticStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticStateStore")
            .field("subjects", &self.subjects.len())
            .finish_non_exhaustive()
    }
}

/// Persist a local action without blocking the caller.
///
/// The write runs on a spawned task; a failure is logged with `warn!` and
/// goes nowhere else. Outside a tokio runtime the action is not persisted.
pub fn persist_in_background(
    sink: Arc<dyn ActionSink>,
    subject_id: SubjectId,
    actor: Address,
    action: LiveAction,
) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(subject = %subject_id, action = %action, "No runtime; live action not persisted");
        return;
    };
    runtime.spawn(async move {
        if let Err(err) = sink.persist(&subject_id, actor, action).await {
            tracing::warn!(
                subject = %subject_id,
                actor = %actor,
                action = %action,
                error = %err,
                "Background persist failed; keeping optimistic value"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_core::{ErrorKind, LedgerError, MurmurError};
    use murmur_test_utils::assertions::assert_viewers;
    use murmur_test_utils::fixtures::{addr, live_schema};
    use murmur_test_utils::{shared, PendingGateway};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::GatewaySink;

    /// Counts persists; optionally fails them.
    #[derive(Default)]
    struct CountingSink {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ActionSink for CountingSink {
        async fn persist(&self, _: &SubjectId, _: Address, _: LiveAction) -> Result<(), MurmurError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(LedgerError::of_kind(ErrorKind::Rejected, "no").into())
            } else {
                Ok(())
            }
        }
    }

    fn subject() -> SubjectId {
        SubjectId::from("post-42")
    }

    #[tokio::test]
    async fn test_apply_local_returns_before_network() {
        let (pending, gateway) = shared(PendingGateway::new());
        let store = OptimisticStateStore::new(Arc::new(GatewaySink::new(gateway, live_schema())));

        let state = store.apply_local(&subject(), addr(1), LiveAction::View);
        assert_viewers(&state, &[1], &[]);
        assert_eq!(store.phase(&subject()), Some(Phase::Dirty));

        // The background write reaches the gateway and parks there forever.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pending.calls(), 1);
        assert_viewers(&store.get(&subject()).unwrap(), &[1], &[]);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_optimistic_value() {
        let sink = Arc::new(CountingSink {
            fail: true,
            ..CountingSink::default()
        });
        let store = OptimisticStateStore::new(sink.clone());
        store.apply_local(&subject(), addr(1), LiveAction::TypingStart);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_viewers(&store.get(&subject()).unwrap(), &[], &[1]);
    }

    #[test]
    fn test_apply_local_without_runtime() {
        let store = OptimisticStateStore::new(Arc::new(CountingSink::default()));
        let state = store.apply_local(&subject(), addr(2), LiveAction::View);
        assert_eq!(state.viewer_count(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_converges() {
        let store = OptimisticStateStore::new(Arc::new(CountingSink::default()));
        store.apply_local(&subject(), addr(1), LiveAction::View);

        let ticket = store.begin_reconcile(&subject()).unwrap();
        assert_eq!(store.phase(&subject()), Some(Phase::Reconciling));

        let mut authoritative = ViewerState::empty(subject());
        authoritative.apply(addr(1), LiveAction::View);
        authoritative.apply(addr(5), LiveAction::View);
        let state = store.finish_reconcile(ticket, authoritative);

        assert_viewers(&state, &[1, 5], &[]);
        assert_eq!(store.phase(&subject()), Some(Phase::Converged));
        assert_eq!(store.pending_local(&subject()), 0);
    }

    #[tokio::test]
    async fn test_local_action_during_reconcile_survives() {
        let store = OptimisticStateStore::new(Arc::new(CountingSink::default()));
        store.apply_local(&subject(), addr(1), LiveAction::View);
        let ticket = store.begin_reconcile(&subject()).unwrap();

        // Arrives while the authoritative read is in flight.
        store.apply_local(&subject(), addr(2), LiveAction::TypingStart);
        assert_eq!(store.phase(&subject()), Some(Phase::Dirty));

        // The ledger has neither action yet.
        let state = store.finish_reconcile(ticket, ViewerState::empty(subject()));
        assert_viewers(&state, &[], &[2]);
        assert_eq!(store.phase(&subject()), Some(Phase::Dirty));
        assert_eq!(store.pending_local(&subject()), 1);
        assert_eq!(store.dirty_subjects(), vec![subject()]);
    }

    #[tokio::test]
    async fn test_abort_keeps_value_and_marks_dirty() {
        let store = OptimisticStateStore::new(Arc::new(CountingSink::default()));
        store.apply_local(&subject(), addr(1), LiveAction::View);
        let ticket = store.begin_reconcile(&subject()).unwrap();
        assert!(store.begin_reconcile(&subject()).is_none());

        store.abort_reconcile(ticket);
        assert_eq!(store.phase(&subject()), Some(Phase::Dirty));
        assert_viewers(&store.get(&subject()).unwrap(), &[1], &[]);
        assert!(store.begin_reconcile(&subject()).is_some());
    }

    #[test]
    fn test_unknown_subject() {
        let store = OptimisticStateStore::new(Arc::new(CountingSink::default()));
        assert!(store.get(&subject()).is_none());
        assert_eq!(store.get_or_empty(&subject()).viewer_count(), 0);
        assert!(store.phase(&subject()).is_none());
        assert!(store.is_empty());
    }
}
