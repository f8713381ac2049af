//! Completed-outcome log with age-based pruning.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use murmur_core::{IntentId, MetricsConfig, Timestamp, TxOutcome};
use std::time::Duration;

/// Terminal outcomes keyed by intent id.
///
/// Entries are immutable once recorded. The log only shrinks through
/// [`OutcomeLog::prune`], which the orchestrator runs periodically.
#[derive(Debug)]
pub struct OutcomeLog {
    outcomes: DashMap<IntentId, TxOutcome>,
    retention: Duration,
}

impl OutcomeLog {
    /// Create a log keeping outcomes for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            outcomes: DashMap::new(),
            retention,
        }
    }

    /// Create a log using `metrics.outcome_retention_secs`.
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(Duration::from_secs(config.outcome_retention_secs))
    }

    /// How long an outcome is kept before pruning.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Store an outcome. A second outcome for the same id is ignored.
    pub fn record(&self, outcome: TxOutcome) {
        self.outcomes.entry(outcome.id).or_insert(outcome);
    }

    /// Terminal outcome for an intent, if still retained.
    pub fn get(&self, id: &IntentId) -> Option<TxOutcome> {
        self.outcomes.get(id).map(|entry| entry.value().clone())
    }

    /// Drop outcomes older than the retention window. Returns how many went.
    pub fn prune(&self) -> usize {
        let cutoff = ChronoDuration::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        match cutoff {
            Some(cutoff) => self.prune_older_than(cutoff),
            // Retention reaches past the representable range.
            None => 0,
        }
    }

    /// Drop outcomes completed strictly before `cutoff`.
    pub fn prune_older_than(&self, cutoff: Timestamp) -> usize {
        let before = self.outcomes.len();
        self.outcomes.retain(|_, outcome| outcome.completed_at >= cutoff);
        let pruned = before.saturating_sub(self.outcomes.len());
        if pruned > 0 {
            tracing::debug!(pruned, remaining = self.outcomes.len(), "Pruned outcomes");
        }
        pruned
    }

    /// Number of retained outcomes.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Check if no outcomes are retained.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl Default for OutcomeLog {
    fn default() -> Self {
        Self::from_config(&MetricsConfig::default())
    }
}
