//! Retry routing for failed write attempts.

use murmur_core::{ErrorKind, IntentFailure, LedgerError, RetryConfig, WriteIntent};

/// What happens to an intent after a failed attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Put back at the front of its lane; `retry_count` already incremented.
    Requeue(WriteIntent),
    /// Terminal. Deliver the failure callback.
    Fail(WriteIntent, IntentFailure),
}

/// Classifies failures as retryable or terminal under a fixed ceiling.
///
/// The retryable set is [`ErrorKind::is_retryable`]. It makes no distinction
/// between idempotent and non-idempotent writes, so a timeout after the
/// ledger accepted a write can submit it a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCoordinator {
    max_retries: u32,
}

impl RetryCoordinator {
    /// Create a coordinator allowing `max_retries` attempts per intent.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Create a coordinator from the `retry` config section.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries)
    }

    /// Attempt ceiling after which an intent fails terminally.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// True while `attempt < max_retries` and `kind` is retryable.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        kind.is_retryable() && attempt < self.max_retries
    }

    /// Route a failed intent.
    ///
    /// A retryable error always bumps `retry_count`; the intent is requeued
    /// only while the bumped count is still under the ceiling. Fatal errors
    /// leave the count untouched.
    pub fn decide(&self, mut intent: WriteIntent, error: LedgerError) -> RetryDecision {
        let kind = error.kind();
        if kind.is_retryable() {
            intent.retry_count = intent.retry_count.saturating_add(1);
            if self.should_retry(kind, intent.retry_count) {
                tracing::debug!(
                    intent_id = %intent.id,
                    error_kind = %kind,
                    retry_count = intent.retry_count,
                    "Retrying intent"
                );
                return RetryDecision::Requeue(intent);
            }
        }

        let failure = IntentFailure {
            intent_id: intent.id,
            kind,
            error,
            retry_count: intent.retry_count,
        };
        RetryDecision::Fail(intent, failure)
    }
}

impl Default for RetryCoordinator {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
