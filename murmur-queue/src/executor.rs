//! Single-attempt transaction execution.

use crate::MetricsTracker;
use murmur_core::{ErrorKind, ExecutorConfig, LedgerError, LedgerGateway, TxOutcome, WriteIntent};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// A failed attempt, tagged so the retry layer can route it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Attempt failed after {latency_ms}ms: {error}")]
pub struct ExecutionError {
    pub error: LedgerError,
    pub latency_ms: u64,
}

impl ExecutionError {
    /// Error kind of the failed attempt.
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Runs one write attempt against the ledger: estimate, buffer, submit, confirm.
///
/// Callbacks are not invoked here; the scheduler delivers them once the
/// retry decision is final.
pub struct TransactionExecutor {
    gateway: Arc<dyn LedgerGateway>,
    gas_buffer_multiplier: f64,
    confirmations: u32,
    metrics: Arc<MetricsTracker>,
}

impl TransactionExecutor {
    /// Create an executor.
    ///
    /// `gas_buffer_multiplier` scales the estimated cost into the submitted
    /// gas limit; `confirmations` is how many blocks `confirm` waits for.
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        gas_buffer_multiplier: f64,
        confirmations: u32,
        metrics: Arc<MetricsTracker>,
    ) -> Self {
        Self {
            gateway,
            gas_buffer_multiplier,
            confirmations,
            metrics,
        }
    }

    /// Create an executor from the `executor` config section.
    pub fn from_config(
        gateway: Arc<dyn LedgerGateway>,
        config: &ExecutorConfig,
        metrics: Arc<MetricsTracker>,
    ) -> Self {
        Self::new(gateway, config.gas_buffer_multiplier, config.confirmations, metrics)
    }

    /// Cost ceiling sent with a submit: the estimate scaled by the buffer, rounded up.
    pub fn gas_limit(&self, estimate: u64) -> u64 {
        let buffered = (estimate as f64 * self.gas_buffer_multiplier).ceil();
        if buffered >= u64::MAX as f64 {
            u64::MAX
        } else {
            (buffered as u64).max(estimate)
        }
    }

    /// Execute one attempt. Latency runs from the start of the attempt to
    /// the confirmation (or the failure).
    pub async fn execute(&self, intent: &WriteIntent) -> Result<TxOutcome, ExecutionError> {
        let started = Instant::now();
        self.metrics.record_submission();

        let result = self.attempt(intent).await;
        let latency_ms = elapsed_ms(started);

        match result {
            Ok(receipt) => {
                tracing::debug!(
                    intent_id = %intent.id,
                    ledger_ref = %receipt.ledger_ref,
                    block_height = receipt.block_height,
                    latency_ms,
                    "Write confirmed"
                );
                Ok(TxOutcome::succeeded(
                    intent.id,
                    &receipt,
                    latency_ms,
                    intent.retry_count,
                ))
            }
            Err(error) => {
                tracing::warn!(
                    intent_id = %intent.id,
                    error_kind = %error.kind(),
                    retry_count = intent.retry_count,
                    latency_ms,
                    "Write attempt failed: {}",
                    error
                );
                Err(ExecutionError { error, latency_ms })
            }
        }
    }

    /// Like [`execute`](Self::execute), handing the intent back with the result.
    pub async fn execute_owned(
        &self,
        intent: WriteIntent,
    ) -> (WriteIntent, Result<TxOutcome, ExecutionError>) {
        let result = self.execute(&intent).await;
        (intent, result)
    }

    async fn attempt(&self, intent: &WriteIntent) -> Result<murmur_core::Receipt, LedgerError> {
        let estimate = self.gateway.estimate_cost(&intent.operation).await?;
        let gas_limit = self.gas_limit(estimate);
        let tx_hash = self.gateway.submit(&intent.operation, gas_limit).await?;
        self.gateway.confirm(&tx_hash, self.confirmations).await
    }
}

impl std::fmt::Debug for TransactionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("gas_buffer_multiplier", &self.gas_buffer_multiplier)
            .field("confirmations", &self.confirmations)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::{Address, Operation, Priority, SchemaId, Schema};
    use murmur_storage::InMemoryLedger;
    use murmur_test_utils::fixtures::intent;
    use murmur_test_utils::{shared, FlakyGateway};
    use std::time::Duration;

    fn executor(gateway: Arc<dyn LedgerGateway>) -> (TransactionExecutor, Arc<MetricsTracker>) {
        let metrics = Arc::new(MetricsTracker::default());
        let executor = TransactionExecutor::new(gateway, 1.2, 1, Arc::clone(&metrics));
        (executor, metrics)
    }

    #[test]
    fn test_gas_limit_rounds_up() {
        let (_, gateway) = shared(FlakyGateway::new());
        let (executor, _) = executor(gateway);
        assert_eq!(executor.gas_limit(100), 120);
        assert_eq!(executor.gas_limit(101), 122);
        assert_eq!(executor.gas_limit(0), 0);
        assert_eq!(executor.gas_limit(u64::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_execute_success_uses_buffered_gas() {
        let (flaky, gateway) = shared(FlakyGateway::new().with_cost(1_000));
        let (executor, metrics) = executor(gateway);

        let outcome = executor.execute(&intent(1, Priority::High)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.block_height, Some(1));
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(flaky.gas_limits(), vec![1_200]);
        assert_eq!(metrics.snapshot().total_submitted, 1);
    }

    #[tokio::test]
    async fn test_execute_failure_is_tagged() {
        let (_, gateway) = shared(FlakyGateway::failing(1, ErrorKind::NonceConflict));
        let (executor, metrics) = executor(gateway);

        let err = executor.execute(&intent(1, Priority::Low)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NonceConflict);
        assert_eq!(metrics.snapshot().total_submitted, 1);
    }

    #[tokio::test]
    async fn test_latency_covers_submission() {
        let (_, gateway) = shared(FlakyGateway::new().with_delay(Duration::from_millis(30)));
        let (executor, _) = executor(gateway);
        let outcome = executor.execute(&intent(1, Priority::Medium)).await.unwrap();
        assert!(outcome.latency_ms >= 30);
    }

    #[tokio::test]
    async fn test_publish_against_memory_ledger() {
        let ledger = InMemoryLedger::new(Address([9; 20]));
        let gateway: Arc<dyn LedgerGateway> = Arc::new(ledger.clone());
        let (executor, _) = executor(gateway);

        let schema_id = SchemaId::derive(&Schema::live_action());
        let op = Operation::publish(&schema_id, "post-1", &[1, 2, 3]);
        let outcome = executor
            .execute(&WriteIntent::new(op, Priority::High))
            .await
            .unwrap();

        assert!(outcome.ledger_ref.is_some());
        assert_eq!(ledger.record_count(&schema_id, Address([9; 20])), 1);
    }

    #[tokio::test]
    async fn test_non_publish_rejected_by_memory_ledger() {
        let ledger = InMemoryLedger::new(Address([9; 20]));
        let gateway: Arc<dyn LedgerGateway> = Arc::new(ledger);
        let (executor, _) = executor(gateway);

        let err = executor.execute(&intent(1, Priority::High)).await.unwrap_err();
        assert!(!err.kind().is_retryable());
    }
}
