//! Murmur Test Utilities
//!
//! Shared test infrastructure for the murmur workspace:
//! - Scripted ledger gateways (never-resolving, flaky)
//! - Proptest generators for intents, priorities and live records
//! - Fixtures for common scenarios
//! - Assertions for outcome and aggregate checks

// Re-export the in-memory ledger from its source crate
pub use murmur_storage::InMemoryLedger;

pub use murmur_core::{
    Address, ErrorKind, FieldValue, LedgerError, LedgerGateway, LiveAction, LiveActionRecord,
    Operation, Priority, PushStream, RawRecord, Receipt, RecordCodec, Schema, SchemaId, SubjectId,
    TxOutcome, ViewerState, WriteIntent,
};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// SCRIPTED GATEWAYS
// ============================================================================

/// Gateway whose every call stays pending forever.
///
/// Used to prove that a code path returns before touching the network.
#[derive(Debug, Default)]
pub struct PendingGateway {
    calls: AtomicU64,
}

impl PendingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls that reached the gateway (each one is now parked).
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn park<T>(&self) -> T {
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures_util::future::pending().await
    }
}

#[async_trait]
impl LedgerGateway for PendingGateway {
    async fn estimate_cost(&self, _operation: &Operation) -> Result<u64, LedgerError> {
        self.park().await
    }

    async fn submit(&self, _operation: &Operation, _gas_limit: u64) -> Result<String, LedgerError> {
        self.park().await
    }

    async fn confirm(&self, _tx_hash: &str, _confirmations: u32) -> Result<Receipt, LedgerError> {
        self.park().await
    }

    async fn read(
        &self,
        _schema_id: &SchemaId,
        _publisher: &Address,
        _key: Option<&str>,
    ) -> Result<Vec<RawRecord>, LedgerError> {
        self.park().await
    }

    async fn subscribe_event(&self, _event_id: &str) -> Result<PushStream, LedgerError> {
        self.park().await
    }
}

#[derive(Debug, Default)]
struct FlakyState {
    faults: VecDeque<ErrorKind>,
    always: Option<ErrorKind>,
    submitted: Vec<Operation>,
    gas_limits: Vec<u64>,
}

/// Gateway that fails scripted submits and succeeds otherwise.
///
/// Every submit attempt is recorded in order, so tests can assert on
/// dispatch order. Reads return nothing; push is unavailable.
#[derive(Debug)]
pub struct FlakyGateway {
    state: Mutex<FlakyState>,
    cost: u64,
    delay: Option<Duration>,
    next_block: AtomicU64,
}

impl FlakyGateway {
    /// Never fails.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FlakyState::default()),
            cost: 100,
            delay: None,
            next_block: AtomicU64::new(1),
        }
    }

    /// Fails the first `count` submits with `kind`.
    pub fn failing(count: usize, kind: ErrorKind) -> Self {
        let gateway = Self::new();
        gateway.fail_next(count, kind);
        gateway
    }

    /// Fails every submit with `kind`.
    pub fn always_failing(kind: ErrorKind) -> Self {
        let gateway = Self::new();
        gateway.lock().always = Some(kind);
        gateway
    }

    /// Cost reported by `estimate_cost`.
    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }

    /// Sleep this long inside every submit.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_next(&self, count: usize, kind: ErrorKind) {
        self.lock().faults.extend(std::iter::repeat(kind).take(count));
    }

    pub fn submit_calls(&self) -> usize {
        self.lock().submitted.len()
    }

    /// Methods of every submit attempt, in call order.
    pub fn submitted_methods(&self) -> Vec<String> {
        self.lock().submitted.iter().map(|op| op.method.clone()).collect()
    }

    /// Gas limits passed to every submit attempt, in call order.
    pub fn gas_limits(&self) -> Vec<u64> {
        self.lock().gas_limits.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FlakyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FlakyGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerGateway for FlakyGateway {
    async fn estimate_cost(&self, _operation: &Operation) -> Result<u64, LedgerError> {
        Ok(self.cost)
    }

    async fn submit(&self, operation: &Operation, gas_limit: u64) -> Result<String, LedgerError> {
        let fault = {
            let mut state = self.lock();
            state.submitted.push(operation.clone());
            state.gas_limits.push(gas_limit);
            state.faults.pop_front().or(state.always)
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(kind) => Err(LedgerError::of_kind(kind, "scripted failure")),
            None => {
                let block = self.next_block.fetch_add(1, Ordering::SeqCst);
                Ok(format!("0x{:064x}", block))
            }
        }
    }

    async fn confirm(&self, tx_hash: &str, _confirmations: u32) -> Result<Receipt, LedgerError> {
        let block = u64::from_str_radix(tx_hash.trim_start_matches("0x"), 16).unwrap_or(0);
        Ok(Receipt {
            ledger_ref: tx_hash.to_string(),
            block_height: block,
        })
    }

    async fn read(
        &self,
        _schema_id: &SchemaId,
        _publisher: &Address,
        _key: Option<&str>,
    ) -> Result<Vec<RawRecord>, LedgerError> {
        Ok(Vec::new())
    }

    async fn subscribe_event(&self, _event_id: &str) -> Result<PushStream, LedgerError> {
        Err(LedgerError::Network {
            message: "push not supported".to_string(),
        })
    }
}

/// Shared handle helper for gateways used through `Arc<dyn LedgerGateway>`.
pub fn shared<G: LedgerGateway>(gateway: G) -> (Arc<G>, Arc<dyn LedgerGateway>) {
    let concrete = Arc::new(gateway);
    let erased: Arc<dyn LedgerGateway> = concrete.clone();
    (concrete, erased)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for murmur types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![Just(Priority::High), Just(Priority::Medium), Just(Priority::Low)]
    }

    pub fn arb_error_kind() -> impl Strategy<Value = ErrorKind> {
        proptest::sample::select(ErrorKind::ALL.to_vec())
    }

    pub fn arb_retryable_kind() -> impl Strategy<Value = ErrorKind> {
        prop_oneof![
            Just(ErrorKind::Timeout),
            Just(ErrorKind::Network),
            Just(ErrorKind::NonceConflict)
        ]
    }

    pub fn arb_live_action() -> impl Strategy<Value = LiveAction> {
        prop_oneof![
            Just(LiveAction::View),
            Just(LiveAction::TypingStart),
            Just(LiveAction::TypingStop)
        ]
    }

    /// Address drawn from a small pool so actors repeat.
    pub fn arb_actor() -> impl Strategy<Value = Address> {
        (1u8..=6).prop_map(fixtures::addr)
    }

    /// Live action records for `subject`, with a few for other subjects mixed in.
    pub fn arb_live_records(
        subject: &'static str,
        max: usize,
    ) -> impl Strategy<Value = Vec<LiveActionRecord>> {
        let one = (
            prop_oneof![4 => Just(subject), 1 => Just("elsewhere")],
            arb_actor(),
            arb_live_action(),
            0u64..50,
        )
            .prop_map(|(s, actor, action, ts)| LiveActionRecord {
                subject_id: SubjectId::from(s),
                action,
                actor,
                timestamp: ts,
                publisher: Address::ZERO,
                ledger_ref: None,
            });
        proptest::collection::vec(one, 0..max)
    }

    /// A sequence of priorities for enqueue-order tests.
    pub fn arb_priorities(max: usize) -> impl Strategy<Value = Vec<Priority>> {
        proptest::collection::vec(arb_priority(), 0..max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// Deterministic address filled with `n`.
    pub fn addr(n: u8) -> Address {
        Address([n; 20])
    }

    pub fn live_schema() -> Schema {
        Schema::live_action()
    }

    pub fn live_record(subject: &str, actor: u8, action: LiveAction, timestamp: u64) -> LiveActionRecord {
        LiveActionRecord {
            subject_id: SubjectId::from(subject),
            action,
            actor: addr(actor),
            timestamp,
            publisher: Address::ZERO,
            ledger_ref: None,
        }
    }

    /// Opaque operation tagged with `n` in its method name.
    pub fn op(n: usize) -> Operation {
        Operation::new(format!("op-{}", n), serde_json::json!({ "n": n }))
    }

    pub fn intent(n: usize, priority: Priority) -> WriteIntent {
        WriteIntent::new(op(n), priority)
    }

    /// Encoded live action payload.
    pub fn live_payload(subject: &str, actor: u8, action: LiveAction, timestamp: u64) -> Vec<u8> {
        let record = live_record(subject, actor, action, timestamp);
        RecordCodec::encode(&live_schema(), &record.to_values()).unwrap_or_default()
    }

    /// Append a live action to an in-memory ledger as `publisher`.
    pub fn seed_live(
        ledger: &InMemoryLedger,
        publisher: Address,
        subject: &str,
        actor: u8,
        action: LiveAction,
        timestamp: u64,
    ) -> String {
        let schema_id = SchemaId::derive(&live_schema());
        ledger.append(
            &schema_id,
            publisher,
            subject,
            live_payload(subject, actor, action, timestamp),
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for murmur-specific checks.

    use super::*;
    use std::collections::BTreeSet;

    #[track_caller]
    pub fn assert_succeeded(outcome: &TxOutcome) {
        assert!(
            outcome.success && outcome.error_kind.is_none(),
            "Expected successful outcome, got: {:?}",
            outcome
        );
    }

    #[track_caller]
    pub fn assert_failed_with(outcome: &TxOutcome, kind: ErrorKind, retry_count: u32) {
        assert!(!outcome.success, "Expected failed outcome, got: {:?}", outcome);
        assert_eq!(outcome.error_kind, Some(kind), "Error kind mismatch: {:?}", outcome);
        assert_eq!(
            outcome.retry_count, retry_count,
            "Retry count mismatch: {:?}",
            outcome
        );
    }

    /// Assert the viewer and typing sets by actor number.
    #[track_caller]
    pub fn assert_viewers(state: &ViewerState, viewers: &[u8], typing: &[u8]) {
        let expected_viewers: BTreeSet<Address> = viewers.iter().map(|n| fixtures::addr(*n)).collect();
        let expected_typing: BTreeSet<Address> = typing.iter().map(|n| fixtures::addr(*n)).collect();
        assert_eq!(state.viewers, expected_viewers, "Viewer set mismatch");
        assert_eq!(state.typing, expected_typing, "Typing set mismatch");
    }
}
