//! In-process ledger for development and tests.
//!
//! Implements [`LedgerGateway`] over plain maps. Writes are `publish`
//! operations (see [`Operation::publish`]) signed by a single publisher
//! address; each accepted write lands in its own block and fans out a push
//! notification to subscribers of `"{schema_id}:{key}"`.
//!
//! Fault injection hooks let tests script submit/read failures, slow reads
//! and unavailable push channels.

use async_trait::async_trait;
use futures_util::future;
use futures_util::StreamExt;
use murmur_core::{
    event_id, Address, ErrorKind, LedgerError, LedgerGateway, Operation, PushStream, RawRecord,
    Receipt, SchemaId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Flat cost of any write.
const BASE_COST: u64 = 21_000;
/// Additional cost per payload byte.
const COST_PER_BYTE: u64 = 16;
/// Capacity of the push fan-out channel.
const PUSH_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    raw: RawRecord,
}

#[derive(Debug, Clone)]
struct PushEvent {
    event_id: String,
    record: RawRecord,
}

#[derive(Default)]
struct LedgerState {
    /// (schema id in hex form, publisher) -> records in append order
    records: HashMap<(String, Address), Vec<StoredRecord>>,
    receipts: HashMap<String, Receipt>,
    block_height: u64,
    submit_faults: VecDeque<ErrorKind>,
    read_faults: VecDeque<ErrorKind>,
    read_delay: Option<Duration>,
    submit_delay: Option<Duration>,
}

struct LedgerInner {
    signer: Address,
    state: Mutex<LedgerState>,
    push_tx: broadcast::Sender<PushEvent>,
    push_enabled: AtomicBool,
    submit_calls: AtomicU64,
    read_calls: AtomicU64,
    subscribe_calls: AtomicU64,
}

/// In-memory [`LedgerGateway`].
///
/// Cloning yields another handle to the same ledger.
///
/// # Example
///
/// ```rust,ignore
/// let ledger = InMemoryLedger::new(publisher);
/// ledger.fail_next_submits(2, ErrorKind::Timeout);
/// let gateway: Arc<dyn LedgerGateway> = Arc::new(ledger.clone());
/// ```
#[derive(Clone)]
pub struct InMemoryLedger {
    inner: Arc<LedgerInner>,
}

impl InMemoryLedger {
    /// A ledger whose writes are all published by `signer`.
    pub fn new(signer: Address) -> Self {
        let (push_tx, _) = broadcast::channel(PUSH_CAPACITY);
        Self {
            inner: Arc::new(LedgerInner {
                signer,
                state: Mutex::new(LedgerState::default()),
                push_tx,
                push_enabled: AtomicBool::new(true),
                submit_calls: AtomicU64::new(0),
                read_calls: AtomicU64::new(0),
                subscribe_calls: AtomicU64::new(0),
            }),
        }
    }

    pub fn signer(&self) -> Address {
        self.inner.signer
    }

    /// Cost `estimate_cost` reports for a payload of `len` bytes.
    pub fn cost_for(len: usize) -> u64 {
        BASE_COST + COST_PER_BYTE * len as u64
    }

    /// Append a record directly, as if `publisher` had written it.
    pub fn append(&self, schema_id: &SchemaId, publisher: Address, key: &str, data: Vec<u8>) -> String {
        let mut state = self.lock_state();
        state.block_height += 1;
        let tx_hash = tx_hash_for(state.block_height);
        let raw = RawRecord {
            publisher,
            ledger_ref: Some(tx_hash.clone()),
            data,
        };
        state
            .records
            .entry((schema_id.to_string(), publisher))
            .or_default()
            .push(StoredRecord {
                key: Some(key.to_string()),
                raw: raw.clone(),
            });
        let receipt = Receipt {
            ledger_ref: tx_hash.clone(),
            block_height: state.block_height,
        };
        state.receipts.insert(tx_hash.clone(), receipt);
        drop(state);

        // No receivers is fine: push is best-effort.
        let _ = self.inner.push_tx.send(PushEvent {
            event_id: event_id(schema_id, key),
            record: raw,
        });
        tx_hash
    }

    /// Fail the next `count` submits with `kind`.
    pub fn fail_next_submits(&self, count: usize, kind: ErrorKind) {
        let mut state = self.lock_state();
        state.submit_faults.extend(std::iter::repeat(kind).take(count));
    }

    /// Fail the next `count` reads with `kind`.
    pub fn fail_next_reads(&self, count: usize, kind: ErrorKind) {
        let mut state = self.lock_state();
        state.read_faults.extend(std::iter::repeat(kind).take(count));
    }

    /// Delay every read by `delay` (`None` to clear).
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.lock_state().read_delay = delay;
    }

    /// Delay every submit by `delay` (`None` to clear).
    pub fn set_submit_delay(&self, delay: Option<Duration>) {
        self.lock_state().submit_delay = delay;
    }

    /// When disabled, `subscribe_event` fails with a network error.
    pub fn set_push_enabled(&self, enabled: bool) {
        self.inner.push_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn submit_calls(&self) -> u64 {
        self.inner.submit_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> u64 {
        self.inner.read_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> u64 {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Records stored under a schema for a publisher.
    pub fn record_count(&self, schema_id: &SchemaId, publisher: Address) -> usize {
        self.lock_state()
            .records
            .get(&(schema_id.to_string(), publisher))
            .map_or(0, Vec::len)
    }

    pub fn block_height(&self) -> u64 {
        self.lock_state().block_height
    }

    fn lock_state(&self) -> MutexGuard<'_, LedgerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn tx_hash_for(block: u64) -> String {
    format!("0x{:064x}", block)
}

fn injected(kind: ErrorKind, operation: &str) -> LedgerError {
    LedgerError::of_kind(kind, format!("injected fault in {}", operation))
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn estimate_cost(&self, operation: &Operation) -> Result<u64, LedgerError> {
        let args = operation.publish_args().ok_or_else(|| LedgerError::Validation {
            reason: format!("unsupported method '{}'", operation.method),
        })?;
        let data = args.data_bytes().ok_or_else(|| LedgerError::Validation {
            reason: "payload is not valid hex".to_string(),
        })?;
        Ok(Self::cost_for(data.len()))
    }

    async fn submit(&self, operation: &Operation, gas_limit: u64) -> Result<String, LedgerError> {
        self.inner.submit_calls.fetch_add(1, Ordering::SeqCst);

        let (fault, delay) = {
            let mut state = self.lock_state();
            (state.submit_faults.pop_front(), state.submit_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(kind) = fault {
            return Err(injected(kind, "submit"));
        }

        let args = operation.publish_args().ok_or_else(|| LedgerError::Rejected {
            reason: format!("unsupported method '{}'", operation.method),
        })?;
        let data = args.data_bytes().ok_or_else(|| LedgerError::Validation {
            reason: "payload is not valid hex".to_string(),
        })?;
        let cost = Self::cost_for(data.len());
        if gas_limit < cost {
            return Err(LedgerError::Rejected {
                reason: format!("out of gas: limit {} below cost {}", gas_limit, cost),
            });
        }

        let mut state = self.lock_state();
        state.block_height += 1;
        let height = state.block_height;
        let tx_hash = tx_hash_for(height);
        let raw = RawRecord {
            publisher: self.inner.signer,
            ledger_ref: Some(tx_hash.clone()),
            data,
        };
        state
            .records
            .entry((args.schema_id.clone(), self.inner.signer))
            .or_default()
            .push(StoredRecord {
                key: Some(args.key.clone()),
                raw: raw.clone(),
            });
        state.receipts.insert(
            tx_hash.clone(),
            Receipt {
                ledger_ref: tx_hash.clone(),
                block_height: height,
            },
        );
        drop(state);

        tracing::debug!(tx_hash = %tx_hash, block = height, key = %args.key, "Write accepted");
        let _ = self.inner.push_tx.send(PushEvent {
            event_id: format!("{}:{}", args.schema_id, args.key),
            record: raw,
        });
        Ok(tx_hash)
    }

    async fn confirm(&self, tx_hash: &str, confirmations: u32) -> Result<Receipt, LedgerError> {
        let mut state = self.lock_state();
        let receipt = state
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                resource: format!("transaction {}", tx_hash),
            })?;
        // Later blocks are minted on demand so the requested depth is reached.
        let needed = receipt.block_height + u64::from(confirmations.saturating_sub(1));
        if state.block_height < needed {
            state.block_height = needed;
        }
        Ok(receipt)
    }

    async fn read(
        &self,
        schema_id: &SchemaId,
        publisher: &Address,
        key: Option<&str>,
    ) -> Result<Vec<RawRecord>, LedgerError> {
        self.inner.read_calls.fetch_add(1, Ordering::SeqCst);

        let (fault, delay) = {
            let mut state = self.lock_state();
            (state.read_faults.pop_front(), state.read_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(kind) = fault {
            return Err(injected(kind, "read"));
        }

        let state = self.lock_state();
        let stored = state
            .records
            .get(&(schema_id.to_string(), *publisher))
            .ok_or_else(|| LedgerError::NotFound {
                resource: format!("{} by {}", schema_id, publisher),
            })?;
        Ok(stored
            .iter()
            .filter(|r| key.map_or(true, |k| r.key.as_deref() == Some(k)))
            .map(|r| r.raw.clone())
            .collect())
    }

    async fn subscribe_event(&self, event_id: &str) -> Result<PushStream, LedgerError> {
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if !self.inner.push_enabled.load(Ordering::SeqCst) {
            return Err(LedgerError::Network {
                message: "push channel unavailable".to_string(),
            });
        }

        let wanted = event_id.to_string();
        let stream = BroadcastStream::new(self.inner.push_tx.subscribe()).filter_map(move |item| {
            let out = match item {
                Ok(event) if event.event_id == wanted => Some(Ok(event.record)),
                Ok(_) => None,
                Err(err) => Some(Err(LedgerError::Network {
                    message: format!("push channel: {}", err),
                })),
            };
            future::ready(out)
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::{FieldValue, RecordCodec, Schema};

    fn signer() -> Address {
        Address([0xaa; 20])
    }

    fn live_payload(subject: &str, action: &str, actor: u8, ts: u64) -> Vec<u8> {
        RecordCodec::encode(
            &Schema::live_action(),
            &[
                FieldValue::String(subject.to_string()),
                FieldValue::String(action.to_string()),
                FieldValue::Address(Address([actor; 20])),
                FieldValue::Uint64(ts),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_confirm_read() {
        let ledger = InMemoryLedger::new(signer());
        let schema_id = SchemaId::derive(&Schema::live_action());
        let op = Operation::publish(&schema_id, "post-42", &live_payload("post-42", "view", 1, 10));

        let cost = ledger.estimate_cost(&op).await.unwrap();
        let tx = ledger.submit(&op, cost).await.unwrap();
        let receipt = ledger.confirm(&tx, 1).await.unwrap();
        assert_eq!(receipt.ledger_ref, tx);
        assert_eq!(receipt.block_height, 1);

        let records = ledger.read(&schema_id, &signer(), Some("post-42")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].publisher, signer());
        assert!(ledger.read(&schema_id, &signer(), Some("other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_below_cost_rejected() {
        let ledger = InMemoryLedger::new(signer());
        let op = Operation::publish(&SchemaId([1; 32]), "k", &[0u8; 10]);
        let err = ledger.submit(&op, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_retryable() {
        let ledger = InMemoryLedger::new(signer());
        let op = Operation::new("transfer", serde_json::json!({}));
        assert_eq!(
            ledger.estimate_cost(&op).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert!(!ledger.submit(&op, u64::MAX).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_in_order() {
        let ledger = InMemoryLedger::new(signer());
        ledger.fail_next_submits(2, ErrorKind::Timeout);
        let op = Operation::publish(&SchemaId([1; 32]), "k", &[]);
        assert_eq!(ledger.submit(&op, u64::MAX).await.unwrap_err().kind(), ErrorKind::Timeout);
        assert_eq!(ledger.submit(&op, u64::MAX).await.unwrap_err().kind(), ErrorKind::Timeout);
        assert!(ledger.submit(&op, u64::MAX).await.is_ok());
        assert_eq!(ledger.submit_calls(), 3);
    }

    #[tokio::test]
    async fn test_read_of_unknown_publisher_is_not_found() {
        let ledger = InMemoryLedger::new(signer());
        let err = ledger
            .read(&SchemaId([3; 32]), &Address([9; 20]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(ledger.read_calls(), 1);
    }

    #[tokio::test]
    async fn test_confirm_unknown_tx() {
        let ledger = InMemoryLedger::new(signer());
        assert_eq!(
            ledger.confirm("0xdead", 1).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_push_delivers_matching_events_only() {
        let ledger = InMemoryLedger::new(signer());
        let schema_id = SchemaId::derive(&Schema::live_action());
        let mut stream = ledger
            .subscribe_event(&event_id(&schema_id, "post-42"))
            .await
            .unwrap();

        ledger.append(&schema_id, signer(), "post-7", live_payload("post-7", "view", 1, 1));
        ledger.append(&schema_id, signer(), "post-42", live_payload("post-42", "view", 2, 2));

        let first = stream.next().await.unwrap().unwrap();
        let decoded = RecordCodec::decode_typed(&Schema::live_action(), &first).unwrap();
        assert_eq!(decoded.as_live_action().unwrap().actor, Address([2; 20]));
    }

    #[tokio::test]
    async fn test_push_can_be_disabled() {
        let ledger = InMemoryLedger::new(signer());
        ledger.set_push_enabled(false);
        let err = ledger.subscribe_event("x:y").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(ledger.subscribe_calls(), 1);
    }
}
