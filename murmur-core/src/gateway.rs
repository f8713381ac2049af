//! Ledger gateway trait.
//!
//! The only seam through which murmur talks to the external ledger. Wallet
//! signing, RPC transport and schema registration live behind it.

use crate::{Address, LedgerError, Operation, RawRecord, Receipt, SchemaId};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Stream of push notifications for one event subscription.
///
/// Delivery is best-effort: items may be dropped or the stream may end.
pub type PushStream = BoxStream<'static, Result<RawRecord, LedgerError>>;

/// Submit/read/subscribe primitives offered by the ledger.
///
/// Implementations must be thread-safe (Send + Sync).
///
/// # Example
/// ```ignore
/// struct RpcGateway { /* ... */ }
///
/// #[async_trait]
/// impl LedgerGateway for RpcGateway {
///     async fn submit(&self, op: &Operation, gas_limit: u64) -> Result<String, LedgerError> {
///         // sign and broadcast
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait LedgerGateway: Send + Sync + 'static {
    /// Estimate the resource cost (gas) of an operation.
    async fn estimate_cost(&self, operation: &Operation) -> Result<u64, LedgerError>;

    /// Submit a write with the given cost ceiling, returning its transaction hash.
    async fn submit(&self, operation: &Operation, gas_limit: u64) -> Result<String, LedgerError>;

    /// Wait until a submitted write reaches `confirmations` confirmations.
    async fn confirm(&self, tx_hash: &str, confirmations: u32) -> Result<Receipt, LedgerError>;

    /// Read every record a publisher wrote under a schema, optionally narrowed by key.
    ///
    /// May return `LedgerError::NotFound`, which callers treat as an empty batch.
    async fn read(
        &self,
        schema_id: &SchemaId,
        publisher: &Address,
        key: Option<&str>,
    ) -> Result<Vec<RawRecord>, LedgerError>;

    /// Register a push subscription for an event.
    async fn subscribe_event(&self, event_id: &str) -> Result<PushStream, LedgerError>;
}

/// Event id used for push notifications about a schema/key pair.
pub fn event_id(schema_id: &SchemaId, key: &str) -> String {
    format!("{}:{}", schema_id, key)
}
