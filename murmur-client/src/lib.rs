//! Murmur - Optimistic Ledger Orchestrator
//!
//! The [`Orchestrator`] is the one object callers hold. It owns the write
//! queue, the read cache, the live state store and every periodic task, and
//! exposes the operations a UI needs:
//!
//! - `enqueue_write` / `cancel_write` / `queue_snapshot` / `metrics`
//! - `read_records` for cached, deduplicated reads
//! - `apply_local_action` for instant presence updates
//! - `subscribe_live` / `unsubscribe_live` for live aggregates
//!
//! # Example
//!
//! ```ignore
//! let ledger = Arc::new(InMemoryLedger::new(config.live.publisher));
//! let orchestrator = Orchestrator::new(ledger, config)?;
//! orchestrator.start();
//! let state = orchestrator.apply_local_action(&"post-42".into(), me, LiveAction::View);
//! ```

pub mod orchestrator;
pub mod sink;
pub mod telemetry;

pub use orchestrator::Orchestrator;
pub use sink::QueuedActionSink;
pub use telemetry::init_tracing;

pub use murmur_core::{
    Address, ErrorKind, LedgerError, LedgerGateway, LiveAction, MurmurConfig, MurmurError,
    MurmurResult, Operation, Priority, QueueSnapshot, SubjectId, SubscriptionId, TxOutcome,
    ViewerState, WriteIntent,
};
pub use murmur_live::{LiveCallback, Phase};
pub use murmur_queue::MetricsSnapshot;
pub use murmur_storage::{CacheRead, Freshness, InMemoryLedger, RecordBatch};
