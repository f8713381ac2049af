//! Murmur Queue - Write Path
//!
//! Intents enter a three-lane [`PriorityWriteQueue`]; the [`BatchScheduler`]
//! drains bounded batches on a fixed tick and runs them concurrently through
//! the [`TransactionExecutor`]. Failures go through the [`RetryCoordinator`],
//! terminal results land in the [`OutcomeLog`], and everything is counted by
//! the [`MetricsTracker`].

pub mod executor;
pub mod metrics;
pub mod outcomes;
pub mod queue;
pub mod retry;
pub mod scheduler;

pub use executor::{ExecutionError, TransactionExecutor};
pub use metrics::{MetricsSnapshot, MetricsTracker};
pub use outcomes::OutcomeLog;
pub use queue::{Enqueued, PriorityWriteQueue};
pub use retry::{RetryCoordinator, RetryDecision};
pub use scheduler::{BatchScheduler, BatchSummary, TickReport};
