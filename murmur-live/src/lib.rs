//! Murmur Live - Optimistic Shared State
//!
//! Local presence actions land in the [`OptimisticStateStore`] synchronously
//! and are persisted to the ledger in the background. The [`Reconciler`]
//! re-derives aggregates from the ledger, and the [`SubscriptionManager`]
//! keeps subscribers up to date through push notifications with a polling
//! fallback.

pub mod reconcile;
pub mod sink;
pub mod store;
pub mod subscription;

pub use reconcile::Reconciler;
pub use sink::{live_publish_operation, ActionSink, GatewaySink};
pub use store::{persist_in_background, OptimisticStateStore, Phase, ReconcileTicket};
pub use subscription::{LiveCallback, SubscriptionManager};
