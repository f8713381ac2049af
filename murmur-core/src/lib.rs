//! Murmur Core - Shared Types
//!
//! Data model, error taxonomy, record codec, live aggregates, the ledger
//! gateway seam, configuration and the periodic task scheduler. Every other
//! murmur crate depends on this one.

pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod intent;
pub mod live;
pub mod record;
pub mod schedule;

pub use codec::RecordCodec;
pub use config::{
    CacheConfig, ExecutorConfig, LiveConfig, MetricsConfig, MurmurConfig, QueueConfig,
    RetryConfig,
};
pub use error::{CodecError, ConfigError, ErrorKind, LedgerError, MurmurError, MurmurResult};
pub use gateway::{event_id, LedgerGateway, PushStream};
pub use identity::{new_id, Address, IntentId, SubjectId, SubscriptionId, Timestamp};
pub use intent::{
    FailureCallback, IntentFailure, Operation, Priority, PriorityParseError, PublishArgs,
    QueueSnapshot, Receipt, SuccessCallback, TxOutcome, WriteIntent, PUBLISH_METHOD,
};
pub use live::{LiveAction, ViewerState};
pub use record::{
    FieldDef, FieldKind, FieldValue, InteractionKind, InteractionRecord, LiveActionRecord,
    PostRecord, RawRecord, Schema, SchemaId, SchemaRecord, TypedRecord, INTERACTION_SCHEMA,
    LIVE_ACTION_SCHEMA, POST_SCHEMA,
};
pub use schedule::{TaskId, TaskScheduler};
