//! Write intents and their outcomes.
//!
//! A [`WriteIntent`] is owned by exactly one place at a time: a queue lane,
//! then the executor for the duration of one attempt, then either a lane
//! again (retry) or its terminal callback. Completion consumes the intent, so
//! a callback can never fire twice.

use crate::{new_id, ErrorKind, IntentId, LedgerError, SchemaId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PRIORITY
// ============================================================================

/// Queue lane an intent is placed in.
///
/// Ordering follows drain order: `High < Medium < Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Lanes in drain order.
    pub const DRAIN_ORDER: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a priority from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid priority: {}", self.0)
    }
}

impl std::error::Error for PriorityParseError {}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(PriorityParseError(s.to_string())),
        }
    }
}

// ============================================================================
// OPERATION
// ============================================================================

/// A ledger write: contract method plus its arguments.
///
/// Arguments are opaque to the orchestration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub method: String,
    pub args: serde_json::Value,
}

impl Operation {
    pub fn new(method: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Append an encoded record under a schema, indexed by `key`.
    pub fn publish(schema_id: &SchemaId, key: &str, data: &[u8]) -> Self {
        let args = PublishArgs {
            schema_id: schema_id.to_string(),
            key: key.to_string(),
            data: hex::encode(data),
        };
        Self {
            method: PUBLISH_METHOD.to_string(),
            args: serde_json::to_value(args).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Arguments of a publish operation, or `None` for any other method or
    /// malformed args.
    pub fn publish_args(&self) -> Option<PublishArgs> {
        if self.method != PUBLISH_METHOD {
            return None;
        }
        serde_json::from_value(self.args.clone()).ok()
    }
}

/// Method name of a record publish.
pub const PUBLISH_METHOD: &str = "publish_record";

/// Arguments carried by a publish operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishArgs {
    /// `SchemaId` in its `0x` hex form
    pub schema_id: String,
    pub key: String,
    /// Hex-encoded record payload
    pub data: String,
}

impl PublishArgs {
    pub fn data_bytes(&self) -> Option<Vec<u8>> {
        hex::decode(&self.data).ok()
    }
}

/// Confirmation returned by the ledger once a write is included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction reference (hash) on the ledger
    pub ledger_ref: String,
    /// Block the write was included in
    pub block_height: u64,
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// Terminal result of a write intent. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutcome {
    pub id: IntentId,
    pub ledger_ref: Option<String>,
    pub block_height: Option<u64>,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub latency_ms: u64,
    pub retry_count: u32,
    pub completed_at: Timestamp,
}

impl TxOutcome {
    /// Build a successful outcome from a ledger receipt.
    pub fn succeeded(id: IntentId, receipt: &Receipt, latency_ms: u64, retry_count: u32) -> Self {
        Self {
            id,
            ledger_ref: Some(receipt.ledger_ref.clone()),
            block_height: Some(receipt.block_height),
            success: true,
            error_kind: None,
            latency_ms,
            retry_count,
            completed_at: Utc::now(),
        }
    }

    /// Build a failed outcome.
    pub fn failed(id: IntentId, kind: ErrorKind, latency_ms: u64, retry_count: u32) -> Self {
        Self {
            id,
            ledger_ref: None,
            block_height: None,
            success: false,
            error_kind: Some(kind),
            latency_ms,
            retry_count,
            completed_at: Utc::now(),
        }
    }
}

/// Terminal failure delivered to an intent's failure callback.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentFailure {
    pub intent_id: IntentId,
    pub kind: ErrorKind,
    pub error: LedgerError,
    pub retry_count: u32,
}

/// Point-in-time view of the queue lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub pending_count: usize,
}

// ============================================================================
// WRITE INTENT
// ============================================================================

/// Callback invoked once with the successful outcome.
pub type SuccessCallback = Box<dyn FnOnce(&TxOutcome) + Send + Sync + 'static>;

/// Callback invoked once with the terminal failure.
pub type FailureCallback = Box<dyn FnOnce(&IntentFailure) + Send + Sync + 'static>;

/// A queued write operation awaiting execution.
pub struct WriteIntent {
    pub id: IntentId,
    pub operation: Operation,
    pub priority: Priority,
    pub created_at: Timestamp,
    pub retry_count: u32,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl WriteIntent {
    /// Create a new intent with no callbacks.
    pub fn new(operation: Operation, priority: Priority) -> Self {
        Self {
            id: new_id(),
            operation,
            priority,
            created_at: Utc::now(),
            retry_count: 0,
            on_success: None,
            on_failure: None,
        }
    }

    /// Attach a success callback.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&TxOutcome) + Send + Sync + 'static,
    {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Attach a failure callback.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&IntentFailure) + Send + Sync + 'static,
    {
        self.on_failure = Some(Box::new(f));
        self
    }

    /// Consume the intent, delivering the success callback.
    pub fn complete(mut self, outcome: &TxOutcome) {
        if let Some(callback) = self.on_success.take() {
            callback(outcome);
        }
    }

    /// Consume the intent, delivering the failure callback.
    pub fn fail(mut self, failure: &IntentFailure) {
        if let Some(callback) = self.on_failure.take() {
            callback(failure);
        }
    }
}

impl fmt::Debug for WriteIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteIntent")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("priority", &self.priority)
            .field("created_at", &self.created_at)
            .field("retry_count", &self.retry_count)
            .field("has_on_success", &self.on_success.is_some())
            .field("has_on_failure", &self.on_failure.is_some())
            .finish()
    }
}
