//! Schemas, decoded records, and typed record normalization.
//!
//! Every record that crosses the gateway boundary is decoded against its
//! [`Schema`] and immediately normalized into a [`TypedRecord`]. Nothing past
//! that seam inspects raw tuples.

use crate::{Address, CodecError, LiveAction, SubjectId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Schema name for posts.
pub const POST_SCHEMA: &str = "post";
/// Schema name for social interactions.
pub const INTERACTION_SCHEMA: &str = "interaction";
/// Schema name for live presence actions.
pub const LIVE_ACTION_SCHEMA: &str = "live_action";

// ============================================================================
// SCHEMA DEFINITION
// ============================================================================

/// Wire type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Uint64,
    Bool,
    Address,
    Bytes32,
    String,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Uint64 => "uint64",
            FieldKind::Bool => "bool",
            FieldKind::Address => "address",
            FieldKind::Bytes32 => "bytes32",
            FieldKind::String => "string",
        }
    }
}

/// One named, typed field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

/// A named, ordered list of typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field (builder style).
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            kind,
        });
        self
    }

    /// Position of a field by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Canonical definition string, e.g. `post(string post_id,address author)`.
    pub fn canonical(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{} {}", f.kind.as_str(), f.name))
            .collect();
        format!("{}({})", self.name, fields.join(","))
    }

    /// Posts: `post_id`, `author`, `content`, `timestamp`.
    pub fn post() -> Self {
        Schema::new(POST_SCHEMA)
            .field("post_id", FieldKind::String)
            .field("author", FieldKind::Address)
            .field("content", FieldKind::String)
            .field("timestamp", FieldKind::Uint64)
    }

    /// Interactions: `target_id`, `kind`, `actor`, `timestamp`.
    pub fn interaction() -> Self {
        Schema::new(INTERACTION_SCHEMA)
            .field("target_id", FieldKind::String)
            .field("kind", FieldKind::String)
            .field("actor", FieldKind::Address)
            .field("timestamp", FieldKind::Uint64)
    }

    /// Live actions: `subject_id`, `action`, `actor`, `timestamp`.
    pub fn live_action() -> Self {
        Schema::new(LIVE_ACTION_SCHEMA)
            .field("subject_id", FieldKind::String)
            .field("action", FieldKind::String)
            .field("actor", FieldKind::Address)
            .field("timestamp", FieldKind::Uint64)
    }
}

/// Identifier of a schema on the ledger, derived from its canonical definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(pub [u8; 32]);

impl SchemaId {
    /// SHA-256 of the canonical schema definition.
    pub fn derive(schema: &Schema) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(schema.canonical().as_bytes());
        let result = hasher.finalize();
        let mut id = [0u8; 32];
        id.copy_from_slice(&result);
        SchemaId(id)
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

// ============================================================================
// DECODED VALUES
// ============================================================================

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    Uint64(u64),
    Bool(bool),
    Address(Address),
    Bytes32([u8; 32]),
    String(String),
}

impl FieldValue {
    /// The wire kind of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Uint64(_) => FieldKind::Uint64,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Address(_) => FieldKind::Address,
            FieldValue::Bytes32(_) => FieldKind::Bytes32,
            FieldValue::String(_) => FieldKind::String,
        }
    }
}

/// Encoded record as returned by the ledger, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub publisher: Address,
    pub ledger_ref: Option<String>,
    pub data: Vec<u8>,
}

/// Decoded tuple plus provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub schema: String,
    pub publisher: Address,
    pub ledger_ref: Option<String>,
    pub values: Vec<FieldValue>,
}

impl SchemaRecord {
    fn value<'a>(&'a self, schema: &Schema, name: &str) -> Result<&'a FieldValue, CodecError> {
        schema
            .index_of(name)
            .and_then(|idx| self.values.get(idx))
            .ok_or_else(|| CodecError::InvalidValue {
                field: name.to_string(),
                reason: "field missing from record".to_string(),
            })
    }

    fn string(&self, schema: &Schema, name: &str) -> Result<String, CodecError> {
        match self.value(schema, name)? {
            FieldValue::String(s) => Ok(s.clone()),
            other => Err(mismatch(name, FieldKind::String, other)),
        }
    }

    fn uint64(&self, schema: &Schema, name: &str) -> Result<u64, CodecError> {
        match self.value(schema, name)? {
            FieldValue::Uint64(v) => Ok(*v),
            other => Err(mismatch(name, FieldKind::Uint64, other)),
        }
    }

    fn address(&self, schema: &Schema, name: &str) -> Result<Address, CodecError> {
        match self.value(schema, name)? {
            FieldValue::Address(a) => Ok(*a),
            other => Err(mismatch(name, FieldKind::Address, other)),
        }
    }
}

fn mismatch(field: &str, expected: FieldKind, got: &FieldValue) -> CodecError {
    CodecError::TypeMismatch {
        field: field.to_string(),
        expected: expected.as_str(),
        got: got.kind().as_str(),
    }
}

// ============================================================================
// TYPED RECORDS
// ============================================================================

/// Kind of social interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Like,
    Repost,
    Comment,
    Follow,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Like => "like",
            InteractionKind::Repost => "repost",
            InteractionKind::Comment => "comment",
            InteractionKind::Follow => "follow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(InteractionKind::Like),
            "repost" => Some(InteractionKind::Repost),
            "comment" => Some(InteractionKind::Comment),
            "follow" => Some(InteractionKind::Follow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub post_id: String,
    pub author: Address,
    pub content: String,
    pub timestamp: u64,
    pub publisher: Address,
    pub ledger_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub target_id: String,
    pub kind: InteractionKind,
    pub actor: Address,
    pub timestamp: u64,
    pub publisher: Address,
    pub ledger_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveActionRecord {
    pub subject_id: SubjectId,
    pub action: LiveAction,
    pub actor: Address,
    pub timestamp: u64,
    pub publisher: Address,
    pub ledger_ref: Option<String>,
}

/// The closed set of record shapes the rest of the system works with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypedRecord {
    Post(PostRecord),
    Interaction(InteractionRecord),
    LiveAction(LiveActionRecord),
}

impl TypedRecord {
    /// Normalize a decoded record, dispatching on the schema name.
    pub fn from_record(schema: &Schema, record: &SchemaRecord) -> Result<Self, CodecError> {
        match schema.name.as_str() {
            POST_SCHEMA => Ok(TypedRecord::Post(PostRecord {
                post_id: record.string(schema, "post_id")?,
                author: record.address(schema, "author")?,
                content: record.string(schema, "content")?,
                timestamp: record.uint64(schema, "timestamp")?,
                publisher: record.publisher,
                ledger_ref: record.ledger_ref.clone(),
            })),
            INTERACTION_SCHEMA => {
                let raw_kind = record.string(schema, "kind")?;
                let kind =
                    InteractionKind::parse(&raw_kind).ok_or_else(|| CodecError::InvalidValue {
                        field: "kind".to_string(),
                        reason: format!("unknown interaction kind '{}'", raw_kind),
                    })?;
                Ok(TypedRecord::Interaction(InteractionRecord {
                    target_id: record.string(schema, "target_id")?,
                    kind,
                    actor: record.address(schema, "actor")?,
                    timestamp: record.uint64(schema, "timestamp")?,
                    publisher: record.publisher,
                    ledger_ref: record.ledger_ref.clone(),
                }))
            }
            LIVE_ACTION_SCHEMA => {
                let raw_action = record.string(schema, "action")?;
                let action = raw_action
                    .parse::<LiveAction>()
                    .map_err(|_| CodecError::InvalidValue {
                        field: "action".to_string(),
                        reason: format!("unknown live action '{}'", raw_action),
                    })?;
                Ok(TypedRecord::LiveAction(LiveActionRecord {
                    subject_id: SubjectId::new(record.string(schema, "subject_id")?),
                    action,
                    actor: record.address(schema, "actor")?,
                    timestamp: record.uint64(schema, "timestamp")?,
                    publisher: record.publisher,
                    ledger_ref: record.ledger_ref.clone(),
                }))
            }
            other => Err(CodecError::UnknownSchema {
                schema: other.to_string(),
            }),
        }
    }

    /// The live action payload, if this is one.
    pub fn as_live_action(&self) -> Option<&LiveActionRecord> {
        match self {
            TypedRecord::LiveAction(record) => Some(record),
            _ => None,
        }
    }
}

impl LiveActionRecord {
    /// Field values in `Schema::live_action()` order, ready for encoding.
    pub fn to_values(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::String(self.subject_id.as_str().to_string()),
            FieldValue::String(self.action.as_str().to_string()),
            FieldValue::Address(self.actor),
            FieldValue::Uint64(self.timestamp),
        ]
    }
}
