//! Record codec: typed tuples to bytes and back.
//!
//! Layout per field, in schema order:
//!
//! ```text
//! uint64   8 bytes big-endian
//! bool     1 byte (0 or 1)
//! address  20 bytes
//! bytes32  32 bytes
//! string   u32 big-endian length, then UTF-8 bytes
//! ```

use crate::{Address, CodecError, FieldKind, FieldValue, RawRecord, Schema, SchemaRecord, TypedRecord};

/// Stateless encoder/decoder for schema records.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCodec;

impl RecordCodec {
    /// Encode values against a schema.
    pub fn encode(schema: &Schema, values: &[FieldValue]) -> Result<Vec<u8>, CodecError> {
        if values.len() != schema.fields.len() {
            return Err(CodecError::FieldCountMismatch {
                schema: schema.name.clone(),
                expected: schema.fields.len(),
                got: values.len(),
            });
        }

        let mut out = Vec::new();
        for (def, value) in schema.fields.iter().zip(values) {
            match (def.kind, value) {
                (FieldKind::Uint64, FieldValue::Uint64(v)) => out.extend_from_slice(&v.to_be_bytes()),
                (FieldKind::Bool, FieldValue::Bool(v)) => out.push(u8::from(*v)),
                (FieldKind::Address, FieldValue::Address(a)) => out.extend_from_slice(a.as_bytes()),
                (FieldKind::Bytes32, FieldValue::Bytes32(b)) => out.extend_from_slice(b),
                (FieldKind::String, FieldValue::String(s)) => {
                    let len = u32::try_from(s.len()).map_err(|_| CodecError::InvalidValue {
                        field: def.name.clone(),
                        reason: "string longer than u32::MAX bytes".to_string(),
                    })?;
                    out.extend_from_slice(&len.to_be_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                (expected, got) => {
                    return Err(CodecError::TypeMismatch {
                        field: def.name.clone(),
                        expected: expected.as_str(),
                        got: got.kind().as_str(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Decode a byte payload into field values.
    pub fn decode_values(schema: &Schema, data: &[u8]) -> Result<Vec<FieldValue>, CodecError> {
        let mut reader = Reader { data, pos: 0 };
        let mut values = Vec::with_capacity(schema.fields.len());

        for def in &schema.fields {
            let value = match def.kind {
                FieldKind::Uint64 => {
                    let bytes = reader.take(&def.name, 8)?;
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(bytes);
                    FieldValue::Uint64(u64::from_be_bytes(buf))
                }
                FieldKind::Bool => match reader.take(&def.name, 1)?[0] {
                    0 => FieldValue::Bool(false),
                    1 => FieldValue::Bool(true),
                    other => {
                        return Err(CodecError::InvalidValue {
                            field: def.name.clone(),
                            reason: format!("bool byte must be 0 or 1, got {}", other),
                        })
                    }
                },
                FieldKind::Address => {
                    let bytes = reader.take(&def.name, Address::LEN)?;
                    let mut buf = [0u8; 20];
                    buf.copy_from_slice(bytes);
                    FieldValue::Address(Address(buf))
                }
                FieldKind::Bytes32 => {
                    let bytes = reader.take(&def.name, 32)?;
                    let mut buf = [0u8; 32];
                    buf.copy_from_slice(bytes);
                    FieldValue::Bytes32(buf)
                }
                FieldKind::String => {
                    let len_bytes = reader.take(&def.name, 4)?;
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(len_bytes);
                    let len = u32::from_be_bytes(buf) as usize;
                    let bytes = reader.take(&def.name, len)?;
                    let s = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 {
                        field: def.name.clone(),
                    })?;
                    FieldValue::String(s.to_string())
                }
            };
            values.push(value);
        }

        let remaining = data.len() - reader.pos;
        if remaining != 0 {
            return Err(CodecError::TrailingBytes {
                schema: schema.name.clone(),
                count: remaining,
            });
        }
        Ok(values)
    }

    /// Decode a raw ledger record, keeping its provenance.
    pub fn decode(schema: &Schema, raw: &RawRecord) -> Result<SchemaRecord, CodecError> {
        Ok(SchemaRecord {
            schema: schema.name.clone(),
            publisher: raw.publisher,
            ledger_ref: raw.ledger_ref.clone(),
            values: Self::decode_values(schema, &raw.data)?,
        })
    }

    /// Decode and normalize in one step.
    pub fn decode_typed(schema: &Schema, raw: &RawRecord) -> Result<TypedRecord, CodecError> {
        let record = Self::decode(schema, raw)?;
        TypedRecord::from_record(schema, &record)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, field: &str, n: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.data.len() - self.pos;
        if n > remaining {
            return Err(CodecError::Truncated {
                field: field.to_string(),
                needed: n,
                remaining,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LiveAction, LIVE_ACTION_SCHEMA};
    use proptest::prelude::*;

    fn live_values(action: &str, ts: u64) -> Vec<FieldValue> {
        vec![
            FieldValue::String("post-42".to_string()),
            FieldValue::String(action.to_string()),
            FieldValue::Address(Address([9u8; 20])),
            FieldValue::Uint64(ts),
        ]
    }

    #[test]
    fn test_encode_layout() {
        let schema = Schema::new("s")
            .field("n", FieldKind::Uint64)
            .field("flag", FieldKind::Bool)
            .field("name", FieldKind::String);
        let bytes = RecordCodec::encode(
            &schema,
            &[
                FieldValue::Uint64(1),
                FieldValue::Bool(true),
                FieldValue::String("hi".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 1, 1, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_decode_typed_live_action() {
        let schema = Schema::live_action();
        let data = RecordCodec::encode(&schema, &live_values("view", 20)).unwrap();
        let raw = RawRecord {
            publisher: Address([1u8; 20]),
            ledger_ref: Some("0xfeed".to_string()),
            data,
        };
        let typed = RecordCodec::decode_typed(&schema, &raw).unwrap();
        let live = typed.as_live_action().unwrap();
        assert_eq!(live.action, LiveAction::View);
        assert_eq!(live.timestamp, 20);
        assert_eq!(live.ledger_ref.as_deref(), Some("0xfeed"));
        assert_eq!(schema.name, LIVE_ACTION_SCHEMA);
    }

    #[test]
    fn test_encode_rejects_wrong_arity() {
        let schema = Schema::live_action();
        let err = RecordCodec::encode(&schema, &[FieldValue::Bool(true)]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::FieldCountMismatch {
                expected: 4,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_encode_rejects_wrong_type() {
        let schema = Schema::new("s").field("n", FieldKind::Uint64);
        let err = RecordCodec::encode(&schema, &[FieldValue::Bool(true)]).unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let schema = Schema::live_action();
        let mut data = RecordCodec::encode(&schema, &live_values("view", 1)).unwrap();
        data.truncate(data.len() - 3);
        let err = RecordCodec::decode_values(&schema, &data).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let schema = Schema::live_action();
        let mut data = RecordCodec::encode(&schema, &live_values("view", 1)).unwrap();
        data.push(0);
        let err = RecordCodec::decode_values(&schema, &data).unwrap_err();
        assert!(matches!(err, CodecError::TrailingBytes { count: 1, .. }));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let schema = Schema::new("s").field("name", FieldKind::String);
        let data = vec![0, 0, 0, 2, 0xff, 0xfe];
        let err = RecordCodec::decode_values(&schema, &data).unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8 { .. }));
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = RecordCodec::decode_values(&Schema::post(), &data);
        }
    }
}
