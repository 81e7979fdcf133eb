//! Schema-driven binary event codec
//!
//! Events travel as fixed-width records whose layout comes entirely from the
//! [`SchemaStore`]. Neither direction lets an error escape: `encode` yields an empty
//! buffer ("do not transmit") and `decode` yields [`Event::DecodeError`].

use crate::error::CodecError;
use crate::event::Event;
use crate::schema::{ByteOrder, EventSchema, FieldSpec, SchemaStore, WireType};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A single schema field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Symbol(String),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Symbol(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Symbol(v)
    }
}

/// Schema-level event: kind name plus named field values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl EventRecord {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Encoder/decoder bound to one immutable schema store
#[derive(Debug, Clone)]
pub struct EventCodec {
    schemas: SchemaStore,
}

impl EventCodec {
    pub fn new(schemas: SchemaStore) -> Self {
        Self { schemas }
    }

    pub fn schemas(&self) -> &SchemaStore {
        &self.schemas
    }

    /// Encode a record; an empty result means the record must not be transmitted
    pub fn encode(&self, record: &EventRecord) -> Vec<u8> {
        self.try_encode(record).unwrap_or_else(|e| {
            warn!(event_type = %record.event_type, error = %e, "Failed to encode event");
            Vec::new()
        })
    }

    /// Encode a typed event; decode-error events encode to nothing
    pub fn encode_event(&self, event: &Event) -> Vec<u8> {
        match event.to_record() {
            Some(record) => self.encode(&record),
            None => {
                warn!(event_type = event.event_type(), "Event kind cannot be encoded");
                Vec::new()
            }
        }
    }

    pub fn try_encode(&self, record: &EventRecord) -> Result<Vec<u8>, CodecError> {
        let schema = self
            .schemas
            .get(&record.event_type)
            .ok_or_else(|| CodecError::UnknownEventType(record.event_type.clone()))?;

        let mut out = Vec::with_capacity(schema.size());
        out.put_u8(schema.code);
        for field in &schema.fields {
            put_field(&mut out, schema.byte_order, field, record.get(&field.name))?;
        }

        debug_assert_eq!(out.len(), schema.size());
        Ok(out)
    }

    /// Decode a payload into a typed event, folding every failure into
    /// [`Event::DecodeError`]
    pub fn decode(&self, bytes: &[u8]) -> Event {
        match self.try_decode(bytes).and_then(Event::from_record) {
            Ok(event) => event,
            Err(e) => {
                warn!(raw = %hex::encode(bytes), error = %e, "Failed to decode payload");
                Event::decode_error(bytes, &e)
            }
        }
    }

    pub fn try_decode(&self, bytes: &[u8]) -> Result<EventRecord, CodecError> {
        let code = *bytes.first().ok_or(CodecError::EmptyPayload)?;
        let schema = self
            .schemas
            .by_code(code)
            .ok_or(CodecError::UnknownEventCode(code))?;

        if bytes.len() != schema.size() {
            return Err(CodecError::LengthMismatch {
                event_type: schema.name.clone(),
                expected: schema.size(),
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[1..];
        let mut record = EventRecord::new(schema.name.clone());
        for field in &schema.fields {
            let value = get_field(&mut buf, schema, field);
            record.fields.insert(field.name.clone(), value);
        }

        Ok(record)
    }
}

fn put_field(
    out: &mut Vec<u8>,
    order: ByteOrder,
    field: &FieldSpec,
    value: Option<&FieldValue>,
) -> Result<(), CodecError> {
    let wire = field.wire;

    if let Some(map) = &field.map {
        let code = match value {
            None => 0,
            Some(FieldValue::Symbol(name)) => map.encode(name) as i64,
            Some(FieldValue::Int(code)) => *code,
            Some(FieldValue::Float(_)) => {
                return Err(CodecError::TypeMismatch {
                    field: field.name.clone(),
                    expected: "a symbol name or integer code",
                })
            }
        };
        return put_int(out, order, field, code);
    }

    match (wire, value) {
        (_, None) => Err(CodecError::MissingField(field.name.clone())),
        (_, Some(FieldValue::Symbol(_))) => Err(CodecError::TypeMismatch {
            field: field.name.clone(),
            expected: "a numeric value",
        }),
        (WireType::F32, Some(FieldValue::Int(v))) => {
            put_f32(out, order, *v as f32);
            Ok(())
        }
        (WireType::F32, Some(FieldValue::Float(v))) => {
            if !v.is_finite() || v.abs() > f32::MAX as f64 {
                return Err(CodecError::OutOfRange {
                    field: field.name.clone(),
                    value: v.to_string(),
                    wire: wire.name(),
                });
            }
            put_f32(out, order, *v as f32);
            Ok(())
        }
        (_, Some(FieldValue::Float(_))) => Err(CodecError::TypeMismatch {
            field: field.name.clone(),
            expected: "an integer",
        }),
        (_, Some(FieldValue::Int(v))) => put_int(out, order, field, *v),
    }
}

fn put_int(out: &mut Vec<u8>, order: ByteOrder, field: &FieldSpec, v: i64) -> Result<(), CodecError> {
    let wire = field.wire;
    match wire.int_range() {
        Some((min, max)) if (min..=max).contains(&v) => {}
        _ => {
            return Err(CodecError::OutOfRange {
                field: field.name.clone(),
                value: v.to_string(),
                wire: wire.name(),
            })
        }
    }

    // Range checked above, the casts cannot truncate
    match (wire, order) {
        (WireType::U8, _) => out.put_u8(v as u8),
        (WireType::I8, _) => out.put_i8(v as i8),
        (WireType::U16, ByteOrder::Big) => out.put_u16(v as u16),
        (WireType::U16, ByteOrder::Little) => out.put_u16_le(v as u16),
        (WireType::I16, ByteOrder::Big) => out.put_i16(v as i16),
        (WireType::I16, ByteOrder::Little) => out.put_i16_le(v as i16),
        (WireType::U32, ByteOrder::Big) => out.put_u32(v as u32),
        (WireType::U32, ByteOrder::Little) => out.put_u32_le(v as u32),
        (WireType::I32, ByteOrder::Big) => out.put_i32(v as i32),
        (WireType::I32, ByteOrder::Little) => out.put_i32_le(v as i32),
        (WireType::F32, _) => unreachable!("f32 has no integer range"),
    }
    Ok(())
}

fn put_f32(out: &mut Vec<u8>, order: ByteOrder, v: f32) {
    match order {
        ByteOrder::Big => out.put_f32(v),
        ByteOrder::Little => out.put_f32_le(v),
    }
}

/// Read one field; the caller has already checked the total length
fn get_field(buf: &mut &[u8], schema: &EventSchema, field: &FieldSpec) -> FieldValue {
    let big = schema.byte_order == ByteOrder::Big;
    let int = match field.wire {
        WireType::U8 => buf.get_u8() as i64,
        WireType::I8 => buf.get_i8() as i64,
        WireType::U16 if big => buf.get_u16() as i64,
        WireType::U16 => buf.get_u16_le() as i64,
        WireType::I16 if big => buf.get_i16() as i64,
        WireType::I16 => buf.get_i16_le() as i64,
        WireType::U32 if big => buf.get_u32() as i64,
        WireType::U32 => buf.get_u32_le() as i64,
        WireType::I32 if big => buf.get_i32() as i64,
        WireType::I32 => buf.get_i32_le() as i64,
        WireType::F32 => {
            let v = if big { buf.get_f32() } else { buf.get_f32_le() };
            return FieldValue::Float(v as f64);
        }
    };

    match &field.map {
        Some(map) => FieldValue::Symbol(map.decode(int as u32).to_string()),
        None => FieldValue::Int(int),
    }
}
