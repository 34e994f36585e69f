//! Protobuf wire encoding of record trees.
//!
//! ```text
//! field := tag:varint payload
//! tag   := (field_id << 3) | wire_type
//! ```
//!
//! | field type                        | wire type | payload          |
//! |-----------------------------------|-----------|------------------|
//! | UINT32, UINT64, DATETIME, BOOLEAN | 0         | varint           |
//! | DOUBLE                            | 1         | f64, 8 bytes LE  |
//! | STRING, OBJECT                    | 2         | lenenc bytes     |
//!
//! Unknown field ids are skipped when decoding.

use super::{FieldType, MessageObject, MessageSchema, MessageValue};
use crate::encoding::{EncodingError, VarIntReadExt, VarIntWriteExt};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LENGTH_DELIMITED: u64 = 2;
const WIRE_FIXED32: u64 = 5;

pub fn encode(obj: &MessageObject, schema: &MessageSchema) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_object(obj, schema, &mut buf)?;
    Ok(buf)
}

fn encode_object(obj: &MessageObject, schema: &MessageSchema, buf: &mut Vec<u8>) -> Result<()> {
    for child in obj.as_object()? {
        let field = schema.field(child.id).ok_or_else(|| {
            Error::Runtime(format!(
                "field id {} is not part of schema {}",
                child.id,
                schema.name()
            ))
        })?;

        if child.field_type() != field.field_type {
            return Err(Error::Runtime(format!(
                "field '{}' expects {}, got {}",
                field.name,
                field.field_type,
                child.field_type()
            )));
        }

        match &child.value {
            MessageValue::Object(_) => {
                let mut nested = Vec::new();
                encode_object(child, schema.field_schema(child.id)?, &mut nested)?;
                buf.write_varint(tag(child.id, WIRE_LENGTH_DELIMITED))?;
                buf.write_lenenc(&nested)?;
            }
            MessageValue::String(s) => {
                buf.write_varint(tag(child.id, WIRE_LENGTH_DELIMITED))?;
                buf.write_lenenc(s.as_bytes())?;
            }
            MessageValue::Boolean(b) => {
                buf.write_varint(tag(child.id, WIRE_VARINT))?;
                buf.write_varint(u64::from(*b))?;
            }
            MessageValue::UInt32(v) => {
                buf.write_varint(tag(child.id, WIRE_VARINT))?;
                buf.write_varint(u64::from(*v))?;
            }
            MessageValue::UInt64(v) | MessageValue::DateTime(v) => {
                buf.write_varint(tag(child.id, WIRE_VARINT))?;
                buf.write_varint(*v)?;
            }
            MessageValue::Double(v) => {
                buf.write_varint(tag(child.id, WIRE_FIXED64))?;
                buf.write_f64::<LittleEndian>(*v)?;
            }
        }
    }
    Ok(())
}

pub fn decode(data: &[u8], schema: &MessageSchema) -> Result<MessageObject> {
    let mut obj = MessageObject::new();
    decode_into(data, schema, &mut obj)?;
    Ok(obj)
}

fn decode_into(data: &[u8], schema: &MessageSchema, obj: &mut MessageObject) -> Result<()> {
    let mut cursor = Cursor::new(data);

    while (cursor.position() as usize) < data.len() {
        let tag = cursor
            .read_varint()
            .map_err(|e| Error::Decode("field tag", e))?;
        let id = u32::try_from(tag >> 3)
            .map_err(|_| EncodingError::InvalidFormat(format!("field id in tag {}", tag)))?;
        let wire_type = tag & 0x7;

        let field = match schema.field(id) {
            Some(field) => field,
            None => {
                skip_field(&mut cursor, wire_type)?;
                continue;
            }
        };

        let expected = match field.field_type {
            FieldType::Double => WIRE_FIXED64,
            FieldType::String | FieldType::Object => WIRE_LENGTH_DELIMITED,
            _ => WIRE_VARINT,
        };
        if wire_type != expected {
            return Err(Error::Format(format!(
                "field '{}' has wire type {}, expected {}",
                field.name, wire_type, expected
            )));
        }

        let value = match field.field_type {
            FieldType::Object => {
                let nested = cursor
                    .read_lenenc()
                    .map_err(|e| Error::Decode("nested object", e))?;
                let mut child = MessageObject::object(id);
                decode_into(&nested, schema.field_schema(id)?, &mut child)?;
                obj.children_mut()?.push(child);
                continue;
            }
            FieldType::String => {
                let bytes = cursor
                    .read_lenenc()
                    .map_err(|e| Error::Decode("string field", e))?;
                let s = String::from_utf8(bytes).map_err(|_| EncodingError::InvalidUtf8)?;
                MessageValue::String(s)
            }
            FieldType::Double => MessageValue::Double(
                cursor
                    .read_f64::<LittleEndian>()
                    .map_err(|e| Error::Decode("double field", e))?,
            ),
            other => {
                let v = cursor
                    .read_varint()
                    .map_err(|e| Error::Decode("varint field", e))?;
                match other {
                    FieldType::Boolean => MessageValue::Boolean(v != 0),
                    FieldType::UInt32 => MessageValue::UInt32(u32::try_from(v).map_err(|_| {
                        Error::Format(format!("value {} overflows UINT32 '{}'", v, field.name))
                    })?),
                    FieldType::DateTime => MessageValue::DateTime(v),
                    _ => MessageValue::UInt64(v),
                }
            }
        };

        obj.children_mut()?.push(MessageObject { id, value });
    }

    Ok(())
}

fn skip_field(cursor: &mut Cursor<&[u8]>, wire_type: u64) -> Result<()> {
    let skip = match wire_type {
        WIRE_VARINT => {
            cursor
                .read_varint()
                .map_err(|e| Error::Decode("unknown varint", e))?;
            return Ok(());
        }
        WIRE_FIXED64 => 8,
        WIRE_FIXED32 => 4,
        WIRE_LENGTH_DELIMITED => cursor
            .read_varint()
            .map_err(|e| Error::Decode("unknown field length", e))?,
        other => return Err(Error::Format(format!("unsupported wire type {}", other))),
    };

    let mut sink = std::io::sink();
    let copied = std::io::copy(&mut cursor.by_ref().take(skip), &mut sink)?;
    if copied != skip {
        return Err(EncodingError::TruncatedData.into());
    }
    Ok(())
}

fn tag(id: u32, wire_type: u64) -> u64 {
    (u64::from(id) << 3) | wire_type
}
