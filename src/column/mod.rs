//! Column codecs.
//!
//! A column is three streams: repetition levels, definition levels and the
//! encoded values of the entries that are defined (`dlevel == dlevel_max`).
//! Level streams are bit-packed; the data stream uses the column's storage
//! encoding. Each encoding is one [`ValueEncoder`]/[`ValueDecoder`] pair
//! chosen once when the column is opened.
//!
//! Encoders see "raw" values only: `UInt` for integer and boolean encodings,
//! `Float` for IEEE754 and `Str` for strings. The logical type mapping
//! (booleans as 0/1, zigzag for signed ints) happens at the column level.

mod bitpacked;
mod leb128;
mod plain;
mod reader;
mod string;
mod writer;

pub use reader::ColumnReader;
pub(crate) use reader::ColumnSource;
pub use writer::ColumnWriter;

use crate::encoding::{zigzag_decode, zigzag_encode, EncodingError, VarIntReadExt, VarIntWriteExt};
use crate::error::{Error, Result};
use crate::format::{ColumnEncoding, ColumnType};
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    UInt(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Vec<u8>),
}

impl Datum {
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Datum::UInt(v) => Ok(*v),
            Datum::Bool(b) => Ok(u64::from(*b)),
            Datum::Int(v) if *v >= 0 => Ok(*v as u64),
            other => Err(conversion_error(other, "unsigned integer")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Datum::Int(v) => Ok(*v),
            Datum::UInt(v) => i64::try_from(*v).map_err(|_| conversion_error(self, "signed integer")),
            other => Err(conversion_error(other, "signed integer")),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Datum::Float(v) => Ok(*v),
            Datum::UInt(v) => Ok(*v as f64),
            Datum::Int(v) => Ok(*v as f64),
            other => Err(conversion_error(other, "float")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Datum::Bool(b) => Ok(*b),
            Datum::UInt(v) => Ok(*v != 0),
            other => Err(conversion_error(other, "boolean")),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Datum::Str(s) => Ok(s),
            other => Err(conversion_error(other, "string")),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            Datum::Str(s) => String::from_utf8(s).map_err(|_| EncodingError::InvalidUtf8.into()),
            other => Err(conversion_error(&other, "string")),
        }
    }
}

fn conversion_error(value: &Datum, target: &str) -> Error {
    Error::Runtime(format!("can't convert {:?} to {}", value, target))
}

/// One (rlevel, dlevel, value) triple of a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnEntry {
    pub rlevel: u64,
    pub dlevel: u64,
    pub value: Option<Datum>,
}

pub trait ValueEncoder: Send {
    fn encode(&mut self, value: &Datum) -> Result<()>;

    fn len(&self) -> u64;

    /// Serialized stream, including the leading value count.
    fn finish(&self) -> Vec<u8>;
}

pub trait ValueDecoder: Send {
    fn next_value(&mut self) -> Result<Option<Datum>>;

    fn len(&self) -> u64;

    fn rewind(&mut self);
}

pub fn open_encoder(encoding: ColumnEncoding) -> Box<dyn ValueEncoder> {
    match encoding {
        ColumnEncoding::BooleanBitpacked => Box::new(bitpacked::BooleanBitpackedEncoder::new()),
        ColumnEncoding::UInt32Bitpacked => Box::new(bitpacked::BitPackedIntEncoder::new()),
        ColumnEncoding::UInt32Plain => Box::new(plain::UInt32PlainEncoder::default()),
        ColumnEncoding::UInt64Plain => Box::new(plain::UInt64PlainEncoder::default()),
        ColumnEncoding::UInt64Leb128 => Box::new(leb128::UInt64Leb128Encoder::default()),
        ColumnEncoding::FloatIeee754 => Box::new(plain::DoubleEncoder::default()),
        ColumnEncoding::StringPlain => Box::new(string::StringPlainEncoder::default()),
    }
}

/// An empty `data` buffer stands for a stream that was never written.
pub fn open_decoder(encoding: ColumnEncoding, data: Vec<u8>) -> Result<Box<dyn ValueDecoder>> {
    if data.is_empty() {
        return Ok(Box::new(EmptyDecoder));
    }

    Ok(match encoding {
        ColumnEncoding::BooleanBitpacked | ColumnEncoding::UInt32Bitpacked => {
            Box::new(bitpacked::BitPackedValueDecoder::new(data)?)
        }
        ColumnEncoding::UInt32Plain => Box::new(plain::FixedWidthDecoder::uint32(data)?),
        ColumnEncoding::UInt64Plain => Box::new(plain::FixedWidthDecoder::uint64(data)?),
        ColumnEncoding::FloatIeee754 => Box::new(plain::FixedWidthDecoder::double(data)?),
        ColumnEncoding::UInt64Leb128 => Box::new(leb128::UInt64Leb128Decoder::new(data)?),
        ColumnEncoding::StringPlain => Box::new(string::StringPlainDecoder::new(data)?),
    })
}

struct EmptyDecoder;

impl ValueDecoder for EmptyDecoder {
    fn next_value(&mut self) -> Result<Option<Datum>> {
        Ok(None)
    }

    fn len(&self) -> u64 {
        0
    }

    fn rewind(&mut self) {}
}

/// Byte buffer with a running value count, serialized as `count:varint payload`.
#[derive(Debug, Default)]
struct CountedBuffer {
    buf: Vec<u8>,
    count: u64,
}

impl CountedBuffer {
    fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buf.len() + 10);
        out.write_varint(self.count)
            .expect("writing to a Vec cannot fail");
        out.extend_from_slice(&self.buf);
        out
    }
}

/// Read side of [`CountedBuffer`].
#[derive(Debug)]
struct CountedStream {
    data: Vec<u8>,
    start: usize,
    pos: usize,
    count: u64,
    index: u64,
}

impl CountedStream {
    fn parse(data: Vec<u8>) -> Result<Self> {
        let mut cursor = Cursor::new(&data);
        let count = cursor
            .read_varint()
            .map_err(|e| Error::Decode("value count", e))?;
        let start = cursor.position() as usize;
        Ok(Self {
            data,
            start,
            pos: start,
            count,
            index: 0,
        })
    }

    fn payload_len(&self) -> usize {
        self.data.len() - self.start
    }

    fn exhausted(&self) -> bool {
        self.index >= self.count
    }

    /// Runs `read` over the unread bytes and advances past what it consumed.
    fn read_with<T>(&mut self, read: impl FnOnce(&mut Cursor<&[u8]>) -> std::io::Result<T>) -> Result<T> {
        let mut cursor = Cursor::new(&self.data[self.pos..]);
        let value = read(&mut cursor).map_err(|e| Error::Decode("column value", e))?;
        self.pos += cursor.position() as usize;
        self.index += 1;
        Ok(value)
    }

    fn rewind(&mut self) {
        self.pos = self.start;
        self.index = 0;
    }
}

/// Maps a logical value onto the raw kind its encoder understands.
pub(crate) fn to_raw(value: Datum, logical_type: ColumnType) -> Result<Datum> {
    Ok(match logical_type {
        ColumnType::Boolean => Datum::UInt(u64::from(value.as_bool()?)),
        ColumnType::SignedInt => Datum::UInt(zigzag_encode(value.as_i64()?)),
        ColumnType::UnsignedInt | ColumnType::DateTime => Datum::UInt(value.as_u64()?),
        ColumnType::Float => Datum::Float(value.as_f64()?),
        ColumnType::String => match value {
            Datum::Str(s) => Datum::Str(s),
            other => return Err(conversion_error(&other, "string")),
        },
        ColumnType::Subrecord => {
            return Err(Error::Runtime(
                "subrecord columns carry no values".to_string(),
            ))
        }
    })
}

/// Inverse of [`to_raw`].
pub(crate) fn from_raw(raw: Datum, logical_type: ColumnType) -> Result<Datum> {
    Ok(match logical_type {
        ColumnType::Boolean => Datum::Bool(raw.as_u64()? != 0),
        ColumnType::SignedInt => Datum::Int(zigzag_decode(raw.as_u64()?)),
        ColumnType::UnsignedInt | ColumnType::DateTime => Datum::UInt(raw.as_u64()?),
        ColumnType::Float => Datum::Float(raw.as_f64()?),
        ColumnType::String => raw,
        ColumnType::Subrecord => {
            return Err(Error::Runtime(
                "subrecord columns carry no values".to_string(),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ENCODINGS: [ColumnEncoding; 7] = [
        ColumnEncoding::BooleanBitpacked,
        ColumnEncoding::UInt32Bitpacked,
        ColumnEncoding::UInt32Plain,
        ColumnEncoding::UInt64Plain,
        ColumnEncoding::UInt64Leb128,
        ColumnEncoding::FloatIeee754,
        ColumnEncoding::StringPlain,
    ];

    fn sample(encoding: ColumnEncoding) -> Vec<Datum> {
        match encoding {
            ColumnEncoding::BooleanBitpacked => vec![Datum::UInt(1), Datum::UInt(0), Datum::UInt(1)],
            ColumnEncoding::UInt32Bitpacked | ColumnEncoding::UInt32Plain => {
                vec![Datum::UInt(0), Datum::UInt(u64::from(u32::MAX)), Datum::UInt(17)]
            }
            ColumnEncoding::UInt64Plain | ColumnEncoding::UInt64Leb128 => {
                vec![Datum::UInt(u64::MAX), Datum::UInt(0), Datum::UInt(300)]
            }
            ColumnEncoding::FloatIeee754 => vec![Datum::Float(-1.5), Datum::Float(0.0), Datum::Float(1e300)],
            ColumnEncoding::StringPlain => vec![
                Datum::Str(b"".to_vec()),
                Datum::Str(b"hello".to_vec()),
                Datum::Str(vec![0xff; 300]),
            ],
        }
    }

    #[test]
    fn test_every_encoding_decodes_what_it_encoded() -> Result<()> {
        for encoding in ALL_ENCODINGS {
            let values = sample(encoding);
            let mut encoder = open_encoder(encoding);
            for v in &values {
                encoder.encode(v)?;
            }
            assert_eq!(encoder.len(), 3);

            let mut decoder = open_decoder(encoding, encoder.finish())?;
            assert_eq!(decoder.len(), 3, "{:?}", encoding);
            for v in &values {
                assert_eq!(decoder.next_value()?.as_ref(), Some(v), "{:?}", encoding);
            }
            assert_eq!(decoder.next_value()?, None);

            decoder.rewind();
            assert_eq!(decoder.next_value()?.as_ref(), Some(&values[0]));
        }
        Ok(())
    }

    #[test]
    fn test_encoders_reject_foreign_values() {
        assert!(open_encoder(ColumnEncoding::BooleanBitpacked).encode(&Datum::UInt(2)).is_err());
        assert!(open_encoder(ColumnEncoding::UInt32Plain)
            .encode(&Datum::UInt(u64::from(u32::MAX) + 1))
            .is_err());
        assert!(open_encoder(ColumnEncoding::StringPlain).encode(&Datum::UInt(1)).is_err());
        assert!(open_encoder(ColumnEncoding::FloatIeee754)
            .encode(&Datum::Str(b"x".to_vec()))
            .is_err());
    }

    #[test]
    fn test_empty_stream() -> Result<()> {
        for encoding in ALL_ENCODINGS {
            let mut decoder = open_decoder(encoding, Vec::new())?;
            assert_eq!(decoder.len(), 0);
            assert_eq!(decoder.next_value()?, None);

            let encoded = open_encoder(encoding).finish();
            let mut decoder = open_decoder(encoding, encoded)?;
            assert_eq!(decoder.next_value()?, None);
        }
        Ok(())
    }

    #[test]
    fn test_logical_mapping() -> Result<()> {
        assert_eq!(to_raw(Datum::Bool(true), ColumnType::Boolean)?, Datum::UInt(1));
        assert_eq!(to_raw(Datum::Int(-1), ColumnType::SignedInt)?, Datum::UInt(1));
        assert_eq!(from_raw(Datum::UInt(3), ColumnType::SignedInt)?, Datum::Int(-2));
        assert_eq!(from_raw(Datum::UInt(1), ColumnType::Boolean)?, Datum::Bool(true));
        assert_eq!(to_raw(Datum::UInt(2), ColumnType::Float)?, Datum::Float(2.0));
        assert!(to_raw(Datum::UInt(1), ColumnType::String).is_err());
        assert!(to_raw(Datum::Int(-5), ColumnType::UnsignedInt).is_err());
        assert!(to_raw(Datum::UInt(1), ColumnType::Subrecord).is_err());
        Ok(())
    }

    #[test]
    fn test_datum_accessors() {
        assert_eq!(Datum::Str(b"abc".to_vec()).into_string().unwrap(), "abc");
        assert!(Datum::Str(vec![0xff]).into_string().is_err());
        assert_eq!(Datum::Bool(true).as_u64().unwrap(), 1);
        assert!(Datum::UInt(u64::MAX).as_i64().is_err());
        assert!(Datum::Float(1.0).as_bytes().is_err());
    }
}
