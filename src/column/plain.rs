use super::{CountedBuffer, CountedStream, Datum, ValueDecoder, ValueEncoder};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

#[derive(Default)]
pub struct UInt32PlainEncoder {
    out: CountedBuffer,
}

impl ValueEncoder for UInt32PlainEncoder {
    fn encode(&mut self, value: &Datum) -> Result<()> {
        let v = match value {
            Datum::UInt(v) => u32::try_from(*v).map_err(|_| {
                Error::Runtime(format!("value {} overflows UINT32_PLAIN", v))
            })?,
            other => {
                return Err(Error::Runtime(format!(
                    "UINT32_PLAIN column can't store {:?}",
                    other
                )))
            }
        };
        self.out.buf.write_u32::<LittleEndian>(v)?;
        self.out.count += 1;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.out.count
    }

    fn finish(&self) -> Vec<u8> {
        self.out.finish()
    }
}

#[derive(Default)]
pub struct UInt64PlainEncoder {
    out: CountedBuffer,
}

impl ValueEncoder for UInt64PlainEncoder {
    fn encode(&mut self, value: &Datum) -> Result<()> {
        match value {
            Datum::UInt(v) => self.out.buf.write_u64::<LittleEndian>(*v)?,
            other => {
                return Err(Error::Runtime(format!(
                    "UINT64_PLAIN column can't store {:?}",
                    other
                )))
            }
        }
        self.out.count += 1;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.out.count
    }

    fn finish(&self) -> Vec<u8> {
        self.out.finish()
    }
}

#[derive(Default)]
pub struct DoubleEncoder {
    out: CountedBuffer,
}

impl ValueEncoder for DoubleEncoder {
    fn encode(&mut self, value: &Datum) -> Result<()> {
        match value {
            Datum::Float(v) => self.out.buf.write_f64::<LittleEndian>(*v)?,
            other => {
                return Err(Error::Runtime(format!(
                    "FLOAT_IEEE754 column can't store {:?}",
                    other
                )))
            }
        }
        self.out.count += 1;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.out.count
    }

    fn finish(&self) -> Vec<u8> {
        self.out.finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Width {
    U32,
    U64,
    F64,
}

impl Width {
    fn bytes(self) -> u64 {
        match self {
            Width::U32 => 4,
            Width::U64 | Width::F64 => 8,
        }
    }
}

/// Decoder for the fixed-width little-endian encodings.
pub struct FixedWidthDecoder {
    stream: CountedStream,
    width: Width,
}

impl FixedWidthDecoder {
    pub fn uint32(data: Vec<u8>) -> Result<Self> {
        Self::new(data, Width::U32)
    }

    pub fn uint64(data: Vec<u8>) -> Result<Self> {
        Self::new(data, Width::U64)
    }

    pub fn double(data: Vec<u8>) -> Result<Self> {
        Self::new(data, Width::F64)
    }

    fn new(data: Vec<u8>, width: Width) -> Result<Self> {
        let stream = CountedStream::parse(data)?;
        let expected = u128::from(stream.count) * u128::from(width.bytes());
        if expected != stream.payload_len() as u128 {
            return Err(Error::Format(format!(
                "fixed-width stream holds {} bytes, expected {}",
                stream.payload_len(),
                expected
            )));
        }
        Ok(Self { stream, width })
    }
}

impl ValueDecoder for FixedWidthDecoder {
    fn next_value(&mut self) -> Result<Option<Datum>> {
        if self.stream.exhausted() {
            return Ok(None);
        }
        let value = match self.width {
            Width::U32 => Datum::UInt(u64::from(
                self.stream.read_with(|c| c.read_u32::<LittleEndian>())?,
            )),
            Width::U64 => Datum::UInt(self.stream.read_with(|c| c.read_u64::<LittleEndian>())?),
            Width::F64 => Datum::Float(self.stream.read_with(|c| c.read_f64::<LittleEndian>())?),
        };
        Ok(Some(value))
    }

    fn len(&self) -> u64 {
        self.stream.count
    }

    fn rewind(&mut self) {
        self.stream.rewind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_layout() -> Result<()> {
        let mut encoder = UInt32PlainEncoder::default();
        encoder.encode(&Datum::UInt(0x0102_0304))?;
        assert_eq!(encoder.finish(), vec![1, 0x04, 0x03, 0x02, 0x01]);
        Ok(())
    }

    #[test]
    fn test_length_mismatch_is_format_error() {
        // count says two u64s, payload holds one
        let mut data = vec![2u8];
        data.extend_from_slice(&7u64.to_le_bytes());
        assert!(matches!(FixedWidthDecoder::uint64(data), Err(Error::Format(_))));
    }
}
