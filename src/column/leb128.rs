use super::{CountedBuffer, CountedStream, Datum, ValueDecoder, ValueEncoder};
use crate::encoding::{VarIntReadExt, VarIntWriteExt};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct UInt64Leb128Encoder {
    out: CountedBuffer,
}

impl ValueEncoder for UInt64Leb128Encoder {
    fn encode(&mut self, value: &Datum) -> Result<()> {
        match value {
            Datum::UInt(v) => self.out.buf.write_varint(*v)?,
            other => {
                return Err(Error::Runtime(format!(
                    "UINT64_LEB128 column can't store {:?}",
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

pub struct UInt64Leb128Decoder {
    stream: CountedStream,
}

impl UInt64Leb128Decoder {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        Ok(Self {
            stream: CountedStream::parse(data)?,
        })
    }
}

impl ValueDecoder for UInt64Leb128Decoder {
    fn next_value(&mut self) -> Result<Option<Datum>> {
        if self.stream.exhausted() {
            return Ok(None);
        }
        Ok(Some(Datum::UInt(self.stream.read_with(|c| c.read_varint())?)))
    }

    fn len(&self) -> u64 {
        self.stream.count
    }

    fn rewind(&mut self) {
        self.stream.rewind();
    }
}
