use super::{CountedBuffer, CountedStream, Datum, ValueDecoder, ValueEncoder};
use crate::encoding::{VarIntReadExt, VarIntWriteExt};
use crate::error::{Error, Result};

/// Length-prefixed byte strings.
#[derive(Default)]
pub struct StringPlainEncoder {
    out: CountedBuffer,
}

impl ValueEncoder for StringPlainEncoder {
    fn encode(&mut self, value: &Datum) -> Result<()> {
        match value {
            Datum::Str(s) => self.out.buf.write_lenenc(s)?,
            other => {
                return Err(Error::Runtime(format!(
                    "STRING_PLAIN column can't store {:?}",
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

pub struct StringPlainDecoder {
    stream: CountedStream,
}

impl StringPlainDecoder {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        Ok(Self {
            stream: CountedStream::parse(data)?,
        })
    }
}

impl ValueDecoder for StringPlainDecoder {
    fn next_value(&mut self) -> Result<Option<Datum>> {
        if self.stream.exhausted() {
            return Ok(None);
        }
        Ok(Some(Datum::Str(self.stream.read_with(|c| c.read_lenenc())?)))
    }

    fn len(&self) -> u64 {
        self.stream.count
    }

    fn rewind(&mut self) {
        self.stream.rewind();
    }
}
