use super::{Datum, ValueDecoder, ValueEncoder};
use crate::encoding::bitpack::{BitPackedDecoder, BitPackedEncoder};
use crate::error::{Error, Result};

pub struct BooleanBitpackedEncoder {
    inner: BitPackedEncoder,
}

impl BooleanBitpackedEncoder {
    pub fn new() -> Self {
        Self {
            inner: BitPackedEncoder::with_width(1),
        }
    }
}

impl ValueEncoder for BooleanBitpackedEncoder {
    fn encode(&mut self, value: &Datum) -> Result<()> {
        match value {
            Datum::UInt(v) => self.inner.push(*v),
            other => Err(Error::Runtime(format!(
                "BOOLEAN_BITPACKED column can't store {:?}",
                other
            ))),
        }
    }

    fn len(&self) -> u64 {
        self.inner.len() as u64
    }

    fn finish(&self) -> Vec<u8> {
        self.inner.finish()
    }
}

/// Width is chosen from the largest value when the stream is finished.
pub struct BitPackedIntEncoder {
    inner: BitPackedEncoder,
}

impl BitPackedIntEncoder {
    pub fn new() -> Self {
        Self {
            inner: BitPackedEncoder::new(),
        }
    }
}

impl ValueEncoder for BitPackedIntEncoder {
    fn encode(&mut self, value: &Datum) -> Result<()> {
        match value {
            Datum::UInt(v) if *v <= u64::from(u32::MAX) => self.inner.push(*v),
            other => Err(Error::Runtime(format!(
                "UINT32_BITPACKED column can't store {:?}",
                other
            ))),
        }
    }

    fn len(&self) -> u64 {
        self.inner.len() as u64
    }

    fn finish(&self) -> Vec<u8> {
        self.inner.finish()
    }
}

pub struct BitPackedValueDecoder {
    inner: BitPackedDecoder,
}

impl BitPackedValueDecoder {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        Ok(Self {
            inner: BitPackedDecoder::new(data)?,
        })
    }
}

impl ValueDecoder for BitPackedValueDecoder {
    fn next_value(&mut self) -> Result<Option<Datum>> {
        Ok(self.inner.next_value().map(Datum::UInt))
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn rewind(&mut self) {
        self.inner.rewind();
    }
}
