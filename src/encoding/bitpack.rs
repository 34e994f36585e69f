//! LSB-first bit-packing for small unsigned integers.
//!
//! ```text
//! +--------------+----------+---------------------------------+
//! | count:varint | width:u8 | ceil(count * width / 8) bytes   |
//! +--------------+----------+---------------------------------+
//! ```
//!
//! Used for repetition/definition level streams, boolean columns (width 1)
//! and `UINT32_BITPACKED` columns (width derived from the largest value).

use super::{EncodingError, VarIntReadExt, VarIntWriteExt};
use crate::error::Result;
use std::io::Cursor;

/// Number of bits needed to represent `max`. Zero needs zero bits.
pub fn bits_required(max: u64) -> u8 {
    (64 - max.leading_zeros()) as u8
}

#[derive(Debug, Clone, Default)]
pub struct BitPackedEncoder {
    values: Vec<u64>,
    fixed_width: Option<u8>,
}

impl BitPackedEncoder {
    /// Width is derived from the largest value at `finish` time.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_width(width: u8) -> Self {
        Self {
            values: Vec::new(),
            fixed_width: Some(width),
        }
    }

    pub fn push(&mut self, value: u64) -> Result<()> {
        if let Some(width) = self.fixed_width {
            if width < 64 && value >> width != 0 {
                return Err(crate::Error::Runtime(format!(
                    "value {} does not fit into {} bits",
                    value, width
                )));
            }
        }
        self.values.push(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn width(&self) -> u8 {
        match self.fixed_width {
            Some(width) => width,
            None => bits_required(self.values.iter().copied().max().unwrap_or(0)),
        }
    }

    pub fn finish(&self) -> Vec<u8> {
        let width = self.width();
        let packed_len = (self.values.len() * width as usize).div_ceil(8);
        let mut out = Vec::with_capacity(packed_len + 11);
        out.write_varint(self.values.len() as u64)
            .expect("writing to a Vec cannot fail");
        out.push(width);

        let mut acc: u128 = 0;
        let mut nbits: u32 = 0;
        for &value in &self.values {
            acc |= u128::from(value) << nbits;
            nbits += u32::from(width);
            while nbits >= 8 {
                out.push((acc & 0xff) as u8);
                acc >>= 8;
                nbits -= 8;
            }
        }
        if nbits > 0 {
            out.push((acc & 0xff) as u8);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct BitPackedDecoder {
    data: Vec<u8>,
    start: usize,
    count: u64,
    width: u8,
    index: u64,
}

impl BitPackedDecoder {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let mut cursor = Cursor::new(&data);
        let count = cursor
            .read_varint()
            .map_err(|e| crate::Error::Decode("bit-packed count", e))?;
        let mut width = [0u8; 1];
        std::io::Read::read_exact(&mut cursor, &mut width)
            .map_err(|e| crate::Error::Decode("bit-packed width", e))?;
        let width = width[0];
        let start = cursor.position() as usize;

        if width > 64 {
            return Err(EncodingError::InvalidFormat(format!("bit width {} > 64", width)).into());
        }
        let packed_bits = u128::from(count) * u128::from(width);
        if packed_bits.div_ceil(8) > (data.len() - start) as u128 {
            return Err(EncodingError::TruncatedData.into());
        }

        Ok(Self {
            data,
            start,
            count,
            width,
            index: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn remaining(&self) -> u64 {
        self.count - self.index
    }

    pub fn peek(&self) -> Option<u64> {
        if self.index >= self.count {
            return None;
        }
        let width = u64::from(self.width);
        let first_bit = self.index * width;
        let mut value = 0u64;
        for i in 0..width {
            let bit = first_bit + i;
            let byte = self.data[self.start + (bit / 8) as usize];
            if (byte >> (bit % 8)) & 1 == 1 {
                value |= 1 << i;
            }
        }
        Some(value)
    }

    pub fn next_value(&mut self) -> Option<u64> {
        let value = self.peek()?;
        self.index += 1;
        Some(value)
    }

    pub fn rewind(&mut self) {
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 0);
        assert_eq!(bits_required(1), 1);
        assert_eq!(bits_required(2), 2);
        assert_eq!(bits_required(255), 8);
        assert_eq!(bits_required(256), 9);
        assert_eq!(bits_required(u64::MAX), 64);
    }

    #[test]
    fn test_pack_and_unpack() -> Result<()> {
        let mut encoder = BitPackedEncoder::new();
        let values = [3u64, 0, 7, 1, 5, 2, 6, 4, 7];
        for v in values {
            encoder.push(v)?;
        }
        assert_eq!(encoder.width(), 3);

        let bytes = encoder.finish();
        // count + width + ceil(9 * 3 / 8)
        assert_eq!(bytes.len(), 1 + 1 + 4);

        let mut decoder = BitPackedDecoder::new(bytes)?;
        assert_eq!(decoder.len(), 9);
        let decoded: Vec<u64> = std::iter::from_fn(|| decoder.next_value()).collect();
        assert_eq!(decoded, values);
        assert_eq!(decoder.next_value(), None);

        decoder.rewind();
        assert_eq!(decoder.peek(), Some(3));
        Ok(())
    }

    #[test]
    fn test_fixed_width_rejects_wide_values() {
        let mut encoder = BitPackedEncoder::with_width(1);
        assert!(encoder.push(1).is_ok());
        assert!(encoder.push(2).is_err());
    }

    #[test]
    fn test_zero_width_stream() -> Result<()> {
        let mut encoder = BitPackedEncoder::new();
        for _ in 0..5 {
            encoder.push(0)?;
        }
        let bytes = encoder.finish();
        assert_eq!(bytes, vec![5, 0]);

        let mut decoder = BitPackedDecoder::new(bytes)?;
        assert_eq!(decoder.remaining(), 5);
        assert_eq!(decoder.next_value(), Some(0));
        assert_eq!(decoder.remaining(), 4);
        Ok(())
    }

    #[test]
    fn test_full_width_values() -> Result<()> {
        let mut encoder = BitPackedEncoder::new();
        encoder.push(u64::MAX)?;
        encoder.push(1)?;
        let mut decoder = BitPackedDecoder::new(encoder.finish())?;
        assert_eq!(decoder.next_value(), Some(u64::MAX));
        assert_eq!(decoder.next_value(), Some(1));
        Ok(())
    }

    #[test]
    fn test_truncated_stream() {
        let mut encoder = BitPackedEncoder::with_width(8);
        for v in 0..4 {
            encoder.push(v).unwrap();
        }
        let mut bytes = encoder.finish();
        bytes.truncate(bytes.len() - 1);
        assert!(BitPackedDecoder::new(bytes).is_err());
    }
}
