//! Low-level byte encodings shared by the table format, the column codecs
//! and the commit log.
//!
//! - varint: unsigned LEB128, at most 10 bytes for a `u64`
//! - lenenc: varint length followed by the raw bytes
//! - zigzag: signed integers folded onto the unsigned varint space
//! - bit-packing: see [`bitpack`]

pub mod bincode;
pub mod bitpack;

use std::io::{self, Read, Write};

/// Error type for encoding operations
#[derive(Debug)]
pub enum EncodingError {
    InvalidFormat(String),
    TruncatedData,
    VarIntOverflow,
    InvalidUtf8,
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::InvalidFormat(msg) => write!(f, "Invalid encoding format: {}", msg),
            EncodingError::TruncatedData => write!(f, "Truncated data"),
            EncodingError::VarIntOverflow => write!(f, "Varint exceeds 64 bits"),
            EncodingError::InvalidUtf8 => write!(f, "Invalid UTF-8 sequence"),
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<EncodingError> for crate::Error {
    fn from(err: EncodingError) -> Self {
        crate::Error::Format(err.to_string())
    }
}

pub trait VarIntWriteExt: Write {
    fn write_varint(&mut self, mut value: u64) -> io::Result<()> {
        let mut buf = [0u8; 10];
        let mut len = 0;
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                buf[len] = byte;
                len += 1;
                break;
            }
            buf[len] = byte | 0x80;
            len += 1;
        }
        self.write_all(&buf[..len])
    }

    fn write_lenenc(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_varint(bytes.len() as u64)?;
        self.write_all(bytes)
    }
}

impl<W: Write + ?Sized> VarIntWriteExt for W {}

pub trait VarIntReadExt: Read {
    fn read_varint(&mut self) -> io::Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let mut byte = [0u8; 1];
            self.read_exact(&mut byte)?;
            if shift > 63 || (shift == 63 && byte[0] & 0x7e != 0) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    EncodingError::VarIntOverflow,
                ));
            }
            value |= u64::from(byte[0] & 0x7f) << shift;
            if byte[0] & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_lenenc(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_varint()?;
        let mut buf = Vec::new();
        // bounded read so a corrupt length can't trigger a huge allocation
        self.take(len).read_to_end(&mut buf)?;
        if buf.len() as u64 != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                EncodingError::TruncatedData,
            ));
        }
        Ok(buf)
    }

    fn read_lenenc_string(&mut self) -> io::Result<String> {
        let bytes = self.read_lenenc()?;
        String::from_utf8(bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, EncodingError::InvalidUtf8))
    }
}

impl<R: Read + ?Sized> VarIntReadExt for R {}

pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
