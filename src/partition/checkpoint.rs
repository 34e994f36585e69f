//! The STATE file of a partition.
//!
//! ```text
//! +-----------+-------------+-----------------+---------------------+-----------+
//! | magic: 8B | version:u32 | payload_len:u32 | bincode(state)      | crc32:u32 |
//! +-----------+-------------+-----------------+---------------------+-----------+
//! ```
//!
//! Integers are little-endian and the checksum covers the payload only. The
//! file is replaced atomically: written to `STATE.tmp`, synced, then renamed.

use crate::encoding::bincode;
use crate::error::{Error, Result};
use crate::recordset::RecordSetState;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

pub const STATE_FILE: &str = "STATE";
const STATE_TMP_FILE: &str = "STATE.tmp";

const MAGIC: &[u8; 8] = b"CSTPART\0";
const VERSION: u32 = 1;
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub fn encode(state: &RecordSetState) -> Result<Vec<u8>> {
    let payload = bincode::serialize(state)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Runtime(format!("state of {} bytes is too large", payload.len())))?;

    let mut buf = Vec::with_capacity(payload.len() + 20);
    buf.extend_from_slice(MAGIC);
    buf.write_u32::<LittleEndian>(VERSION)?;
    buf.write_u32::<LittleEndian>(len)?;
    buf.extend_from_slice(&payload);
    buf.write_u32::<LittleEndian>(CRC32.checksum(&payload))?;
    Ok(buf)
}

pub fn decode(data: &[u8]) -> Result<RecordSetState> {
    let mut cursor = Cursor::new(data);

    let mut magic = [0u8; 8];
    cursor
        .read_exact(&mut magic)
        .map_err(|e| Error::Decode("state magic", e))?;
    if &magic != MAGIC {
        return Err(Error::Format("not a partition state file".to_string()));
    }

    let version = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::Decode("state version", e))?;
    if version != VERSION {
        return Err(Error::Format(format!("unsupported state version {}", version)));
    }

    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::Decode("state length", e))? as usize;
    let mut payload = vec![0u8; len];
    cursor
        .read_exact(&mut payload)
        .map_err(|e| Error::Decode("state payload", e))?;
    let checksum = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::Decode("state checksum", e))?;

    if CRC32.checksum(&payload) != checksum {
        return Err(Error::ChecksumMismatch);
    }
    bincode::deserialize(&payload)
}

/// Loads `<dir>/STATE`, or `None` for a partition that was never checkpointed.
pub fn load(dir: &Path) -> Result<Option<RecordSetState>> {
    match fs::read(dir.join(STATE_FILE)) {
        Ok(data) => decode(&data).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn store(dir: &Path, state: &RecordSetState) -> Result<()> {
    let data = encode(state)?;
    let tmp = dir.join(STATE_TMP_FILE);

    let mut file = File::create(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, dir.join(STATE_FILE))?;
    File::open(dir)?.sync_all()?;
    Ok(())
}
