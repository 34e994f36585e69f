//! Append-only commit log segments.
//!
//! ```text
//! record := id:u64 (LE) | len:varint | payload
//! ```
//!
//! Segments have no header and no trailer; a reader stops at the logical
//! size recorded in the record set state.

use crate::encoding::{VarIntReadExt, VarIntWriteExt};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub fn encode_record(id: u64, payload: &[u8], buf: &mut Vec<u8>) {
    buf.write_u64::<LittleEndian>(id)
        .expect("writing to a Vec cannot fail");
    buf.write_lenenc(payload)
        .expect("writing to a Vec cannot fail");
}

/// Writes `data` at `offset`, first resizing the file to `offset + data.len()`.
/// Bytes past `offset` left by an earlier, failed append are overwritten.
pub fn append(path: &Path, offset: u64, data: &[u8], sync: bool) -> Result<()> {
    let mut file = OpenOptions::new().write(true).create(true).open(path)?;
    file.set_len(offset + data.len() as u64)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

/// Cuts a segment back to its logical size.
pub fn truncate(path: &Path, size: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(size)?;
    Ok(())
}

/// Calls `f` for every record of the segment at `path`, reading at most
/// `limit` bytes when given.
pub fn replay(
    path: &Path,
    limit: Option<u64>,
    mut f: impl FnMut(u64, &[u8]) -> Result<()>,
) -> Result<()> {
    let mut data = Vec::new();
    let file = File::open(path)?;
    match limit {
        Some(limit) => file.take(limit).read_to_end(&mut data)?,
        None => (&file).read_to_end(&mut data)?,
    };
    if let Some(limit) = limit {
        if (data.len() as u64) < limit {
            return Err(Error::Format(format!(
                "commit log {} holds {} bytes, expected {}",
                path.display(),
                data.len(),
                limit
            )));
        }
    }

    let mut cursor = Cursor::new(data.as_slice());
    while (cursor.position() as usize) < data.len() {
        let id = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated(path))?;
        let len = cursor.read_varint().map_err(|_| truncated(path))?;

        let start = cursor.position() as usize;
        let end = start
            .checked_add(usize::try_from(len).map_err(|_| truncated(path))?)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| truncated(path))?;
        f(id, &data[start..end])?;
        cursor.set_position(end as u64);
    }
    Ok(())
}

fn truncated(path: &Path) -> Error {
    Error::Format(format!("commit log {} ends mid-record", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn collect(path: &Path, limit: Option<u64>) -> Result<Vec<(u64, Vec<u8>)>> {
        let mut out = Vec::new();
        replay(path, limit, |id, data| {
            out.push((id, data.to_vec()));
            Ok(())
        })?;
        Ok(out)
    }

    #[test]
    fn test_append_and_replay() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");

        let mut first = Vec::new();
        encode_record(0x4242, b"hello", &mut first);
        assert_eq!(&first[..8], &0x4242u64.to_le_bytes());
        assert_eq!(&first[8..], &[5, b'h', b'e', b'l', b'l', b'o']);
        append(&path, 0, &first, false)?;

        let mut second = Vec::new();
        encode_record(7, b"", &mut second);
        append(&path, first.len() as u64, &second, true)?;

        assert_eq!(
            collect(&path, None)?,
            vec![(0x4242, b"hello".to_vec()), (7, Vec::new())]
        );
        assert_eq!(
            collect(&path, Some(first.len() as u64))?,
            vec![(0x4242, b"hello".to_vec())]
        );
        Ok(())
    }

    #[test]
    fn test_garbage_past_logical_size_is_ignored() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let mut buf = Vec::new();
        encode_record(1, b"x", &mut buf);
        let size = buf.len() as u64;
        buf.extend_from_slice(&[0xde, 0xad]);
        append(&path, 0, &buf, false)?;

        assert_eq!(collect(&path, Some(size))?.len(), 1);
        assert!(matches!(collect(&path, None), Err(Error::Format(_))));

        truncate(&path, size)?;
        assert_eq!(collect(&path, None)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_truncated_record() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let mut buf = Vec::new();
        encode_record(1, b"payload", &mut buf);
        append(&path, 0, &buf[..buf.len() - 2], false)?;

        assert!(matches!(collect(&path, None), Err(Error::Format(_))));
        // a logical size beyond the end of the file is corruption too
        assert!(matches!(
            collect(&path, Some(buf.len() as u64)),
            Err(Error::Format(_))
        ));
        Ok(())
    }
}
