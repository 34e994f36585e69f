use super::{v0_1_0, v0_2_0, BinaryFormatVersion, FileHeader, MetaBlock, PageRef, MAGIC};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// Everything `read_header` learns about a file.
#[derive(Debug)]
pub struct TableHeader {
    pub version: BinaryFormatVersion,
    pub header: FileHeader,
    /// Current transaction; `None` for v0.1.0 files.
    pub metablock: Option<MetaBlock>,
    /// Index page of the superseded transaction, free for reuse. Never
    /// dereference it as live state.
    pub free_index: Option<PageRef>,
}

pub fn read_header<R: Read>(reader: &mut R) -> Result<TableHeader> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| Error::Decode("magic bytes", e))?;
    if magic != MAGIC {
        return Err(Error::Format("invalid magic bytes".to_string()));
    }

    let version = reader
        .read_u16::<LittleEndian>()
        .map_err(|e| Error::Decode("file version", e))?;

    match BinaryFormatVersion::from_u16(version)? {
        BinaryFormatVersion::V0_1_0 => Ok(TableHeader {
            version: BinaryFormatVersion::V0_1_0,
            header: v0_1_0::read_header(reader)?,
            metablock: None,
            free_index: None,
        }),
        BinaryFormatVersion::V0_2_0 => {
            let decoded = v0_2_0::read_header(reader)?;
            Ok(TableHeader {
                version: BinaryFormatVersion::V0_2_0,
                header: decoded.header,
                metablock: Some(decoded.metablock),
                free_index: decoded.free_index,
            })
        }
    }
}
