use super::{check_levels, ColumnConfig, ColumnEncoding, FileHeader};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub const VERSION: u16 = 1;
/// magic + version + flags + num_rows + ncols
const FIXED_HEADER_SIZE: u64 = 4 + 2 + 8 + 8 + 4;
/// Per column: storage type, name length, levels, body offset and size.
const COLUMN_ENTRY_SIZE: u64 = 4 + 4 + 4 + 4 + 8 + 8;
const MAGIC_U32: u32 = 0x1723_1723;

/// Size of the header for a column list; the first column body starts here.
pub fn header_size(columns: &[ColumnConfig]) -> u64 {
    FIXED_HEADER_SIZE
        + columns
            .iter()
            .map(|c| COLUMN_ENTRY_SIZE + c.column_name.len() as u64)
            .sum::<u64>()
}

pub fn write_header<W: Write>(header: &FileHeader, writer: &mut W) -> Result<()> {
    writer.write_u32::<LittleEndian>(MAGIC_U32)?;
    writer.write_u16::<LittleEndian>(VERSION)?;
    writer.write_u64::<LittleEndian>(0)?; // flags
    writer.write_u64::<LittleEndian>(header.num_rows)?;
    writer.write_u32::<LittleEndian>(header.columns.len() as u32)?;

    for col in &header.columns {
        writer.write_u32::<LittleEndian>(col.storage_type as u32)?;
        writer.write_u32::<LittleEndian>(col.column_name.len() as u32)?;
        writer.write_all(col.column_name.as_bytes())?;
        writer.write_u32::<LittleEndian>(level_u32(col.rlevel_max)?)?;
        writer.write_u32::<LittleEndian>(level_u32(col.dlevel_max)?)?;
        writer.write_u64::<LittleEndian>(col.body_offset)?;
        writer.write_u64::<LittleEndian>(col.body_size)?;
    }

    Ok(())
}

fn level_u32(level: u64) -> Result<u32> {
    u32::try_from(level).map_err(|_| Error::Runtime(format!("level {} too deep for v0.1.0", level)))
}

/// Reads everything after magic and version. Columns come back sorted by name.
pub fn read_header<R: Read>(reader: &mut R) -> Result<FileHeader> {
    let _flags = reader
        .read_u64::<LittleEndian>()
        .map_err(|e| Error::Decode("header flags", e))?;
    let num_rows = reader
        .read_u64::<LittleEndian>()
        .map_err(|e| Error::Decode("row count", e))?;
    let ncols = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::Decode("column count", e))?;

    let mut columns = Vec::with_capacity(ncols.min(1024) as usize);
    for _ in 0..ncols {
        let storage_type = ColumnEncoding::try_from(u64::from(
            reader
                .read_u32::<LittleEndian>()
                .map_err(|e| Error::Decode("column storage type", e))?,
        ))?;
        let name_len = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::Decode("column name length", e))?;
        let mut name = Vec::new();
        reader
            .by_ref()
            .take(u64::from(name_len))
            .read_to_end(&mut name)
            .map_err(|e| Error::Decode("column name", e))?;
        if name.len() != name_len as usize {
            return Err(Error::Format("truncated column name".to_string()));
        }
        let column_name = String::from_utf8(name)
            .map_err(|_| Error::Format("column name is not valid UTF-8".to_string()))?;
        let rlevel_max = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::Decode("column rlevel max", e))?;
        let dlevel_max = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::Decode("column dlevel max", e))?;
        check_levels(&column_name, u64::from(rlevel_max), u64::from(dlevel_max))?;
        let body_offset = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::Decode("column body offset", e))?;
        let body_size = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::Decode("column body size", e))?;

        columns.push(ColumnConfig {
            column_id: 0,
            column_name,
            storage_type,
            logical_type: storage_type.default_logical_type(),
            rlevel_max: u64::from(rlevel_max),
            dlevel_max: u64::from(dlevel_max),
            body_offset,
            body_size,
        });
    }

    columns.sort_by(|a, b| a.column_name.cmp(&b.column_name));
    Ok(FileHeader { columns, num_rows })
}
