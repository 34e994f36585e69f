use super::{
    check_levels, pad_to_next_sector, ColumnConfig, ColumnEncoding, ColumnType, FileHeader, MetaBlock,
    PageIndexEntry, PageIndexEntryType, PageIndexKey, PageRef, MAGIC,
};
use crate::encoding::{VarIntReadExt, VarIntWriteExt};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::io::{Cursor, Read, Write};

pub const VERSION: u16 = 2;
pub const METABLOCK_POSITION: u64 = 14;
pub const METABLOCK_SIZE: usize = 56;
const METABLOCK_PAYLOAD: usize = 36;
const RESERVED_SIZE: usize = 128;

/// Byte offset of a metablock slot.
pub fn metablock_offset(slot: u64) -> u64 {
    METABLOCK_POSITION + slot * METABLOCK_SIZE as u64
}

/// Slot a transaction is published into.
pub fn metablock_slot(transaction_id: u64) -> u64 {
    transaction_id % 2
}

pub fn encode_metablock(mb: &MetaBlock) -> [u8; METABLOCK_SIZE] {
    let mut buf = [0u8; METABLOCK_SIZE];
    let mut payload = Vec::with_capacity(METABLOCK_PAYLOAD);
    payload
        .write_u64::<LittleEndian>(mb.transaction_id)
        .expect("writing to a Vec cannot fail");
    payload
        .write_u64::<LittleEndian>(mb.num_rows)
        .expect("writing to a Vec cannot fail");
    payload
        .write_u64::<LittleEndian>(mb.index_offset)
        .expect("writing to a Vec cannot fail");
    payload
        .write_u32::<LittleEndian>(mb.index_size)
        .expect("writing to a Vec cannot fail");
    payload
        .write_u64::<LittleEndian>(mb.file_size)
        .expect("writing to a Vec cannot fail");
    buf[..METABLOCK_PAYLOAD].copy_from_slice(&payload);

    let digest = Sha1::digest(&buf[..METABLOCK_PAYLOAD]);
    buf[METABLOCK_PAYLOAD..].copy_from_slice(&digest);
    buf
}

/// Returns `None` when the stored checksum does not match, e.g. after a torn write.
pub fn decode_metablock(buf: &[u8; METABLOCK_SIZE]) -> Option<MetaBlock> {
    let digest = Sha1::digest(&buf[..METABLOCK_PAYLOAD]);
    if digest.as_slice() != &buf[METABLOCK_PAYLOAD..] {
        return None;
    }

    let mut cursor = Cursor::new(&buf[..METABLOCK_PAYLOAD]);
    Some(MetaBlock {
        transaction_id: cursor.read_u64::<LittleEndian>().ok()?,
        num_rows: cursor.read_u64::<LittleEndian>().ok()?,
        index_offset: cursor.read_u64::<LittleEndian>().ok()?,
        index_size: cursor.read_u32::<LittleEndian>().ok()?,
        file_size: cursor.read_u64::<LittleEndian>().ok()?,
    })
}

pub fn write_metablock<W: Write>(mb: &MetaBlock, writer: &mut W) -> Result<()> {
    writer.write_all(&encode_metablock(mb))?;
    Ok(())
}

/// Serializes the full header with both metablock slots zeroed. The result
/// is padded to a sector boundary; its length is where the first page starts.
pub fn encode_header(header: &FileHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(512);
    buf.extend_from_slice(&MAGIC);
    buf.write_u16::<LittleEndian>(VERSION)
        .expect("writing to a Vec cannot fail");
    buf.write_u64::<LittleEndian>(0) // flags
        .expect("writing to a Vec cannot fail");
    buf.resize(buf.len() + 2 * METABLOCK_SIZE + RESERVED_SIZE, 0);

    buf.write_varint(header.columns.len() as u64)
        .expect("writing to a Vec cannot fail");
    for col in &header.columns {
        write_column_info(col, &mut buf).expect("writing to a Vec cannot fail");
    }

    let padded = pad_to_next_sector(buf.len() as u64) as usize;
    buf.resize(padded, 0);
    buf
}

pub fn write_header<W: Write>(header: &FileHeader, writer: &mut W) -> Result<u64> {
    let buf = encode_header(header);
    writer.write_all(&buf)?;
    Ok(buf.len() as u64)
}

#[derive(Debug)]
pub struct DecodedHeader {
    pub header: FileHeader,
    pub metablock: MetaBlock,
    pub free_index: Option<PageRef>,
}

/// Reads everything after magic and version.
pub fn read_header<R: Read>(reader: &mut R) -> Result<DecodedHeader> {
    let _flags = reader
        .read_u64::<LittleEndian>()
        .map_err(|e| Error::Decode("header flags", e))?;

    let mut slots = Vec::with_capacity(2);
    for slot in 0..2u64 {
        let mut buf = [0u8; METABLOCK_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|e| Error::Decode("metablock", e))?;
        match decode_metablock(&buf) {
            Some(mb) => slots.push(mb),
            None if buf.iter().all(|b| *b == 0) => {
                tracing::debug!(slot = slot, "Metablock slot is empty")
            }
            None => tracing::warn!(slot = slot, "Discarding metablock with invalid checksum"),
        }
    }

    let mut reserved = [0u8; RESERVED_SIZE];
    reader
        .read_exact(&mut reserved)
        .map_err(|e| Error::Decode("reserved header bytes", e))?;

    let ncols = reader
        .read_varint()
        .map_err(|e| Error::Decode("column count", e))?;
    let mut columns = Vec::new();
    for _ in 0..ncols {
        columns.push(read_column_info(reader)?);
    }

    slots.sort_by_key(|mb| mb.transaction_id);
    let (metablock, free_index) = match slots.as_slice() {
        [] => {
            return Err(Error::Format(
                "no valid metablock found, file is corrupt".to_string(),
            ))
        }
        [current] => (*current, None),
        [older, current] => (*current, Some(older.index_page())),
        _ => unreachable!("at most two metablock slots"),
    };

    Ok(DecodedHeader {
        header: FileHeader {
            columns,
            num_rows: metablock.num_rows,
        },
        metablock,
        free_index,
    })
}

fn write_column_info<W: Write>(col: &ColumnConfig, writer: &mut W) -> std::io::Result<()> {
    writer.write_varint(col.logical_type as u64)?;
    writer.write_varint(col.storage_type as u64)?;
    writer.write_varint(u64::from(col.column_id))?;
    writer.write_lenenc(col.column_name.as_bytes())?;
    writer.write_varint(col.rlevel_max)?;
    writer.write_varint(col.dlevel_max)
}

fn read_column_info<R: Read>(reader: &mut R) -> Result<ColumnConfig> {
    let logical_type = ColumnType::try_from(
        reader
            .read_varint()
            .map_err(|e| Error::Decode("column logical type", e))?,
    )?;
    let storage_type = ColumnEncoding::try_from(
        reader
            .read_varint()
            .map_err(|e| Error::Decode("column storage type", e))?,
    )?;
    let column_id = reader
        .read_varint()
        .map_err(|e| Error::Decode("column id", e))?;
    let column_name = reader
        .read_lenenc_string()
        .map_err(|e| Error::Decode("column name", e))?;
    let rlevel_max = reader
        .read_varint()
        .map_err(|e| Error::Decode("column rlevel max", e))?;
    let dlevel_max = reader
        .read_varint()
        .map_err(|e| Error::Decode("column dlevel max", e))?;
    check_levels(&column_name, rlevel_max, dlevel_max)?;

    Ok(ColumnConfig {
        column_id: u32::try_from(column_id)
            .map_err(|_| Error::Format(format!("column id {} out of range", column_id)))?,
        column_name,
        storage_type,
        logical_type,
        rlevel_max,
        dlevel_max,
        body_offset: 0,
        body_size: 0,
    })
}

pub fn write_index<W: Write>(entries: &[PageIndexEntry], writer: &mut W) -> Result<()> {
    for entry in entries {
        writer.write_varint(entry.key.entry_type as u64)?;
        writer.write_varint(u64::from(entry.key.column_id))?;
        writer.write_varint(entry.page.offset)?;
        writer.write_varint(u64::from(entry.page.size))?;
    }
    Ok(())
}

/// Reads entries until the index bytes are exhausted; there is no count field.
pub fn read_index(data: &[u8]) -> Result<Vec<PageIndexEntry>> {
    let mut cursor = Cursor::new(data);
    let mut entries = Vec::new();

    while (cursor.position() as usize) < data.len() {
        let entry_type = PageIndexEntryType::try_from(
            cursor
                .read_varint()
                .map_err(|e| Error::Decode("index entry type", e))?,
        )?;
        let column_id = cursor
            .read_varint()
            .map_err(|e| Error::Decode("index column id", e))?;
        let offset = cursor
            .read_varint()
            .map_err(|e| Error::Decode("index page offset", e))?;
        let size = cursor
            .read_varint()
            .map_err(|e| Error::Decode("index page size", e))?;

        entries.push(PageIndexEntry {
            key: PageIndexKey {
                column_id: u32::try_from(column_id)
                    .map_err(|_| Error::Format(format!("column id {} out of range", column_id)))?,
                entry_type,
            },
            page: PageRef {
                offset,
                size: u32::try_from(size)
                    .map_err(|_| Error::Format(format!("page size {} out of range", size)))?,
            },
        });
    }

    Ok(entries)
}
