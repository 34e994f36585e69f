//! On-disk vocabulary of a CSTable file and the header codecs of both
//! format versions.
//!
//! # v0.2.0 layout
//!
//! ```text
//! +---------------------------------------------------------+ 0
//! | magic 23 17 23 17 | version:u16 = 2 | flags:u64          |
//! +---------------------------------------------------------+ 14
//! | metablock slot 0 (56 bytes)                              |
//! | metablock slot 1 (56 bytes)                              |
//! +---------------------------------------------------------+ 126
//! | reserved (128 bytes)                                     |
//! +---------------------------------------------------------+ 254
//! | ncols:varint | column_info * ncols | zero padding        |
//! +---------------------------------------------------------+ multiple of 512
//! | data pages and index pages                               |
//! +---------------------------------------------------------+
//! ```
//!
//! A metablock is `txid:u64 rows:u64 index_offset:u64 index_size:u32
//! file_size:u64` followed by the SHA1 of those 36 bytes. All fixed-width
//! integers are little-endian.
//!
//! # v0.1.0 layout
//!
//! A flat header listing every column with the byte range of its body; no
//! metablocks, no paging. Files are written once and never modified.

mod header;
pub mod v0_1_0;
pub mod v0_2_0;

pub use header::{read_header, TableHeader};

use crate::error::{Error, Result};

pub const MAGIC: [u8; 4] = [0x23, 0x17, 0x23, 0x17];
pub const SECTOR_SIZE: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryFormatVersion {
    V0_1_0,
    V0_2_0,
}

impl BinaryFormatVersion {
    pub fn as_u16(self) -> u16 {
        match self {
            BinaryFormatVersion::V0_1_0 => 1,
            BinaryFormatVersion::V0_2_0 => 2,
        }
    }

    pub fn from_u16(version: u16) -> Result<Self> {
        match version {
            1 => Ok(BinaryFormatVersion::V0_1_0),
            2 => Ok(BinaryFormatVersion::V0_2_0),
            other => Err(Error::Format(format!("unsupported file version {}", other))),
        }
    }
}

/// Logical type of a column as seen by the record layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Subrecord = 0,
    Boolean = 1,
    UnsignedInt = 2,
    SignedInt = 3,
    String = 4,
    Float = 5,
    DateTime = 6,
}

impl TryFrom<u64> for ColumnType {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        Ok(match value {
            0 => ColumnType::Subrecord,
            1 => ColumnType::Boolean,
            2 => ColumnType::UnsignedInt,
            3 => ColumnType::SignedInt,
            4 => ColumnType::String,
            5 => ColumnType::Float,
            6 => ColumnType::DateTime,
            other => return Err(Error::Format(format!("unsupported column type {}", other))),
        })
    }
}

/// Physical storage encoding of a column's data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnEncoding {
    BooleanBitpacked = 1,
    UInt32Bitpacked = 10,
    UInt32Plain = 11,
    UInt64Plain = 12,
    UInt64Leb128 = 13,
    FloatIeee754 = 14,
    StringPlain = 100,
}

impl TryFrom<u64> for ColumnEncoding {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        Ok(match value {
            1 => ColumnEncoding::BooleanBitpacked,
            10 => ColumnEncoding::UInt32Bitpacked,
            11 => ColumnEncoding::UInt32Plain,
            12 => ColumnEncoding::UInt64Plain,
            13 => ColumnEncoding::UInt64Leb128,
            14 => ColumnEncoding::FloatIeee754,
            100 => ColumnEncoding::StringPlain,
            other => {
                return Err(Error::Format(format!(
                    "unsupported column type: storage type {}",
                    other
                )))
            }
        })
    }
}

impl ColumnEncoding {
    /// Logical type implied by the encoding; v0.1.0 files store only the encoding.
    pub fn default_logical_type(self) -> ColumnType {
        match self {
            ColumnEncoding::BooleanBitpacked => ColumnType::Boolean,
            ColumnEncoding::UInt32Bitpacked
            | ColumnEncoding::UInt32Plain
            | ColumnEncoding::UInt64Plain
            | ColumnEncoding::UInt64Leb128 => ColumnType::UnsignedInt,
            ColumnEncoding::FloatIeee754 => ColumnType::Float,
            ColumnEncoding::StringPlain => ColumnType::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnConfig {
    pub column_id: u32,
    pub column_name: String,
    pub storage_type: ColumnEncoding,
    pub logical_type: ColumnType,
    pub rlevel_max: u64,
    pub dlevel_max: u64,
    /// v0.1.0 only
    pub body_offset: u64,
    /// v0.1.0 only
    pub body_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub columns: Vec<ColumnConfig>,
    /// v0.1.0 only; v0.2.0 keeps the row count in the metablock.
    pub num_rows: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRef {
    pub offset: u64,
    pub size: u32,
}

impl PageRef {
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.size)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaBlock {
    pub transaction_id: u64,
    pub num_rows: u64,
    pub index_offset: u64,
    pub index_size: u32,
    pub file_size: u64,
}

impl MetaBlock {
    pub fn index_page(&self) -> PageRef {
        PageRef {
            offset: self.index_offset,
            size: self.index_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageIndexEntryType {
    Data = 1,
    RLevel = 2,
    DLevel = 3,
}

impl TryFrom<u64> for PageIndexEntryType {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            1 => Ok(PageIndexEntryType::Data),
            2 => Ok(PageIndexEntryType::RLevel),
            3 => Ok(PageIndexEntryType::DLevel),
            other => Err(Error::Format(format!("invalid page index entry type {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageIndexKey {
    pub column_id: u32,
    pub entry_type: PageIndexEntryType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageIndexEntry {
    pub key: PageIndexKey,
    pub page: PageRef,
}

/// Deepest nesting a column may have.
pub const MAX_LEVEL: u64 = 64;

/// Checks `rlevel_max <= dlevel_max <= MAX_LEVEL` for a column read from a file.
pub fn check_levels(column: &str, rlevel_max: u64, dlevel_max: u64) -> Result<()> {
    if rlevel_max > dlevel_max || dlevel_max > MAX_LEVEL {
        return Err(Error::Format(format!(
            "column '{}' has invalid levels (rlevel max {}, dlevel max {})",
            column, rlevel_max, dlevel_max
        )));
    }
    Ok(())
}

/// Rounds `size` up to the next multiple of [`SECTOR_SIZE`].
pub fn pad_to_next_sector(size: u64) -> u64 {
    size.div_ceil(SECTOR_SIZE) * SECTOR_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_to_next_sector() {
        assert_eq!(pad_to_next_sector(1), 512);
        assert_eq!(pad_to_next_sector(254), 512);
        assert_eq!(pad_to_next_sector(512), 512);
        assert_eq!(pad_to_next_sector(513), 1024);
    }

    #[test]
    fn test_enum_codes() {
        assert_eq!(ColumnEncoding::try_from(100).unwrap(), ColumnEncoding::StringPlain);
        assert_eq!(ColumnEncoding::UInt64Leb128 as u64, 13);
        assert!(matches!(ColumnEncoding::try_from(2), Err(Error::Format(_))));
        assert_eq!(ColumnType::try_from(6).unwrap(), ColumnType::DateTime);
        assert!(ColumnType::try_from(7).is_err());
        assert!(PageIndexEntryType::try_from(0).is_err());
        assert!(BinaryFormatVersion::from_u16(3).is_err());
    }

    #[test]
    fn test_check_levels() {
        assert!(check_levels("a", 0, 0).is_ok());
        assert!(check_levels("a.b", 2, 3).is_ok());
        assert!(check_levels("a", MAX_LEVEL, MAX_LEVEL).is_ok());
        assert!(matches!(check_levels("a", 3, 2), Err(Error::Format(_))));
        assert!(matches!(check_levels("a", 0, MAX_LEVEL + 1), Err(Error::Format(_))));
        assert!(matches!(check_levels("a", u64::MAX, u64::MAX), Err(Error::Format(_))));
    }
}
