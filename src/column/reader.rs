use super::{from_raw, open_decoder, ColumnEntry, ValueDecoder};
use crate::encoding::bitpack::BitPackedDecoder;
use crate::error::{Error, Result};
use crate::format::{ColumnConfig, PageIndexEntryType, PageIndexKey};
use crate::page::PageIndexReader;
use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;
use std::io::Cursor;
use std::sync::Arc;

/// Where the streams of a column live.
#[derive(Clone)]
pub(crate) enum ColumnSource {
    /// v0.1.0: the column body is `body_offset..body_offset + body_size` of
    /// the mapped file.
    Mapped(Arc<Mmap>),
    /// v0.2.0: one page per stream.
    Paged(Arc<PageIndexReader>),
}

/// Cursor over the (rlevel, dlevel, value) entries of one column.
pub struct ColumnReader {
    config: ColumnConfig,
    rlevels: Option<BitPackedDecoder>,
    dlevels: Option<BitPackedDecoder>,
    values: Box<dyn ValueDecoder>,
    total: u64,
    position: u64,
}

impl ColumnReader {
    pub(crate) fn new(config: ColumnConfig, source: &ColumnSource) -> Result<Self> {
        let (rlevels, dlevels, data) = match source {
            ColumnSource::Mapped(mmap) => split_v1_body(&config, mmap)?,
            ColumnSource::Paged(index) => {
                let load = |entry_type| -> Result<Vec<u8>> {
                    let key = PageIndexKey {
                        column_id: config.column_id,
                        entry_type,
                    };
                    Ok(index.read_page(&key)?.unwrap_or_default())
                };
                (
                    load(PageIndexEntryType::RLevel)?,
                    load(PageIndexEntryType::DLevel)?,
                    load(PageIndexEntryType::Data)?,
                )
            }
        };

        let rlevels = open_levels(rlevels, config.rlevel_max)?;
        let dlevels = open_levels(dlevels, config.dlevel_max)?;
        let values = open_decoder(config.storage_type, data)?;

        let total = match (&dlevels, &rlevels) {
            (Some(d), _) => d.len(),
            (None, Some(r)) => r.len(),
            (None, None) => values.len(),
        };

        let reader = Self {
            config,
            rlevels,
            dlevels,
            values,
            total,
            position: 0,
        };
        reader.validate()?;
        Ok(reader)
    }

    fn validate(&self) -> Result<()> {
        let name = &self.config.column_name;
        if let Some(r) = &self.rlevels {
            if r.len() != self.total {
                return Err(Error::Format(format!(
                    "column '{}' has {} rlevels for {} entries",
                    name,
                    r.len(),
                    self.total
                )));
            }
        }

        let defined = match &self.dlevels {
            Some(d) => {
                let mut scan = d.clone();
                let mut n = 0;
                while let Some(level) = scan.next_value() {
                    if level > self.config.dlevel_max {
                        return Err(Error::Format(format!(
                            "column '{}' has dlevel {} above max {}",
                            name, level, self.config.dlevel_max
                        )));
                    }
                    if level == self.config.dlevel_max {
                        n += 1;
                    }
                }
                n
            }
            None => self.total,
        };
        if defined != self.values.len() {
            return Err(Error::Format(format!(
                "column '{}' defines {} values but stores {}",
                name,
                defined,
                self.values.len()
            )));
        }
        Ok(())
    }

    pub fn config(&self) -> &ColumnConfig {
        &self.config
    }

    pub fn column_name(&self) -> &str {
        &self.config.column_name
    }

    pub fn rlevel_max(&self) -> u64 {
        self.config.rlevel_max
    }

    pub fn dlevel_max(&self) -> u64 {
        self.config.dlevel_max
    }

    /// Number of entries, nulls included.
    pub fn num_entries(&self) -> u64 {
        self.total
    }

    pub fn eof_reached(&self) -> bool {
        self.position >= self.total
    }

    /// Repetition level of the entry `next` would return.
    pub fn next_repetition_level(&self) -> Option<u64> {
        if self.eof_reached() {
            return None;
        }
        match &self.rlevels {
            Some(r) => r.peek(),
            None => Some(0),
        }
    }

    pub fn next(&mut self) -> Result<Option<ColumnEntry>> {
        if self.eof_reached() {
            return Ok(None);
        }

        let rlevel = match &mut self.rlevels {
            Some(r) => r.next_value().ok_or_else(|| truncated(&self.config))?,
            None => 0,
        };
        if rlevel > self.config.rlevel_max {
            return Err(Error::Format(format!(
                "column '{}' has rlevel {} above max {}",
                self.config.column_name, rlevel, self.config.rlevel_max
            )));
        }
        let dlevel = match &mut self.dlevels {
            Some(d) => d.next_value().ok_or_else(|| truncated(&self.config))?,
            None => self.config.dlevel_max,
        };

        let value = if dlevel == self.config.dlevel_max {
            let raw = self
                .values
                .next_value()?
                .ok_or_else(|| truncated(&self.config))?;
            Some(from_raw(raw, self.config.logical_type)?)
        } else {
            None
        };

        self.position += 1;
        Ok(Some(ColumnEntry {
            rlevel,
            dlevel,
            value,
        }))
    }

    pub fn rewind(&mut self) {
        if let Some(r) = &mut self.rlevels {
            r.rewind();
        }
        if let Some(d) = &mut self.dlevels {
            d.rewind();
        }
        self.values.rewind();
        self.position = 0;
    }
}

fn truncated(config: &ColumnConfig) -> Error {
    Error::Format(format!("column '{}' ends early", config.column_name))
}

fn open_levels(data: Vec<u8>, max: u64) -> Result<Option<BitPackedDecoder>> {
    if max == 0 || data.is_empty() {
        return Ok(None);
    }
    Ok(Some(BitPackedDecoder::new(data)?))
}

fn split_v1_body(config: &ColumnConfig, mmap: &Mmap) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let start = config.body_offset as usize;
    let end = config
        .body_offset
        .checked_add(config.body_size)
        .filter(|end| *end <= mmap.len() as u64)
        .ok_or_else(|| {
            Error::Format(format!(
                "body of column '{}' lies beyond the end of the file",
                config.column_name
            ))
        })? as usize;
    if config.body_size == 0 {
        return Ok(Default::default());
    }

    let body = &mmap[start..end];
    let mut cursor = Cursor::new(body);
    let rlevel_len = cursor
        .read_u64::<LittleEndian>()
        .map_err(|e| Error::Decode("rlevel stream length", e))?;
    let dlevel_len = cursor
        .read_u64::<LittleEndian>()
        .map_err(|e| Error::Decode("dlevel stream length", e))?;

    let levels_end = rlevel_len
        .checked_add(dlevel_len)
        .and_then(|n| n.checked_add(16))
        .filter(|n| *n <= body.len() as u64)
        .ok_or_else(|| {
            Error::Format(format!(
                "level streams of column '{}' overflow its body",
                config.column_name
            ))
        })? as usize;
    let rlevel_end = 16 + rlevel_len as usize;

    Ok((
        body[16..rlevel_end].to_vec(),
        body[rlevel_end..levels_end].to_vec(),
        body[levels_end..].to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnWriter, Datum};
    use crate::format::{ColumnEncoding, ColumnType};
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn config(offset: u64, size: u64) -> ColumnConfig {
        ColumnConfig {
            column_id: 0,
            column_name: "score".to_string(),
            storage_type: ColumnEncoding::UInt64Leb128,
            logical_type: ColumnType::SignedInt,
            rlevel_max: 1,
            dlevel_max: 1,
            body_offset: offset,
            body_size: size,
        }
    }

    fn mapped(dir: &TempDir, bytes: &[u8]) -> Result<ColumnSource> {
        let path = dir.path().join("body");
        File::create(&path)?.write_all(bytes)?;
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(ColumnSource::Mapped(Arc::new(mmap)))
    }

    #[test]
    fn test_read_back_v1_body() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut writer = ColumnWriter::new(config(0, 0));
        writer.write_int(0, 1, -3)?;
        writer.write_int(1, 1, 7)?;
        writer.write_null(0, 0)?;

        let mut body = vec![0xaa; 4];
        let size = writer.write_v1_body(&mut body)?;
        let source = mapped(&dir, &body)?;

        let mut reader = ColumnReader::new(config(4, size), &source)?;
        assert_eq!(reader.num_entries(), 3);
        assert_eq!(reader.next_repetition_level(), Some(0));

        let first = reader.next()?.unwrap();
        assert_eq!((first.rlevel, first.dlevel), (0, 1));
        assert_eq!(first.value, Some(Datum::Int(-3)));
        assert_eq!(reader.next_repetition_level(), Some(1));
        assert_eq!(reader.next()?.unwrap().value, Some(Datum::Int(7)));

        let null = reader.next()?.unwrap();
        assert_eq!((null.rlevel, null.dlevel, null.value), (0, 0, None));
        assert!(reader.eof_reached());
        assert_eq!(reader.next()?, None);
        assert_eq!(reader.next_repetition_level(), None);

        reader.rewind();
        assert!(!reader.eof_reached());
        assert_eq!(reader.next()?.unwrap().value, Some(Datum::Int(-3)));
        Ok(())
    }

    #[test]
    fn test_body_out_of_bounds() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let source = mapped(&dir, &[0u8; 8])?;
        assert!(matches!(
            ColumnReader::new(config(4, 16), &source),
            Err(Error::Format(_))
        ));
        Ok(())
    }

    #[test]
    fn test_value_count_mismatch() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut writer = ColumnWriter::new(config(0, 0));
        writer.write_int(0, 1, 1)?;
        let mut body = Vec::new();
        writer.write_v1_body(&mut body)?;
        // claim two values in the data stream
        let data_start = body.len() - 2;
        body[data_start] = 2;
        body.push(0);

        let source = mapped(&dir, &body)?;
        let result = ColumnReader::new(config(0, body.len() as u64), &source);
        assert!(matches!(result, Err(Error::Format(_))));
        Ok(())
    }
}
