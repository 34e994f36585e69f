use crate::column::{ColumnReader, ColumnSource};
use crate::error::{Error, Result};
use crate::format::{read_header, BinaryFormatVersion, ColumnConfig, ColumnEncoding, ColumnType, MetaBlock};
use crate::page::PageIndexReader;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read-only view of the transaction that was current when the file was opened.
pub struct CSTableReader {
    path: PathBuf,
    version: BinaryFormatVersion,
    columns: Vec<ColumnConfig>,
    columns_by_name: HashMap<String, usize>,
    num_rows: u64,
    metablock: Option<MetaBlock>,
    source: ColumnSource,
}

impl CSTableReader {
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let header = read_header(&mut BufReader::new(&file))?;

        let source = match (header.version, header.metablock) {
            (BinaryFormatVersion::V0_2_0, Some(metablock)) => {
                let len = file.metadata()?.len();
                if len < metablock.file_size {
                    return Err(Error::Format(format!(
                        "{} is {} bytes, transaction {} needs {}",
                        path.display(),
                        len,
                        metablock.transaction_id,
                        metablock.file_size
                    )));
                }
                ColumnSource::Paged(Arc::new(PageIndexReader::open(
                    Arc::new(file),
                    metablock.index_page(),
                    metablock.file_size,
                )?))
            }
            _ => {
                // The mapping is read-only and v0.1.0 files are never modified
                // after they are written.
                let mmap = unsafe { Mmap::map(&file)? };
                ColumnSource::Mapped(Arc::new(mmap))
            }
        };

        let columns = header.header.columns;
        let columns_by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.column_name.clone(), i))
            .collect();

        Ok(Self {
            path,
            version: header.version,
            columns,
            columns_by_name,
            num_rows: header.header.num_rows,
            metablock: header.metablock,
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> BinaryFormatVersion {
        self.version
    }

    pub fn transaction_id(&self) -> Option<u64> {
        self.metablock.map(|mb| mb.transaction_id)
    }

    pub fn num_records(&self) -> u64 {
        self.num_rows
    }

    pub fn columns(&self) -> &[ColumnConfig] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns_by_name.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Result<&ColumnConfig> {
        self.columns_by_name
            .get(name)
            .map(|i| &self.columns[*i])
            .ok_or_else(|| Error::NotFound(format!("column '{}' in {}", name, self.path.display())))
    }

    pub fn get_column_encoding(&self, name: &str) -> Result<ColumnEncoding> {
        Ok(self.column(name)?.storage_type)
    }

    pub fn get_column_type(&self, name: &str) -> Result<ColumnType> {
        Ok(self.column(name)?.logical_type)
    }

    /// A fresh cursor over column `name`, positioned at the first entry.
    pub fn get_column_reader(&self, name: &str) -> Result<ColumnReader> {
        let config = self.column(name)?.clone();
        ColumnReader::new(config, &self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use crate::table::CSTableWriter;
    use std::fs::OpenOptions;
    use std::os::unix::fs::FileExt;
    use tempfile::TempDir;

    #[test]
    fn test_column_lookups() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.cst");
        let mut schema = TableSchema::new();
        schema.add_signed_integer("delta", true, ColumnEncoding::UInt64Leb128);
        CSTableWriter::create_file(&path, &schema, None)?.commit()?;

        let reader = CSTableReader::open_file(&path)?;
        assert!(reader.has_column("delta"));
        assert!(!reader.has_column("missing"));
        assert_eq!(reader.get_column_encoding("delta")?, ColumnEncoding::UInt64Leb128);
        assert_eq!(reader.get_column_type("delta")?, ColumnType::SignedInt);
        assert!(matches!(reader.get_column_reader("missing"), Err(Error::NotFound(_))));
        assert!(matches!(reader.get_column_type("missing"), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_cursors_are_independent() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.cst");
        let mut schema = TableSchema::new();
        schema.add_float("x", false);

        let mut writer = CSTableWriter::create_file(&path, &schema, None)?;
        for v in [1.0, 2.0] {
            writer.get_column_writer("x")?.write_float(0, 0, v)?;
            writer.add_row()?;
        }
        writer.commit()?;

        let reader = CSTableReader::open_file(&path)?;
        let mut a = reader.get_column_reader("x")?;
        a.next()?;
        let mut b = reader.get_column_reader("x")?;
        assert_eq!(b.next()?.and_then(|e| e.value), Some(crate::column::Datum::Float(1.0)));
        assert_eq!(a.next()?.and_then(|e| e.value), Some(crate::column::Datum::Float(2.0)));
        Ok(())
    }

    #[test]
    fn test_reader_keeps_its_snapshot() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.cst");
        let mut schema = TableSchema::new();
        schema.add_string("s", false);

        let mut writer = CSTableWriter::create_file(&path, &schema, None)?;
        writer.get_column_writer("s")?.write_string(0, 0, "first")?;
        writer.add_row()?;
        writer.commit()?;

        let reader = CSTableReader::open_file(&path)?;

        let mut writer = CSTableWriter::reopen_file(&path, None)?;
        writer.get_column_writer("s")?.write_string(0, 0, "second")?;
        writer.add_row()?;
        writer.commit()?;

        assert_eq!(reader.num_records(), 1);
        assert_eq!(reader.get_column_reader("s")?.num_entries(), 1);
        assert_eq!(CSTableReader::open_file(&path)?.num_records(), 2);
        Ok(())
    }

    #[test]
    fn test_torn_metablock_falls_back() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.cst");
        let mut schema = TableSchema::new();
        schema.add_bool("b", false);

        for i in 0..2 {
            let mut writer = if i == 0 {
                CSTableWriter::create_file(&path, &schema, None)?
            } else {
                CSTableWriter::reopen_file(&path, None)?
            };
            writer.get_column_writer("b")?.write_bool(0, 0, true)?;
            writer.add_row()?;
            writer.commit()?;
        }

        // transaction 2 lives in slot 0; flip a byte of its payload
        let file = OpenOptions::new().write(true).open(&path)?;
        file.write_all_at(&[0xff], crate::format::v0_2_0::metablock_offset(0) + 8)?;
        drop(file);

        let reader = CSTableReader::open_file(&path)?;
        assert_eq!(reader.transaction_id(), Some(1));
        assert_eq!(reader.num_records(), 1);
        assert_eq!(reader.get_column_reader("b")?.num_entries(), 1);
        Ok(())
    }
}
