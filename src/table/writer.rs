use super::lock::{LockRef, WriteLockGuard};
use crate::column::{ColumnReader, ColumnSource, ColumnWriter};
use crate::error::{Error, Result};
use crate::format::{
    read_header, v0_1_0, v0_2_0, BinaryFormatVersion, ColumnConfig, FileHeader, MetaBlock,
    PageIndexKey,
};
use crate::page::{PageIndexReader, PageManager};
use crate::schema::TableSchema;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

enum Storage {
    /// Written in one go at commit.
    Flat { file: File },
    Paged {
        pages: PageManager,
        metablock: MetaBlock,
        /// Committed state, present when appending to an existing table.
        snapshot: Option<Arc<PageIndexReader>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Committed,
}

/// One write transaction on a table file.
///
/// Nothing written through the column writers is visible to readers until
/// [`commit`](Self::commit) publishes the new metablock. Dropping the writer
/// without committing leaves the file at its previous transaction.
pub struct CSTableWriter {
    path: PathBuf,
    version: BinaryFormatVersion,
    columns: Vec<ColumnConfig>,
    columns_by_name: HashMap<String, usize>,
    writers: Vec<Option<ColumnWriter>>,
    num_rows: u64,
    storage: Storage,
    state: WriterState,
    _lock: Option<WriteLockGuard>,
}

impl CSTableWriter {
    /// Creates (or truncates) a v0.2.0 table.
    pub fn create_file(
        path: impl AsRef<Path>,
        schema: &TableSchema,
        lock: Option<&Arc<LockRef>>,
    ) -> Result<Self> {
        Self::create_file_with_version(path, schema, BinaryFormatVersion::V0_2_0, lock)
    }

    pub fn create_file_with_version(
        path: impl AsRef<Path>,
        schema: &TableSchema,
        version: BinaryFormatVersion,
        lock: Option<&Arc<LockRef>>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let columns = schema.flat_columns()?;
        if version == BinaryFormatVersion::V0_1_0 {
            // v0.1.0 headers only record the storage encoding
            if let Some(col) = columns
                .iter()
                .find(|c| c.logical_type != c.storage_type.default_logical_type())
            {
                return Err(Error::Runtime(format!(
                    "column '{}' of type {:?} cannot be stored as {:?} in a v0.1.0 table",
                    col.column_name, col.logical_type, col.storage_type
                )));
            }
        }
        let guard = lock.map(|l| l.try_lock_write()).transpose()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let storage = match version {
            BinaryFormatVersion::V0_1_0 => Storage::Flat { file },
            BinaryFormatVersion::V0_2_0 => {
                let header = v0_2_0::encode_header(&FileHeader {
                    columns: columns.clone(),
                    num_rows: 0,
                });
                let metablock = MetaBlock {
                    transaction_id: 0,
                    num_rows: 0,
                    index_offset: header.len() as u64,
                    index_size: 0,
                    file_size: header.len() as u64,
                };
                file.write_all_at(&header, 0)?;
                file.write_all_at(
                    &v0_2_0::encode_metablock(&metablock),
                    v0_2_0::metablock_offset(v0_2_0::metablock_slot(0)),
                )?;
                file.sync_all()?;

                Storage::Paged {
                    pages: PageManager::new(Arc::new(file), metablock.file_size, Vec::new(), None),
                    metablock,
                    snapshot: None,
                }
            }
        };

        tracing::debug!(path = %path.display(), columns = columns.len(), version = version.as_u16(), "Created table");
        Ok(Self::new(path, version, columns, 0, storage, guard))
    }

    /// Opens the latest transaction of a v0.2.0 table for appending.
    pub fn reopen_file(path: impl AsRef<Path>, lock: Option<&Arc<LockRef>>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let guard = lock.map(|l| l.try_lock_write()).transpose()?;

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let header = read_header(&mut BufReader::new(&file))?;
        let metablock = match (header.version, header.metablock) {
            (BinaryFormatVersion::V0_2_0, Some(metablock)) => metablock,
            _ => {
                return Err(Error::IllegalState(format!(
                    "{} is a v0.1.0 table and can't be reopened for writing",
                    path.display()
                )))
            }
        };

        let file = Arc::new(file);
        let snapshot = Arc::new(PageIndexReader::open(
            file.clone(),
            metablock.index_page(),
            metablock.file_size,
        )?);
        let pages = PageManager::new(
            file,
            metablock.file_size,
            snapshot.entries(),
            header.free_index,
        );

        tracing::debug!(
            path = %path.display(),
            transaction_id = metablock.transaction_id,
            rows = metablock.num_rows,
            "Reopened table"
        );
        Ok(Self::new(
            path,
            BinaryFormatVersion::V0_2_0,
            header.header.columns,
            metablock.num_rows,
            Storage::Paged {
                pages,
                metablock,
                snapshot: Some(snapshot),
            },
            guard,
        ))
    }

    fn new(
        path: PathBuf,
        version: BinaryFormatVersion,
        columns: Vec<ColumnConfig>,
        num_rows: u64,
        storage: Storage,
        lock: Option<WriteLockGuard>,
    ) -> Self {
        let columns_by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.column_name.clone(), i))
            .collect();
        let writers = columns.iter().map(|_| None).collect();
        Self {
            path,
            version,
            columns,
            columns_by_name,
            writers,
            num_rows,
            storage,
            state: WriterState::Open,
            _lock: lock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> BinaryFormatVersion {
        self.version
    }

    pub fn columns(&self) -> &[ColumnConfig] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns_by_name.contains_key(name)
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Transaction this writer builds on; `None` for v0.1.0 files.
    pub fn transaction_id(&self) -> Option<u64> {
        match &self.storage {
            Storage::Flat { .. } => None,
            Storage::Paged { metablock, .. } => Some(metablock.transaction_id),
        }
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            WriterState::Committed => Err(Error::IllegalState(format!(
                "transaction on {} is already committed",
                self.path.display()
            ))),
        }
    }

    /// Writer for column `name`. When appending, the committed contents of the
    /// column are loaded on first access and rewritten at commit.
    pub fn get_column_writer(&mut self, name: &str) -> Result<&mut ColumnWriter> {
        self.check_open()?;
        let idx = *self
            .columns_by_name
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("column '{}'", name)))?;

        if self.writers[idx].is_none() {
            let config = self.columns[idx].clone();
            let writer = match &self.storage {
                Storage::Paged {
                    snapshot: Some(snapshot),
                    ..
                } => {
                    let mut committed =
                        ColumnReader::new(config.clone(), &ColumnSource::Paged(snapshot.clone()))?;
                    ColumnWriter::from_reader(config, &mut committed)?
                }
                _ => ColumnWriter::new(config),
            };
            self.writers[idx] = Some(writer);
        }

        self.writers[idx]
            .as_mut()
            .ok_or_else(|| Error::NotFound(format!("column '{}'", name)))
    }

    pub fn add_row(&mut self) -> Result<()> {
        self.add_rows(1)
    }

    pub fn add_rows(&mut self, n: u64) -> Result<()> {
        self.check_open()?;
        self.num_rows += n;
        Ok(())
    }

    /// Publishes everything written so far as the next transaction. A writer
    /// commits at most once.
    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        match &mut self.storage {
            Storage::Flat { file } => {
                write_flat(file, &mut self.columns, &self.writers, self.num_rows)?;
                tracing::debug!(path = %self.path.display(), rows = self.num_rows, "Committed v0.1.0 table");
            }
            Storage::Paged {
                pages, metablock, ..
            } => {
                for (config, writer) in self.columns.iter().zip(&self.writers) {
                    let Some(writer) = writer else { continue };
                    for (entry_type, data) in writer.streams() {
                        let key = PageIndexKey {
                            column_id: config.column_id,
                            entry_type,
                        };
                        pages.store_page(key, &data)?;
                    }
                }
                pages.flush_all_pages()?;

                let mut index = Vec::new();
                v0_2_0::write_index(&pages.get_page_index(), &mut index)?;
                let index_size = u32::try_from(index.len()).map_err(|_| {
                    Error::Runtime(format!("page index of {} bytes is too large", index.len()))
                })?;
                let index_page = pages.allocate_page(index_size);
                pages.write_page(&index_page, &index)?;
                pages.flush_all_pages()?;

                let next = MetaBlock {
                    transaction_id: metablock.transaction_id + 1,
                    num_rows: self.num_rows,
                    index_offset: index_page.offset,
                    index_size: index_page.size,
                    file_size: pages.allocated_bytes(),
                };
                pages.file().write_all_at(
                    &v0_2_0::encode_metablock(&next),
                    v0_2_0::metablock_offset(v0_2_0::metablock_slot(next.transaction_id)),
                )?;
                pages.flush_all_pages()?;
                *metablock = next;

                tracing::debug!(
                    path = %self.path.display(),
                    transaction_id = next.transaction_id,
                    rows = next.num_rows,
                    "Committed table"
                );
            }
        }

        self.state = WriterState::Committed;
        Ok(())
    }
}

/// Lays out a v0.1.0 file: header, then one body per column in header order.
fn write_flat(
    file: &File,
    columns: &mut [ColumnConfig],
    writers: &[Option<ColumnWriter>],
    num_rows: u64,
) -> Result<()> {
    let mut bodies = Vec::with_capacity(columns.len());
    let mut offset = v0_1_0::header_size(columns);
    for (config, writer) in columns.iter_mut().zip(writers) {
        let mut body = Vec::new();
        match writer {
            Some(writer) => writer.write_v1_body(&mut body)?,
            None => ColumnWriter::new(config.clone()).write_v1_body(&mut body)?,
        };
        config.body_offset = offset;
        config.body_size = body.len() as u64;
        offset += config.body_size;
        bodies.push(body);
    }

    let mut out = BufWriter::new(file);
    v0_1_0::write_header(
        &FileHeader {
            columns: columns.to_vec(),
            num_rows,
        },
        &mut out,
    )?;
    for body in &bodies {
        out.write_all(body)?;
    }
    out.flush()?;
    drop(out);
    file.sync_all()?;
    Ok(())
}
