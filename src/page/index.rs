use super::read_page_at;
use crate::error::{Error, Result};
use crate::format::{v0_2_0, PageIndexEntry, PageIndexKey, PageRef};
use std::collections::HashMap;
use std::fs::File;
use std::sync::Arc;

/// Immutable view of one transaction's page index.
pub struct PageIndexReader {
    file: Arc<File>,
    pages: HashMap<PageIndexKey, PageRef>,
}

impl PageIndexReader {
    /// Loads and validates the index page of a transaction.
    pub fn open(file: Arc<File>, index_page: PageRef, file_size: u64) -> Result<Self> {
        if index_page.end() > file_size {
            return Err(Error::Format(format!(
                "index page {:?} lies beyond the end of the file ({} bytes)",
                index_page, file_size
            )));
        }

        let data = read_page_at(&file, &index_page)?;
        let entries = v0_2_0::read_index(&data)?;
        if let Some(bad) = entries.iter().find(|e| e.page.end() > file_size) {
            return Err(Error::Format(format!(
                "page {:?} of column {} lies beyond the end of the file",
                bad.page, bad.key.column_id
            )));
        }

        Ok(Self::from_entries(file, entries))
    }

    pub fn from_entries(file: Arc<File>, entries: Vec<PageIndexEntry>) -> Self {
        Self {
            file,
            pages: entries.into_iter().map(|e| (e.key, e.page)).collect(),
        }
    }

    pub fn page(&self, key: &PageIndexKey) -> Option<PageRef> {
        self.pages.get(key).copied()
    }

    pub fn entries(&self) -> Vec<PageIndexEntry> {
        self.pages
            .iter()
            .map(|(key, page)| PageIndexEntry {
                key: *key,
                page: *page,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Contents of the page registered under `key`, `None` if the stream
    /// was never written.
    pub fn read_page(&self, key: &PageIndexKey) -> Result<Option<Vec<u8>>> {
        match self.pages.get(key) {
            Some(page) => Ok(Some(read_page_at(&self.file, page)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::PageIndexEntryType;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_open_index_page() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.cst");

        let data_key = PageIndexKey {
            column_id: 2,
            entry_type: PageIndexEntryType::Data,
        };
        let mut index = Vec::new();
        v0_2_0::write_index(
            &[PageIndexEntry {
                key: data_key,
                page: PageRef { offset: 0, size: 5 },
            }],
            &mut index,
        )?;

        let mut file = File::create(&path)?;
        file.write_all(b"abcde")?;
        file.write_all(&index)?;
        drop(file);

        let file = Arc::new(File::open(&path)?);
        let index_page = PageRef {
            offset: 5,
            size: index.len() as u32,
        };
        let reader = PageIndexReader::open(file.clone(), index_page, 5 + index.len() as u64)?;
        assert_eq!(reader.len(), 1);
        assert_eq!(reader.read_page(&data_key)?, Some(b"abcde".to_vec()));

        let missing = PageIndexKey {
            column_id: 2,
            entry_type: PageIndexEntryType::RLevel,
        };
        assert_eq!(reader.read_page(&missing)?, None);

        // a file_size that doesn't cover the index is corruption
        assert!(matches!(
            PageIndexReader::open(file, index_page, 6),
            Err(Error::Format(_))
        ));
        Ok(())
    }
}
