use super::read_page_at;
use crate::error::{Error, Result};
use crate::format::{PageIndexEntry, PageIndexKey, PageRef};
use std::collections::BTreeMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

/// Byte-range allocator over a table file.
///
/// Allocation appends at `end` unless a free range is large enough. The free
/// list is seeded with the index page of the superseded transaction; nothing
/// referenced by the current transaction is ever handed out again.
pub struct PageManager {
    file: Arc<File>,
    end: u64,
    free: Vec<PageRef>,
    index: BTreeMap<PageIndexKey, PageRef>,
}

impl PageManager {
    pub fn new(
        file: Arc<File>,
        end: u64,
        index: Vec<PageIndexEntry>,
        free_index: Option<PageRef>,
    ) -> Self {
        Self {
            file,
            end,
            free: free_index.into_iter().filter(|p| p.size > 0).collect(),
            index: index.into_iter().map(|e| (e.key, e.page)).collect(),
        }
    }

    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    /// First byte past every allocated page.
    pub fn allocated_bytes(&self) -> u64 {
        self.end
    }

    pub fn allocate_page(&mut self, size: u32) -> PageRef {
        let best_fit = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, p)| p.size >= size)
            .min_by_key(|(_, p)| p.size)
            .map(|(i, _)| i);

        if let Some(i) = best_fit {
            let free = self.free.swap_remove(i);
            if free.size > size {
                self.free.push(PageRef {
                    offset: free.offset + u64::from(size),
                    size: free.size - size,
                });
            }
            return PageRef {
                offset: free.offset,
                size,
            };
        }

        let page = PageRef {
            offset: self.end,
            size,
        };
        self.end += u64::from(size);
        page
    }

    pub fn write_page(&self, page: &PageRef, data: &[u8]) -> Result<()> {
        if data.len() != page.size as usize {
            return Err(Error::Runtime(format!(
                "page of {} bytes can't hold {} bytes",
                page.size,
                data.len()
            )));
        }
        self.file.write_all_at(data, page.offset)?;
        Ok(())
    }

    pub fn read_page(&self, page: &PageRef) -> Result<Vec<u8>> {
        read_page_at(&self.file, page)
    }

    /// Writes `data` into a fresh page and points `key` at it. Empty data
    /// drops the key instead.
    pub fn store_page(&mut self, key: PageIndexKey, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            self.index.remove(&key);
            return Ok(());
        }

        let size = u32::try_from(data.len()).map_err(|_| {
            Error::Runtime(format!("page of {} bytes exceeds the 4 GiB limit", data.len()))
        })?;
        let page = self.allocate_page(size);
        self.write_page(&page, data)?;
        self.index.insert(key, page);
        Ok(())
    }

    pub fn page(&self, key: &PageIndexKey) -> Option<PageRef> {
        self.index.get(key).copied()
    }

    /// Live pages of the transaction being built, ordered by key.
    pub fn get_page_index(&self) -> Vec<PageIndexEntry> {
        self.index
            .iter()
            .map(|(key, page)| PageIndexEntry {
                key: *key,
                page: *page,
            })
            .collect()
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
