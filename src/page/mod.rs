//! Page-level storage for v0.2.0 files.
//!
//! A page is an immutable byte range of the table file. Writers own a
//! [`PageManager`] for the duration of one transaction; readers resolve
//! pages through a [`PageIndexReader`] snapshot taken at open time and never
//! see pages allocated after that snapshot.

mod index;
mod manager;

pub use index::PageIndexReader;
pub use manager::PageManager;

use crate::error::Result;
use crate::format::PageRef;
use std::fs::File;
use std::os::unix::fs::FileExt;

/// pread of a whole page. A short read surfaces as an `UnexpectedEof` I/O error.
pub(crate) fn read_page_at(file: &File, page: &PageRef) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; page.size as usize];
    file.read_exact_at(&mut buf, page.offset)?;
    Ok(buf)
}
