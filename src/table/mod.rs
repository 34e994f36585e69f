//! Table files: transactional writers, snapshot readers and the in-process
//! lock that keeps two writers off the same file.

mod lock;
mod reader;
mod writer;

pub use lock::{LockManager, LockRef, WriteLockGuard};
pub use reader::CSTableReader;
pub use writer::CSTableWriter;
