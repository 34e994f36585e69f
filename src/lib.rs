//! Columnar storage for nested records.
//!
//! Records described by a [`msg::MessageSchema`] are shredded into columns of
//! (repetition level, definition level, value) triples and stored in CSTable
//! files. Version 0.2.0 files are paged and transactional: a writer publishes
//! a new transaction through one of two checksummed metablock slots while
//! readers keep the snapshot they opened. On top of the table format sits a
//! [`recordset::RecordSet`], an id-addressed set of records that stages
//! writes in commit logs and compacts them into datafiles, and a
//! [`partition::Partition`] that persists the record set in a directory.

pub mod column;
pub mod config;
pub mod encoding;
pub mod error;
pub mod flock;
pub mod format;
pub mod msg;
pub mod page;
pub mod partition;
pub mod record;
pub mod recordset;
pub mod scheduler;
pub mod schema;
pub mod table;

pub use error::{Error, Result};
