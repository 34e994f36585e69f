//! A set of records addressed by 64-bit ids.
//!
//! New records are appended to a commit log. Closed logs are periodically
//! merged into an immutable CSTable datafile that carries the ids in an extra
//! `__msgid` column. Ids already present in a commit log are ignored, so
//! adding the same record twice is harmless.

mod commitlog;
mod compaction;

pub use compaction::{datafile_schema, read_msgids, CompactionOutcome};

use crate::error::{Error, Result};
use crate::msg::MessageSchema;
use crate::table::CSTableReader;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, TryLockError};

pub const MSGID_COLUMN: &str = "__msgid";

/// Everything needed to reopen a record set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSetState {
    /// Oldest first.
    pub datafiles: Vec<PathBuf>,
    /// Active commit log.
    pub commitlog: Option<PathBuf>,
    /// Logical size of the active commit log.
    pub commitlog_size: u64,
    /// Closed logs waiting for compaction.
    pub old_commitlogs: BTreeSet<PathBuf>,
    /// Bumped on every change.
    pub version: u64,
}

impl RecordSetState {
    /// Every file the state refers to.
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.datafiles
            .iter()
            .chain(self.commitlog.iter())
            .chain(self.old_commitlogs.iter())
    }
}

struct Inner {
    state: RecordSetState,
    commitlog_ids: HashSet<u64>,
}

pub struct RecordSet {
    schema: Arc<MessageSchema>,
    filename_prefix: PathBuf,
    sync_commitlog: bool,
    inner: Mutex<Inner>,
    compaction: Mutex<()>,
}

impl RecordSet {
    /// Opens a record set from a saved state, replaying its commit logs to
    /// rebuild the set of staged ids. New files are named
    /// `<filename_prefix><random hex>.{log,cst}`.
    pub fn open(
        schema: Arc<MessageSchema>,
        filename_prefix: impl Into<PathBuf>,
        state: RecordSetState,
    ) -> Result<Self> {
        let mut commitlog_ids = HashSet::new();
        for log in &state.old_commitlogs {
            commitlog::replay(log, None, |id, _| {
                commitlog_ids.insert(id);
                Ok(())
            })?;
        }
        if let Some(log) = &state.commitlog {
            commitlog::replay(log, Some(state.commitlog_size), |id, _| {
                commitlog_ids.insert(id);
                Ok(())
            })?;
        }

        Ok(Self {
            schema,
            filename_prefix: filename_prefix.into(),
            sync_commitlog: false,
            inner: Mutex::new(Inner {
                state,
                commitlog_ids,
            }),
            compaction: Mutex::new(()),
        })
    }

    /// fsync the commit log after every append.
    pub fn with_sync_commitlog(mut self, sync: bool) -> Self {
        self.sync_commitlog = sync;
        self
    }

    pub fn schema(&self) -> &Arc<MessageSchema> {
        &self.schema
    }

    pub fn get_state(&self) -> Result<RecordSetState> {
        Ok(self.inner.lock()?.state.clone())
    }

    /// Number of distinct ids staged in commit logs.
    pub fn commitlog_size(&self) -> Result<usize> {
        Ok(self.inner.lock()?.commitlog_ids.len())
    }

    /// Bytes written to the active commit log.
    pub fn commitlog_bytes(&self) -> Result<u64> {
        Ok(self.inner.lock()?.state.commitlog_size)
    }

    /// Appends a record unless its id is already staged. Returns whether it
    /// was appended.
    pub fn add_record(&self, id: u64, payload: &[u8]) -> Result<bool> {
        let mut buf = Vec::with_capacity(payload.len() + 18);
        commitlog::encode_record(id, payload, &mut buf);

        let mut inner = self.inner.lock()?;
        if inner.commitlog_ids.contains(&id) {
            return Ok(false);
        }
        self.append(&mut inner, &buf)?;
        inner.commitlog_ids.insert(id);
        Ok(true)
    }

    /// Appends the records whose ids are not staged yet in a single write.
    /// Returns how many were appended.
    pub fn add_records(&self, records: &[(u64, Vec<u8>)]) -> Result<usize> {
        let mut inner = self.inner.lock()?;
        let mut buf = Vec::new();
        let mut added = Vec::new();
        for (id, payload) in records {
            if inner.commitlog_ids.contains(id) || added.contains(id) {
                continue;
            }
            commitlog::encode_record(*id, payload, &mut buf);
            added.push(*id);
        }
        if added.is_empty() {
            return Ok(0);
        }

        self.append(&mut inner, &buf)?;
        inner.commitlog_ids.extend(&added);
        Ok(added.len())
    }

    fn append(&self, inner: &mut Inner, buf: &[u8]) -> Result<()> {
        let (path, offset) = match &inner.state.commitlog {
            Some(path) => (path.clone(), inner.state.commitlog_size),
            None => (self.new_filename("log"), 0),
        };
        commitlog::append(&path, offset, buf, self.sync_commitlog)?;

        if inner.state.commitlog.is_none() {
            inner.state.commitlog = Some(path);
            inner.state.version += 1;
        }
        inner.state.commitlog_size = offset + buf.len() as u64;
        Ok(())
    }

    /// Closes the active commit log so the next compaction picks it up.
    pub fn roll_commitlog(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let Some(log) = inner.state.commitlog.take() else {
            return Ok(());
        };
        let size = inner.state.commitlog_size;
        if let Err(e) = commitlog::truncate(&log, size) {
            inner.state.commitlog = Some(log);
            return Err(e);
        }

        inner.state.old_commitlogs.insert(log);
        inner.state.commitlog_size = 0;
        inner.state.version += 1;
        Ok(())
    }

    /// Merges the closed commit logs into a new datafile that replaces the
    /// most recent one. Concurrent calls are skipped, not queued.
    pub fn compact(&self) -> Result<CompactionOutcome> {
        let _guard = match self.compaction.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Ok(CompactionOutcome::Skipped),
            Err(TryLockError::Poisoned(_)) => return Err(Error::MutexPoisoned),
        };

        let snap = self.get_state()?;
        if snap.old_commitlogs.is_empty() {
            return Ok(CompactionOutcome::NothingToDo);
        }

        tracing::info!(
            datafiles = snap.datafiles.len(),
            commitlogs = snap.old_commitlogs.len(),
            "Starting compaction"
        );

        let datafile = self.new_filename("cst");
        let new_ids = match compaction::merge(&self.schema, &snap, &datafile) {
            Ok(ids) => ids,
            Err(e) => {
                if let Err(rm) = std::fs::remove_file(&datafile) {
                    tracing::warn!(path = %datafile.display(), error = %rm, "Failed to remove partial datafile");
                }
                return Err(e);
            }
        };

        let mut inner = self.inner.lock()?;
        let mut deleted_files = Vec::new();
        if !snap.datafiles.is_empty() {
            deleted_files.extend(inner.state.datafiles.pop());
        }
        inner.state.datafiles.push(datafile.clone());
        for log in &snap.old_commitlogs {
            if inner.state.old_commitlogs.remove(log) {
                deleted_files.push(log.clone());
            }
        }
        for id in &new_ids {
            inner.commitlog_ids.remove(id);
        }
        inner.state.version += 1;

        tracing::info!(
            datafile = %datafile.display(),
            datafiles = inner.state.datafiles.len(),
            merged_ids = new_ids.len(),
            "Completed compaction"
        );
        Ok(CompactionOutcome::Compacted {
            datafile,
            deleted_files,
        })
    }

    /// Ids in every datafile plus the ids staged in commit logs.
    pub fn list_records(&self) -> Result<BTreeSet<u64>> {
        self.read_datafiles(|datafiles, staged| {
            let mut ids: BTreeSet<u64> = staged.iter().copied().collect();
            for datafile in datafiles {
                let reader = CSTableReader::open_file(datafile)?;
                read_msgids(&reader, |id| {
                    ids.insert(id);
                    Ok(())
                })?;
            }
            Ok(ids)
        })
    }

    /// Rows across all datafiles. Records still in commit logs are not counted.
    pub fn num_records(&self) -> Result<u64> {
        self.read_datafiles(|datafiles, _| {
            datafiles.iter().try_fold(0, |sum, datafile| {
                Ok(sum + CSTableReader::open_file(datafile)?.num_records())
            })
        })
    }

    /// Runs `f` over the datafiles and staged ids of one consistent state.
    /// A compaction may replace a datafile and have it deleted while `f` is
    /// reading; a missing file is retried on the newer state and reported
    /// only when the state did not change.
    fn read_datafiles<T>(
        &self,
        mut f: impl FnMut(&[PathBuf], &HashSet<u64>) -> Result<T>,
    ) -> Result<T> {
        loop {
            let (datafiles, staged, version) = {
                let inner = self.inner.lock()?;
                (
                    inner.state.datafiles.clone(),
                    inner.commitlog_ids.clone(),
                    inner.state.version,
                )
            };

            match f(&datafiles, &staged) {
                Err(Error::IoError(e)) if e.kind() == io::ErrorKind::NotFound => {
                    if self.inner.lock()?.state.version == version {
                        return Err(Error::IoError(e));
                    }
                    tracing::debug!(error = %e, "Datafile replaced while reading, retrying");
                }
                result => return result,
            }
        }
    }

    fn new_filename(&self, extension: &str) -> PathBuf {
        let mut name = OsString::from(self.filename_prefix.as_os_str());
        name.push(format!("{:016x}.{}", rand::random::<u64>(), extension));
        PathBuf::from(name)
    }

    pub fn filename_prefix(&self) -> &Path {
        &self.filename_prefix
    }
}
