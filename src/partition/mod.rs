//! A directory holding one record set.
//!
//! ```text
//! <dir>/LOCK           flock(2) held while the partition is open
//! <dir>/STATE          last checkpointed RecordSetState
//! <dir>/rs-<hex>.log   commit logs
//! <dir>/rs-<hex>.cst   datafiles
//! ```
//!
//! Files a compaction stops referencing are deleted only after a checkpoint
//! that no longer mentions them is on disk.

pub mod checkpoint;
mod tasks;

pub use tasks::{CheckpointTask, CompactionTask};

use crate::config::PartitionConfig;
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::msg::MessageSchema;
use crate::recordset::{CompactionOutcome, RecordSet, RecordSetState};
use crate::scheduler::Scheduler;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const LOCK_FILE: &str = "LOCK";
const FILENAME_PREFIX: &str = "rs-";

struct Checkpointed {
    /// Version of the state on disk, `None` before the first checkpoint.
    version: Option<u64>,
    /// Unreferenced files waiting for the next checkpoint.
    garbage: Vec<PathBuf>,
}

pub struct Partition {
    config: PartitionConfig,
    records: RecordSet,
    checkpointed: Mutex<Checkpointed>,
    _lock: FileLock,
}

impl Partition {
    pub fn open(config: PartitionConfig, schema: Arc<MessageSchema>) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let lock = FileLock::lock(config.dir.join(LOCK_FILE)).map_err(Error::LockError)?;

        let state = checkpoint::load(&config.dir)?;
        let version = state.as_ref().map(|s| s.version);
        let records = RecordSet::open(
            schema,
            config.dir.join(FILENAME_PREFIX),
            state.unwrap_or_default(),
        )?
        .with_sync_commitlog(config.sync_commitlog);

        let state = records.get_state()?;
        tracing::info!(
            dir = %config.dir.display(),
            version = state.version,
            datafiles = state.datafiles.len(),
            commitlogs = state.old_commitlogs.len() + usize::from(state.commitlog.is_some()),
            "Opened partition"
        );

        Ok(Self {
            config,
            records,
            checkpointed: Mutex::new(Checkpointed {
                version,
                garbage: Vec::new(),
            }),
            _lock: lock,
        })
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordSet {
        &self.records
    }

    pub fn state(&self) -> Result<RecordSetState> {
        self.records.get_state()
    }

    /// Appends a record, rolling the commit log once it outgrows
    /// `commitlog_max_size`.
    pub fn add_record(&self, id: u64, payload: &[u8]) -> Result<bool> {
        let added = self.records.add_record(id, payload)?;
        self.maybe_roll_commitlog()?;
        Ok(added)
    }

    pub fn add_records(&self, records: &[(u64, Vec<u8>)]) -> Result<usize> {
        let added = self.records.add_records(records)?;
        self.maybe_roll_commitlog()?;
        Ok(added)
    }

    fn maybe_roll_commitlog(&self) -> Result<()> {
        if self.records.commitlog_bytes()? > self.config.commitlog_max_size {
            self.records.roll_commitlog()?;
        }
        Ok(())
    }

    pub fn roll_commitlog(&self) -> Result<()> {
        self.records.roll_commitlog()
    }

    pub fn list_records(&self) -> Result<BTreeSet<u64>> {
        self.records.list_records()
    }

    pub fn num_records(&self) -> Result<u64> {
        self.records.num_records()
    }

    /// Writes the current state to STATE, then deletes the files earlier
    /// compactions left unreferenced.
    pub fn checkpoint(&self) -> Result<()> {
        let mut checkpointed = self.checkpointed.lock()?;
        self.write_checkpoint(&mut checkpointed)
    }

    /// Like [`checkpoint`](Self::checkpoint), but skipped when the state on
    /// disk is current. Returns whether a checkpoint was written.
    pub fn checkpoint_if_changed(&self) -> Result<bool> {
        let mut checkpointed = self.checkpointed.lock()?;
        if checkpointed.version == Some(self.records.get_state()?.version) {
            return Ok(false);
        }
        self.write_checkpoint(&mut checkpointed)?;
        Ok(true)
    }

    fn write_checkpoint(&self, checkpointed: &mut Checkpointed) -> Result<()> {
        let state = self.records.get_state()?;
        checkpoint::store(&self.config.dir, &state)?;
        checkpointed.version = Some(state.version);
        tracing::debug!(
            dir = %self.config.dir.display(),
            version = state.version,
            "Checkpointed partition"
        );

        for path in checkpointed.garbage.drain(..) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove unreferenced file");
            }
        }
        Ok(())
    }

    /// Rolls the commit log and merges every closed log into the datafiles.
    pub fn compact(&self) -> Result<CompactionOutcome> {
        self.records.roll_commitlog()?;
        let outcome = self.records.compact()?;

        if let CompactionOutcome::Compacted { deleted_files, .. } = &outcome {
            let mut checkpointed = self.checkpointed.lock()?;
            checkpointed.garbage.extend(deleted_files.iter().cloned());
            if self.config.checkpoint_after_compaction {
                self.write_checkpoint(&mut checkpointed)?;
            }
        }
        Ok(outcome)
    }

    /// Registers the background compaction and checkpoint tasks.
    pub fn schedule(self: &Arc<Self>, scheduler: &Scheduler) {
        scheduler
            .register(Arc::new(CompactionTask::new(self.clone())))
            .register(Arc::new(CheckpointTask::new(self.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{self, FieldType, MessageObject, MessageSchemaField};
    use tempfile::TempDir;

    fn schema() -> Arc<MessageSchema> {
        Arc::new(MessageSchema::new(
            "Event",
            vec![
                MessageSchemaField::new(1, "name", FieldType::String, 0, false, false),
                MessageSchemaField::new(2, "value", FieldType::UInt64, 0, false, true),
            ],
        ))
    }

    fn event(schema: &MessageSchema, name: &str, value: u64) -> Vec<u8> {
        let mut obj = MessageObject::new();
        obj.add_child(1, name).unwrap();
        obj.add_child(2, value).unwrap();
        msg::encode(&obj, schema).unwrap()
    }

    #[test]
    fn test_open_locks_directory() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::new(dir.path().join("p"));

        let partition = Partition::open(config.clone(), schema())?;
        assert!(matches!(
            Partition::open(config.clone(), schema()),
            Err(Error::LockError(_))
        ));

        drop(partition);
        Partition::open(config, schema())?;
        Ok(())
    }

    #[test]
    fn test_reopen_from_checkpoint() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::new(dir.path());
        let schema = schema();

        {
            let partition = Partition::open(config.clone(), schema.clone())?;
            partition.add_record(1, &event(&schema, "a", 1))?;
            partition.add_record(2, &event(&schema, "b", 2))?;
            partition.compact()?;
            partition.add_record(3, &event(&schema, "c", 3))?;
            partition.checkpoint()?;
        }

        let partition = Partition::open(config, schema.clone())?;
        assert_eq!(partition.list_records()?, BTreeSet::from([1, 2, 3]));
        assert_eq!(partition.num_records()?, 2);
        assert!(!partition.add_record(3, &event(&schema, "c", 3))?);
        Ok(())
    }

    #[test]
    fn test_commitlog_rolls_at_max_size() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::new(dir.path()).commitlog_max_size(64);
        let schema = schema();
        let partition = Partition::open(config, schema.clone())?;

        for id in 0..20 {
            partition.add_record(id, &event(&schema, "some event name", id))?;
        }
        let state = partition.state()?;
        assert!(state.old_commitlogs.len() > 1);
        assert!(state.commitlog_size <= 64 + 32);
        Ok(())
    }

    #[test]
    fn test_compaction_removes_unreferenced_files() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let schema = schema();
        let partition = Partition::open(PartitionConfig::new(dir.path()), schema.clone())?;

        partition.add_record(1, &event(&schema, "a", 1))?;
        let first_log = partition.state()?.commitlog.unwrap();
        let first = match partition.compact()? {
            CompactionOutcome::Compacted { datafile, .. } => datafile,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert!(!first_log.exists());
        assert!(first.exists());

        partition.add_record(2, &event(&schema, "b", 2))?;
        partition.compact()?;
        assert!(!first.exists());

        let on_disk = checkpoint::load(dir.path())?.unwrap();
        assert_eq!(on_disk, partition.state()?);
        assert_eq!(on_disk.datafiles.len(), 1);
        assert!(on_disk.datafiles[0].exists());
        Ok(())
    }

    #[test]
    fn test_deferred_garbage_collection() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let config = PartitionConfig::new(dir.path()).checkpoint_after_compaction(false);
        let schema = schema();
        let partition = Partition::open(config, schema.clone())?;

        partition.add_record(1, &event(&schema, "a", 1))?;
        let log = partition.state()?.commitlog.unwrap();
        partition.compact()?;

        // STATE does not exist yet, the log must survive until it does
        assert!(log.exists());
        assert!(partition.checkpoint_if_changed()?);
        assert!(!log.exists());
        assert!(!partition.checkpoint_if_changed()?);
        Ok(())
    }

    #[test]
    fn test_compact_without_logs() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let partition = Partition::open(PartitionConfig::new(dir.path()), schema())?;
        assert_eq!(partition.compact()?, CompactionOutcome::NothingToDo);
        assert_eq!(checkpoint::load(dir.path())?, None);
        Ok(())
    }
}
