use super::{commitlog, RecordSetState, MSGID_COLUMN};
use crate::error::{Error, Result};
use crate::format::ColumnEncoding;
use crate::msg::{self, MessageSchema};
use crate::record::{CSTableBuilder, RecordMaterializer};
use crate::schema::TableSchema;
use crate::table::{CSTableReader, CSTableWriter};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of [`RecordSet::compact`](super::RecordSet::compact).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Another compaction was running.
    Skipped,
    /// No closed commit log to merge.
    NothingToDo,
    Compacted {
        datafile: PathBuf,
        /// Files no longer referenced by the state. The record set does not
        /// delete them.
        deleted_files: Vec<PathBuf>,
    },
}

/// Table layout of a datafile: the record columns plus `__msgid`.
pub fn datafile_schema(schema: &MessageSchema) -> Result<TableSchema> {
    let mut table = TableSchema::from_message_schema(schema)?;
    table.add_unsigned_integer(MSGID_COLUMN, false, ColumnEncoding::UInt64Plain);
    Ok(table)
}

/// Reads the `__msgid` of every row of a datafile.
pub fn read_msgids(reader: &CSTableReader, mut f: impl FnMut(u64) -> Result<()>) -> Result<()> {
    let mut ids = reader.get_column_reader(MSGID_COLUMN)?;
    for _ in 0..reader.num_records() {
        let id = ids
            .next()?
            .and_then(|e| e.value)
            .ok_or_else(|| {
                Error::Format(format!(
                    "{} has fewer ids than rows",
                    reader.path().display()
                ))
            })?
            .as_u64()?;
        f(id)?;
    }
    Ok(())
}

/// Writes the merge of the last datafile and the closed commit logs of
/// `snap` to `out`. Returns the ids seen in the commit logs.
pub(super) fn merge(
    schema: &Arc<MessageSchema>,
    snap: &RecordSetState,
    out: &Path,
) -> Result<HashSet<u64>> {
    let writer = CSTableWriter::create_file(out, &datafile_schema(schema)?, None)?;
    let mut builder = CSTableBuilder::new(writer, schema.clone());

    let mut old_ids = HashSet::new();
    let last = snap.datafiles.len().checked_sub(1);
    for (i, datafile) in snap.datafiles.iter().enumerate() {
        let reader = CSTableReader::open_file(datafile)?;
        if Some(i) != last {
            read_msgids(&reader, |id| {
                old_ids.insert(id);
                Ok(())
            })?;
            continue;
        }

        let mut records = RecordMaterializer::new(schema, &reader, &[])?;
        read_msgids(&reader, |id| {
            old_ids.insert(id);
            let record = records.next_record()?;
            builder.add_record(&record)?;
            builder.column_writer(MSGID_COLUMN)?.write_uint(0, 0, id)
        })?;
    }

    let mut new_ids = HashSet::new();
    for log in &snap.old_commitlogs {
        commitlog::replay(log, None, |id, data| {
            if !new_ids.insert(id) || old_ids.contains(&id) {
                return Ok(());
            }
            let record = msg::decode(data, schema)?;
            builder.add_record(&record)?;
            builder.column_writer(MSGID_COLUMN)?.write_uint(0, 0, id)
        })?;
    }

    builder.commit()?;
    tracing::debug!(
        path = %out.display(),
        rows = builder.num_records(),
        "Wrote compacted datafile"
    );
    Ok(new_ids)
}
