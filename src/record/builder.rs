use super::RecordShredder;
use crate::column::ColumnWriter;
use crate::error::Result;
use crate::msg::{MessageObject, MessageSchema};
use crate::table::CSTableWriter;
use std::sync::Arc;

/// Writes whole records into a table, one row per record.
pub struct CSTableBuilder {
    writer: CSTableWriter,
    shredder: RecordShredder,
}

impl CSTableBuilder {
    pub fn new(writer: CSTableWriter, schema: Arc<MessageSchema>) -> Self {
        Self {
            writer,
            shredder: RecordShredder::new(schema),
        }
    }

    pub fn schema(&self) -> &Arc<MessageSchema> {
        self.shredder.schema()
    }

    pub fn add_record(&mut self, record: &MessageObject) -> Result<()> {
        self.shredder.shred(record, &mut self.writer)?;
        self.writer.add_row()
    }

    pub fn add_records<'a>(&mut self, records: impl IntoIterator<Item = &'a MessageObject>) -> Result<()> {
        for record in records {
            self.add_record(record)?;
        }
        Ok(())
    }

    pub fn num_records(&self) -> u64 {
        self.writer.num_rows()
    }

    /// Direct access to a column, for columns that are not part of the record
    /// schema.
    pub fn column_writer(&mut self, name: &str) -> Result<&mut ColumnWriter> {
        self.writer.get_column_writer(name)
    }

    pub fn writer(&self) -> &CSTableWriter {
        &self.writer
    }

    pub fn commit(&mut self) -> Result<()> {
        self.writer.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ColumnEncoding;
    use crate::msg::{FieldType, MessageSchemaField};
    use crate::record::RecordMaterializer;
    use crate::schema::TableSchema;
    use crate::table::CSTableReader;
    use tempfile::TempDir;

    #[test]
    fn test_extra_column() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.cst");
        let schema = Arc::new(MessageSchema::new(
            "Event",
            vec![MessageSchemaField::new(1, "kind", FieldType::String, 0, false, false)],
        ));
        let mut table = TableSchema::from_message_schema(&schema)?;
        table.add_unsigned_integer("__msgid", false, ColumnEncoding::UInt64Plain);

        let mut builder =
            CSTableBuilder::new(CSTableWriter::create_file(&path, &table, None)?, schema.clone());
        for (id, kind) in [(10u64, "open"), (11, "close")] {
            let mut record = MessageObject::new();
            record.add_child(1, kind)?;
            builder.add_record(&record)?;
            builder.column_writer("__msgid")?.write_uint(0, 0, id)?;
        }
        assert_eq!(builder.num_records(), 2);
        builder.commit()?;

        let reader = CSTableReader::open_file(&path)?;
        let mut ids = reader.get_column_reader("__msgid")?;
        assert_eq!(ids.next()?.and_then(|e| e.value).map(|v| v.as_u64()).transpose()?, Some(10));

        let mut records = RecordMaterializer::new(&schema, &reader, &[])?;
        assert_eq!(records.next_record()?.child(1)?.as_str()?, "open");
        assert_eq!(records.next_record()?.child(1)?.as_str()?, "close");
        Ok(())
    }
}
