use crate::column::Datum;
use crate::error::{Error, Result};
use crate::msg::{FieldType, MessageObject, MessageSchema, MessageSchemaField, MessageValue};
use crate::table::CSTableWriter;
use std::sync::Arc;

/// Splits records into the leaf columns of a table, computing repetition and
/// definition levels along the way.
#[derive(Debug, Clone)]
pub struct RecordShredder {
    schema: Arc<MessageSchema>,
}

impl RecordShredder {
    pub fn new(schema: Arc<MessageSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<MessageSchema> {
        &self.schema
    }

    /// Writes one record. Does not count the row; see [`CSTableWriter::add_row`].
    pub fn shred(&self, record: &MessageObject, writer: &mut CSTableWriter) -> Result<()> {
        shred_fields(writer, record, &self.schema, "", 0, 0, 0)
    }
}

fn shred_fields(
    writer: &mut CSTableWriter,
    record: &MessageObject,
    schema: &MessageSchema,
    prefix: &str,
    rlevel: u64,
    rlevel_max: u64,
    dlevel: u64,
) -> Result<()> {
    for field in schema.fields() {
        let column = format!("{}{}", prefix, field.name);
        shred_field(writer, record, field, &column, rlevel, rlevel_max, dlevel)?;
    }
    Ok(())
}

fn shred_field(
    writer: &mut CSTableWriter,
    record: &MessageObject,
    field: &MessageSchemaField,
    column: &str,
    rlevel: u64,
    rlevel_max: u64,
    dlevel: u64,
) -> Result<()> {
    let rlevel_max = rlevel_max + u64::from(field.repeated);
    let next_dlevel = dlevel + u64::from(field.repeated || field.optional);

    let mut next_rlevel = rlevel;
    let mut count = 0;
    for child in record.children(field.id) {
        if count > 0 && !field.repeated {
            return Err(Error::Runtime(format!(
                "field '{}' is not repeated but has several values",
                column
            )));
        }

        match field.field_type {
            FieldType::Object => {
                let subschema = field.schema.as_deref().ok_or_else(|| {
                    Error::Runtime(format!("OBJECT field '{}' has no schema", column))
                })?;
                shred_fields(
                    writer,
                    child,
                    subschema,
                    &format!("{}.", column),
                    next_rlevel,
                    rlevel_max,
                    next_dlevel,
                )?;
            }
            _ => {
                let value = to_datum(child)?;
                writer
                    .get_column_writer(column)?
                    .add_datum(next_rlevel, next_dlevel, Some(value))?;
            }
        }

        next_rlevel = rlevel_max;
        count += 1;
    }

    if count == 0 {
        if !field.repeated && !field.optional {
            return Err(Error::Runtime(format!("missing field: {}", column)));
        }
        write_nulls(writer, field, column, rlevel, dlevel)?;
    }
    Ok(())
}

/// Marks `field` absent at (`rlevel`, `dlevel`) in every leaf below it.
fn write_nulls(
    writer: &mut CSTableWriter,
    field: &MessageSchemaField,
    column: &str,
    rlevel: u64,
    dlevel: u64,
) -> Result<()> {
    match (&field.field_type, field.schema.as_deref()) {
        (FieldType::Object, Some(subschema)) => {
            for sub in subschema.fields() {
                let name = format!("{}.{}", column, sub.name);
                write_nulls(writer, sub, &name, rlevel, dlevel)?;
            }
            Ok(())
        }
        (FieldType::Object, None) => Err(Error::Runtime(format!(
            "OBJECT field '{}' has no schema",
            column
        ))),
        _ => writer.get_column_writer(column)?.write_null(rlevel, dlevel),
    }
}

fn to_datum(value: &MessageObject) -> Result<Datum> {
    Ok(match &value.value {
        MessageValue::String(s) => Datum::Str(s.as_bytes().to_vec()),
        MessageValue::Boolean(b) => Datum::Bool(*b),
        MessageValue::UInt32(v) => Datum::UInt(u64::from(*v)),
        MessageValue::UInt64(v) | MessageValue::DateTime(v) => Datum::UInt(*v),
        MessageValue::Double(v) => Datum::Float(*v),
        MessageValue::Object(_) => {
            return Err(Error::Runtime(format!(
                "field {} holds an object where a value was expected",
                value.id
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use crate::table::CSTableReader;
    use tempfile::TempDir;

    fn schema() -> Arc<MessageSchema> {
        let link = Arc::new(MessageSchema::new(
            "Link",
            vec![MessageSchemaField::new(1, "url", FieldType::String, 0, false, false)],
        ));
        Arc::new(MessageSchema::new(
            "Doc",
            vec![
                MessageSchemaField::new(1, "id", FieldType::UInt64, 0, false, false),
                MessageSchemaField::object(2, "links", true, false, link),
            ],
        ))
    }

    fn levels(reader: &CSTableReader, column: &str) -> Result<Vec<(u64, u64)>> {
        let mut col = reader.get_column_reader(column)?;
        let mut out = Vec::new();
        while let Some(e) = col.next()? {
            out.push((e.rlevel, e.dlevel));
        }
        Ok(out)
    }

    #[test]
    fn test_levels() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.cst");
        let schema = schema();
        let shredder = RecordShredder::new(schema.clone());
        let mut writer =
            CSTableWriter::create_file(&path, &TableSchema::from_message_schema(&schema)?, None)?;

        let mut a = MessageObject::new();
        a.add_child(1, 1u64)?;
        a.add_object(2)?.add_child(1, "x")?;
        a.add_object(2)?.add_child(1, "y")?;
        shredder.shred(&a, &mut writer)?;

        let mut b = MessageObject::new();
        b.add_child(1, 2u64)?;
        shredder.shred(&b, &mut writer)?;
        writer.add_rows(2)?;
        writer.commit()?;

        let reader = CSTableReader::open_file(&path)?;
        assert_eq!(levels(&reader, "id")?, vec![(0, 0), (0, 0)]);
        assert_eq!(levels(&reader, "links.url")?, vec![(0, 1), (1, 1), (0, 0)]);
        Ok(())
    }

    #[test]
    fn test_missing_required_field() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let schema = schema();
        let mut writer = CSTableWriter::create_file(
            dir.path().join("t.cst"),
            &TableSchema::from_message_schema(&schema)?,
            None,
        )?;

        let mut record = MessageObject::new();
        record.add_object(2)?.add_child(1, "x")?;
        match RecordShredder::new(schema).shred(&record, &mut writer) {
            Err(Error::Runtime(msg)) => assert_eq!(msg, "missing field: id"),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
        Ok(())
    }
}
