use crate::column::{ColumnEntry, ColumnReader, Datum};
use crate::error::{Error, Result};
use crate::msg::{FieldType, MessageObject, MessageSchema, MessageSchemaField, MessageValue};
use crate::table::CSTableReader;
use std::collections::HashMap;

/// An OBJECT field on the path from the root to a leaf column.
#[derive(Debug, Clone, Copy)]
struct Parent {
    field_id: u32,
    repeated: bool,
    /// Definition level at which this object exists.
    dlevel: u64,
}

struct ColumnState {
    name: String,
    reader: ColumnReader,
    parents: Vec<Parent>,
    field_id: u32,
    field_type: FieldType,
    pending: Option<ColumnEntry>,
}

impl ColumnState {
    fn fetch(&mut self) -> Result<&ColumnEntry> {
        if self.pending.is_none() {
            self.pending = Some(self.reader.next()?.ok_or_else(|| {
                Error::IllegalState(format!("column '{}' has no more entries", self.name))
            })?);
        }
        self.pending
            .as_ref()
            .ok_or_else(|| Error::IllegalState(format!("column '{}' has no pending entry", self.name)))
    }

    fn consume(&mut self) -> Option<ColumnEntry> {
        self.pending.take()
    }

    /// True when the next entry starts a new record, or there is none.
    fn at_record_boundary(&self) -> bool {
        matches!(self.reader.next_repetition_level(), None | Some(0))
    }
}

/// Reassembles records from the leaf columns of a table.
///
/// Columns are read in schema order, one record at a time. Each column's
/// entries up to the next repetition level 0 are placed into the record tree
/// according to their levels.
pub struct RecordMaterializer {
    columns: Vec<ColumnState>,
    num_records: u64,
    position: u64,
}

impl RecordMaterializer {
    /// Reads the leaves of `schema` that exist in the table and, unless
    /// `columns` is empty, are listed in `columns`.
    pub fn new(schema: &MessageSchema, reader: &CSTableReader, columns: &[&str]) -> Result<Self> {
        let mut states = Vec::new();
        for field in schema.fields() {
            create_columns(field, "", 0, &[], reader, columns, &mut states)?;
        }
        Ok(Self {
            columns: states,
            num_records: reader.num_records(),
            position: 0,
        })
    }

    pub fn num_records(&self) -> u64 {
        self.num_records
    }

    pub fn next_record(&mut self) -> Result<MessageObject> {
        self.check_remaining()?;
        let mut arena = RecordArena::new();
        for column in &mut self.columns {
            load_column(column, &mut arena)?;
        }
        self.position += 1;
        Ok(arena.into_message())
    }

    pub fn skip_record(&mut self) -> Result<()> {
        self.check_remaining()?;
        for column in &mut self.columns {
            loop {
                column.fetch()?;
                column.consume();
                if column.at_record_boundary() {
                    break;
                }
            }
        }
        self.position += 1;
        Ok(())
    }

    fn check_remaining(&self) -> Result<()> {
        if self.position >= self.num_records {
            return Err(Error::IllegalState(format!(
                "all {} records have been read",
                self.num_records
            )));
        }
        Ok(())
    }
}

fn create_columns(
    field: &MessageSchemaField,
    prefix: &str,
    dlevel_max: u64,
    parents: &[Parent],
    reader: &CSTableReader,
    selected: &[&str],
    out: &mut Vec<ColumnState>,
) -> Result<()> {
    let name = format!("{}{}", prefix, field.name);
    let dlevel_max = dlevel_max + u64::from(field.repeated || field.optional);

    match field.field_type {
        FieldType::Object => {
            let subschema = field.schema.as_deref().ok_or_else(|| {
                Error::Runtime(format!("OBJECT field '{}' has no schema", name))
            })?;
            let mut parents = parents.to_vec();
            parents.push(Parent {
                field_id: field.id,
                repeated: field.repeated,
                dlevel: dlevel_max,
            });
            let prefix = format!("{}.", name);
            for sub in subschema.fields() {
                create_columns(sub, &prefix, dlevel_max, &parents, reader, selected, out)?;
            }
        }
        field_type => {
            if reader.has_column(&name) && (selected.is_empty() || selected.contains(&name.as_str()))
            {
                out.push(ColumnState {
                    reader: reader.get_column_reader(&name)?,
                    name,
                    parents: parents.to_vec(),
                    field_id: field.id,
                    field_type,
                    pending: None,
                });
            }
        }
    }
    Ok(())
}

fn load_column(column: &mut ColumnState, arena: &mut RecordArena) -> Result<()> {
    let mut indexes = vec![0usize; column.reader.rlevel_max() as usize];
    let mut first = true;

    loop {
        let rlevel = column.fetch()?.rlevel;
        if first && rlevel != 0 {
            return Err(Error::Format(format!(
                "column '{}' continues a record with rlevel {}",
                column.name, rlevel
            )));
        }
        first = false;

        if rlevel > 0 {
            let r = rlevel as usize;
            indexes[r - 1] += 1;
            for idx in indexes.iter_mut().skip(r) {
                *idx = 0;
            }
        }

        let entry = column
            .consume()
            .ok_or_else(|| Error::IllegalState(format!("column '{}' lost its entry", column.name)))?;
        match entry.value {
            Some(value) => {
                let node = arena.descend(ROOT, &column.parents, &indexes, None);
                let value = to_message_value(value, column.field_type)?;
                arena.push_value(node, column.field_id, value);
            }
            None => {
                arena.descend(ROOT, &column.parents, &indexes, Some(entry.dlevel));
            }
        }

        if column.at_record_boundary() {
            return Ok(());
        }
    }
}

fn to_message_value(value: Datum, field_type: FieldType) -> Result<MessageValue> {
    Ok(match field_type {
        FieldType::UInt32 => {
            let v = value.as_u64()?;
            MessageValue::UInt32(u32::try_from(v).map_err(|_| {
                Error::Runtime(format!("value {} overflows a UINT32 field", v))
            })?)
        }
        FieldType::UInt64 => MessageValue::UInt64(value.as_u64()?),
        FieldType::DateTime => MessageValue::DateTime(value.as_u64()?),
        FieldType::String => MessageValue::String(value.into_string()?),
        FieldType::Boolean => MessageValue::Boolean(value.as_bool()?),
        FieldType::Double => MessageValue::Double(value.as_f64()?),
        FieldType::Object => {
            return Err(Error::IllegalState(
                "OBJECT fields have no column".to_string(),
            ))
        }
    })
}

const ROOT: usize = 0;

struct Node {
    id: u32,
    value: Option<MessageValue>,
    children: Vec<usize>,
    /// Children that are objects, grouped by field id in insertion order.
    groups: HashMap<u32, Vec<usize>>,
}

impl Node {
    fn object(id: u32) -> Self {
        Self {
            id,
            value: None,
            children: Vec::new(),
            groups: HashMap::new(),
        }
    }
}

/// Record tree under construction. Nodes refer to each other by index so the
/// n-th object child of a field is found without scanning siblings.
struct RecordArena {
    nodes: Vec<Node>,
}

impl RecordArena {
    fn new() -> Self {
        Self {
            nodes: vec![Node::object(0)],
        }
    }

    /// The `nth` object child `field_id` of `parent`, created together with
    /// any missing predecessors.
    fn nth_child_or_create(&mut self, parent: usize, field_id: u32, nth: usize) -> usize {
        loop {
            let existing = self.nodes[parent].groups.get(&field_id).map_or(0, Vec::len);
            if existing > nth {
                return self.nodes[parent].groups[&field_id][nth];
            }
            let idx = self.nodes.len();
            self.nodes.push(Node::object(field_id));
            let node = &mut self.nodes[parent];
            node.children.push(idx);
            node.groups.entry(field_id).or_default().push(idx);
        }
    }

    /// Walks `parents` from `node`, creating objects as needed. With a null's
    /// `dlevel` the walk stops at the first parent that is not defined.
    fn descend(
        &mut self,
        mut node: usize,
        parents: &[Parent],
        indexes: &[usize],
        null_dlevel: Option<u64>,
    ) -> usize {
        let mut repeated_seen = 0;
        for parent in parents {
            if matches!(null_dlevel, Some(d) if parent.dlevel > d) {
                break;
            }
            let nth = if parent.repeated {
                let nth = indexes[repeated_seen];
                repeated_seen += 1;
                nth
            } else {
                0
            };
            node = self.nth_child_or_create(node, parent.field_id, nth);
        }
        node
    }

    fn push_value(&mut self, parent: usize, field_id: u32, value: MessageValue) {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            id: field_id,
            value: Some(value),
            children: Vec::new(),
            groups: HashMap::new(),
        });
        self.nodes[parent].children.push(idx);
    }

    fn into_message(mut self) -> MessageObject {
        self.build(ROOT)
    }

    fn build(&mut self, idx: usize) -> MessageObject {
        let children = std::mem::take(&mut self.nodes[idx].children);
        let id = self.nodes[idx].id;
        match self.nodes[idx].value.take() {
            Some(value) => MessageObject { id, value },
            None => MessageObject {
                id,
                value: MessageValue::Object(children.into_iter().map(|c| self.build(c)).collect()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CSTableBuilder;
    use crate::schema::TableSchema;
    use crate::table::CSTableWriter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn schema() -> Arc<MessageSchema> {
        let attr = Arc::new(MessageSchema::new(
            "Attr",
            vec![
                MessageSchemaField::new(1, "key", FieldType::String, 0, false, false),
                MessageSchemaField::new(2, "values", FieldType::UInt32, 0, true, false),
            ],
        ));
        let session = Arc::new(MessageSchema::new(
            "Session",
            vec![
                MessageSchemaField::new(1, "start", FieldType::DateTime, 0, false, false),
                MessageSchemaField::object(2, "attrs", true, true, attr),
                MessageSchemaField::new(3, "score", FieldType::Double, 0, false, true),
            ],
        ));
        Arc::new(MessageSchema::new(
            "User",
            vec![
                MessageSchemaField::new(1, "name", FieldType::String, 0, false, false),
                MessageSchemaField::new(2, "active", FieldType::Boolean, 0, false, true),
                MessageSchemaField::object(3, "sessions", true, true, session),
                MessageSchemaField::new(4, "tags", FieldType::String, 0, true, true),
            ],
        ))
    }

    fn records() -> Result<Vec<MessageObject>> {
        let mut a = MessageObject::new();
        a.add_child(1, "alice")?;
        a.add_child(2, true)?;
        {
            let s = a.add_object(3)?;
            s.add_child(1, MessageValue::DateTime(100))?;
            {
                let attr = s.add_object(2)?;
                attr.add_child(1, "lang")?;
                attr.add_child(2, 1u32)?;
                attr.add_child(2, 2u32)?;
            }
            s.add_object(2)?.add_child(1, "empty")?;
            s.add_child(3, 0.5)?;
        }
        {
            let s = a.add_object(3)?;
            s.add_child(1, MessageValue::DateTime(200))?;
        }
        a.add_child(4, "x")?;
        a.add_child(4, "y")?;

        let mut b = MessageObject::new();
        b.add_child(1, "bob")?;

        let mut c = MessageObject::new();
        c.add_child(1, "carol")?;
        c.add_child(2, false)?;
        {
            let s = c.add_object(3)?;
            s.add_child(1, MessageValue::DateTime(300))?;
            let attr = s.add_object(2)?;
            attr.add_child(1, "k")?;
            attr.add_child(2, 9u32)?;
        }
        c.add_child(4, "z")?;

        Ok(vec![a, b, c])
    }

    fn build(dir: &TempDir) -> Result<std::path::PathBuf> {
        let path = dir.path().join("users.cst");
        let schema = schema();
        let writer =
            CSTableWriter::create_file(&path, &TableSchema::from_message_schema(&schema)?, None)?;
        let mut builder = CSTableBuilder::new(writer, schema);
        for record in records()? {
            builder.add_record(&record)?;
        }
        builder.commit()?;
        Ok(path)
    }

    #[test]
    fn test_nested_round_trip() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = build(&dir)?;

        let reader = CSTableReader::open_file(&path)?;
        let mut materializer = RecordMaterializer::new(&schema(), &reader, &[])?;
        assert_eq!(materializer.num_records(), 3);

        for expected in records()? {
            assert_eq!(materializer.next_record()?, expected);
        }
        assert!(matches!(
            materializer.next_record(),
            Err(Error::IllegalState(_))
        ));
        Ok(())
    }

    #[test]
    fn test_skip_and_select_columns() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = build(&dir)?;
        let reader = CSTableReader::open_file(&path)?;

        let mut materializer = RecordMaterializer::new(&schema(), &reader, &["name", "tags"])?;
        materializer.skip_record()?;
        materializer.skip_record()?;

        let mut expected = MessageObject::new();
        expected.add_child(1, "carol")?;
        expected.add_child(4, "z")?;
        assert_eq!(materializer.next_record()?, expected);
        assert!(materializer.skip_record().is_err());
        Ok(())
    }
}
