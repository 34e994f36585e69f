//! Column tree of a table and its flattening into leaf columns.
//!
//! Leaf names are the dot-joined path of field names. Every repeated field on
//! the path adds one repetition level, every repeated or optional field one
//! definition level. Column ids are handed out depth-first in declaration
//! order, starting at 1; subrecords consume an id of their own.

use crate::error::{Error, Result};
use crate::format::{ColumnConfig, ColumnEncoding, ColumnType, MAX_LEVEL};
use crate::msg::{FieldType, MessageSchema};
use itertools::Itertools;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaColumn {
    pub name: String,
    pub logical_type: ColumnType,
    /// Ignored for subrecords.
    pub encoding: ColumnEncoding,
    pub type_size: u64,
    pub repeated: bool,
    pub optional: bool,
    pub subschema: Option<TableSchema>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    columns: Vec<SchemaColumn>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        logical_type: ColumnType,
        encoding: ColumnEncoding,
        repeated: bool,
        optional: bool,
        type_size: u64,
    ) {
        self.columns.push(SchemaColumn {
            name: name.into(),
            logical_type,
            encoding,
            type_size,
            repeated,
            optional,
            subschema: None,
        });
    }

    pub fn add_bool(&mut self, name: impl Into<String>, optional: bool) {
        self.add_column(
            name,
            ColumnType::Boolean,
            ColumnEncoding::BooleanBitpacked,
            false,
            optional,
            0,
        );
    }

    pub fn add_bool_array(&mut self, name: impl Into<String>, optional: bool) {
        self.add_column(
            name,
            ColumnType::Boolean,
            ColumnEncoding::BooleanBitpacked,
            true,
            optional,
            0,
        );
    }

    pub fn add_unsigned_integer(
        &mut self,
        name: impl Into<String>,
        optional: bool,
        encoding: ColumnEncoding,
    ) {
        self.add_column(name, ColumnType::UnsignedInt, encoding, false, optional, 0);
    }

    pub fn add_unsigned_integer_array(
        &mut self,
        name: impl Into<String>,
        optional: bool,
        encoding: ColumnEncoding,
    ) {
        self.add_column(name, ColumnType::UnsignedInt, encoding, true, optional, 0);
    }

    /// Signed values are zigzag-mapped onto `encoding`.
    pub fn add_signed_integer(
        &mut self,
        name: impl Into<String>,
        optional: bool,
        encoding: ColumnEncoding,
    ) {
        self.add_column(name, ColumnType::SignedInt, encoding, false, optional, 0);
    }

    pub fn add_signed_integer_array(
        &mut self,
        name: impl Into<String>,
        optional: bool,
        encoding: ColumnEncoding,
    ) {
        self.add_column(name, ColumnType::SignedInt, encoding, true, optional, 0);
    }

    pub fn add_float(&mut self, name: impl Into<String>, optional: bool) {
        self.add_column(
            name,
            ColumnType::Float,
            ColumnEncoding::FloatIeee754,
            false,
            optional,
            0,
        );
    }

    pub fn add_float_array(&mut self, name: impl Into<String>, optional: bool) {
        self.add_column(
            name,
            ColumnType::Float,
            ColumnEncoding::FloatIeee754,
            true,
            optional,
            0,
        );
    }

    pub fn add_string(&mut self, name: impl Into<String>, optional: bool) {
        self.add_column(
            name,
            ColumnType::String,
            ColumnEncoding::StringPlain,
            false,
            optional,
            0,
        );
    }

    pub fn add_string_array(&mut self, name: impl Into<String>, optional: bool) {
        self.add_column(
            name,
            ColumnType::String,
            ColumnEncoding::StringPlain,
            true,
            optional,
            0,
        );
    }

    pub fn add_datetime(&mut self, name: impl Into<String>, optional: bool) {
        self.add_column(
            name,
            ColumnType::DateTime,
            ColumnEncoding::UInt64Leb128,
            false,
            optional,
            0,
        );
    }

    pub fn add_datetime_array(&mut self, name: impl Into<String>, optional: bool) {
        self.add_column(
            name,
            ColumnType::DateTime,
            ColumnEncoding::UInt64Leb128,
            true,
            optional,
            0,
        );
    }

    pub fn add_subrecord(&mut self, name: impl Into<String>, schema: TableSchema, optional: bool) {
        self.push_subrecord(name.into(), schema, false, optional);
    }

    pub fn add_subrecord_array(
        &mut self,
        name: impl Into<String>,
        schema: TableSchema,
        optional: bool,
    ) {
        self.push_subrecord(name.into(), schema, true, optional);
    }

    fn push_subrecord(&mut self, name: String, schema: TableSchema, repeated: bool, optional: bool) {
        self.columns.push(SchemaColumn {
            name,
            logical_type: ColumnType::Subrecord,
            encoding: ColumnEncoding::UInt64Leb128,
            type_size: 0,
            repeated,
            optional,
            subschema: Some(schema),
        });
    }

    /// Table layout storing records of `schema`.
    pub fn from_message_schema(schema: &MessageSchema) -> Result<Self> {
        let mut table = TableSchema::new();
        for field in schema.fields() {
            let (logical_type, encoding) = match field.field_type {
                FieldType::Object => {
                    let subschema = field.schema.as_deref().ok_or_else(|| {
                        Error::Runtime(format!("OBJECT field '{}' has no schema", field.name))
                    })?;
                    table.push_subrecord(
                        field.name.clone(),
                        TableSchema::from_message_schema(subschema)?,
                        field.repeated,
                        field.optional,
                    );
                    continue;
                }
                FieldType::Boolean => (ColumnType::Boolean, ColumnEncoding::BooleanBitpacked),
                FieldType::String => (ColumnType::String, ColumnEncoding::StringPlain),
                FieldType::UInt32 | FieldType::UInt64 => {
                    (ColumnType::UnsignedInt, ColumnEncoding::UInt64Leb128)
                }
                FieldType::Double => (ColumnType::Float, ColumnEncoding::FloatIeee754),
                FieldType::DateTime => (ColumnType::DateTime, ColumnEncoding::UInt64Leb128),
            };
            table.add_column(
                field.name.clone(),
                logical_type,
                encoding,
                field.repeated,
                field.optional,
                field.type_size,
            );
        }
        Ok(table)
    }

    /// Leaf columns in depth-first declaration order.
    pub fn flat_columns(&self) -> Result<Vec<ColumnConfig>> {
        let mut columns = Vec::new();
        let mut next_id = 0;
        let mut path = Vec::new();
        self.flatten(&mut path, 0, 0, &mut next_id, &mut columns)?;

        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.column_name.as_str())) {
            return Err(Error::Runtime(format!(
                "duplicate column '{}'",
                dup.column_name
            )));
        }
        if let Some(deep) = columns.iter().find(|c| c.dlevel_max > MAX_LEVEL) {
            return Err(Error::Runtime(format!(
                "column '{}' is nested deeper than {} levels",
                deep.column_name, MAX_LEVEL
            )));
        }
        Ok(columns)
    }

    fn flatten<'a>(
        &'a self,
        path: &mut Vec<&'a str>,
        rlevel_max: u64,
        dlevel_max: u64,
        next_id: &mut u32,
        out: &mut Vec<ColumnConfig>,
    ) -> Result<()> {
        for column in &self.columns {
            *next_id += 1;
            let rmax = rlevel_max + u64::from(column.repeated);
            let dmax = dlevel_max + u64::from(column.repeated || column.optional);

            path.push(&column.name);
            match &column.subschema {
                Some(subschema) => subschema.flatten(path, rmax, dmax, next_id, out)?,
                None => out.push(ColumnConfig {
                    column_id: *next_id,
                    column_name: path.iter().join("."),
                    storage_type: column.encoding,
                    logical_type: column.logical_type,
                    rlevel_max: rmax,
                    dlevel_max: dmax,
                    body_offset: 0,
                    body_size: 0,
                }),
            }
            path.pop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::MessageSchemaField;
    use std::sync::Arc;

    #[test]
    fn test_flat_columns_levels() -> Result<()> {
        let mut link = TableSchema::new();
        link.add_string("url", false);
        link.add_unsigned_integer_array("ranks", true, ColumnEncoding::UInt32Bitpacked);

        let mut schema = TableSchema::new();
        schema.add_unsigned_integer("doc_id", false, ColumnEncoding::UInt64Plain);
        schema.add_subrecord_array("links", link, true);
        schema.add_bool("flag", true);

        let columns = schema.flat_columns()?;
        let summary: Vec<(&str, u32, u64, u64)> = columns
            .iter()
            .map(|c| (c.column_name.as_str(), c.column_id, c.rlevel_max, c.dlevel_max))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("doc_id", 1, 0, 0),
                ("links.url", 3, 1, 1),
                ("links.ranks", 4, 2, 2),
                ("flag", 5, 0, 1),
            ]
        );
        assert_eq!(columns[2].storage_type, ColumnEncoding::UInt32Bitpacked);
        Ok(())
    }

    #[test]
    fn test_from_message_schema() -> Result<()> {
        let inner = Arc::new(MessageSchema::new(
            "Item",
            vec![MessageSchemaField::new(1, "price", FieldType::Double, 0, false, true)],
        ));
        let msg = MessageSchema::new(
            "Order",
            vec![
                MessageSchemaField::new(1, "customer", FieldType::String, 0, false, false),
                MessageSchemaField::new(2, "qty", FieldType::UInt32, 0, false, true),
                MessageSchemaField::new(3, "time", FieldType::DateTime, 0, false, false),
                MessageSchemaField::object(4, "items", true, false, inner),
                MessageSchemaField::new(5, "paid", FieldType::Boolean, 0, false, false),
            ],
        );

        let columns = TableSchema::from_message_schema(&msg)?.flat_columns()?;
        let types: Vec<(&str, ColumnType, ColumnEncoding)> = columns
            .iter()
            .map(|c| (c.column_name.as_str(), c.logical_type, c.storage_type))
            .collect();
        assert_eq!(
            types,
            vec![
                ("customer", ColumnType::String, ColumnEncoding::StringPlain),
                ("qty", ColumnType::UnsignedInt, ColumnEncoding::UInt64Leb128),
                ("time", ColumnType::DateTime, ColumnEncoding::UInt64Leb128),
                ("items.price", ColumnType::Float, ColumnEncoding::FloatIeee754),
                ("paid", ColumnType::Boolean, ColumnEncoding::BooleanBitpacked),
            ]
        );
        assert_eq!((columns[3].rlevel_max, columns[3].dlevel_max), (1, 2));
        Ok(())
    }

    #[test]
    fn test_duplicate_columns() {
        let mut schema = TableSchema::new();
        schema.add_string("a", true);
        schema.add_float("a", true);
        assert!(matches!(schema.flat_columns(), Err(Error::Runtime(_))));
    }

    #[test]
    fn test_nesting_limit() -> Result<()> {
        let mut schema = TableSchema::new();
        schema.add_string_array("leaf", false);
        for depth in 1..MAX_LEVEL {
            let mut parent = TableSchema::new();
            parent.add_subrecord(format!("l{}", depth), schema, true);
            schema = parent;
        }
        assert_eq!(schema.flat_columns()?[0].dlevel_max, MAX_LEVEL);

        let mut parent = TableSchema::new();
        parent.add_subrecord("top", schema, true);
        assert!(matches!(parent.flat_columns(), Err(Error::Runtime(_))));
        Ok(())
    }
}
