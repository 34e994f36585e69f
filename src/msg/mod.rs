//! In-memory record model: a schema of numbered, typed fields and a tree of
//! values addressed by field id.
//!
//! Records are what the shredder splits into columns and what the
//! materializer reassembles. The commit log stores them in the protobuf wire
//! format produced by [`encode`].

mod codec;

pub use codec::{decode, encode};

use crate::error::{Error, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Object,
    String,
    Boolean,
    UInt32,
    UInt64,
    Double,
    DateTime,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::Object => "OBJECT",
            FieldType::String => "STRING",
            FieldType::Boolean => "BOOLEAN",
            FieldType::UInt32 => "UINT32",
            FieldType::UInt64 => "UINT64",
            FieldType::Double => "DOUBLE",
            FieldType::DateTime => "DATETIME",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageSchemaField {
    pub id: u32,
    pub name: String,
    pub field_type: FieldType,
    /// Upper bound hint for strings and integers; 0 means unbounded.
    pub type_size: u64,
    pub repeated: bool,
    pub optional: bool,
    pub schema: Option<Arc<MessageSchema>>,
}

impl MessageSchemaField {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        field_type: FieldType,
        type_size: u64,
        repeated: bool,
        optional: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
            type_size,
            repeated,
            optional,
            schema: None,
        }
    }

    pub fn object(
        id: u32,
        name: impl Into<String>,
        repeated: bool,
        optional: bool,
        schema: Arc<MessageSchema>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            field_type: FieldType::Object,
            type_size: 0,
            repeated,
            optional,
            schema: Some(schema),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageSchema {
    name: String,
    fields: Vec<MessageSchemaField>,
}

impl MessageSchema {
    pub fn new(name: impl Into<String>, fields: Vec<MessageSchemaField>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[MessageSchemaField] {
        &self.fields
    }

    pub fn add_field(&mut self, field: MessageSchemaField) {
        self.fields.push(field);
    }

    pub fn has_field(&self, id: u32) -> bool {
        self.field(id).is_some()
    }

    pub fn field(&self, id: u32) -> Option<&MessageSchemaField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&MessageSchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_id(&self, name: &str) -> Result<u32> {
        self.field_by_name(name)
            .map(|f| f.id)
            .ok_or_else(|| Error::NotFound(format!("field '{}' in schema {}", name, self.name)))
    }

    /// Subschema of an OBJECT field.
    pub fn field_schema(&self, id: u32) -> Result<&MessageSchema> {
        let field = self
            .field(id)
            .ok_or_else(|| Error::NotFound(format!("field id {} in schema {}", id, self.name)))?;
        field.schema.as_deref().ok_or_else(|| {
            Error::Runtime(format!("field '{}' is not an OBJECT field", field.name))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageValue {
    Object(Vec<MessageObject>),
    String(String),
    Boolean(bool),
    UInt32(u32),
    UInt64(u64),
    Double(f64),
    /// Microseconds since the unix epoch.
    DateTime(u64),
}

impl MessageValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            MessageValue::Object(_) => FieldType::Object,
            MessageValue::String(_) => FieldType::String,
            MessageValue::Boolean(_) => FieldType::Boolean,
            MessageValue::UInt32(_) => FieldType::UInt32,
            MessageValue::UInt64(_) => FieldType::UInt64,
            MessageValue::Double(_) => FieldType::Double,
            MessageValue::DateTime(_) => FieldType::DateTime,
        }
    }
}

impl From<&str> for MessageValue {
    fn from(value: &str) -> Self {
        MessageValue::String(value.to_string())
    }
}

impl From<String> for MessageValue {
    fn from(value: String) -> Self {
        MessageValue::String(value)
    }
}

impl From<bool> for MessageValue {
    fn from(value: bool) -> Self {
        MessageValue::Boolean(value)
    }
}

impl From<u32> for MessageValue {
    fn from(value: u32) -> Self {
        MessageValue::UInt32(value)
    }
}

impl From<u64> for MessageValue {
    fn from(value: u64) -> Self {
        MessageValue::UInt64(value)
    }
}

impl From<f64> for MessageValue {
    fn from(value: f64) -> Self {
        MessageValue::Double(value)
    }
}

/// One node of a record tree. The root is an OBJECT with id 0.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageObject {
    pub id: u32,
    pub value: MessageValue,
}

impl Default for MessageObject {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageObject {
    pub fn new() -> Self {
        Self::object(0)
    }

    pub fn object(id: u32) -> Self {
        Self {
            id,
            value: MessageValue::Object(Vec::new()),
        }
    }

    pub fn with_value(id: u32, value: impl Into<MessageValue>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }

    pub fn field_type(&self) -> FieldType {
        self.value.field_type()
    }

    pub fn add_child(
        &mut self,
        id: u32,
        value: impl Into<MessageValue>,
    ) -> Result<&mut MessageObject> {
        let children = self.children_mut()?;
        let idx = children.len();
        children.push(MessageObject::with_value(id, value));
        Ok(&mut children[idx])
    }

    pub fn add_object(&mut self, id: u32) -> Result<&mut MessageObject> {
        self.add_child(id, MessageValue::Object(Vec::new()))
    }

    pub fn children_mut(&mut self) -> Result<&mut Vec<MessageObject>> {
        let (id, field_type) = (self.id, self.field_type());
        match &mut self.value {
            MessageValue::Object(children) => Ok(children),
            _ => Err(type_error(id, FieldType::Object, field_type)),
        }
    }

    pub fn as_object(&self) -> Result<&[MessageObject]> {
        match &self.value {
            MessageValue::Object(children) => Ok(children),
            other => Err(type_error(self.id, FieldType::Object, other.field_type())),
        }
    }

    /// First child with the given field id.
    pub fn child(&self, id: u32) -> Result<&MessageObject> {
        self.as_object()?
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NotFound(format!("child with field id {}", id)))
    }

    pub fn children(&self, id: u32) -> impl Iterator<Item = &MessageObject> {
        let children: &[MessageObject] = match &self.value {
            MessageValue::Object(children) => children,
            _ => &[],
        };
        children.iter().filter(move |c| c.id == id)
    }

    pub fn as_str(&self) -> Result<&str> {
        match &self.value {
            MessageValue::String(s) => Ok(s),
            other => Err(type_error(self.id, FieldType::String, other.field_type())),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self.value {
            MessageValue::Boolean(b) => Ok(b),
            ref other => Err(type_error(self.id, FieldType::Boolean, other.field_type())),
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        match self.value {
            MessageValue::UInt32(v) => Ok(v),
            ref other => Err(type_error(self.id, FieldType::UInt32, other.field_type())),
        }
    }

    /// UINT32, UINT64 and DATETIME all widen to u64.
    pub fn as_u64(&self) -> Result<u64> {
        match self.value {
            MessageValue::UInt32(v) => Ok(u64::from(v)),
            MessageValue::UInt64(v) | MessageValue::DateTime(v) => Ok(v),
            ref other => Err(type_error(self.id, FieldType::UInt64, other.field_type())),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self.value {
            MessageValue::Double(v) => Ok(v),
            ref other => Err(type_error(self.id, FieldType::Double, other.field_type())),
        }
    }
}

fn type_error(id: u32, expected: FieldType, actual: FieldType) -> Error {
    Error::Runtime(format!("field {} is {}, not {}", id, actual, expected))
}
