//! Field and schema descriptions for source and union streams.

use std::fmt;

/// Declared type tag of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit floating point number.
    F64,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Bytes,
    /// Calendar date.
    Date,
    /// Date and time without a timezone.
    Timestamp,
    /// Date and time in UTC.
    TimestampTz,
    /// UUID.
    Uuid,
    /// JSON document.
    Json,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Bool => "bool",
            FieldType::I32 => "i32",
            FieldType::I64 => "i64",
            FieldType::F64 => "f64",
            FieldType::Text => "text",
            FieldType::Bytes => "bytes",
            FieldType::Date => "date",
            FieldType::Timestamp => "timestamp",
            FieldType::TimestampTz => "timestamptz",
            FieldType::Uuid => "uuid",
            FieldType::Json => "json",
        };
        f.write_str(name)
    }
}

/// Describes a single field of a source or union schema.
///
/// Field descriptors are immutable once produced by a source; the union schema
/// clones them before any conflict rewrite so a source's own descriptor is
/// never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    /// The field name, unique within its schema.
    pub name: String,
    /// The declared type of the field.
    pub typ: FieldType,
    /// Label of the source that declared the field.
    pub origin: String,
}

impl FieldSchema {
    /// Creates a new [`FieldSchema`].
    pub fn new(name: impl Into<String>, typ: FieldType, origin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            typ,
            origin: origin.into(),
        }
    }
}

/// An ordered sequence of [`FieldSchema`], name-unique within itself.
///
/// Used both for the schema a single source declares and for the resolved
/// union schema covering every source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    /// The fields in declared order.
    pub fields: Vec<FieldSchema>,
}

impl Schema {
    /// Creates a new [`Schema`] from fields in declared order.
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    /// Appends a field to this schema.
    pub fn add_field(&mut self, field: FieldSchema) {
        self.fields.push(field);
    }

    /// Returns the position of the field with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Returns the field names in declared order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_schema() -> Schema {
        Schema::new(vec![
            FieldSchema::new("id", FieldType::I64, "orders"),
            FieldSchema::new("name", FieldType::Text, "orders"),
        ])
    }

    #[test]
    fn test_index_of_finds_declared_fields() {
        let schema = create_test_schema();

        assert_eq!(schema.index_of("id"), Some(0));
        assert_eq!(schema.index_of("name"), Some(1));
        assert_eq!(schema.index_of("missing"), None);
    }

    #[test]
    fn test_add_field_appends() {
        let mut schema = create_test_schema();

        schema.add_field(FieldSchema::new("age", FieldType::I32, "users"));

        assert_eq!(schema.len(), 3);
        assert_eq!(schema.index_of("age"), Some(2));
    }
}
