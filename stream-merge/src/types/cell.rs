//! Typed cell values carried by rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::types::FieldType;

/// A single typed value inside a [`crate::types::Row`].
///
/// [`Cell`] covers the value types sources are allowed to declare. `Null` is a
/// value, not a type: any field position may hold it regardless of the
/// declared [`FieldType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit floating point number.
    F64(f64),
    /// UTF-8 text.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Calendar date without a time component.
    Date(NaiveDate),
    /// Date and time without a timezone.
    Timestamp(NaiveDateTime),
    /// Date and time in UTC.
    TimestampTz(DateTime<Utc>),
    /// UUID value.
    Uuid(uuid::Uuid),
    /// Arbitrary JSON value.
    Json(serde_json::Value),
}

impl Cell {
    /// Returns the declared type this value would carry in a schema, or
    /// `None` for `Null`.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Cell::Null => None,
            Cell::Bool(_) => Some(FieldType::Bool),
            Cell::I32(_) => Some(FieldType::I32),
            Cell::I64(_) => Some(FieldType::I64),
            Cell::F64(_) => Some(FieldType::F64),
            Cell::String(_) => Some(FieldType::Text),
            Cell::Bytes(_) => Some(FieldType::Bytes),
            Cell::Date(_) => Some(FieldType::Date),
            Cell::Timestamp(_) => Some(FieldType::Timestamp),
            Cell::TimestampTz(_) => Some(FieldType::TimestampTz),
            Cell::Uuid(_) => Some(FieldType::Uuid),
            Cell::Json(_) => Some(FieldType::Json),
        }
    }

    /// Returns the deterministic text rendering of this value, or `None` for
    /// `Null`.
    ///
    /// This rendering is what lands in output rows for union fields whose type
    /// was rewritten to text after a cross-source conflict, so it must stay
    /// stable across releases.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Bool(value) => Some(value.to_string()),
            Cell::I32(value) => Some(value.to_string()),
            Cell::I64(value) => Some(value.to_string()),
            Cell::F64(value) => Some(value.to_string()),
            Cell::String(value) => Some(value.clone()),
            Cell::Bytes(value) => Some(format_bytes_hex(value)),
            Cell::Date(value) => Some(value.format("%Y-%m-%d").to_string()),
            Cell::Timestamp(value) => Some(value.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Cell::TimestampTz(value) => Some(value.to_rfc3339()),
            Cell::Uuid(value) => Some(value.to_string()),
            Cell::Json(value) => Some(value.to_string()),
        }
    }

    /// Returns whether this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// Formats bytes in the `\x`-prefixed hex form.
fn format_bytes_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
