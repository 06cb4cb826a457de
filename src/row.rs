//! Row data handling for query results
//!
//! This module provides:
//! - [`Value`], the tagged representation of every column and parameter value
//! - [`Row`], an ordered list of values with optional column names
//! - The wire codec for both: each value is a tag byte followed by its
//!   payload, and a row is a null bitmap followed by its non-null values

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::value_tag;
use crate::error::{Error, Result};
use crate::statement::ColumnInfo;
use crate::types::date::{
    format_datetime, format_time, read_date, read_datetime, read_time, read_timestamp_tz,
    write_date, write_datetime, write_time, write_timestamp_tz,
};
use crate::types::{Lob, LobKind, PieceBuffer, RefCursor};

/// A column or parameter value.
///
/// Values read from a result set are the raw wire representation; typed
/// access goes through the coercion layer (see
/// [`ResultSet::get_i64`](crate::ResultSet::get_i64) and friends).
///
/// # Example
///
/// ```rust
/// use dualsql::Value;
///
/// let v: Value = 42i64.into();
/// assert_eq!(v.as_i64(), Some(42));
/// assert!(Value::from(None::<i64>).is_null());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Signed integer
    Int(i64),
    /// Unsigned integer (BIGINT UNSIGNED)
    UInt(u64),
    /// Exact decimal, kept as its text form
    Decimal(String),
    /// Single precision float
    Float(f32),
    /// Double precision float
    Double(f64),
    /// Character data
    String(String),
    /// Binary data
    Bytes(Bytes),
    /// Boolean
    Bool(bool),
    /// DATE
    Date(NaiveDate),
    /// TIME
    Time(NaiveTime),
    /// DATETIME / TIMESTAMP
    DateTime(NaiveDateTime),
    /// TIMESTAMP WITH TIME ZONE
    TimestampTz(DateTime<FixedOffset>),
    /// Character LOB
    Clob(PieceBuffer),
    /// Binary LOB
    Blob(PieceBuffer),
    /// Server cursor returned by a procedure
    Cursor(RefCursor),
    /// Marker for a parameter whose content follows as pieces (1-based slot)
    Piece(u16),
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in conversion errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Int(_) => "INT",
            Value::UInt(_) => "UINT",
            Value::Decimal(_) => "DECIMAL",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::String(_) => "STRING",
            Value::Bytes(_) => "BYTES",
            Value::Bool(_) => "BOOLEAN",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::DateTime(_) => "DATETIME",
            Value::TimestampTz(_) => "TIMESTAMP WITH TIME ZONE",
            Value::Clob(_) => "CLOB",
            Value::Blob(_) => "BLOB",
            Value::Cursor(_) => "CURSOR",
            Value::Piece(_) => "PIECE",
        }
    }

    /// Try to get as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as i64 (exact integers only)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Try to get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f as f64),
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// Try to get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as a cursor
    pub fn as_cursor(&self) -> Option<&RefCursor> {
        match self {
            Value::Cursor(c) => Some(c),
            _ => None,
        }
    }

    /// Try to get the LOB content
    pub fn as_lob(&self) -> Option<&PieceBuffer> {
        match self {
            Value::Clob(b) | Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Encode with its tag
    pub fn write(&self, buf: &mut WriteBuffer) -> Result<()> {
        match self {
            Value::Null => buf.write_u8(value_tag::NULL),
            Value::Int(i) => {
                buf.write_u8(value_tag::INT)?;
                buf.write_sb8(*i)
            }
            Value::UInt(u) => {
                buf.write_u8(value_tag::UINT)?;
                buf.write_ub8(*u)
            }
            Value::Decimal(d) => {
                buf.write_u8(value_tag::DECIMAL)?;
                buf.write_string(d)
            }
            Value::Float(f) => {
                buf.write_u8(value_tag::FLOAT)?;
                buf.write_f32(*f)
            }
            Value::Double(d) => {
                buf.write_u8(value_tag::DOUBLE)?;
                buf.write_f64(*d)
            }
            Value::String(s) => {
                buf.write_u8(value_tag::STRING)?;
                buf.write_string(s)
            }
            Value::Bytes(b) => {
                buf.write_u8(value_tag::BYTES)?;
                buf.write_bytes_with_length(Some(b.as_ref()))
            }
            Value::Bool(b) => {
                buf.write_u8(value_tag::BOOL)?;
                buf.write_bool(*b)
            }
            Value::Date(d) => {
                buf.write_u8(value_tag::DATE)?;
                write_date(buf, d)
            }
            Value::Time(t) => {
                buf.write_u8(value_tag::TIME)?;
                write_time(buf, t)
            }
            Value::DateTime(dt) => {
                buf.write_u8(value_tag::DATETIME)?;
                write_datetime(buf, dt)
            }
            Value::TimestampTz(ts) => {
                buf.write_u8(value_tag::TIMESTAMP_TZ)?;
                write_timestamp_tz(buf, ts)
            }
            Value::Clob(content) | Value::Blob(content) => {
                let is_clob = matches!(self, Value::Clob(_));
                if content.is_null() {
                    return buf.write_u8(value_tag::NULL);
                }
                if content.is_empty() {
                    let tag = if is_clob { value_tag::EMPTY_CLOB } else { value_tag::EMPTY_BLOB };
                    return buf.write_u8(tag);
                }
                buf.write_u8(if is_clob { value_tag::CLOB } else { value_tag::BLOB })?;
                buf.write_chunks(content.chunks().iter().map(|c| c.as_ref()))
            }
            Value::Cursor(cursor) => {
                buf.write_u8(value_tag::CURSOR)?;
                buf.write_ub4(cursor.cursor_id())?;
                buf.write_ub2(cursor.column_count() as u16)?;
                for column in cursor.columns() {
                    column.write(buf)?;
                }
                Ok(())
            }
            Value::Piece(slot) => {
                buf.write_u8(value_tag::PIECE)?;
                buf.write_ub2(*slot)
            }
        }
    }

    /// Decode a tagged value
    pub fn read(buf: &mut ReadBuffer) -> Result<Self> {
        let tag = buf.read_u8()?;
        Ok(match tag {
            value_tag::NULL => Value::Null,
            value_tag::INT => Value::Int(buf.read_sb8()?),
            value_tag::UINT => Value::UInt(buf.read_ub8()?),
            value_tag::DECIMAL => Value::Decimal(buf.read_string()?),
            value_tag::FLOAT => Value::Float(buf.read_f32()?),
            value_tag::DOUBLE => Value::Double(buf.read_f64()?),
            value_tag::STRING => Value::String(buf.read_string()?),
            value_tag::BYTES => Value::Bytes(buf.read_bytes_with_length()?.unwrap_or_default()),
            value_tag::BOOL => Value::Bool(buf.read_bool()?),
            value_tag::DATE => Value::Date(read_date(buf)?),
            value_tag::TIME => Value::Time(read_time(buf)?),
            value_tag::DATETIME => Value::DateTime(read_datetime(buf)?),
            value_tag::TIMESTAMP_TZ => Value::TimestampTz(read_timestamp_tz(buf)?),
            value_tag::CLOB => Value::Clob(PieceBuffer::from_chunks(buf.read_chunks()?)),
            value_tag::BLOB => Value::Blob(PieceBuffer::from_chunks(buf.read_chunks()?)),
            value_tag::EMPTY_CLOB => Value::Clob(PieceBuffer::empty()),
            value_tag::EMPTY_BLOB => Value::Blob(PieceBuffer::empty()),
            value_tag::CURSOR => {
                let cursor_id = buf.read_ub4()?;
                let count = buf.read_ub2()? as usize;
                let mut columns = Vec::with_capacity(count);
                for _ in 0..count {
                    columns.push(ColumnInfo::read(buf)?);
                }
                Value::Cursor(RefCursor::new(cursor_id, columns))
            }
            value_tag::PIECE => Value::Piece(buf.read_ub2()?),
            other => return Err(Error::Protocol(format!("unknown value tag {}", other))),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::TimestampTz(v)
    }
}

impl From<Lob> for Value {
    fn from(lob: Lob) -> Self {
        let content = lob.content().clone();
        match lob.kind() {
            LobKind::Clob => Value::Clob(content),
            LobKind::Blob => Value::Blob(content),
        }
    }
}

impl From<&Lob> for Value {
    fn from(lob: &Lob) -> Self {
        lob.clone().into()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", format_time(t)),
            Value::DateTime(dt) => write!(f, "{}", format_datetime(dt)),
            Value::TimestampTz(ts) => {
                write!(f, "{} {}", format_datetime(&ts.naive_local()), ts.offset())
            }
            Value::Clob(c) => write!(f, "<CLOB: {} bytes>", c.len()),
            Value::Blob(b) => write!(f, "<BLOB: {} bytes>", b.len()),
            Value::Cursor(cursor) => write!(
                f,
                "<CURSOR: id={}, {} columns>",
                cursor.cursor_id(),
                cursor.column_count()
            ),
            Value::Piece(slot) => write!(f, "<PIECE: parameter {}>", slot),
        }
    }
}

/// A row of data from a query result.
///
/// Rows contain values that can be accessed by column index (0-based) or by
/// column label.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column values
    values: Vec<Value>,
    /// Column labels (optional, for named access)
    column_names: Option<Vec<String>>,
}

impl Row {
    /// Create a new row with values
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            column_names: None,
        }
    }

    /// Create a new row with values and column names
    pub fn with_names(values: Vec<Value>, names: Vec<String>) -> Self {
        Self {
            values,
            column_names: Some(names),
        }
    }

    /// Get the number of columns in this row
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let names = self.column_names.as_ref()?;
        let index = names.iter().position(|n| n.eq_ignore_ascii_case(name))?;
        self.values.get(index)
    }

    /// Get all values as a slice
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row and return the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Check if a column value is NULL
    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).map(Value::is_null).unwrap_or(true)
    }

    /// Encode as null bitmap plus non-null values
    pub fn write(&self, buf: &mut WriteBuffer) -> Result<()> {
        let mut bitmap = vec![0u8; self.values.len().div_ceil(8)];
        for (i, value) in self.values.iter().enumerate() {
            if value.is_null() {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        buf.write_bytes(&bitmap)?;
        for value in self.values.iter().filter(|v| !v.is_null()) {
            value.write(buf)?;
        }
        Ok(())
    }

    /// Decode a row of `column_count` values
    pub fn read(buf: &mut ReadBuffer, column_count: usize) -> Result<Self> {
        let bitmap = buf.read_bytes_owned(column_count.div_ceil(8))?;
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(Value::Null);
            } else {
                values.push(Value::read(buf)?);
            }
        }
        Ok(Self::new(values))
    }

    /// Attach column labels for named access
    pub(crate) fn named(mut self, columns: &[ColumnInfo]) -> Self {
        self.column_names = Some(columns.iter().map(|c| c.label.clone()).collect());
        self
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.values[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SqlType;

    #[test]
    fn test_value_null() {
        let v = Value::Null;
        assert!(v.is_null());
        assert_eq!(v.as_str(), None);
        assert_eq!(v.to_string(), "NULL");
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(7i32), Value::Int(7));
        assert_eq!(Value::from("x"), Value::String("x".into()));
        assert_eq!(Value::from(Some(1.5f64)), Value::Double(1.5));
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
    }

    #[test]
    fn test_row_with_names() {
        let row = Row::with_names(
            vec![Value::Int(1), Value::String("a".into())],
            vec!["ID".into(), "NAME".into()],
        );
        assert_eq!(row.get_by_name("name"), Some(&Value::String("a".into())));
        assert_eq!(row[0], Value::Int(1));
        assert!(row.is_null(5));
    }

    #[test]
    fn test_row_null_bitmap() {
        let row = Row::new(vec![
            Value::Null,
            Value::Int(-5),
            Value::Null,
            Value::String("héllo".into()),
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Null,
            Value::Bool(true),
        ]);
        let mut buf = WriteBuffer::new();
        row.write(&mut buf).unwrap();
        let bytes = buf.freeze();
        // 9 columns need two bitmap bytes
        assert_eq!(bytes[0], 0b1111_0101);
        assert_eq!(bytes[1], 0);
        let decoded = Row::read(&mut ReadBuffer::new(bytes), 9).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_lob_tags_keep_empty_and_null_apart() {
        let mut buf = WriteBuffer::new();
        Value::Clob(PieceBuffer::empty()).write(&mut buf).unwrap();
        Value::Blob(PieceBuffer::null()).write(&mut buf).unwrap();
        Value::Clob(PieceBuffer::from_bytes("abcdef", 4)).write(&mut buf).unwrap();
        let mut rd = ReadBuffer::new(buf.freeze());

        match Value::read(&mut rd).unwrap() {
            Value::Clob(c) => assert!(c.is_empty_sentinel()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(Value::read(&mut rd).unwrap().is_null());
        match Value::read(&mut rd).unwrap() {
            Value::Clob(c) => {
                assert_eq!(c.chunks().len(), 2);
                assert_eq!(c.to_text().unwrap(), "abcdef");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cursor_value_carries_columns() {
        let cursor = RefCursor::new(9, vec![ColumnInfo::new("ID", SqlType::Integer)]);
        let mut buf = WriteBuffer::new();
        Value::Cursor(cursor.clone()).write(&mut buf).unwrap();
        let decoded = Value::read(&mut ReadBuffer::new(buf.freeze())).unwrap();
        assert_eq!(decoded.as_cursor(), Some(&cursor));
    }

    #[test]
    fn test_unknown_tag_is_protocol_error() {
        let err = Value::read(&mut ReadBuffer::from_slice(&[99])).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
