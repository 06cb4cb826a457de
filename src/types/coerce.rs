//! Column type mapping and value coercion
//!
//! Two concerns live here. First, the *reported* type of a column can differ
//! from its declared type depending on connection flags (a `TINYINT(1)` may
//! be reported as BIT and then as BOOLEAN, a `YEAR` as DATE or SMALLINT).
//! The rules are a table applied until nothing changes.
//!
//! Second, typed getters convert whatever the server sent into the type the
//! caller asked for. Every converter returns `Ok(None)` for SQL NULL and a
//! conversion error when the value cannot be represented.

use chrono::{
    DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
};

use crate::config::{Config, Dialect};
use crate::constants::SqlType;
use crate::error::{Error, Result};
use crate::row::Value;
use crate::statement::ColumnInfo;
use crate::types::date::{
    expand_two_digit_year, format_datetime, format_time, parse_date, parse_datetime, parse_time,
};

/// Connection flags that influence type reporting and conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionContext {
    /// SQL dialect of the session
    pub dialect: Dialect,
    /// Report `TINYINT(1)` as BIT
    pub tinyint1_is_bit: bool,
    /// Report a BIT that came from `TINYINT(1)` as BOOLEAN
    pub transformed_bit_is_boolean: bool,
    /// Report `YEAR` as DATE instead of SMALLINT
    pub year_is_date_type: bool,
    /// Zone used to interpret zone-less values and to present zoned ones
    pub session_time_zone: FixedOffset,
}

impl Default for CoercionContext {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CoercionContext {
    fn from(config: &Config) -> Self {
        Self {
            dialect: config.mode,
            tinyint1_is_bit: config.tinyint1_is_bit,
            transformed_bit_is_boolean: config.transformed_bit_is_boolean,
            year_is_date_type: config.year_is_date_type,
            session_time_zone: config.session_time_zone,
        }
    }
}

// =============================================================================
// Reported types
// =============================================================================

struct TypeRule {
    name: &'static str,
    apply: fn(SqlType, &ColumnInfo, &CoercionContext) -> Option<SqlType>,
}

const TYPE_RULES: &[TypeRule] = &[
    TypeRule {
        name: "tinyint1-is-bit",
        apply: |current, column, ctx| {
            (current == SqlType::TinyInt
                && column.precision == 1
                && ctx.tinyint1_is_bit
                && ctx.dialect == Dialect::MySql)
                .then_some(SqlType::Bit)
        },
    },
    TypeRule {
        name: "transformed-bit-is-boolean",
        apply: |current, column, ctx| {
            (current == SqlType::Bit
                && column.sql_type == SqlType::TinyInt
                && ctx.transformed_bit_is_boolean)
                .then_some(SqlType::Boolean)
        },
    },
    TypeRule {
        name: "year-type",
        apply: |current, _, ctx| {
            (current == SqlType::Year).then_some(if ctx.year_is_date_type {
                SqlType::Date
            } else {
                SqlType::SmallInt
            })
        },
    },
];

/// Type reported for `column` after applying the mapping rules to a fixpoint
pub fn reported_type(column: &ColumnInfo, ctx: &CoercionContext) -> SqlType {
    let mut current = column.sql_type;
    // Each rule moves the type strictly forward, so the loop is bounded
    for _ in 0..=TYPE_RULES.len() {
        let next = TYPE_RULES
            .iter()
            .find_map(|rule| (rule.apply)(current, column, ctx).map(|t| (rule.name, t)));
        match next {
            Some((rule, t)) if t != current => {
                tracing::trace!(column = %column.name, rule, from = ?current, to = ?t, "type rule");
                current = t;
            }
            _ => break,
        }
    }
    current
}

/// Type name reported in result-set metadata
pub fn reported_type_name(column: &ColumnInfo, ctx: &CoercionContext) -> &'static str {
    let unsigned = column.is_unsigned();
    match reported_type(column, ctx) {
        SqlType::Bit => "BIT",
        SqlType::Boolean => "BOOLEAN",
        SqlType::TinyInt if unsigned => "TINYINT UNSIGNED",
        SqlType::TinyInt => "TINYINT",
        SqlType::SmallInt if unsigned => "SMALLINT UNSIGNED",
        SqlType::SmallInt => "SMALLINT",
        SqlType::MediumInt => "MEDIUMINT",
        SqlType::Integer if unsigned => "INT UNSIGNED",
        SqlType::Integer => "INT",
        SqlType::BigInt if unsigned => "BIGINT UNSIGNED",
        SqlType::BigInt => "BIGINT",
        SqlType::Float => "FLOAT",
        SqlType::Double => "DOUBLE",
        SqlType::Decimal if ctx.dialect.is_oracle() => "NUMBER",
        SqlType::Decimal => "DECIMAL",
        SqlType::Char => "CHAR",
        SqlType::Varchar if ctx.dialect.is_oracle() => "VARCHAR2",
        SqlType::Varchar => "VARCHAR",
        SqlType::LongVarchar => "TEXT",
        SqlType::Binary => "BINARY",
        SqlType::Varbinary if ctx.dialect.is_oracle() => "RAW",
        SqlType::Varbinary => "VARBINARY",
        SqlType::LongVarbinary => "LONGBLOB",
        SqlType::Clob => "CLOB",
        SqlType::Blob => "BLOB",
        SqlType::Date => "DATE",
        SqlType::Time => "TIME",
        SqlType::DateTime => "DATETIME",
        SqlType::Timestamp => "TIMESTAMP",
        SqlType::TimestampTz => "TIMESTAMP WITH TIME ZONE",
        SqlType::Year => "YEAR",
        SqlType::Cursor => "REF CURSOR",
        SqlType::Null => "NULL",
        SqlType::Unknown => "UNKNOWN",
    }
}

// =============================================================================
// Text helpers
// =============================================================================

/// Parse boolean text: keyword forms first, then any number (zero is false)
pub fn parse_bool_text(text: &str) -> Result<bool> {
    let trimmed = text.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "t" | "y" | "yes" | "1" => return Ok(true),
        "false" | "f" | "n" | "no" | "0" => return Ok(false),
        _ => {}
    }
    match parse_double_text(trimmed) {
        Ok(n) if !n.is_nan() => Ok(n != 0.0),
        _ => Err(Error::conversion("BOOLEAN", text)),
    }
}

/// Parse a double, accepting `NaN`, `Infinity` and `-Infinity`
pub fn parse_double_text(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    match trimmed {
        "NaN" => Ok(f64::NAN),
        "Infinity" | "+Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| Error::conversion("DOUBLE", text)),
    }
}

/// Render a double the way result sets present it
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Render a single-precision float without widening it first
pub fn format_float(value: f32) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f32::INFINITY {
        "Infinity".to_string()
    } else if value == f32::NEG_INFINITY {
        "-Infinity".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

fn year_to_date(year: i64) -> Result<NaiveDate> {
    let year = i32::try_from(year).map_err(|_| Error::conversion("DATE", year))?;
    NaiveDate::from_ymd_opt(expand_two_digit_year(year), 1, 1)
        .ok_or_else(|| Error::conversion("DATE", year))
}

fn in_session_zone(dt: &NaiveDateTime, zone: FixedOffset) -> Result<DateTime<FixedOffset>> {
    match zone.from_local_datetime(dt) {
        LocalResult::Single(ts) => Ok(ts),
        _ => Err(Error::conversion("TIMESTAMP WITH TIME ZONE", format_datetime(dt))),
    }
}

fn session_local(ts: &DateTime<FixedOffset>, zone: FixedOffset) -> NaiveDateTime {
    ts.with_timezone(&zone).naive_local()
}

// =============================================================================
// Converters
// =============================================================================

/// Convert to bool
pub fn to_bool(value: &Value) -> Result<Option<bool>> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::UInt(u) => *u != 0,
        Value::Float(f) => *f != 0.0,
        Value::Double(d) => *d != 0.0,
        Value::Decimal(s) | Value::String(s) => parse_bool_text(s)?,
        Value::Bytes(b) => b.iter().any(|byte| *byte != 0),
        Value::Clob(c) => parse_bool_text(&c.to_text()?)?,
        other => return Err(Error::conversion("BOOLEAN", other.type_name())),
    }))
}

/// Convert to i64
pub fn to_i64(value: &Value) -> Result<Option<i64>> {
    let from_double = |d: f64| -> Result<i64> {
        if d.is_finite() && d >= i64::MIN as f64 && d < i64::MAX as f64 {
            Ok(d.trunc() as i64)
        } else {
            Err(Error::conversion("BIGINT", format_double(d)))
        }
    };
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::Int(i) => *i,
        Value::UInt(u) => i64::try_from(*u).map_err(|_| Error::conversion("BIGINT", u))?,
        Value::Bool(b) => *b as i64,
        Value::Float(f) => from_double(*f as f64)?,
        Value::Double(d) => from_double(*d)?,
        Value::Decimal(s) | Value::String(s) => {
            let trimmed = s.trim();
            match trimmed.parse::<i64>() {
                Ok(i) => i,
                Err(_) => from_double(
                    parse_double_text(trimmed).map_err(|_| Error::conversion("BIGINT", s))?,
                )?,
            }
        }
        Value::Bytes(b) if b.len() <= 8 => {
            b.iter().fold(0i64, |acc, byte| (acc << 8) | *byte as i64)
        }
        other => return Err(Error::conversion("BIGINT", other.type_name())),
    }))
}

/// Convert to i32, failing when out of range
pub fn to_i32(value: &Value) -> Result<Option<i32>> {
    to_i64(value)?
        .map(|v| i32::try_from(v).map_err(|_| Error::conversion("INTEGER", v)))
        .transpose()
}

/// Convert to i16, failing when out of range
pub fn to_i16(value: &Value) -> Result<Option<i16>> {
    to_i64(value)?
        .map(|v| i16::try_from(v).map_err(|_| Error::conversion("SMALLINT", v)))
        .transpose()
}

/// Convert to i8, failing when out of range
pub fn to_i8(value: &Value) -> Result<Option<i8>> {
    to_i64(value)?
        .map(|v| i8::try_from(v).map_err(|_| Error::conversion("TINYINT", v)))
        .transpose()
}

/// Convert to f64
pub fn to_f64(value: &Value) -> Result<Option<f64>> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::Int(i) => *i as f64,
        Value::UInt(u) => *u as f64,
        Value::Float(f) => *f as f64,
        Value::Double(d) => *d,
        Value::Bool(b) => *b as i64 as f64,
        Value::Decimal(s) | Value::String(s) => parse_double_text(s)?,
        other => return Err(Error::conversion("DOUBLE", other.type_name())),
    }))
}

/// Convert to f32
pub fn to_f32(value: &Value) -> Result<Option<f32>> {
    Ok(to_f64(value)?.map(|d| d as f32))
}

/// Convert to text
pub fn to_string(value: &Value, ctx: &CoercionContext) -> Result<Option<String>> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::String(s) | Value::Decimal(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Float(f) => format_float(*f),
        Value::Double(d) => format_double(*d),
        Value::Bool(b) => b.to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => format_time(t),
        Value::DateTime(dt) => format_datetime(dt),
        Value::TimestampTz(ts) => format_datetime(&session_local(ts, ctx.session_time_zone)),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Clob(c) => c.to_text()?,
        Value::Blob(b) => String::from_utf8_lossy(&b.to_bytes()).into_owned(),
        other => return Err(Error::conversion("VARCHAR", other.type_name())),
    }))
}

/// Convert to bytes
pub fn to_bytes(value: &Value) -> Result<Option<Vec<u8>>> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::Bytes(b) => b.to_vec(),
        Value::String(s) | Value::Decimal(s) => s.as_bytes().to_vec(),
        Value::Clob(c) | Value::Blob(c) => c.to_bytes().to_vec(),
        other => return Err(Error::conversion("VARBINARY", other.type_name())),
    }))
}

/// Convert to a date. An integer in a YEAR column is January 1st of that
/// year; two-digit years use the pivot.
pub fn to_date(
    value: &Value,
    column: Option<&ColumnInfo>,
    ctx: &CoercionContext,
) -> Result<Option<NaiveDate>> {
    let is_year = column.map(|c| c.sql_type == SqlType::Year).unwrap_or(false);
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::Date(d) => *d,
        Value::DateTime(dt) => dt.date(),
        Value::TimestampTz(ts) => session_local(ts, ctx.session_time_zone).date(),
        Value::Int(i) if is_year => year_to_date(*i)?,
        Value::UInt(u) if is_year => year_to_date(*u as i64)?,
        Value::String(s) => match parse_date(s) {
            Ok(d) => d,
            Err(_) => parse_datetime(s)?.date(),
        },
        other => return Err(Error::conversion("DATE", other.type_name())),
    }))
}

/// Convert to a time of day
pub fn to_time(value: &Value, ctx: &CoercionContext) -> Result<Option<NaiveTime>> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::Time(t) => *t,
        Value::DateTime(dt) => dt.time(),
        Value::TimestampTz(ts) => session_local(ts, ctx.session_time_zone).time(),
        Value::String(s) => match parse_time(s) {
            Ok(t) => t,
            Err(_) => parse_datetime(s)?.time(),
        },
        other => return Err(Error::conversion("TIME", other.type_name())),
    }))
}

/// Convert to a zone-less timestamp in the session zone
pub fn to_datetime(
    value: &Value,
    column: Option<&ColumnInfo>,
    ctx: &CoercionContext,
) -> Result<Option<NaiveDateTime>> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::DateTime(dt) => *dt,
        Value::Date(d) => d.and_time(NaiveTime::MIN),
        Value::Time(t) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .ok_or_else(|| Error::Internal("epoch date".to_string()))?
            .and_time(*t),
        Value::TimestampTz(ts) => session_local(ts, ctx.session_time_zone),
        Value::String(s) => parse_datetime(s)?,
        Value::Int(_) | Value::UInt(_) => match to_date(value, column, ctx) {
            Ok(Some(d)) => d.and_time(NaiveTime::MIN),
            _ => return Err(Error::conversion("TIMESTAMP", value)),
        },
        other => return Err(Error::conversion("TIMESTAMP", other.type_name())),
    }))
}

/// Convert to a zoned timestamp; zone-less values are taken as session time
pub fn to_timestamp_tz(
    value: &Value,
    column: Option<&ColumnInfo>,
    ctx: &CoercionContext,
) -> Result<Option<DateTime<FixedOffset>>> {
    match value {
        Value::TimestampTz(ts) => Ok(Some(*ts)),
        other => match to_datetime(other, column, ctx)? {
            Some(dt) => in_session_zone(&dt, ctx.session_time_zone).map(Some),
            None => Ok(None),
        },
    }
}

/// Value as presented by `get_object`: reported type decides the shape
pub fn to_object(value: &Value, column: &ColumnInfo, ctx: &CoercionContext) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    Ok(match reported_type(column, ctx) {
        SqlType::Bit | SqlType::Boolean if column.sql_type != SqlType::Bit => {
            Value::Bool(to_bool(value)?.unwrap_or_default())
        }
        SqlType::Date if column.sql_type == SqlType::Year => {
            to_date(value, Some(column), ctx)?.map(Value::Date).unwrap_or(Value::Null)
        }
        SqlType::SmallInt if column.sql_type == SqlType::Year => {
            to_i64(value)?.map(Value::Int).unwrap_or(Value::Null)
        }
        SqlType::TimestampTz => match value {
            Value::TimestampTz(_) => value.clone(),
            _ => to_timestamp_tz(value, Some(column), ctx)?
                .map(Value::TimestampTz)
                .unwrap_or(Value::Null),
        },
        _ => value.clone(),
    })
}
