//! SQL statement parsing
//!
//! The driver never parses SQL grammar. It scans the text just far enough to
//! know the statement type, where the placeholders are, whether the text is a
//! stored-procedure call, and where the `VALUES` group of an INSERT sits (for
//! batch rewriting). String literals, quoted identifiers and comments are
//! skipped so placeholders inside them are never touched.
//!
//! Placeholders are `?` everywhere. `:name` placeholders are recognized only
//! when named binding is enabled; otherwise the colon is ordinary text.

use std::ops::Range;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::config::{Config, Dialect};
use crate::constants::{column_flags, SqlType};
use crate::error::{Error, Result};
use crate::row::Value;
use crate::types::date::{format_datetime, format_time};

/// Statement type determined by the leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementType {
    /// Unknown or unparsed statement
    #[default]
    Unknown,
    /// SELECT / WITH / SHOW ...
    Query,
    /// INSERT / REPLACE
    Insert,
    /// UPDATE, DELETE, MERGE
    Dml,
    /// CREATE, ALTER, DROP, ...
    Ddl,
    /// Stored procedure or function call, or an anonymous block
    Call,
}

/// How a statement object was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Plain statement, SQL given at execute time
    Simple,
    /// Prepared statement with placeholders
    Prepared,
    /// Callable statement (procedure / function)
    Callable,
}

/// Network path used to run a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolPath {
    /// SQL text with any parameters substituted client-side
    Text,
    /// Parse once on the server, execute the cursor with binds
    ServerPrepared,
    /// Parse and execute in a single round trip
    PrepareExecute,
}

/// One placeholder occurrence in the statement text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Byte range of the `?` in [`Statement::native_sql`]
    pub range: Range<usize>,
    /// 0-based parameter slot this occurrence reads
    pub slot: usize,
}

/// One argument of a procedure call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    /// A placeholder bound to the given 0-based slot
    Param {
        /// Slot index
        slot: usize,
        /// Formal parameter name for `name => ?` notation
        formal: Option<String>,
    },
    /// A literal expression passed through unchanged
    Literal(String),
}

/// Parsed form of a procedure or function call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    /// Routine name as written (may be schema-qualified)
    pub routine: String,
    /// `? = call ...`: slot 0 receives the return value
    pub is_function: bool,
    /// Arguments in order
    pub args: Vec<CallArg>,
}

impl CallSpec {
    /// Number of placeholders the call declares, including the return slot
    pub fn declared_params(&self) -> usize {
        let args = self
            .args
            .iter()
            .filter(|a| matches!(a, CallArg::Param { .. }))
            .count();
        args + self.is_function as usize
    }
}

/// Metadata for a column in a result set
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Column label (alias); equals the name when no alias was given
    pub label: String,
    /// Source table, empty for computed columns
    pub table_name: String,
    /// Declared type
    pub sql_type: SqlType,
    /// Display size / precision (`TINYINT(1)` has precision 1)
    pub precision: u32,
    /// Scale for decimal types
    pub scale: i16,
    /// Bitmask of [`column_flags`]
    pub flags: u16,
}

impl ColumnInfo {
    /// Create a new column with minimal info
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            table_name: String::new(),
            sql_type,
            precision: 0,
            scale: 0,
            flags: column_flags::NULLABLE,
        }
    }

    /// Set the source table
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    /// Set precision and scale
    pub fn with_precision(mut self, precision: u32, scale: i16) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    /// Set the flag bits
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Whether NULL values are allowed
    pub fn is_nullable(&self) -> bool {
        self.flags & column_flags::NULLABLE != 0
    }

    /// Whether the column is part of the primary key
    pub fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    /// Whether the column is unsigned
    pub fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// Whether the column is auto-increment
    pub fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    /// Check if this column is a LOB type
    pub fn is_lob(&self) -> bool {
        self.sql_type.is_lob()
    }

    /// Decode from the wire
    pub fn read(buf: &mut ReadBuffer) -> Result<Self> {
        let name = buf.read_string()?;
        let label = buf.read_string()?;
        let table_name = buf.read_string()?;
        let sql_type = SqlType::from_wire(buf.read_u8()?);
        let precision = buf.read_ub4()?;
        let scale = buf.read_sb8()? as i16;
        let flags = buf.read_ub2()?;
        Ok(Self {
            name,
            label,
            table_name,
            sql_type,
            precision,
            scale,
            flags,
        })
    }

    /// Encode to the wire
    pub fn write(&self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_string(&self.name)?;
        buf.write_string(&self.label)?;
        buf.write_string(&self.table_name)?;
        buf.write_u8(self.sql_type as u8)?;
        buf.write_ub4(self.precision)?;
        buf.write_sb8(self.scale as i64)?;
        buf.write_ub2(self.flags)
    }
}

/// A parsed SQL statement
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    native_sql: String,
    statement_type: StatementType,
    placeholders: Vec<Placeholder>,
    /// Name of each slot (None for positional slots)
    slot_names: Vec<Option<String>>,
    call: Option<CallSpec>,
    values_group: Option<Range<usize>>,
}

impl Statement {
    /// Parse `sql` for the given configuration
    pub fn parse(sql: impl Into<String>, config: &Config) -> Self {
        Self::parse_with(sql, config.mode, config.named_binding_enabled())
    }

    /// Parse `sql` with explicit dialect and named-binding switch
    pub fn parse_with(sql: impl Into<String>, dialect: Dialect, named: bool) -> Self {
        let sql = sql.into();
        let found = scan_placeholders(&sql, dialect, named);

        // Assign slots: each `?` is its own slot, repeated names share one
        let mut slot_names: Vec<Option<String>> = Vec::new();
        let mut occurrence_slots = Vec::with_capacity(found.len());
        for p in &found {
            let slot = match &p.name {
                Some(name) => match slot_names.iter().position(|n| n.as_deref() == Some(name)) {
                    Some(existing) => existing,
                    None => {
                        slot_names.push(Some(name.clone()));
                        slot_names.len() - 1
                    }
                },
                None => {
                    slot_names.push(None);
                    slot_names.len() - 1
                }
            };
            occurrence_slots.push(slot);
        }

        let statement_type = detect_statement_type(&sql);

        // Normalize: every placeholder becomes `?`
        let mut normalized = String::with_capacity(sql.len());
        let mut last = 0;
        for p in &found {
            normalized.push_str(&sql[last..p.range.start]);
            normalized.push('?');
            last = p.range.end;
        }
        normalized.push_str(&sql[last..]);

        let call = if statement_type == StatementType::Call {
            parse_call(&normalized, dialect, &occurrence_slots, &slot_names)
        } else {
            None
        };
        let native_sql = match &call {
            Some(spec) => render_call(spec, &normalized, dialect),
            None => normalized,
        };

        let placeholders = scan_placeholders(&native_sql, dialect, false)
            .into_iter()
            .zip(occurrence_slots.iter().copied())
            .map(|(p, slot)| Placeholder {
                range: p.range,
                slot,
            })
            .collect();

        let values_group = if statement_type == StatementType::Insert {
            find_values_group(&native_sql, dialect)
        } else {
            None
        };

        Self {
            sql,
            native_sql,
            statement_type,
            placeholders,
            slot_names,
            call,
            values_group,
        }
    }

    /// Get the SQL text as given
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// SQL sent to the server: placeholders are `?`, call escapes resolved
    pub fn native_sql(&self) -> &str {
        &self.native_sql
    }

    /// Get the statement type
    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    /// Check if this is a query
    pub fn is_query(&self) -> bool {
        self.statement_type == StatementType::Query
    }

    /// Check if this is an INSERT
    pub fn is_insert(&self) -> bool {
        self.statement_type == StatementType::Insert
    }

    /// Check if this is a call
    pub fn is_call(&self) -> bool {
        self.statement_type == StatementType::Call
    }

    /// Number of parameter slots
    pub fn param_count(&self) -> usize {
        self.slot_names.len()
    }

    /// Placeholder occurrences in native SQL order
    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Check whether any slot is named
    pub fn has_named_params(&self) -> bool {
        self.slot_names.iter().any(Option::is_some)
    }

    /// Resolve a `:name` to its 0-based slot (case-insensitive)
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        let wanted = normalize_bind_name(name.trim_start_matches(':'));
        self.slot_names
            .iter()
            .position(|n| n.as_deref() == Some(wanted.as_str()))
    }

    /// Name of a 0-based slot, if named
    pub fn slot_name(&self, slot: usize) -> Option<&str> {
        self.slot_names.get(slot).and_then(|n| n.as_deref())
    }

    /// Parsed call, if this is a procedure or function call
    pub fn call_spec(&self) -> Option<&CallSpec> {
        self.call.as_ref()
    }

    /// Whether a batch of this statement can be folded into one multi-row
    /// INSERT
    pub fn supports_multi_values(&self) -> bool {
        self.values_group.is_some()
    }

    /// Expand each per-slot parameter set into per-occurrence wire order
    pub fn wire_params(&self, slots: &[Value]) -> Vec<Value> {
        self.placeholders
            .iter()
            .map(|p| slots.get(p.slot).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Substitute literals for placeholders (text protocol)
    pub fn interpolate(&self, slots: &[Value], dialect: Dialect) -> Result<String> {
        let mut out = String::with_capacity(self.native_sql.len() + slots.len() * 8);
        let mut last = 0;
        for p in &self.placeholders {
            out.push_str(&self.native_sql[last..p.range.start]);
            let value = slots.get(p.slot).ok_or(Error::MissingParameter(p.slot + 1))?;
            out.push_str(&to_sql_literal(value, dialect)?);
            last = p.range.end;
        }
        out.push_str(&self.native_sql[last..]);
        Ok(out)
    }

    /// Build a multi-row INSERT with the `VALUES` group repeated `rows`
    /// times. Placeholders stay `?`; bind rows are concatenated in order.
    pub fn multi_values_sql(&self, rows: usize) -> Option<String> {
        let group = self.values_group.clone()?;
        let sql = &self.native_sql;
        let tuple = &sql[group.clone()];
        let mut out = String::with_capacity(sql.len() + (tuple.len() + 1) * rows);
        out.push_str(&sql[..group.start]);
        for i in 0..rows {
            if i > 0 {
                out.push(',');
            }
            out.push_str(tuple);
        }
        out.push_str(&sql[group.end..]);
        Some(out)
    }

    /// Multi-row INSERT with every row's literals substituted
    pub fn multi_values_text(&self, rows: &[Vec<Value>], dialect: Dialect) -> Result<Option<String>> {
        let Some(group) = self.values_group.clone() else {
            return Ok(None);
        };
        let sql = &self.native_sql;
        let mut out = String::with_capacity(sql.len() * rows.len().max(1));
        out.push_str(&sql[..group.start]);
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let mut last = group.start;
            for p in self.placeholders.iter().filter(|p| group.contains(&p.range.start)) {
                out.push_str(&sql[last..p.range.start]);
                let value = row.get(p.slot).ok_or(Error::MissingParameter(p.slot + 1))?;
                out.push_str(&to_sql_literal(value, dialect)?);
                last = p.range.end;
            }
            out.push_str(&sql[last..group.end]);
        }
        out.push_str(&sql[group.end..]);
        Ok(Some(out))
    }

    /// Size in bytes of one rendered `VALUES` tuple (for chunk sizing)
    pub fn values_group_len(&self) -> usize {
        self.values_group.as_ref().map(|g| g.len()).unwrap_or(0)
    }
}

/// The immutable plan derived from a statement and the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// How the statement was created
    pub kind: StatementKind,
    /// SQL with normalized placeholders
    pub sql_template: String,
    /// Number of parameter slots
    pub param_count: usize,
    /// Network path
    pub protocol_path: ProtocolPath,
}

impl ExecutionPlan {
    /// Derive the plan
    ///
    /// Simple statements use the text protocol. Prepared and callable
    /// statements use prepare-and-execute when enabled, then server-side
    /// prepare. Oracle mode and callables are always server-side; otherwise
    /// prepared statements fall back to client-side interpolation.
    pub fn derive(statement: &Statement, kind: StatementKind, config: &Config) -> Self {
        let protocol_path = match kind {
            StatementKind::Simple => ProtocolPath::Text,
            _ if config.use_oracle_prepare_execute => ProtocolPath::PrepareExecute,
            StatementKind::Callable => ProtocolPath::ServerPrepared,
            StatementKind::Prepared if config.use_server_prep_stmts || config.mode.is_oracle() => {
                ProtocolPath::ServerPrepared
            }
            StatementKind::Prepared => ProtocolPath::Text,
        };
        tracing::trace!(
            sql = statement.native_sql(),
            kind = ?kind,
            path = ?protocol_path,
            "derived execution plan"
        );
        Self {
            kind,
            sql_template: statement.native_sql().to_string(),
            param_count: statement.param_count(),
            protocol_path,
        }
    }
}

// =============================================================================
// Literal rendering
// =============================================================================

/// Render a value as a SQL literal for the given dialect
pub fn to_sql_literal(value: &Value, dialect: Dialect) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Decimal(d) => d.clone(),
        Value::Float(f) if f.is_finite() => f.to_string(),
        Value::Double(d) if d.is_finite() => d.to_string(),
        Value::Float(f) => quote_string(&crate::types::coerce::format_float(*f), dialect),
        Value::Double(d) => quote_string(&crate::types::coerce::format_double(*d), dialect),
        Value::Bool(b) => u8::from(*b).to_string(),
        Value::String(s) => quote_string(s, dialect),
        Value::Bytes(b) => hex_literal(b),
        Value::Date(d) => match dialect {
            Dialect::Oracle => format!("DATE '{}'", d.format("%Y-%m-%d")),
            Dialect::MySql => format!("'{}'", d.format("%Y-%m-%d")),
        },
        Value::Time(t) => format!("'{}'", format_time(t)),
        Value::DateTime(dt) => match dialect {
            Dialect::Oracle => format!("TIMESTAMP '{}'", format_datetime(dt)),
            Dialect::MySql => format!("'{}'", format_datetime(dt)),
        },
        Value::TimestampTz(ts) => {
            let local = format_datetime(&ts.naive_local());
            match dialect {
                Dialect::Oracle => format!("TIMESTAMP '{} {}'", local, ts.offset()),
                Dialect::MySql => format!("'{}'", local),
            }
        }
        Value::Clob(buf) => quote_string(&buf.to_text()?, dialect),
        Value::Blob(buf) => hex_literal(&buf.to_bytes()),
        Value::Cursor(_) | Value::Piece(_) => {
            return Err(Error::FeatureNotSupported(
                "cursor or piece values cannot be inlined as literals".to_string(),
            ))
        }
    })
}

fn hex_literal(bytes: &[u8]) -> String {
    format!("X'{}'", hex::encode_upper(bytes))
}

fn quote_string(s: &str, dialect: Dialect) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match (dialect, ch) {
            (_, '\'') => out.push_str("''"),
            (Dialect::MySql, '\\') => out.push_str("\\\\"),
            (Dialect::MySql, '\0') => out.push_str("\\0"),
            (Dialect::MySql, '\n') => out.push_str("\\n"),
            (Dialect::MySql, '\r') => out.push_str("\\r"),
            (Dialect::MySql, '\u{1a}') => out.push_str("\\Z"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

// =============================================================================
// Scanning
// =============================================================================

#[derive(Debug)]
struct Found {
    range: Range<usize>,
    name: Option<String>,
}

fn normalize_bind_name(name: &str) -> String {
    if name.starts_with('"') && name.ends_with('"') && name.len() >= 2 {
        name[1..name.len() - 1].to_string()
    } else {
        name.to_uppercase()
    }
}

fn is_bind_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '#'
}

/// Walk `sql` and call `on_code` for every byte index outside literals and
/// comments. The callback returns how many bytes it consumed (0 = one char).
fn walk_code(sql: &str, dialect: Dialect, mut on_code: impl FnMut(usize) -> usize) {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut i = 0;

    while i < len {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' if b != b'`' || dialect == Dialect::MySql => {
                i += 1;
                while i < len {
                    if bytes[i] == b'\\' && dialect == Dialect::MySql && b != b'`' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == b {
                        // doubled quote is an escaped quote
                        if i + 1 < len && bytes[i + 1] == b {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if i + 1 < len && bytes[i + 1] == b'-' => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'#' if dialect == Dialect::MySql => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < len && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                let consumed = on_code(i);
                if consumed > 0 {
                    i += consumed;
                } else {
                    i += sql[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                }
            }
        }
    }
}

fn scan_placeholders(sql: &str, dialect: Dialect, named: bool) -> Vec<Found> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();

    walk_code(sql, dialect, |i| match bytes[i] {
        b'?' => {
            found.push(Found {
                range: i..i + 1,
                name: None,
            });
            1
        }
        b':' if named => {
            // `::` casts and `:=` assignments are not placeholders
            if i > 0 && bytes[i - 1] == b':' {
                return 1;
            }
            let rest = &sql[i + 1..];
            let name_len = if rest.starts_with('"') {
                rest[1..].find('"').map(|end| end + 2).unwrap_or(0)
            } else {
                match rest.chars().next() {
                    Some(c) if c.is_alphanumeric() => rest
                        .char_indices()
                        .find(|(_, c)| !is_bind_name_char(*c))
                        .map(|(pos, _)| pos)
                        .unwrap_or(rest.len()),
                    _ => 0,
                }
            };
            if name_len == 0 {
                return 1;
            }
            found.push(Found {
                range: i..i + 1 + name_len,
                name: Some(normalize_bind_name(&rest[..name_len])),
            });
            1 + name_len
        }
        _ => 0,
    });

    found
}

/// First keyword, skipping whitespace, comments, `(` and `{`
fn first_keyword(sql: &str) -> String {
    let mut rest = sql.trim_start();
    loop {
        if let Some(r) = rest.strip_prefix("--") {
            rest = r.split_once('\n').map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else if let Some(r) = rest.strip_prefix("/*") {
            rest = r.split_once("*/").map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else if let Some(r) = rest.strip_prefix(['(', '{']) {
            rest = r.trim_start();
        } else {
            break;
        }
    }
    rest.chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '?')
        .collect::<String>()
        .to_ascii_uppercase()
}

fn detect_statement_type(sql: &str) -> StatementType {
    let trimmed = sql.trim_start();
    if trimmed.starts_with('{') {
        return StatementType::Call;
    }
    match first_keyword(sql).as_str() {
        "SELECT" | "WITH" | "SHOW" | "DESC" | "DESCRIBE" | "EXPLAIN" | "VALUES" => {
            StatementType::Query
        }
        "INSERT" | "REPLACE" => StatementType::Insert,
        "UPDATE" | "DELETE" | "MERGE" => StatementType::Dml,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" | "GRANT" | "REVOKE" | "COMMENT" => {
            StatementType::Ddl
        }
        "CALL" | "BEGIN" | "DECLARE" => StatementType::Call,
        _ => StatementType::Unknown,
    }
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let tail = &s[keyword.len()..];
    match tail.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(tail.trim_start()),
    }
}

/// Split at top-level commas (outside parentheses and literals)
fn split_args(args: &str, dialect: Dialect) -> Vec<String> {
    if args.trim().is_empty() {
        return Vec::new();
    }
    let bytes = args.as_bytes();
    let mut depth = 0i32;
    let mut cuts = Vec::new();
    walk_code(args, dialect, |i| {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => cuts.push(i),
            _ => {}
        }
        0
    });
    let mut out = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        out.push(args[start..cut].trim().to_string());
        start = cut + 1;
    }
    out.push(args[start..].trim().to_string());
    out
}

/// Recognize `{call p(..)}`, `{? = call f(..)}`, `call p(..)`,
/// `begin p(..); end;` and `begin ? := f(..); end;`
fn parse_call(
    sql: &str,
    dialect: Dialect,
    occurrence_slots: &[usize],
    slot_names: &[Option<String>],
) -> Option<CallSpec> {
    let mut body = sql.trim().trim_end_matches(';').trim();
    if let Some(inner) = body.strip_prefix('{') {
        body = inner.strip_suffix('}')?.trim();
    }

    let mut is_function = false;
    if let Some(rest) = body.strip_prefix('?') {
        let rest = rest.trim_start();
        let rest = rest.strip_prefix(":=").or_else(|| rest.strip_prefix('='))?;
        is_function = true;
        body = rest.trim_start();
    }

    if let Some(rest) = strip_keyword(body, "call") {
        body = rest;
    } else if let Some(rest) = strip_keyword(body, "begin") {
        let end_pos = rest.to_ascii_lowercase().rfind("end")?;
        body = rest[..end_pos].trim().trim_end_matches(';').trim();
        if let Some(r) = body.strip_prefix('?') {
            let r = r.trim_start().strip_prefix(":=")?;
            is_function = true;
            body = r.trim_start();
        }
    } else if !is_function {
        return None;
    }

    let (routine, args_text) = match body.find('(') {
        Some(open) => {
            let close = body.rfind(')')?;
            (body[..open].trim(), &body[open + 1..close])
        }
        None => (body.trim(), ""),
    };
    if routine.is_empty() || routine.contains(char::is_whitespace) {
        return None;
    }

    // Placeholder occurrences inside the call arrive in order; the return
    // slot, if any, is the first one.
    let mut next_occurrence = is_function as usize;
    let mut args = Vec::new();
    for raw in split_args(args_text, dialect) {
        let (formal, expr) = match raw.split_once("=>") {
            Some((formal, expr)) => (Some(formal.trim().to_string()), expr.trim()),
            None => (None, raw.as_str()),
        };
        if expr == "?" {
            let slot = *occurrence_slots.get(next_occurrence)?;
            next_occurrence += 1;
            let formal = formal.or_else(|| slot_names.get(slot).cloned().flatten());
            args.push(CallArg::Param { slot, formal });
        } else {
            next_occurrence += scan_placeholders(expr, dialect, false).len();
            args.push(CallArg::Literal(raw.clone()));
        }
    }

    Some(CallSpec {
        routine: routine.to_string(),
        is_function,
        args,
    })
}

fn render_call(spec: &CallSpec, fallback: &str, dialect: Dialect) -> String {
    let mut args = Vec::with_capacity(spec.args.len());
    for arg in &spec.args {
        match arg {
            CallArg::Param {
                formal: Some(f), ..
            } if dialect.is_oracle() && !f.is_empty() && f.chars().all(is_bind_name_char) => {
                args.push(format!("{} => ?", f))
            }
            CallArg::Param { .. } => args.push("?".to_string()),
            CallArg::Literal(text) => args.push(text.clone()),
        }
    }
    if spec.routine.is_empty() {
        return fallback.to_string();
    }
    let call = format!("CALL {}({})", spec.routine, args.join(", "));
    if spec.is_function {
        format!("? = {}", call)
    } else {
        call
    }
}

/// Byte range of the parenthesized tuple after `VALUES` / `VALUE`
fn find_values_group(sql: &str, dialect: Dialect) -> Option<Range<usize>> {
    let bytes = sql.as_bytes();
    let upper = sql.to_ascii_uppercase();
    let mut keyword_end = None;
    let mut depth = 0i32;
    let mut group_start = None;
    let mut group = None;

    walk_code(sql, dialect, |i| {
        if group.is_some() {
            return 1;
        }
        match bytes[i] {
            b'(' => {
                if depth == 0 && keyword_end.is_some() && group_start.is_none() {
                    group_start = Some(i);
                }
                depth += 1;
                1
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = group_start {
                        group = Some(start..i + 1);
                    }
                }
                1
            }
            _ if depth == 0 && keyword_end.is_none() => {
                let at_word_start = i == 0 || !(bytes[i - 1] as char).is_ascii_alphanumeric();
                for kw in ["VALUES", "VALUE"] {
                    if at_word_start && upper[i..].starts_with(kw) {
                        let after = upper[i + kw.len()..].chars().next();
                        if !after.map(|c| c.is_alphanumeric() || c == '_').unwrap_or(false) {
                            keyword_end = Some(i + kw.len());
                            return kw.len();
                        }
                    }
                }
                0
            }
            _ => 0,
        }
    });

    let group = group?;
    // Only a single tuple followed by nothing that references rows
    let tail = sql[group.end..].trim_start();
    if tail.starts_with(',') || strip_keyword(tail, "select").is_some() {
        return None;
    }
    // The tuple must hold only placeholders/literals, no subqueries
    if strip_keyword(sql[group.start + 1..].trim_start(), "select").is_some() {
        return None;
    }
    Some(group)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql(sql: &str) -> Statement {
        Statement::parse_with(sql, Dialect::MySql, false)
    }

    fn oracle_named(sql: &str) -> Statement {
        Statement::parse_with(sql, Dialect::Oracle, true)
    }

    #[test]
    fn test_statement_type_detection() {
        assert_eq!(mysql("SELECT * FROM t").statement_type(), StatementType::Query);
        assert_eq!(mysql("  (select 1)").statement_type(), StatementType::Query);
        assert_eq!(mysql("insert into t values (1)").statement_type(), StatementType::Insert);
        assert_eq!(mysql("UPDATE t SET x = 1").statement_type(), StatementType::Dml);
        assert_eq!(mysql("CREATE TABLE t (x INT)").statement_type(), StatementType::Ddl);
        assert_eq!(mysql("/* hint */ DELETE FROM t").statement_type(), StatementType::Dml);
        assert_eq!(mysql("{call p()}").statement_type(), StatementType::Call);
        assert_eq!(mysql("begin p(); end;").statement_type(), StatementType::Call);
    }

    #[test]
    fn test_positional_placeholders() {
        let stmt = mysql("SELECT * FROM t WHERE a = ? AND b = '?' AND c = ? -- ?");
        assert_eq!(stmt.param_count(), 2);
        assert_eq!(stmt.placeholders()[1].slot, 1);
    }

    #[test]
    fn test_mysql_comments_and_escapes() {
        let stmt = mysql("SELECT 'it\\'s ?', `col?` FROM t # ?\nWHERE x = ?");
        assert_eq!(stmt.param_count(), 1);
    }

    #[test]
    fn test_colon_is_text_without_named_binding() {
        let stmt = Statement::parse_with("SELECT * FROM t WHERE a = :a", Dialect::Oracle, false);
        assert_eq!(stmt.param_count(), 0);
        assert_eq!(stmt.native_sql(), "SELECT * FROM t WHERE a = :a");
    }

    #[test]
    fn test_named_placeholders_share_slots() {
        let stmt = oracle_named("SELECT * FROM t WHERE a = :a OR b = :b OR c = :A");
        assert_eq!(stmt.param_count(), 2);
        assert_eq!(stmt.native_sql(), "SELECT * FROM t WHERE a = ? OR b = ? OR c = ?");
        assert_eq!(stmt.slot_of(":a"), Some(0));
        assert_eq!(stmt.slot_of("B"), Some(1));
        let slots: Vec<usize> = stmt.placeholders().iter().map(|p| p.slot).collect();
        assert_eq!(slots, vec![0, 1, 0]);
    }

    #[test]
    fn test_non_ascii_named_placeholder() {
        let stmt = oracle_named("INSERT INTO t VALUES (:名字, :年龄)");
        assert_eq!(stmt.param_count(), 2);
        assert_eq!(stmt.slot_of("名字"), Some(0));
        assert_eq!(stmt.slot_of(":年龄"), Some(1));
    }

    #[test]
    fn test_call_escape_forms() {
        for sql in [
            "{call p(?, ?)}",
            "call p(?, ?)",
            "CALL p(?,?);",
            "begin p(?, ?); end;",
        ] {
            let stmt = mysql(sql);
            let spec = stmt.call_spec().unwrap_or_else(|| panic!("no call in {}", sql));
            assert_eq!(spec.routine, "p");
            assert!(!spec.is_function);
            assert_eq!(spec.declared_params(), 2);
            assert_eq!(stmt.native_sql(), "CALL p(?, ?)");
        }
    }

    #[test]
    fn test_function_call_reserves_first_slot() {
        let stmt = mysql("{? = call f('x', 100, ?, ?)}");
        let spec = stmt.call_spec().unwrap();
        assert!(spec.is_function);
        assert_eq!(spec.args.len(), 4);
        assert_eq!(spec.declared_params(), 3);
        assert_eq!(stmt.param_count(), 3);
        assert_eq!(spec.args[2], CallArg::Param { slot: 1, formal: None });
        assert_eq!(stmt.native_sql(), "? = CALL f('x', 100, ?, ?)");

        let block = mysql("begin ? := f(?); end;");
        assert!(block.call_spec().unwrap().is_function);
    }

    #[test]
    fn test_named_call_arguments() {
        let stmt = oracle_named("{call p(p_in => :v_in, p_out => :v_out)}");
        let spec = stmt.call_spec().unwrap();
        assert_eq!(spec.args.len(), 2);
        assert_eq!(
            spec.args[1],
            CallArg::Param { slot: 1, formal: Some("p_out".to_string()) }
        );
        assert_eq!(stmt.native_sql(), "CALL p(p_in => ?, p_out => ?)");
    }

    #[test]
    fn test_interpolation_dialects() {
        let stmt = mysql("INSERT INTO t VALUES (?, ?, ?, ?)");
        let params = vec![
            Value::Int(1),
            Value::String("O'Brien\\".to_string()),
            Value::Null,
            Value::Bytes(bytes::Bytes::from_static(&[0xde, 0xad])),
        ];
        assert_eq!(
            stmt.interpolate(&params, Dialect::MySql).unwrap(),
            "INSERT INTO t VALUES (1, 'O''Brien\\\\', NULL, X'DEAD')"
        );
        assert_eq!(
            stmt.interpolate(&params, Dialect::Oracle).unwrap(),
            "INSERT INTO t VALUES (1, 'O''Brien\\', NULL, X'DEAD')"
        );
    }

    #[test]
    fn test_multi_values_rewrite() {
        let stmt = mysql("INSERT INTO t (a, b) VALUES (?, ?) ON DUPLICATE KEY UPDATE b = 1");
        assert!(stmt.supports_multi_values());
        assert_eq!(
            stmt.multi_values_sql(3).unwrap(),
            "INSERT INTO t (a, b) VALUES (?, ?),(?, ?),(?, ?) ON DUPLICATE KEY UPDATE b = 1"
        );
        let text = stmt
            .multi_values_text(
                &[vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3), Value::Int(4)]],
                Dialect::MySql,
            )
            .unwrap()
            .unwrap();
        assert_eq!(text, "INSERT INTO t (a, b) VALUES (1, 2),(3, 4) ON DUPLICATE KEY UPDATE b = 1");
    }

    #[test]
    fn test_insert_select_is_not_rewritable() {
        assert!(!mysql("INSERT INTO t SELECT * FROM s WHERE a = ?").supports_multi_values());
        assert!(!mysql("UPDATE t SET a = ?").supports_multi_values());
        assert!(!mysql("INSERT INTO t VALUES (1), (2)").supports_multi_values());
    }

    #[test]
    fn test_protocol_path_selection() {
        let stmt = mysql("SELECT ?");
        let config = Config::default();
        assert_eq!(
            ExecutionPlan::derive(&stmt, StatementKind::Simple, &config).protocol_path,
            ProtocolPath::Text
        );
        assert_eq!(
            ExecutionPlan::derive(&stmt, StatementKind::Prepared, &config).protocol_path,
            ProtocolPath::Text
        );
        let config = config.with_server_prep_stmts(true);
        assert_eq!(
            ExecutionPlan::derive(&stmt, StatementKind::Prepared, &config).protocol_path,
            ProtocolPath::ServerPrepared
        );
        let config = config.with_oracle_prepare_execute(true);
        assert_eq!(
            ExecutionPlan::derive(&stmt, StatementKind::Callable, &config).protocol_path,
            ProtocolPath::PrepareExecute
        );
    }

    #[test]
    fn test_column_flags() {
        let col = ColumnInfo::new("ID", SqlType::BigInt)
            .with_table("T")
            .with_flags(column_flags::PRIMARY_KEY | column_flags::AUTO_INCREMENT);
        assert!(col.is_primary_key());
        assert!(col.is_auto_increment());
        assert!(!col.is_nullable());
        assert_eq!(col.label, "ID");
    }
}
