//! Execute request
//!
//! One request covers every execution shape: text statements, server-side
//! parse, re-execution of a cached cursor, combined prepare-and-execute, and
//! array DML (several bind rows in one round trip). The `options` bitmask
//! says which steps the server performs.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::{exec_option, BindDirection, SqlType};
use crate::error::{Error, Result};
use crate::row::Value;

/// Direction and declared type of one bind position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindMeta {
    /// IN, OUT or IN OUT
    pub direction: BindDirection,
    /// Type the server should produce for OUT positions
    pub sql_type: SqlType,
}

impl BindMeta {
    /// Plain IN bind
    pub fn input() -> Self {
        Self::default()
    }
}

/// Execute request body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecuteRequest {
    /// Server cursor to reuse; 0 opens a new one
    pub cursor_id: u32,
    /// Statement text; `None` when re-executing `cursor_id`
    pub sql: Option<String>,
    /// Bitmask of [`exec_option`] flags
    pub options: u32,
    /// Rows to return with the execute (or the streaming sentinel)
    pub fetch_size: i32,
    /// One entry per bind position
    pub binds: Vec<BindMeta>,
    /// Bind rows; more than one row is an array execute
    pub rows: Vec<Vec<Value>>,
}

impl ExecuteRequest {
    /// Text statement with nothing bound
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            sql: Some(sql.into()),
            options: exec_option::PARSE | exec_option::EXECUTE | exec_option::TEXT,
            ..Default::default()
        }
    }

    /// Parse `sql` on the server and execute it with `binds`
    pub fn prepared(sql: impl Into<String>, binds: Vec<BindMeta>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            sql: Some(sql.into()),
            options: exec_option::PARSE | exec_option::EXECUTE | exec_option::KEEP_CURSOR,
            binds,
            rows,
            ..Default::default()
        }
    }

    /// Re-execute an already parsed cursor
    pub fn reexecute(cursor_id: u32, binds: Vec<BindMeta>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            cursor_id,
            options: exec_option::EXECUTE | exec_option::KEEP_CURSOR,
            binds,
            rows,
            ..Default::default()
        }
    }

    /// Add option flags
    pub fn with_options(mut self, flags: u32) -> Self {
        self.options |= flags;
        self
    }

    /// Set the prefetch size
    pub fn with_fetch_size(mut self, fetch_size: i32) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    /// Check an option flag
    pub fn has_option(&self, flag: u32) -> bool {
        self.options & flag != 0
    }

    /// Number of bind rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn write(&self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_ub4(self.cursor_id)?;
        buf.write_string_with_length(self.sql.as_deref())?;
        buf.write_ub4(self.options)?;
        buf.write_sb8(self.fetch_size as i64)?;

        buf.write_ub2(self.binds.len() as u16)?;
        for bind in &self.binds {
            buf.write_u8(bind.direction as u8)?;
            buf.write_u8(bind.sql_type as u8)?;
        }

        buf.write_ub4(self.rows.len() as u32)?;
        for row in &self.rows {
            if row.len() != self.binds.len() {
                return Err(Error::Internal(format!(
                    "bind row has {} values for {} positions",
                    row.len(),
                    self.binds.len()
                )));
            }
            for value in row {
                value.write(buf)?;
            }
        }
        Ok(())
    }

    pub(crate) fn read(buf: &mut ReadBuffer) -> Result<Self> {
        let cursor_id = buf.read_ub4()?;
        let sql = buf.read_string_with_length()?;
        let options = buf.read_ub4()?;
        let fetch_size = buf.read_sb8()?;
        let fetch_size = i32::try_from(fetch_size)
            .map_err(|_| Error::Protocol(format!("fetch size {} out of range", fetch_size)))?;

        let bind_count = buf.read_ub2()? as usize;
        let mut binds = Vec::with_capacity(bind_count);
        for _ in 0..bind_count {
            let direction = BindDirection::try_from(buf.read_u8()?)?;
            let sql_type = SqlType::from_wire(buf.read_u8()?);
            binds.push(BindMeta { direction, sql_type });
        }

        let row_count = buf.read_ub4()? as usize;
        let mut rows = Vec::with_capacity(row_count.min(4096));
        for _ in 0..row_count {
            let mut row = Vec::with_capacity(bind_count);
            for _ in 0..bind_count {
                row.push(Value::read(buf)?);
            }
            rows.push(row);
        }

        Ok(Self {
            cursor_id,
            sql,
            options,
            fetch_size,
            binds,
            rows,
        })
    }
}
