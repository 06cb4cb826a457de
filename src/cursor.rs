//! Result sets
//!
//! A [`ResultSet`] is one of four cursor kinds sharing one navigation API:
//!
//! - [`CursorKind::ForwardOnly`]: `next()` only. Rows arrive with the
//!   execute reply and, when the server keeps a cursor open, in further
//!   fetches.
//! - [`CursorKind::ScrollInsensitive`]: every row is buffered on the client
//!   at open time; `first`, `last`, `absolute`, `relative` and `previous`
//!   move freely over the snapshot.
//! - [`CursorKind::CursorFetch`]: forward-only, fetched from a server cursor
//!   in pages of the fetch size. `get_row()` counts across pages.
//! - [`CursorKind::RefCursor`]: a cursor handed back by a procedure through
//!   an OUT parameter, read forward-only.
//!
//! Positions are 1-based. Closing a result set is terminal: every later call
//! fails with [`Error::ResultSetClosed`] except `close()`, `is_closed()`,
//! `warnings()` and `holdability()`.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut stmt = conn.create_statement_with(
//!     ResultSetType::ScrollInsensitive,
//!     Concurrency::ReadOnly,
//! )?;
//! let mut rs = stmt.execute_query_sql("SELECT id, name FROM users").await?;
//! if rs.last().await? {
//!     println!("{} rows", rs.get_row()?);
//! }
//! rs.absolute(-2).await?;
//! ```

use std::cell::Cell;
use std::sync::Arc;

use crate::connection::{ConnectionInner, Scope};
use crate::constants::{exec_option, SqlType, STREAMING_FETCH_SIZE};
use crate::error::{Error, Result};
use crate::messages::{BindMeta, ExecuteRequest, FetchRequest, Request};
use crate::row::{Row, Value};
use crate::statement::ColumnInfo;
use crate::types::{coerce, CoercionContext, Lob, LobKind, PieceBuffer, PieceSource, RefCursor};

/// Rows requested per fetch when no fetch size is set
const DEFAULT_PAGE_ROWS: u32 = 100;

/// Scrollability requested when creating a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultSetType {
    /// `next()` only
    #[default]
    ForwardOnly,
    /// Client-buffered, freely scrollable snapshot
    ScrollInsensitive,
}

/// Whether rows may be refreshed from the table they came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Read-only rows
    #[default]
    ReadOnly,
    /// Rows of a single keyed table; supports `refresh_row`
    Updatable,
}

/// Cursor variant behind a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// Streamed, `next()` only
    ForwardOnly,
    /// Fully buffered, scrollable
    ScrollInsensitive,
    /// Paged from a server cursor, `next()` only
    CursorFetch,
    /// Procedure-returned cursor, `next()` only
    RefCursor,
}

impl CursorKind {
    /// Only `next()` moves the cursor
    pub fn is_forward_only(&self) -> bool {
        !matches!(self, CursorKind::ScrollInsensitive)
    }
}

/// Position of the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Before the first row
    BeforeFirst,
    /// On the given 1-based row
    OnRow(u64),
    /// After the last row
    AfterLast,
}

/// What happens to open result sets at commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holdability {
    /// Result sets stay open across commits
    HoldCursorsOverCommit,
    /// Result sets are closed by a commit
    CloseCursorsAtCommit,
}

/// Navigation state over the rows held on the client
///
/// `buffered_window` holds consecutive rows starting at logical row
/// `window_start`. For a scroll-insensitive cursor the window is the whole
/// result.
#[derive(Debug, Clone)]
pub struct CursorState {
    mode: CursorKind,
    position: Position,
    fetch_size: i32,
    buffered_window: Vec<Row>,
    window_start: u64,
    closed: bool,
}

impl CursorState {
    fn new(mode: CursorKind, fetch_size: i32, rows: Vec<Row>) -> Self {
        Self {
            mode,
            position: Position::BeforeFirst,
            fetch_size,
            buffered_window: rows,
            window_start: 1,
            closed: false,
        }
    }

    /// Cursor kind
    pub fn mode(&self) -> CursorKind {
        self.mode
    }

    /// Current position
    pub fn position(&self) -> Position {
        self.position
    }

    /// Fetch size hint
    pub fn fetch_size(&self) -> i32 {
        self.fetch_size
    }

    /// Whether the cursor was closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// One past the last logical row held in the window
    fn window_end(&self) -> u64 {
        self.window_start + self.buffered_window.len() as u64
    }

    fn row_count(&self) -> u64 {
        self.buffered_window.len() as u64
    }

    fn current_index(&self) -> Option<usize> {
        match self.position {
            Position::OnRow(n) if n >= self.window_start && n < self.window_end() => {
                Some((n - self.window_start) as usize)
            }
            _ => None,
        }
    }

    fn current_row(&self) -> Option<&Row> {
        self.current_index().map(|i| &self.buffered_window[i])
    }

    /// Position as a number: 0 before the first row, `N + 1` after the last
    fn ordinal(&self) -> i64 {
        match self.position {
            Position::BeforeFirst => 0,
            Position::OnRow(n) => n as i64,
            Position::AfterLast => self.row_count() as i64 + 1,
        }
    }

    /// Move to `target`; out-of-range targets park before-first/after-last
    fn move_to(&mut self, target: i64) -> bool {
        let count = self.row_count() as i64;
        if target <= 0 {
            self.position = Position::BeforeFirst;
            false
        } else if target > count {
            self.position = Position::AfterLast;
            false
        } else {
            self.position = Position::OnRow(target as u64);
            true
        }
    }

    fn absolute(&mut self, row: i64) -> Result<bool> {
        if row == 0 {
            return Err(Error::InvalidArgument(
                "absolute(0) is not a valid row position".to_string(),
            ));
        }
        let target = if row > 0 {
            row
        } else {
            (self.row_count() as i64).saturating_add(row).saturating_add(1)
        };
        Ok(self.move_to(target))
    }

    /// Drop rows before the current one so the window only holds unread rows
    fn discard_read_rows(&mut self) {
        let keep_from = match self.position {
            Position::OnRow(n) if n >= self.window_start => n,
            Position::BeforeFirst => self.window_start,
            _ => self.window_end(),
        };
        let drop = ((keep_from - self.window_start) as usize).min(self.buffered_window.len());
        self.buffered_window.drain(..drop);
        self.window_start += drop as u64;
    }
}

/// Something that selects a column: a 1-based index or a label
pub trait ColumnIndex {
    /// Resolve to a 0-based index
    fn resolve(&self, columns: &[ColumnInfo]) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn resolve(&self, columns: &[ColumnInfo]) -> Result<usize> {
        if *self == 0 || *self > columns.len() {
            Err(Error::InvalidArgument(format!(
                "Column Index out of range, {} > {}.",
                self,
                columns.len()
            )))
        } else {
            Ok(self - 1)
        }
    }
}

impl ColumnIndex for i32 {
    fn resolve(&self, columns: &[ColumnInfo]) -> Result<usize> {
        usize::try_from(*self).unwrap_or(0).resolve(columns)
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, columns: &[ColumnInfo]) -> Result<usize> {
        columns
            .iter()
            .position(|c| c.label.eq_ignore_ascii_case(self))
            .or_else(|| columns.iter().position(|c| c.name.eq_ignore_ascii_case(self)))
            .ok_or_else(|| Error::InvalidArgument(format!("Column '{}' not found.", self)))
    }
}

/// Column metadata of a result set
#[derive(Debug, Clone)]
pub struct ResultSetMetadata {
    columns: Vec<ColumnInfo>,
    ctx: CoercionContext,
}

impl ResultSetMetadata {
    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column(&self, index: usize) -> Result<&ColumnInfo> {
        let i = index.resolve(&self.columns)?;
        Ok(&self.columns[i])
    }

    /// Column name (1-based index)
    pub fn column_name(&self, index: usize) -> Result<&str> {
        Ok(&self.column(index)?.name)
    }

    /// Column label
    pub fn column_label(&self, index: usize) -> Result<&str> {
        Ok(&self.column(index)?.label)
    }

    /// Reported type, after the connection's mapping rules
    pub fn column_type(&self, index: usize) -> Result<SqlType> {
        Ok(coerce::reported_type(self.column(index)?, &self.ctx))
    }

    /// Name of the reported type
    pub fn column_type_name(&self, index: usize) -> Result<&'static str> {
        Ok(coerce::reported_type_name(self.column(index)?, &self.ctx))
    }

    /// Declared precision
    pub fn precision(&self, index: usize) -> Result<u32> {
        Ok(self.column(index)?.precision)
    }

    /// Declared scale
    pub fn scale(&self, index: usize) -> Result<i16> {
        Ok(self.column(index)?.scale)
    }

    /// Whether the column accepts NULL
    pub fn is_nullable(&self, index: usize) -> Result<bool> {
        Ok(self.column(index)?.is_nullable())
    }

    /// Table the column was read from
    pub fn table_name(&self, index: usize) -> Result<&str> {
        Ok(&self.column(index)?.table_name)
    }

    /// Whether the column is part of the primary key
    pub fn is_primary_key(&self, index: usize) -> Result<bool> {
        Ok(self.column(index)?.is_primary_key())
    }

    /// All columns
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }
}

/// Everything needed to open a result set after an execute
pub(crate) struct OpenCursor {
    pub kind: CursorKind,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub cursor_id: u32,
    pub more_rows: bool,
    /// The cursor belongs to this result set (not to a prepared statement)
    pub owns_cursor: bool,
    pub fetch_size: i32,
    pub concurrency: Concurrency,
    pub warning_count: u16,
}

/// A navigable set of rows
pub struct ResultSet {
    state: CursorState,
    columns: Vec<ColumnInfo>,
    conn: Option<Arc<ConnectionInner>>,
    scope: Scope,
    cursor_id: u32,
    more_rows: bool,
    owns_cursor: bool,
    ctx: CoercionContext,
    updatable: bool,
    warning_count: u16,
    last_was_null: Cell<bool>,
}

impl ResultSet {
    /// Open a result set over an execute reply. Scroll-insensitive results
    /// are drained into the client buffer here.
    pub(crate) async fn open(conn: Arc<ConnectionInner>, scope: Scope, open: OpenCursor) -> Result<Self> {
        let ctx = CoercionContext::from(conn.config());
        let rows = open
            .rows
            .into_iter()
            .map(|r| r.named(&open.columns))
            .collect();
        let mut rs = Self {
            state: CursorState::new(open.kind, open.fetch_size, rows),
            updatable: false,
            columns: open.columns,
            conn: Some(conn),
            scope,
            cursor_id: open.cursor_id,
            more_rows: open.more_rows,
            owns_cursor: open.owns_cursor,
            ctx,
            warning_count: open.warning_count,
            last_was_null: Cell::new(false),
        };
        if open.concurrency == Concurrency::Updatable {
            match rs.refresh_target() {
                Ok(_) => rs.updatable = true,
                Err(e) => tracing::debug!(reason = %e, "result set downgraded to read-only"),
            }
        }
        if rs.state.mode == CursorKind::ScrollInsensitive {
            while rs.fetch_page().await? {}
        }
        tracing::trace!(
            kind = ?rs.state.mode,
            cursor_id = rs.cursor_id,
            rows = rs.state.buffered_window.len(),
            "result set opened"
        );
        Ok(rs)
    }

    /// A client-side result set over fixed rows (generated keys)
    pub(crate) fn buffered(scope: Scope, columns: Vec<ColumnInfo>, rows: Vec<Row>, ctx: CoercionContext) -> Self {
        let rows = rows.into_iter().map(|r| r.named(&columns)).collect();
        Self {
            state: CursorState::new(CursorKind::ScrollInsensitive, 0, rows),
            columns,
            conn: None,
            scope,
            cursor_id: 0,
            more_rows: false,
            owns_cursor: false,
            ctx,
            updatable: false,
            warning_count: 0,
            last_was_null: Cell::new(false),
        }
    }

    /// A result set reading a procedure-returned cursor
    pub(crate) fn from_ref_cursor(
        conn: Arc<ConnectionInner>,
        scope: Scope,
        cursor: &RefCursor,
        fetch_size: i32,
    ) -> Self {
        let ctx = CoercionContext::from(conn.config());
        Self {
            state: CursorState::new(CursorKind::RefCursor, fetch_size, Vec::new()),
            columns: cursor.columns().to_vec(),
            conn: Some(conn),
            scope,
            cursor_id: cursor.cursor_id(),
            more_rows: cursor.cursor_id() != 0,
            owns_cursor: true,
            ctx,
            updatable: false,
            warning_count: 0,
            last_was_null: Cell::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.closed || self.scope.is_closed() {
            Err(Error::ResultSetClosed)
        } else {
            Ok(())
        }
    }

    fn ensure_scrollable(&self, operation: &'static str) -> Result<()> {
        self.ensure_open()?;
        if self.state.mode.is_forward_only() {
            Err(Error::ForwardOnly(operation))
        } else {
            Ok(())
        }
    }

    fn page_size(&self) -> u32 {
        match self.state.fetch_size {
            STREAMING_FETCH_SIZE => 1,
            n if n > 0 => n as u32,
            _ => match self.conn.as_ref().map(|c| c.config().default_fetch_size) {
                Some(n) if n > 0 => n as u32,
                _ => DEFAULT_PAGE_ROWS,
            },
        }
    }

    /// Append the next page from the server cursor to the window
    async fn fetch_page(&mut self) -> Result<bool> {
        let conn = match &self.conn {
            Some(conn) if self.more_rows && self.cursor_id != 0 => Arc::clone(conn),
            _ => return Ok(false),
        };
        let request = FetchRequest::next(self.cursor_id, self.page_size());
        let response = conn.exchange(Request::Fetch(request)).await?.into_result()?;
        self.more_rows = response.more_rows();
        if response.rows.is_empty() && self.more_rows {
            return Err(Error::Protocol("empty fetch from a cursor with more rows".to_string()));
        }
        tracing::trace!(
            cursor_id = self.cursor_id,
            rows = response.rows.len(),
            more = self.more_rows,
            "fetched page"
        );
        let columns = &self.columns;
        self.state
            .buffered_window
            .extend(response.rows.into_iter().map(|r| r.named(columns)));
        Ok(true)
    }

    /// Make sure logical row `row` is in the window (forward kinds)
    async fn ensure_buffered(&mut self, row: u64) -> Result<bool> {
        while row >= self.state.window_end() {
            self.state.discard_read_rows();
            if !self.fetch_page().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Move to the next row
    pub async fn next(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if !self.state.mode.is_forward_only() {
            let target = self.state.ordinal() + 1;
            return Ok(self.state.move_to(target));
        }
        let next = match self.state.position {
            Position::BeforeFirst => 1,
            Position::OnRow(n) => n + 1,
            Position::AfterLast => return Ok(false),
        };
        if self.ensure_buffered(next).await? {
            self.state.position = Position::OnRow(next);
            Ok(true)
        } else {
            self.state.position = Position::AfterLast;
            Ok(false)
        }
    }

    /// Move to the previous row
    pub async fn previous(&mut self) -> Result<bool> {
        self.ensure_scrollable("previous")?;
        let target = self.state.ordinal().saturating_sub(1);
        Ok(self.state.move_to(target))
    }

    /// Move to the first row
    pub async fn first(&mut self) -> Result<bool> {
        self.ensure_scrollable("first")?;
        Ok(self.state.move_to(1))
    }

    /// Move to the last row
    pub async fn last(&mut self) -> Result<bool> {
        self.ensure_scrollable("last")?;
        let count = self.state.row_count() as i64;
        Ok(self.state.move_to(count))
    }

    /// Move to row `row`; negative rows count from the end (`-1` is the
    /// last row). Out-of-range rows leave the cursor before the first or
    /// after the last row and return `false`. `absolute(0)` is an error and
    /// does not move the cursor.
    pub async fn absolute(&mut self, row: i64) -> Result<bool> {
        self.ensure_scrollable("absolute")?;
        self.state.absolute(row)
    }

    /// Move `rows` rows from the current position
    pub async fn relative(&mut self, rows: i64) -> Result<bool> {
        self.ensure_scrollable("relative")?;
        let target = self.state.ordinal().saturating_add(rows);
        Ok(self.state.move_to(target))
    }

    /// Move before the first row
    pub async fn before_first(&mut self) -> Result<()> {
        self.ensure_scrollable("before_first")?;
        self.state.position = Position::BeforeFirst;
        Ok(())
    }

    /// Move after the last row
    pub async fn after_last(&mut self) -> Result<()> {
        self.ensure_scrollable("after_last")?;
        self.state.position = Position::AfterLast;
        Ok(())
    }

    /// Current 1-based row number, 0 when not on a row
    pub fn get_row(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(match self.state.position {
            Position::OnRow(n) => n,
            _ => 0,
        })
    }

    /// Current position
    pub fn position(&self) -> Result<Position> {
        self.ensure_open()?;
        Ok(self.state.position)
    }

    /// Before the first row of a non-empty result
    pub fn is_before_first(&self) -> Result<bool> {
        self.ensure_open()?;
        let has_rows = !self.state.buffered_window.is_empty() || self.more_rows;
        Ok(has_rows && self.state.position == Position::BeforeFirst)
    }

    /// After the last row of a non-empty result
    pub fn is_after_last(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.state.position == Position::AfterLast && self.state.window_end() > 1)
    }

    /// On the first row
    pub fn is_first(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.state.position == Position::OnRow(1))
    }

    /// On the last row; forward cursors may fetch ahead to find out
    pub async fn is_last(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let Position::OnRow(n) = self.state.position else {
            return Ok(false);
        };
        if self.state.mode.is_forward_only() {
            Ok(!self.ensure_buffered(n + 1).await?)
        } else {
            Ok(n == self.state.row_count())
        }
    }

    // =========================================================================
    // Column access
    // =========================================================================

    fn cell(&self, column: impl ColumnIndex) -> Result<(&Value, &ColumnInfo)> {
        self.ensure_open()?;
        let index = column.resolve(&self.columns)?;
        let row = self
            .state
            .current_row()
            .ok_or_else(|| Error::InvalidCursor("not positioned on a row".to_string()))?;
        let value = row
            .get(index)
            .ok_or_else(|| Error::Protocol(format!("row has no value for column {}", index + 1)))?;
        self.last_was_null.set(value.is_null());
        Ok((value, &self.columns[index]))
    }

    /// Raw value of a column
    pub fn get_value(&self, column: impl ColumnIndex) -> Result<Value> {
        Ok(self.cell(column)?.0.clone())
    }

    /// Value shaped by the column's reported type
    pub fn get_object(&self, column: impl ColumnIndex) -> Result<Value> {
        let (value, info) = self.cell(column)?;
        coerce::to_object(value, info, &self.ctx)
    }

    /// Column as text
    pub fn get_string(&self, column: impl ColumnIndex) -> Result<Option<String>> {
        let (value, _) = self.cell(column)?;
        coerce::to_string(value, &self.ctx)
    }

    /// Column as `i64`
    pub fn get_i64(&self, column: impl ColumnIndex) -> Result<Option<i64>> {
        coerce::to_i64(self.cell(column)?.0)
    }

    /// Column as `i32`
    pub fn get_i32(&self, column: impl ColumnIndex) -> Result<Option<i32>> {
        coerce::to_i32(self.cell(column)?.0)
    }

    /// Column as `i16`
    pub fn get_i16(&self, column: impl ColumnIndex) -> Result<Option<i16>> {
        coerce::to_i16(self.cell(column)?.0)
    }

    /// Column as `i8`
    pub fn get_i8(&self, column: impl ColumnIndex) -> Result<Option<i8>> {
        coerce::to_i8(self.cell(column)?.0)
    }

    /// Column as `f64`; NaN and infinities pass through
    pub fn get_f64(&self, column: impl ColumnIndex) -> Result<Option<f64>> {
        coerce::to_f64(self.cell(column)?.0)
    }

    /// Column as `f32`
    pub fn get_f32(&self, column: impl ColumnIndex) -> Result<Option<f32>> {
        coerce::to_f32(self.cell(column)?.0)
    }

    /// Column as `bool`
    pub fn get_bool(&self, column: impl ColumnIndex) -> Result<Option<bool>> {
        coerce::to_bool(self.cell(column)?.0)
    }

    /// Column as bytes
    pub fn get_bytes(&self, column: impl ColumnIndex) -> Result<Option<Vec<u8>>> {
        coerce::to_bytes(self.cell(column)?.0)
    }

    /// Column as a date
    pub fn get_date(&self, column: impl ColumnIndex) -> Result<Option<chrono::NaiveDate>> {
        let (value, info) = self.cell(column)?;
        coerce::to_date(value, Some(info), &self.ctx)
    }

    /// Column as a time of day
    pub fn get_time(&self, column: impl ColumnIndex) -> Result<Option<chrono::NaiveTime>> {
        coerce::to_time(self.cell(column)?.0, &self.ctx)
    }

    /// Column as a timestamp in the session zone
    pub fn get_timestamp(&self, column: impl ColumnIndex) -> Result<Option<chrono::NaiveDateTime>> {
        let (value, info) = self.cell(column)?;
        coerce::to_datetime(value, Some(info), &self.ctx)
    }

    /// Column as a zoned timestamp
    pub fn get_timestamp_tz(
        &self,
        column: impl ColumnIndex,
    ) -> Result<Option<chrono::DateTime<chrono::FixedOffset>>> {
        let (value, info) = self.cell(column)?;
        coerce::to_timestamp_tz(value, Some(info), &self.ctx)
    }

    /// Column as a LOB handle
    pub fn get_lob(&self, column: impl ColumnIndex) -> Result<Option<Lob>> {
        let (value, info) = self.cell(column)?;
        let piece_size = self.piece_size();
        Ok(match value {
            Value::Null => None,
            Value::Clob(buf) => Some(Lob::new(LobKind::Clob, buf.clone())),
            Value::Blob(buf) => Some(Lob::new(LobKind::Blob, buf.clone())),
            Value::String(s) => Some(Lob::clob(s.clone(), piece_size)),
            Value::Bytes(b) if info.sql_type.is_character() => Some(Lob::new(
                LobKind::Clob,
                PieceBuffer::from_bytes(b.clone(), piece_size),
            )),
            Value::Bytes(b) => Some(Lob::blob(b.clone(), piece_size)),
            other => return Err(Error::conversion("LOB", other.type_name())),
        })
    }

    /// Stream over a character column. Each call starts from the beginning.
    pub fn get_character_stream(&self, column: impl ColumnIndex) -> Result<Option<PieceSource>> {
        Ok(self.get_lob(column)?.map(|lob| lob.open_read()))
    }

    /// Stream over a binary column. Each call starts from the beginning.
    pub fn get_binary_stream(&self, column: impl ColumnIndex) -> Result<Option<PieceSource>> {
        self.get_character_stream(column)
    }

    /// Whether the last column read was NULL
    pub fn was_null(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.last_was_null.get())
    }

    /// 1-based index of the column with `label`
    pub fn find_column(&self, label: &str) -> Result<usize> {
        self.ensure_open()?;
        Ok(label.resolve(&self.columns)? + 1)
    }

    /// Current row as a whole
    pub fn current_row(&self) -> Result<&Row> {
        self.ensure_open()?;
        self.state
            .current_row()
            .ok_or_else(|| Error::InvalidCursor("not positioned on a row".to_string()))
    }

    fn piece_size(&self) -> usize {
        self.conn
            .as_ref()
            .map(|c| c.config().piece_size)
            .unwrap_or(crate::config::DEFAULT_PIECE_SIZE)
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Table and primary-key column indexes used by `refresh_row`
    fn refresh_target(&self) -> Result<(String, Vec<usize>)> {
        let table = self
            .columns
            .first()
            .map(|c| c.table_name.clone())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::NotUpdatable("columns carry no table name".to_string()))?;
        if self.columns.iter().any(|c| c.table_name != table) {
            return Err(Error::NotUpdatable("columns come from more than one table".to_string()));
        }
        let keys: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_primary_key())
            .map(|(i, _)| i)
            .collect();
        if keys.is_empty() {
            return Err(Error::NotUpdatable(format!("table {} has no primary key in the result", table)));
        }
        Ok((table, keys))
    }

    /// Re-read the current row from its table by primary key
    ///
    /// Fails with [`Error::RowDeleted`] when the row no longer exists (or
    /// its key changed).
    pub async fn refresh_row(&mut self) -> Result<()> {
        self.ensure_scrollable("refresh_row")?;
        if !self.updatable {
            return Err(Error::NotUpdatable("result set concurrency is read-only".to_string()));
        }
        let index = self
            .state
            .current_index()
            .ok_or_else(|| Error::InvalidCursor("refresh_row() requires a current row".to_string()))?;
        let conn = self
            .conn
            .clone()
            .ok_or_else(|| Error::NotUpdatable("result set is not backed by a table".to_string()))?;
        let (table, keys) = self.refresh_target()?;

        let select_list = self
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = keys
            .iter()
            .map(|&k| format!("{} = ?", self.columns[k].name))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT {} FROM {} WHERE {}", select_list, table, predicate);
        let key_values: Vec<Value> = {
            let row = &self.state.buffered_window[index];
            keys.iter()
                .map(|&k| row.get(k).cloned().unwrap_or(Value::Null))
                .collect()
        };
        tracing::debug!(sql = %sql, "refreshing row");

        let request = ExecuteRequest {
            sql: Some(sql),
            options: exec_option::PARSE
                | exec_option::EXECUTE
                | exec_option::DESCRIBE
                | exec_option::FETCH,
            fetch_size: 1,
            binds: vec![BindMeta::input(); key_values.len()],
            rows: vec![key_values],
            ..Default::default()
        };
        let response = conn.exchange(Request::Execute(request)).await?.into_result()?;
        let fresh = response.rows.into_iter().next().ok_or(Error::RowDeleted)?;
        if fresh.len() != self.columns.len() {
            return Err(Error::Protocol(format!(
                "refresh returned {} columns, expected {}",
                fresh.len(),
                self.columns.len()
            )));
        }
        self.state.buffered_window[index] = fresh.named(&self.columns);
        Ok(())
    }

    // =========================================================================
    // Metadata and lifecycle
    // =========================================================================

    /// Column metadata
    pub fn metadata(&self) -> Result<ResultSetMetadata> {
        self.ensure_open()?;
        Ok(ResultSetMetadata {
            columns: self.columns.clone(),
            ctx: self.ctx,
        })
    }

    /// Cursor kind
    pub fn kind(&self) -> CursorKind {
        self.state.mode
    }

    /// Effective concurrency (an updatable request is downgraded when the
    /// rows do not come from one keyed table)
    pub fn concurrency(&self) -> Result<Concurrency> {
        self.ensure_open()?;
        Ok(if self.updatable {
            Concurrency::Updatable
        } else {
            Concurrency::ReadOnly
        })
    }

    /// Fetch size hint
    pub fn fetch_size(&self) -> Result<i32> {
        self.ensure_open()?;
        Ok(self.state.fetch_size)
    }

    /// Change the fetch size used for later pages
    pub fn set_fetch_size(&mut self, rows: i32) -> Result<()> {
        self.ensure_open()?;
        if rows < 0 && rows != STREAMING_FETCH_SIZE {
            return Err(Error::InvalidArgument(format!("fetch size {} is negative", rows)));
        }
        self.state.fetch_size = rows;
        Ok(())
    }

    /// Warnings raised while producing the result; `None` when there are
    /// none or the result set is closed
    pub fn warnings(&self) -> Option<u16> {
        if self.ensure_open().is_err() || self.warning_count == 0 {
            None
        } else {
            Some(self.warning_count)
        }
    }

    /// Holdability, the same before and after close
    pub fn holdability(&self) -> Holdability {
        Holdability::CloseCursorsAtCommit
    }

    /// Whether the result set (or its statement or connection) was closed
    pub fn is_closed(&self) -> bool {
        self.state.closed || self.scope.is_closed()
    }

    /// Close the result set. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state.closed {
            return;
        }
        self.state.closed = true;
        self.scope.close();
        self.state.buffered_window.clear();
        if self.owns_cursor && self.more_rows && self.cursor_id != 0 {
            if let Some(conn) = &self.conn {
                tracing::trace!(cursor_id = self.cursor_id, "queueing cursor close");
                conn.queue_close([self.cursor_id]);
            }
        }
        self.more_rows = false;
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("kind", &self.state.mode)
            .field("position", &self.state.position)
            .field("columns", &self.columns.len())
            .field("cursor_id", &self.cursor_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: i64) -> Vec<Row> {
        (1..=n).map(|i| Row::new(vec![Value::Int(i)])).collect()
    }

    fn keys_result(n: i64) -> ResultSet {
        ResultSet::buffered(
            Scope::root(),
            vec![ColumnInfo::new("GENERATED_KEY", SqlType::BigInt)],
            rows(n),
            CoercionContext::default(),
        )
    }

    #[test]
    fn test_absolute_out_of_range() {
        let mut state = CursorState::new(CursorKind::ScrollInsensitive, 0, rows(5));
        assert!(!state.absolute(7).unwrap());
        assert_eq!(state.position(), Position::AfterLast);
        assert!(!state.absolute(-7).unwrap());
        assert_eq!(state.position(), Position::BeforeFirst);
        assert!(state.absolute(-1).unwrap());
        assert_eq!(state.position(), Position::OnRow(5));
    }

    #[test]
    fn test_absolute_zero_keeps_position() {
        let mut state = CursorState::new(CursorKind::ScrollInsensitive, 0, rows(3));
        state.absolute(2).unwrap();
        assert!(matches!(state.absolute(0), Err(Error::InvalidArgument(_))));
        assert_eq!(state.position(), Position::OnRow(2));
    }

    #[test]
    fn test_discard_read_rows_keeps_current() {
        let mut state = CursorState::new(CursorKind::ForwardOnly, 0, rows(4));
        state.position = Position::OnRow(3);
        state.discard_read_rows();
        assert_eq!(state.window_start, 3);
        assert_eq!(state.buffered_window.len(), 2);
        assert_eq!(state.current_row().map(|r| r[0].clone()), Some(Value::Int(3)));
    }

    #[tokio::test]
    async fn test_scrolling_buffered_result() {
        let mut rs = keys_result(3);
        assert!(rs.is_before_first().unwrap());
        assert!(rs.last().await.unwrap());
        assert_eq!(rs.get_i64(1).unwrap(), Some(3));
        assert!(rs.previous().await.unwrap());
        assert_eq!(rs.get_row().unwrap(), 2);
        assert!(!rs.relative(5).await.unwrap());
        assert!(rs.is_after_last().unwrap());
        assert!(rs.first().await.unwrap());
        assert!(rs.is_first().unwrap());
        assert_eq!(rs.get_i64("generated_key").unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_extreme_offsets_park_cursor() {
        let mut rs = keys_result(2);
        assert!(rs.next().await.unwrap());
        assert!(!rs.relative(i64::MAX).await.unwrap());
        assert!(rs.is_after_last().unwrap());
        assert!(rs.absolute(1).await.unwrap());
        assert!(!rs.relative(i64::MIN).await.unwrap());
        assert!(rs.is_before_first().unwrap());
        assert!(!rs.previous().await.unwrap());
        assert!(!rs.absolute(i64::MIN).await.unwrap());
        assert!(rs.is_before_first().unwrap());
        assert!(!rs.absolute(i64::MAX).await.unwrap());
        assert!(rs.is_after_last().unwrap());
    }

    #[tokio::test]
    async fn test_closed_result_set() {
        let mut rs = keys_result(2);
        rs.next().await.unwrap();
        rs.close();
        rs.close();
        assert!(matches!(rs.next().await, Err(Error::ResultSetClosed)));
        assert!(matches!(rs.get_i64(1), Err(Error::ResultSetClosed)));
        assert!(matches!(rs.metadata(), Err(Error::ResultSetClosed)));
        assert_eq!(rs.warnings(), None);
        assert_eq!(rs.holdability(), Holdability::CloseCursorsAtCommit);
    }

    #[tokio::test]
    async fn test_parent_close_cascades() {
        let stmt = Scope::root().child();
        let mut rs = ResultSet::buffered(
            stmt.child(),
            vec![ColumnInfo::new("ID", SqlType::Integer)],
            rows(1),
            CoercionContext::default(),
        );
        stmt.close();
        assert!(rs.is_closed());
        assert!(matches!(rs.first().await, Err(Error::ResultSetClosed)));
    }

    #[tokio::test]
    async fn test_column_lookup_errors() {
        let mut rs = keys_result(1);
        assert!(matches!(rs.get_i64(1), Err(Error::InvalidCursor(_))));
        rs.next().await.unwrap();
        assert!(matches!(rs.get_i64(2), Err(Error::InvalidArgument(_))));
        assert!(matches!(rs.get_i64("missing"), Err(Error::InvalidArgument(_))));
        assert_eq!(rs.find_column("GENERATED_KEY").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refresh_requires_updatable() {
        let mut rs = keys_result(1);
        rs.next().await.unwrap();
        assert!(matches!(rs.refresh_row().await, Err(Error::NotUpdatable(_))));
    }
}
