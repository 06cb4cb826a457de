//! Statement execution
//!
//! A [`StatementHandle`] is a plain, prepared or callable statement bound to
//! one connection. It owns the statement lifecycle:
//!
//! ```text
//! Idle -> Bound -> Executing -> { HasResultSet | HasUpdateCount | Failed }
//! ```
//!
//! `Closed` is reachable from every state and is terminal.
//!
//! Each execution picks one of three network paths from the
//! [`ExecutionPlan`]:
//!
//! - text: the SQL is sent as-is, with literals substituted for any
//!   placeholders
//! - server-prepared: the SQL is parsed once into a server cursor that later
//!   executions reuse (through the connection's statement cache)
//! - prepare-execute: parse and execute in one round trip
//!
//! Results of one execution (its result set, generated keys and ref
//! cursors) live in a scope that the next execution closes.

use std::cell::Cell;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::batch::{
    choose_strategy, plan_chunks, reconstruct_keys, BatchAccumulator, BatchItem, BatchJob, BatchResult,
    BatchStrategy, KeyRange,
};
use crate::binder::{BindIndex, Binder, CompiledParams};
use crate::connection::{CancelHandle, ConnectionInner, Scope};
use crate::constants::{error_code, exec_option, SqlType, STREAMING_FETCH_SIZE};
use crate::cursor::{Concurrency, CursorKind, OpenCursor, ResultSet, ResultSetType};
use crate::error::{Error, Result};
use crate::messages::{BindMeta, ExecuteRequest, PieceRequest, Request, Response};
use crate::row::{Row, Value};
use crate::statement::{ColumnInfo, ExecutionPlan, ProtocolPath, Statement, StatementKind};
use crate::statement_cache::CachedCursor;
use crate::types::{coerce, CoercionContext, Lob, LobKind, RefCursor};

/// Name of the column in the generated keys result set
pub const GENERATED_KEY_COLUMN: &str = "GENERATED_KEY";

/// Lifecycle state of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Nothing bound or executed yet
    Idle,
    /// Parameters bound
    Bound,
    /// An execution is in progress
    Executing,
    /// The last execution produced a result set
    HasResultSet,
    /// The last execution produced an update count
    HasUpdateCount,
    /// The last execution failed
    Failed,
    /// Closed
    Closed,
}

/// What one execution produced
enum Executed {
    Rows(ResultSet),
    Count(i64),
}

/// How the results of a query are requested and read
#[derive(Debug, Clone, Copy)]
struct ResultShape {
    options: u32,
    fetch_size: i32,
    kind: CursorKind,
}

/// A statement on a connection
pub struct StatementHandle {
    conn: Arc<ConnectionInner>,
    kind: StatementKind,
    statement: Option<Arc<Statement>>,
    plan: Option<ExecutionPlan>,
    binder: Option<Binder>,
    scope: Scope,
    exec_scope: Scope,
    state: StatementState,
    result_type: ResultSetType,
    concurrency: Concurrency,
    fetch_size: i32,
    query_timeout: Option<Duration>,
    prepared_cursor: u32,
    cached_columns: Option<Vec<ColumnInfo>>,
    pending: Option<ResultSet>,
    update_count: Option<i64>,
    generated_keys: Vec<i64>,
    out_values: Option<Vec<Value>>,
    opened_cursors: Vec<u32>,
    last_out_was_null: Cell<bool>,
    batch: BatchJob,
}

impl StatementHandle {
    pub(crate) fn new(
        conn: Arc<ConnectionInner>,
        kind: StatementKind,
        sql: Option<&str>,
        result_type: ResultSetType,
        concurrency: Concurrency,
    ) -> Self {
        let config = conn.config();
        let statement = sql.map(|sql| Arc::new(Statement::parse(sql, config)));
        let plan = statement
            .as_deref()
            .map(|stmt| ExecutionPlan::derive(stmt, kind, config));
        let binder = statement.as_deref().map(|stmt| Binder::new(stmt, config));
        let scope = conn.scope().child();
        let exec_scope = scope.child();
        let batch = BatchJob::new(config);
        Self {
            kind,
            statement,
            plan,
            binder,
            exec_scope,
            scope,
            state: StatementState::Idle,
            result_type,
            concurrency,
            fetch_size: 0,
            query_timeout: None,
            prepared_cursor: 0,
            cached_columns: None,
            pending: None,
            update_count: None,
            generated_keys: Vec::new(),
            out_values: None,
            opened_cursors: Vec::new(),
            last_out_was_null: Cell::new(false),
            batch,
            conn,
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.state == StatementState::Closed || self.scope.is_closed_itself() {
            Err(Error::StatementClosed)
        } else if self.scope.is_root_closed() {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// How the statement was created
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Current lifecycle state
    pub fn state(&self) -> StatementState {
        if self.state != StatementState::Closed && self.scope.is_closed() {
            StatementState::Closed
        } else {
            self.state
        }
    }

    /// Whether the statement (or its connection) was closed
    pub fn is_closed(&self) -> bool {
        self.state() == StatementState::Closed
    }

    /// Prepared SQL, `None` for a plain statement
    pub fn sql(&self) -> Option<&str> {
        self.statement.as_deref().map(Statement::sql)
    }

    /// Execution plan of a prepared or callable statement
    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    /// Number of parameter slots
    pub fn param_count(&self) -> usize {
        self.binder.as_ref().map(Binder::param_count).unwrap_or(0)
    }

    /// Handle that interrupts this statement while it runs
    pub fn cancel_handle(&self) -> CancelHandle {
        self.conn.cancel_handle()
    }

    /// Fetch size hint for result sets
    pub fn fetch_size(&self) -> i32 {
        self.fetch_size
    }

    /// Set the fetch size. `STREAMING_FETCH_SIZE` asks for row-at-a-time
    /// streaming and is only accepted with prepare-execute or the extended
    /// result class enabled.
    pub fn set_fetch_size(&mut self, rows: i32) -> Result<()> {
        self.ensure_open()?;
        if rows == STREAMING_FETCH_SIZE {
            if !self.conn.config().streaming_fetch_allowed() {
                return Err(Error::Syntax(format!(
                    "streaming fetch size {} requires useOraclePrepareExecute or useExtendedResultClass",
                    rows
                )));
            }
        } else if rows < 0 {
            return Err(Error::InvalidArgument(format!("fetch size {} is negative", rows)));
        }
        self.fetch_size = rows;
        Ok(())
    }

    /// Query timeout; `None` falls back to the connection default
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout.or(self.conn.config().query_timeout)
    }

    /// Bound each execution by `timeout`; `None` removes the bound
    pub fn set_query_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        self.query_timeout = timeout;
        Ok(())
    }

    /// Whether batches of this statement continue after a failing row
    pub fn set_continue_batch_on_error(&mut self, on: bool) -> Result<()> {
        self.ensure_open()?;
        self.batch.continue_on_error = on;
        Ok(())
    }

    // =========================================================================
    // Binding
    // =========================================================================

    fn binder_mut(&mut self) -> Result<&mut Binder> {
        self.ensure_open()?;
        self.binder
            .as_mut()
            .ok_or_else(|| Error::FeatureNotSupported("parameters on a plain statement".to_string()))
    }

    /// Bind an IN value by 1-based index or by name
    pub fn bind(&mut self, target: impl BindIndex, value: impl Into<Value>) -> Result<()> {
        self.binder_mut()?.bind(target, value)?;
        self.state = StatementState::Bound;
        Ok(())
    }

    /// Bind SQL NULL
    pub fn bind_null(&mut self, target: impl BindIndex) -> Result<()> {
        self.bind(target, Value::Null)
    }

    /// Bind a LOB read to the end of `reader`
    pub fn bind_stream(&mut self, target: impl BindIndex, kind: LobKind, reader: impl Read) -> Result<()> {
        let piece_size = self.conn.config().piece_size;
        let lob = Lob::from_reader(kind, reader, piece_size)?;
        self.bind(target, lob)
    }

    /// Register an OUT parameter with the type the server should return
    pub fn register_out(&mut self, target: impl BindIndex, sql_type: SqlType) -> Result<()> {
        self.binder_mut()?.register_out(target, sql_type)?;
        self.state = StatementState::Bound;
        Ok(())
    }

    /// Forget all bound values and OUT registrations
    pub fn clear_parameters(&mut self) -> Result<()> {
        self.binder_mut()?.clear();
        self.state = StatementState::Idle;
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn prepared(&self) -> Result<(Arc<Statement>, ProtocolPath)> {
        match (&self.statement, &self.plan) {
            (Some(stmt), Some(plan)) => Ok((Arc::clone(stmt), plan.protocol_path)),
            _ => Err(Error::InvalidArgument(
                "plain statement has no prepared SQL; use execute_sql".to_string(),
            )),
        }
    }

    fn ensure_plain(&self) -> Result<()> {
        if self.kind == StatementKind::Simple {
            Ok(())
        } else {
            Err(Error::FeatureNotSupported(
                "SQL text cannot be executed on a prepared statement".to_string(),
            ))
        }
    }

    /// Execute the prepared statement; returns `true` when it produced a
    /// result set (see [`result_set`](Self::result_set))
    pub async fn execute(&mut self) -> Result<bool> {
        let executed = self.execute_prepared().await?;
        Ok(self.hold(executed))
    }

    /// Execute the prepared query
    pub async fn execute_query(&mut self) -> Result<ResultSet> {
        match self.execute_prepared().await? {
            Executed::Rows(rs) => Ok(rs),
            Executed::Count(_) => Err(Error::InvalidArgument(
                "execute_query() statement did not return a result set".to_string(),
            )),
        }
    }

    /// Execute the prepared DML/DDL statement and return the update count
    pub async fn execute_update(&mut self) -> Result<i64> {
        match self.execute_prepared().await? {
            Executed::Count(count) => Ok(count),
            Executed::Rows(mut rs) => {
                rs.close();
                Err(Error::InvalidArgument(
                    "execute_update() statement returned a result set".to_string(),
                ))
            }
        }
    }

    /// Execute SQL text on a plain statement; `true` for a result set
    pub async fn execute_sql(&mut self, sql: &str) -> Result<bool> {
        let executed = self.execute_text(sql).await?;
        Ok(self.hold(executed))
    }

    /// Execute a query given as SQL text
    pub async fn execute_query_sql(&mut self, sql: &str) -> Result<ResultSet> {
        match self.execute_text(sql).await? {
            Executed::Rows(rs) => Ok(rs),
            Executed::Count(_) => Err(Error::InvalidArgument(
                "execute_query_sql() statement did not return a result set".to_string(),
            )),
        }
    }

    /// Execute DML/DDL given as SQL text
    pub async fn execute_update_sql(&mut self, sql: &str) -> Result<i64> {
        match self.execute_text(sql).await? {
            Executed::Count(count) => Ok(count),
            Executed::Rows(mut rs) => {
                rs.close();
                Err(Error::InvalidArgument(
                    "execute_update_sql() statement returned a result set".to_string(),
                ))
            }
        }
    }

    /// Take the result set of the last `execute`
    pub fn result_set(&mut self) -> Result<Option<ResultSet>> {
        self.ensure_open()?;
        Ok(self.pending.take())
    }

    /// Update count of the last execution, `None` if it produced rows
    pub fn update_count(&self) -> Result<Option<i64>> {
        self.ensure_open()?;
        Ok(self.update_count)
    }

    fn hold(&mut self, executed: Executed) -> bool {
        match executed {
            Executed::Rows(rs) => {
                self.pending = Some(rs);
                true
            }
            Executed::Count(_) => false,
        }
    }

    async fn execute_prepared(&mut self) -> Result<Executed> {
        self.ensure_open()?;
        let (statement, path) = self.prepared()?;
        let params = match &self.binder {
            Some(binder) => binder.compile()?,
            None => Default::default(),
        };
        self.begin_execution();
        let shape = self.result_shape(&statement, path);
        let result = self.run(&statement, path, Some(params), shape).await;
        if let Some(binder) = self.binder.as_mut() {
            binder.finish_execution();
        }
        self.complete(&statement, shape, result).await
    }

    async fn execute_text(&mut self, sql: &str) -> Result<Executed> {
        self.ensure_open()?;
        self.ensure_plain()?;
        let statement = Statement::parse(sql, self.conn.config());
        let path = ExecutionPlan::derive(&statement, StatementKind::Simple, self.conn.config()).protocol_path;
        self.begin_execution();
        let shape = self.result_shape(&statement, path);
        let result = self.run(&statement, path, None, shape).await;
        self.complete(&statement, shape, result).await
    }

    /// Close everything the previous execution produced
    fn begin_execution(&mut self) {
        self.release_unopened_cursors();
        self.exec_scope.close();
        self.exec_scope = self.scope.child();
        self.pending = None;
        self.update_count = None;
        self.generated_keys.clear();
        self.out_values = None;
        self.opened_cursors.clear();
        self.state = StatementState::Executing;
    }

    fn result_shape(&self, statement: &Statement, path: ProtocolPath) -> ResultShape {
        let mut options = 0;
        if statement.is_insert() {
            options |= exec_option::RETURN_KEYS;
        }
        if !statement.is_query() && !statement.is_call() {
            return ResultShape {
                options,
                fetch_size: 0,
                kind: CursorKind::ForwardOnly,
            };
        }
        options |= exec_option::FETCH | exec_option::DESCRIBE;
        let config = self.conn.config();
        let fetch_size = if self.fetch_size != 0 {
            self.fetch_size
        } else {
            config.default_fetch_size
        };

        let (extra, fetch_size, kind) = if self.result_type == ResultSetType::ScrollInsensitive {
            (exec_option::SCROLLABLE, 0, CursorKind::ScrollInsensitive)
        } else if fetch_size == STREAMING_FETCH_SIZE {
            (exec_option::STREAMING, STREAMING_FETCH_SIZE, CursorKind::ForwardOnly)
        } else if config.use_cursor_fetch && fetch_size > 0 && path != ProtocolPath::Text && statement.is_query() {
            (exec_option::CURSOR_FETCH, fetch_size, CursorKind::CursorFetch)
        } else {
            (0, 0, CursorKind::ForwardOnly)
        };
        ResultShape {
            options: options | extra,
            fetch_size,
            kind,
        }
    }

    /// Send one execution and return the successful response
    async fn run(
        &mut self,
        statement: &Statement,
        path: ProtocolPath,
        params: Option<CompiledParams>,
        shape: ResultShape,
    ) -> Result<Response> {
        match path {
            ProtocolPath::Text => {
                let sql = match &params {
                    Some(p) if statement.param_count() > 0 => {
                        statement.interpolate(&p.values, self.conn.config().mode)?
                    }
                    _ => statement.native_sql().to_string(),
                };
                let request = ExecuteRequest::text(sql)
                    .with_options(shape.options)
                    .with_fetch_size(shape.fetch_size);
                self.send(request).await?.into_result()
            }
            ProtocolPath::ServerPrepared | ProtocolPath::PrepareExecute => {
                let (mut values, mut binds) = wire_binds(statement, params.as_ref());
                if self.conn.config().use_piece_data {
                    self.upload_pieces(0, &mut values, &mut binds).await?;
                }
                self.server_execute(statement, path, binds, vec![values], shape.options, shape.fetch_size)
                    .await
            }
        }
    }

    async fn send(&self, request: ExecuteRequest) -> Result<Response> {
        tracing::trace!(
            cursor_id = request.cursor_id,
            options = request.options,
            rows = request.row_count(),
            "execute"
        );
        self.conn
            .exchange_timed(Request::Execute(request), self.query_timeout())
            .await
    }

    /// Execute through the statement's server cursor, parsing it first when
    /// neither this statement nor the cache holds one
    async fn server_execute(
        &mut self,
        statement: &Statement,
        path: ProtocolPath,
        binds: Vec<BindMeta>,
        rows: Vec<Vec<Value>>,
        options: u32,
        fetch_size: i32,
    ) -> Result<Response> {
        let conn = Arc::clone(&self.conn);
        let sql = statement.native_sql();

        if self.prepared_cursor == 0 {
            let cached = conn.cache().get(sql);
            if let Some(cached) = cached {
                self.prepared_cursor = cached.cursor_id;
                self.cached_columns = cached.columns;
            }
        }

        if self.prepared_cursor != 0 {
            let request = ExecuteRequest::reexecute(self.prepared_cursor, binds.clone(), rows.clone())
                .with_options(options)
                .with_fetch_size(fetch_size);
            let response = self.send(request).await?;
            match &response.error {
                Some(err) if err.code == error_code::UNKNOWN_CURSOR => {
                    tracing::debug!(sql, cursor_id = self.prepared_cursor, "server dropped cursor, preparing again");
                    conn.cache().invalidate(sql);
                    self.prepared_cursor = 0;
                    self.cached_columns = None;
                }
                _ => return response.into_result(),
            }
        }

        let mut request = ExecuteRequest::prepared(sql, binds, rows)
            .with_options(options | exec_option::DESCRIBE)
            .with_fetch_size(fetch_size);
        if path == ProtocolPath::PrepareExecute {
            request = request.with_options(exec_option::PREPARE_EXECUTE);
        }
        let response = self.send(request).await?.into_result()?;

        let cursor_id = response.cursor_id();
        if cursor_id != 0 {
            self.prepared_cursor = cursor_id;
            self.cached_columns = response.columns.clone();
            let cursor = CachedCursor {
                cursor_id,
                columns: response.columns.clone(),
            };
            let evicted = conn.cache().put(sql, cursor, statement.statement_type());
            conn.queue_close(evicted);
        }
        Ok(response)
    }

    /// Stream every non-NULL LOB bind as pieces and replace it with a piece
    /// reference. A zero-length value goes out as one empty final piece.
    async fn upload_pieces(&self, row: u32, values: &mut [Value], binds: &mut [BindMeta]) -> Result<()> {
        let piece_size = self.conn.config().piece_size;
        for (i, value) in values.iter_mut().enumerate() {
            let (sql_type, content) = match value {
                Value::Clob(buf) if !buf.is_null() => (SqlType::Clob, buf.clone()),
                Value::Blob(buf) if !buf.is_null() => (SqlType::Blob, buf.clone()),
                _ => continue,
            };
            let bind_index = u16::try_from(i + 1)
                .map_err(|_| Error::InvalidArgument(format!("parameter {} out of piece range", i + 1)))?;
            let mut pieces = content.pieces(piece_size);
            if pieces.is_empty() {
                pieces.push(Bytes::new());
            }
            let count = pieces.len();
            for (seq, data) in pieces.into_iter().enumerate() {
                let seq = seq as u32;
                let request = PieceRequest {
                    bind_index,
                    row,
                    seq,
                    last: seq as usize + 1 == count,
                    data,
                };
                let response = self
                    .conn
                    .exchange_timed(Request::Piece(request), self.query_timeout())
                    .await?
                    .into_result()?;
                if !response.piece_acks.contains(&(bind_index, seq)) {
                    return Err(Error::Protocol(format!(
                        "piece {} of parameter {} was not acknowledged",
                        seq, bind_index
                    )));
                }
            }
            tracing::debug!(bind_index, row, pieces = count, bytes = content.len(), "uploaded LOB pieces");
            if let Some(meta) = binds.get_mut(i) {
                meta.sql_type = sql_type;
            }
            *value = Value::Piece(bind_index);
        }
        Ok(())
    }

    /// Turn a response into the statement's result state
    async fn complete(
        &mut self,
        statement: &Statement,
        shape: ResultShape,
        result: Result<Response>,
    ) -> Result<Executed> {
        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };
        if statement.is_insert() && response.last_insert_id() != 0 {
            let range = KeyRange {
                first: response.last_insert_id(),
                count: response.rows_affected().max(0) as u64,
            };
            let increment = self.conn.config().auto_increment_increment;
            self.generated_keys = reconstruct_keys(&[range], increment);
        }
        if let Some(out) = response.out_values.take() {
            self.out_values = Some(out_by_slot(statement, out));
        }

        let columns = match response.columns.take() {
            Some(columns) => Some(columns),
            None if statement.is_query() => self.cached_columns.clone(),
            None => None,
        };
        let Some(columns) = columns else {
            let count = response.rows_affected();
            self.update_count = Some(count);
            self.state = StatementState::HasUpdateCount;
            return Ok(Executed::Count(count));
        };

        let cursor_id = response.cursor_id();
        let open = OpenCursor {
            kind: shape.kind,
            columns,
            rows: std::mem::take(&mut response.rows),
            cursor_id,
            more_rows: response.more_rows(),
            owns_cursor: cursor_id != self.prepared_cursor,
            fetch_size: shape.fetch_size,
            concurrency: self.concurrency,
            warning_count: response.warning_count(),
        };
        match ResultSet::open(Arc::clone(&self.conn), self.exec_scope.child(), open).await {
            Ok(rs) => {
                self.state = StatementState::HasResultSet;
                Ok(Executed::Rows(rs))
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn fail(&mut self, error: &Error) {
        tracing::debug!(error = %error, "statement execution failed");
        if self.state != StatementState::Closed {
            self.state = StatementState::Failed;
        }
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Snapshot the current bindings into the batch
    pub fn add_batch(&mut self) -> Result<()> {
        let params = self.binder_mut()?.compile()?;
        self.batch.push_params(params);
        Ok(())
    }

    /// Add SQL text to the batch
    pub fn add_batch_sql(&mut self, sql: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.batch.push_sql(sql);
        Ok(())
    }

    /// Drop every batch entry
    pub fn clear_batch(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.batch.clear();
        Ok(())
    }

    /// Run the batch
    ///
    /// Without rewriting, entries run one by one and a failure stops the
    /// batch unless it continues on error; the outcomes cover the attempted
    /// entries. With rewriting, entries are folded into multi-row chunks
    /// that succeed or fail as a unit. When any entry fails the partial
    /// outcomes ride on [`Error::BatchUpdate`].
    pub async fn execute_batch(&mut self) -> Result<BatchResult> {
        self.ensure_open()?;
        let conn = Arc::clone(&self.conn);
        let strategy = choose_strategy(&self.batch, self.statement.as_deref(), conn.config());
        let continue_on_error = self.batch.continue_on_error;
        let items = self.batch.take();
        self.begin_execution();

        let mut acc = BatchAccumulator::new();
        if !items.is_empty() {
            match (strategy, self.statement.clone()) {
                (BatchStrategy::PerRow, _) | (_, None) => {
                    self.batch_per_row(items, continue_on_error, &mut acc).await
                }
                (strategy, Some(statement)) => {
                    self.batch_folded(&statement, strategy, items, continue_on_error, &mut acc)
                        .await?
                }
            }
        }

        let increment = conn.config().auto_increment_increment;
        self.generated_keys = acc.keys(increment);
        if let Some(binder) = self.binder.as_mut() {
            binder.finish_execution();
        }
        let result = acc.finish(increment);
        match &result {
            Ok(done) => {
                tracing::debug!(rows = done.outcomes.len(), "batch completed");
                self.state = StatementState::HasUpdateCount;
            }
            Err(e) => self.fail(e),
        }
        result
    }

    async fn batch_per_row(&mut self, items: Vec<BatchItem>, continue_on_error: bool, acc: &mut BatchAccumulator) {
        for (row, item) in items.into_iter().enumerate() {
            let result = match item {
                BatchItem::Params(params) => match self.prepared() {
                    Ok((statement, path)) => {
                        let shape = self.result_shape(&statement, path);
                        self.run(&statement, path, Some(params), shape)
                            .await
                            .map(|r| (r, statement.is_insert()))
                    }
                    Err(e) => Err(e),
                },
                BatchItem::Sql(sql) => {
                    let statement = Statement::parse(sql, self.conn.config());
                    let shape = self.result_shape(&statement, ProtocolPath::Text);
                    self.run(&statement, ProtocolPath::Text, None, shape)
                        .await
                        .map(|r| (r, statement.is_insert()))
                }
            };
            let result = result.and_then(|(response, is_insert)| {
                if response.columns.is_some() {
                    if response.more_rows() && response.cursor_id() != self.prepared_cursor {
                        self.conn.queue_close([response.cursor_id()]);
                    }
                    return Err(Error::InvalidArgument(format!(
                        "batch entry {} returned a result set",
                        row + 1
                    )));
                }
                Ok((response, is_insert))
            });
            match result {
                Ok((response, is_insert)) => {
                    let last_id = if is_insert { response.last_insert_id() } else { 0 };
                    acc.row_succeeded(response.rows_affected(), last_id);
                }
                Err(e) => {
                    let stop = !continue_on_error
                        || e.is_connection_error()
                        || matches!(e, Error::Cancelled | Error::QueryTimeout(_));
                    tracing::debug!(row = row + 1, error = %e, stop, "batch entry failed");
                    acc.failed(1, e);
                    if stop {
                        break;
                    }
                }
            }
        }
    }

    async fn batch_folded(
        &mut self,
        statement: &Statement,
        strategy: BatchStrategy,
        items: Vec<BatchItem>,
        continue_on_error: bool,
        acc: &mut BatchAccumulator,
    ) -> Result<()> {
        let path = self.prepared()?.1;
        let mut metas = Vec::new();
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            if let BatchItem::Params(params) = item {
                if metas.is_empty() {
                    metas = params.metas.clone();
                }
                rows.push(params.values);
            }
        }
        let options = if statement.is_insert() {
            exec_option::RETURN_KEYS
        } else {
            0
        };

        for (n, chunk) in plan_chunks(statement, &rows, self.conn.config()).into_iter().enumerate() {
            let count = chunk.len();
            let chunk_rows = &rows[chunk];
            tracing::debug!(chunk = n, rows = count, ?strategy, "sending batch chunk");
            let result = match strategy {
                BatchStrategy::ArrayBind => {
                    let binds = wire_metas(statement, &metas);
                    let wire_rows = chunk_rows.iter().map(|r| statement.wire_params(r)).collect();
                    let options = options | exec_option::ARRAY_DML;
                    self.server_execute(statement, path, binds, wire_rows, options, 0)
                        .await
                }
                _ => match self.folded_request(statement, path, chunk_rows, options) {
                    Ok(request) => self.send(request).await.and_then(Response::into_result),
                    Err(e) => Err(e),
                },
            };
            match result {
                Ok(response) => {
                    let last_id = if statement.is_insert() { response.last_insert_id() } else { 0 };
                    acc.chunk_succeeded(count, last_id);
                }
                Err(e) => {
                    let stop = !continue_on_error || e.is_connection_error();
                    tracing::debug!(chunk = n, rows = count, error = %e, stop, "batch chunk failed");
                    acc.failed(count, e);
                    if stop {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// One multi-row INSERT covering `rows`
    fn folded_request(
        &self,
        statement: &Statement,
        path: ProtocolPath,
        rows: &[Vec<Value>],
        options: u32,
    ) -> Result<ExecuteRequest> {
        let no_group = || Error::Internal("statement has no VALUES group to fold".to_string());
        if path == ProtocolPath::Text {
            let sql = statement
                .multi_values_text(rows, self.conn.config().mode)?
                .ok_or_else(no_group)?;
            return Ok(ExecuteRequest::text(sql).with_options(options));
        }
        let sql = statement.multi_values_sql(rows.len()).ok_or_else(no_group)?;
        let values: Vec<Value> = rows.iter().flat_map(|r| statement.wire_params(r)).collect();
        Ok(ExecuteRequest {
            sql: Some(sql),
            options: exec_option::PARSE | exec_option::EXECUTE | options,
            binds: vec![BindMeta::input(); values.len()],
            rows: vec![values],
            ..Default::default()
        })
    }

    // =========================================================================
    // Results of the last execution
    // =========================================================================

    /// Keys generated by the last execution or batch, as a one-column
    /// `BIGINT` result set
    pub fn generated_keys(&self) -> Result<ResultSet> {
        self.ensure_open()?;
        let columns = vec![ColumnInfo::new(GENERATED_KEY_COLUMN, SqlType::BigInt)];
        let rows = self
            .generated_keys
            .iter()
            .map(|k| Row::new(vec![Value::Int(*k)]))
            .collect();
        let ctx = CoercionContext::from(self.conn.config());
        Ok(ResultSet::buffered(self.exec_scope.child(), columns, rows, ctx))
    }

    fn out_value(&self, target: impl BindIndex) -> Result<&Value> {
        self.ensure_open()?;
        let binder = self
            .binder
            .as_ref()
            .ok_or_else(|| Error::FeatureNotSupported("OUT parameters on a plain statement".to_string()))?;
        let index = binder.resolve(&target.to_slot())?;
        if !binder.is_out(index) {
            return Err(Error::OutParameterNotRegistered(index + 1));
        }
        let value = self
            .out_values
            .as_ref()
            .and_then(|values| values.get(index))
            .ok_or_else(|| Error::InvalidArgument("no OUT values; the call has not been executed".to_string()))?;
        self.last_out_was_null.set(value.is_null());
        Ok(value)
    }

    fn ctx(&self) -> CoercionContext {
        CoercionContext::from(self.conn.config())
    }

    /// Raw OUT value
    pub fn get_out(&self, target: impl BindIndex) -> Result<Value> {
        self.out_value(target).cloned()
    }

    /// OUT value shaped by its registered type
    pub fn get_out_object(&self, target: impl BindIndex) -> Result<Value> {
        let slot = target.to_slot();
        let value = self.out_value(slot.clone())?;
        let sql_type = self
            .binder
            .as_ref()
            .and_then(|b| b.resolve(&slot).ok().and_then(|i| b.out_type(i)))
            .unwrap_or(SqlType::Unknown);
        coerce::to_object(value, &ColumnInfo::new("", sql_type), &self.ctx())
    }

    /// OUT value as text
    pub fn get_out_string(&self, target: impl BindIndex) -> Result<Option<String>> {
        coerce::to_string(self.out_value(target)?, &self.ctx())
    }

    /// OUT value as `i64`
    pub fn get_out_i64(&self, target: impl BindIndex) -> Result<Option<i64>> {
        coerce::to_i64(self.out_value(target)?)
    }

    /// OUT value as `i32`
    pub fn get_out_i32(&self, target: impl BindIndex) -> Result<Option<i32>> {
        coerce::to_i32(self.out_value(target)?)
    }

    /// OUT value as `f64`
    pub fn get_out_f64(&self, target: impl BindIndex) -> Result<Option<f64>> {
        coerce::to_f64(self.out_value(target)?)
    }

    /// OUT value as `bool`
    pub fn get_out_bool(&self, target: impl BindIndex) -> Result<Option<bool>> {
        coerce::to_bool(self.out_value(target)?)
    }

    /// OUT value as bytes
    pub fn get_out_bytes(&self, target: impl BindIndex) -> Result<Option<Vec<u8>>> {
        coerce::to_bytes(self.out_value(target)?)
    }

    /// OUT value as a timestamp
    pub fn get_out_timestamp(&self, target: impl BindIndex) -> Result<Option<chrono::NaiveDateTime>> {
        coerce::to_datetime(self.out_value(target)?, None, &self.ctx())
    }

    /// Whether the last OUT value read was NULL
    pub fn out_was_null(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.last_out_was_null.get())
    }

    /// Open the cursor returned through a cursor-typed OUT parameter
    ///
    /// Each returned cursor can be opened once.
    pub fn get_cursor(&mut self, target: impl BindIndex) -> Result<Option<ResultSet>> {
        let cursor: RefCursor = match self.out_value(target)? {
            Value::Null => return Ok(None),
            Value::Cursor(cursor) => cursor.clone(),
            other => return Err(Error::conversion("CURSOR", other.type_name())),
        };
        if cursor.cursor_id() != 0 && self.opened_cursors.contains(&cursor.cursor_id()) {
            return Err(Error::InvalidCursor(format!(
                "ref cursor {} is already open",
                cursor.cursor_id()
            )));
        }
        self.opened_cursors.push(cursor.cursor_id());
        tracing::trace!(cursor_id = cursor.cursor_id(), "opening ref cursor");
        Ok(Some(ResultSet::from_ref_cursor(
            Arc::clone(&self.conn),
            self.exec_scope.child(),
            &cursor,
            self.fetch_size,
        )))
    }

    /// Queue returned ref cursors nobody opened
    fn release_unopened_cursors(&mut self) {
        let Some(values) = &self.out_values else {
            return;
        };
        let unopened: Vec<u32> = values
            .iter()
            .filter_map(Value::as_cursor)
            .map(RefCursor::cursor_id)
            .filter(|id| *id != 0 && !self.opened_cursors.contains(id))
            .collect();
        if !unopened.is_empty() {
            self.conn.queue_close(unopened);
        }
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Close the statement and every result set it produced
    ///
    /// The server cursor goes back to the statement cache, or is queued for
    /// release when it is not cached. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state == StatementState::Closed {
            return;
        }
        self.release_unopened_cursors();
        self.state = StatementState::Closed;
        self.scope.close();
        self.pending = None;
        self.batch.clear();

        if self.prepared_cursor != 0 {
            let cursor_id = std::mem::take(&mut self.prepared_cursor);
            let released = match &self.statement {
                Some(stmt) => self.conn.cache().release(stmt.native_sql(), cursor_id),
                None => false,
            };
            if !released {
                self.conn.queue_close([cursor_id]);
            }
        }
        tracing::trace!(sql = ?self.sql(), "statement closed");
    }
}

impl Drop for StatementHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementHandle")
            .field("kind", &self.kind)
            .field("sql", &self.sql())
            .field("state", &self.state())
            .field("cursor_id", &self.prepared_cursor)
            .finish()
    }
}

/// Per-occurrence bind values and metadata for the wire
fn wire_binds(
    statement: &Statement,
    params: Option<&CompiledParams>,
) -> (Vec<Value>, Vec<BindMeta>) {
    let Some(params) = params else {
        return (Vec::new(), Vec::new());
    };
    (statement.wire_params(&params.values), wire_metas(statement, &params.metas))
}

fn wire_metas(statement: &Statement, metas: &[BindMeta]) -> Vec<BindMeta> {
    statement
        .placeholders()
        .iter()
        .map(|p| metas.get(p.slot).copied().unwrap_or_default())
        .collect()
}

/// Map OUT values sent per placeholder occurrence back to parameter slots
fn out_by_slot(statement: &Statement, out: Vec<Value>) -> Vec<Value> {
    let mut slots = vec![Value::Null; statement.param_count()];
    for (value, placeholder) in out.into_iter().zip(statement.placeholders()) {
        if let Some(slot) = slots.get_mut(placeholder.slot) {
            *slot = value;
        }
    }
    slots
}
