//! Batch execution support
//!
//! A [`BatchJob`] is the ordered list of parameter sets (or SQL strings)
//! collected by `add_batch`. This module decides how the job goes over the
//! wire and turns the server's replies back into one [`Outcome`] per row:
//!
//! - **Per row**: every entry is its own execute. Counts are exact.
//! - **Multi-values**: consecutive rows of one INSERT are folded into
//!   `INSERT ... VALUES (..),(..),...` chunks bounded by `max_batch_rows` and
//!   `max_allowed_packet`.
//! - **Array bind**: Oracle mode sends every row of a chunk in one array
//!   execute.
//!
//! Folded strategies cannot attribute effects to single rows, so successful
//! rows report [`SUCCESS_NO_INFO`] and a failed chunk marks every row in it
//! as failed.

use std::ops::Range;

use crate::binder::CompiledParams;
use crate::config::Config;
use crate::constants::{EXECUTE_FAILED, SUCCESS_NO_INFO};
use crate::error::{Error, Result};
use crate::row::Value;
use crate::statement::Statement;

/// Result of one batch row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Rows affected, or [`SUCCESS_NO_INFO`] when unknown
    UpdateCount(i64),
    /// The row (or the chunk it was folded into) failed
    Failed,
}

impl Outcome {
    /// JDBC-style update count (`-3` for failures)
    pub fn as_count(&self) -> i64 {
        match self {
            Outcome::UpdateCount(n) => *n,
            Outcome::Failed => EXECUTE_FAILED,
        }
    }

    /// Whether the row failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed)
    }
}

/// One entry of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    /// Snapshot of the bound parameters at `add_batch` time
    Params(CompiledParams),
    /// Literal SQL added to a plain statement
    Sql(String),
}

/// The entries collected for one `execute_batch`
#[derive(Debug, Clone, Default)]
pub struct BatchJob {
    items: Vec<BatchItem>,
    /// Keep going after a failed row
    pub continue_on_error: bool,
    /// Allow folding rows into fewer executes
    pub rewrite: bool,
}

impl BatchJob {
    /// Create an empty job with the connection's batch switches
    pub fn new(config: &Config) -> Self {
        Self {
            items: Vec::new(),
            continue_on_error: config.continue_batch_on_error,
            rewrite: config.rewrite_batched_statements,
        }
    }

    /// Append a parameter snapshot
    pub fn push_params(&mut self, params: CompiledParams) {
        self.items.push(BatchItem::Params(params));
    }

    /// Append a SQL string
    pub fn push_sql(&mut self, sql: impl Into<String>) {
        self.items.push(BatchItem::Sql(sql.into()));
    }

    /// Entries in order
    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check for no entries
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Take the entries, leaving the job empty
    pub fn take(&mut self) -> Vec<BatchItem> {
        std::mem::take(&mut self.items)
    }

    /// All entries are parameter sets of the prepared statement
    pub fn is_homogeneous(&self) -> bool {
        self.items.iter().all(|i| matches!(i, BatchItem::Params(_)))
    }
}

/// How a batch is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    /// One execute per entry
    PerRow,
    /// Multi-row INSERT chunks
    MultiValues,
    /// Array execute chunks
    ArrayBind,
}

/// Pick the strategy for a job
pub fn choose_strategy(
    job: &BatchJob,
    statement: Option<&Statement>,
    config: &Config,
) -> BatchStrategy {
    let strategy = match statement {
        _ if !job.rewrite || job.len() < 2 => BatchStrategy::PerRow,
        None => BatchStrategy::PerRow,
        Some(_) if !job.is_homogeneous() => BatchStrategy::PerRow,
        Some(stmt) if stmt.is_call() => BatchStrategy::PerRow,
        Some(_) if job.items.iter().any(|item| needs_row_exchange(item, config)) => {
            BatchStrategy::PerRow
        }
        Some(_) if config.mode.is_oracle() => BatchStrategy::ArrayBind,
        Some(stmt) if stmt.supports_multi_values() => BatchStrategy::MultiValues,
        Some(_) => BatchStrategy::PerRow,
    };
    tracing::debug!(rows = job.len(), ?strategy, "batch strategy");
    strategy
}

/// Rows whose binds cannot ride in one folded execute. With piece data on,
/// a non-NULL LOB must be uploaded as pieces against its own row.
fn needs_row_exchange(item: &BatchItem, config: &Config) -> bool {
    match item {
        BatchItem::Params(p) => {
            p.has_out()
                || p.values.iter().any(|v| match v {
                    Value::Cursor(_) | Value::Piece(_) => true,
                    Value::Clob(b) | Value::Blob(b) => config.use_piece_data && !b.is_null(),
                    _ => false,
                })
        }
        BatchItem::Sql(_) => true,
    }
}

/// Rough wire size of a value, used to bound chunks
pub fn estimated_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 4,
        Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::Double(_) => 20,
        Value::Decimal(s) | Value::String(s) => s.len() * 2 + 2,
        Value::Bytes(b) => b.len() * 2 + 3,
        Value::Date(_) | Value::Time(_) | Value::DateTime(_) | Value::TimestampTz(_) => 40,
        Value::Clob(c) => c.len() * 2 + 2,
        Value::Blob(b) => b.len() * 2 + 3,
        Value::Cursor(_) | Value::Piece(_) => 8,
    }
}

/// Split `rows` into chunks of at most `max_batch_rows` rows whose estimated
/// size stays under `max_allowed_packet`. A single oversized row still gets
/// its own chunk.
pub fn plan_chunks(statement: &Statement, rows: &[Vec<Value>], config: &Config) -> Vec<Range<usize>> {
    let base = statement.native_sql().len();
    let per_row_overhead = statement.values_group_len() + 1;
    let max_rows = config.max_batch_rows.max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut size = base;
    for (i, row) in rows.iter().enumerate() {
        let row_size = per_row_overhead + row.iter().map(estimated_size).sum::<usize>();
        let in_chunk = i - start;
        if in_chunk > 0 && (in_chunk >= max_rows || size + row_size > config.max_allowed_packet) {
            chunks.push(start..i);
            start = i;
            size = base;
        }
        size += row_size;
    }
    if start < rows.len() {
        chunks.push(start..rows.len());
    }
    tracing::debug!(rows = rows.len(), chunks = chunks.len(), "planned batch chunks");
    chunks
}

/// Server-reported block of consecutive generated keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    /// First generated key
    pub first: u64,
    /// Number of keys in the block
    pub count: u64,
}

/// Expand key ranges into one key per inserted row
pub fn reconstruct_keys(ranges: &[KeyRange], increment: i64) -> Vec<i64> {
    let step = increment.max(1);
    ranges
        .iter()
        .flat_map(|r| (0..r.count as i64).map(move |i| r.first as i64 + i * step))
        .collect()
}

/// Outcome of a completed batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    /// One outcome per attempted row
    pub outcomes: Vec<Outcome>,
    /// Generated keys in insertion order
    pub generated_keys: Vec<i64>,
}

impl BatchResult {
    /// Update counts in JDBC form
    pub fn update_counts(&self) -> Vec<i64> {
        self.outcomes.iter().map(Outcome::as_count).collect()
    }
}

/// Collects outcomes while a batch runs
#[derive(Debug, Default)]
pub(crate) struct BatchAccumulator {
    outcomes: Vec<Outcome>,
    keys: Vec<KeyRange>,
    first_error: Option<Error>,
}

impl BatchAccumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A single-row execute succeeded
    pub(crate) fn row_succeeded(&mut self, rows_affected: i64, last_insert_id: u64) {
        self.outcomes.push(Outcome::UpdateCount(rows_affected));
        if last_insert_id != 0 && rows_affected > 0 {
            self.keys.push(KeyRange {
                first: last_insert_id,
                count: rows_affected as u64,
            });
        }
    }

    /// A folded chunk of `rows` rows succeeded
    pub(crate) fn chunk_succeeded(&mut self, rows: usize, last_insert_id: u64) {
        self.outcomes
            .extend(std::iter::repeat(Outcome::UpdateCount(SUCCESS_NO_INFO)).take(rows));
        if last_insert_id != 0 {
            self.keys.push(KeyRange {
                first: last_insert_id,
                count: rows as u64,
            });
        }
    }

    /// `rows` rows failed with `error`
    pub(crate) fn failed(&mut self, rows: usize, error: Error) {
        self.outcomes
            .extend(std::iter::repeat(Outcome::Failed).take(rows));
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    /// Finish: the partial outcomes ride on the error when a row failed
    pub(crate) fn finish(self, increment: i64) -> Result<BatchResult> {
        let generated_keys = reconstruct_keys(&self.keys, increment);
        match self.first_error {
            Some(source) => Err(Error::BatchUpdate {
                outcomes: self.outcomes,
                source: Box::new(source),
            }),
            None => Ok(BatchResult {
                outcomes: self.outcomes,
                generated_keys,
            }),
        }
    }

    /// Generated keys so far (kept even when the batch fails)
    pub(crate) fn keys(&self, increment: i64) -> Vec<i64> {
        reconstruct_keys(&self.keys, increment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dialect;
    use crate::messages::BindMeta;
    use crate::types::PieceBuffer;

    fn params(v: i64) -> CompiledParams {
        CompiledParams {
            values: vec![Value::Int(v)],
            metas: vec![BindMeta::input()],
        }
    }

    fn insert() -> Statement {
        Statement::parse("INSERT INTO t (a) VALUES (?)", &Config::default())
    }

    #[test]
    fn test_strategy_selection() {
        let config = Config::default().with_rewrite_batched_statements(true);
        let mut job = BatchJob::new(&config);
        job.push_params(params(1));
        job.push_params(params(2));
        assert_eq!(choose_strategy(&job, Some(&insert()), &config), BatchStrategy::MultiValues);

        let update = Statement::parse("UPDATE t SET a = ?", &config);
        assert_eq!(choose_strategy(&job, Some(&update), &config), BatchStrategy::PerRow);

        let oracle = Config::new(Dialect::Oracle).with_rewrite_batched_statements(true);
        assert_eq!(choose_strategy(&job, Some(&update), &oracle), BatchStrategy::ArrayBind);

        job.rewrite = false;
        assert_eq!(choose_strategy(&job, Some(&insert()), &config), BatchStrategy::PerRow);
    }

    #[test]
    fn test_piece_data_lobs_run_per_row() {
        let oracle = Config::new(Dialect::Oracle).with_rewrite_batched_statements(true);
        let lob_row = |v: i64| CompiledParams {
            values: vec![Value::Int(v), Value::Clob(PieceBuffer::from_bytes("abc", 2))],
            metas: vec![BindMeta::input(), BindMeta::input()],
        };
        let mut job = BatchJob::new(&oracle);
        job.push_params(lob_row(1));
        job.push_params(lob_row(2));
        let insert = Statement::parse("INSERT INTO t (a, b) VALUES (?, ?)", &oracle);
        assert_eq!(choose_strategy(&job, Some(&insert), &oracle), BatchStrategy::ArrayBind);

        let pieces = oracle.clone().with_piece_data(true);
        assert_eq!(choose_strategy(&job, Some(&insert), &pieces), BatchStrategy::PerRow);
    }

    #[test]
    fn test_mixed_sql_batch_is_per_row() {
        let config = Config::default().with_rewrite_batched_statements(true);
        let mut job = BatchJob::new(&config);
        job.push_sql("INSERT INTO t VALUES (1)");
        job.push_sql("UPDATE t SET a = 2");
        assert!(!job.is_homogeneous());
        assert_eq!(choose_strategy(&job, None, &config), BatchStrategy::PerRow);
    }

    #[test]
    fn test_chunks_respect_row_limit() {
        let config = Config::default().with_max_batch_rows(4);
        let rows: Vec<Vec<Value>> = (0..10).map(|i| vec![Value::Int(i)]).collect();
        assert_eq!(plan_chunks(&insert(), &rows, &config), vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_chunks_respect_packet_limit() {
        let config = Config::default().with_max_allowed_packet(200);
        let rows: Vec<Vec<Value>> = (0..5).map(|_| vec![Value::String("x".repeat(40))]).collect();
        let chunks = plan_chunks(&insert(), &rows, &config);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 5);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn test_key_reconstruction() {
        let keys = reconstruct_keys(
            &[KeyRange { first: 10, count: 3 }, KeyRange { first: 100, count: 2 }],
            2,
        );
        assert_eq!(keys, vec![10, 12, 14, 100, 102]);
    }

    #[test]
    fn test_accumulator_failure_keeps_partial_outcomes() {
        let mut acc = BatchAccumulator::new();
        acc.row_succeeded(1, 0);
        acc.row_succeeded(1, 0);
        acc.failed(1, Error::server(1366, "HY000", "bad value"));
        let err = acc.finish(1).unwrap_err();
        let outcomes = err.batch_outcomes().unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[2], Outcome::Failed);
        assert_eq!(outcomes[2].as_count(), EXECUTE_FAILED);
    }

    #[test]
    fn test_folded_chunk_reports_no_info() {
        let mut acc = BatchAccumulator::new();
        acc.chunk_succeeded(3, 7);
        let result = acc.finish(1).unwrap();
        assert_eq!(result.update_counts(), vec![-2, -2, -2]);
        assert_eq!(result.generated_keys, vec![7, 8, 9]);
    }
}
