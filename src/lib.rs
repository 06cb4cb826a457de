#![warn(missing_docs)]

//! # dualsql
//!
//! Async statement-execution and result-materialization engine for a SQL
//! server that speaks one wire protocol in two dialects: MySQL-compatible
//! and Oracle-compatible.
//!
//! The crate starts where authentication ends. It takes an already
//! authenticated byte stream and provides a JDBC-style API on top of it:
//!
//! - **Statements**: plain, prepared (`?` or `:name` placeholders) and
//!   callable (`{call p(?)}`, `{? = call f(?)}`), over a text path, a
//!   server-prepared path with a statement cache, or a combined
//!   prepare-and-execute path
//! - **Batches**: per-row execution with partial-failure outcomes, or
//!   rewriting into multi-row INSERTs / array executes, with generated keys
//!   rebuilt from key ranges
//! - **LOBs**: chunked piece upload of large CLOB/BLOB binds and
//!   re-readable piece buffers on the way back
//! - **Result sets**: forward-only, client-buffered scrollable, paged server
//!   cursors and procedure-returned ref cursors behind one navigation API
//! - **Coercion**: dialect-aware typed getters (TINYINT(1) as BIT, YEAR as
//!   DATE, NaN and infinities, nanosecond fractions)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dualsql::{Config, Connection};
//!
//! # async fn example(stream: tokio::net::TcpStream) -> dualsql::Result<()> {
//! let config: Config = "mode=oracle&useServerPrepStmts=true".parse()?;
//! let conn = Connection::from_stream(stream, config);
//!
//! let mut stmt = conn.prepare("SELECT id, name FROM users WHERE id > ?")?;
//! stmt.bind(1, 10)?;
//! let mut rs = stmt.execute_query().await?;
//! while rs.next().await? {
//!     let id = rs.get_i64(1)?;
//!     let name = rs.get_string("name")?;
//!     println!("{:?} {:?}", id, name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Batches
//!
//! ```rust,no_run
//! # async fn example(conn: dualsql::Connection) -> dualsql::Result<()> {
//! let mut stmt = conn.prepare("INSERT INTO t (a) VALUES (?)")?;
//! for i in 0..10 {
//!     stmt.bind(1, i)?;
//!     stmt.add_batch()?;
//! }
//! match stmt.execute_batch().await {
//!     Ok(result) => println!("{:?}", result.update_counts()),
//!     Err(e) => println!("partial outcomes: {:?}", e.batch_outcomes()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]. It installs no subscriber.

pub mod batch;
pub mod binder;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod constants;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod messages;
pub mod packet;
pub mod row;
pub mod statement;
pub mod statement_cache;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use batch::{BatchResult, BatchStrategy, Outcome};
pub use binder::{BindIndex, BindSlot, Binder};
pub use config::{Config, Dialect};
pub use connection::{CancelHandle, Connection};
pub use constants::{BindDirection, SqlType, EXECUTE_FAILED, STREAMING_FETCH_SIZE, SUCCESS_NO_INFO};
pub use cursor::{
    ColumnIndex, Concurrency, CursorKind, Holdability, Position, ResultSet, ResultSetMetadata,
    ResultSetType,
};
pub use error::{Error, ErrorClass, Result};
pub use executor::{StatementHandle, StatementState, GENERATED_KEY_COLUMN};
pub use row::{Row, Value};
pub use statement::{ColumnInfo, ExecutionPlan, ProtocolPath, Statement, StatementKind, StatementType};
pub use statement_cache::StatementCache;
pub use types::{CoercionContext, Lob, LobKind, PieceBuffer, PieceSink, PieceSource, RefCursor};
