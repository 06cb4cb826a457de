//! In-process server for integration tests
//!
//! The server runs on the far end of a `tokio::io::duplex` pipe and speaks
//! the protocol through the crate's own codec. It takes care of the
//! mechanics every test needs (prepared cursor ids, piece reassembly, paging
//! of open result cursors, cursor release, interrupts) and hands each
//! execution to a per-test handler as an [`Exec`].

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::task::JoinHandle;

use dualsql::constants::{error_code, exec_option, sql_state, SqlType, STREAMING_FETCH_SIZE};
use dualsql::messages::{
    encode_response, ExecuteRequest, Request, ServerError, ServerMessage, StatusInfo,
};
use dualsql::transport::{self, PacketReader, PacketWriter};
use dualsql::{ColumnInfo, Config, Connection, PieceBuffer, Row, Value};

/// One execution as seen by a handler
pub struct Exec<'a> {
    /// Statement text (resolved from the cursor for re-executions)
    pub sql: &'a str,
    /// Bind rows with piece references replaced by the uploaded LOBs
    pub rows: &'a [Vec<Value>],
    /// The raw request
    pub request: &'a ExecuteRequest,
}

impl Exec<'_> {
    /// Bind values of the first row
    pub fn params(&self) -> &[Value] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// What the handler wants sent back
pub enum Reply {
    /// A result set
    Rows {
        columns: Vec<ColumnInfo>,
        rows: Vec<Row>,
    },
    /// An update count
    Update { rows_affected: i64, last_insert_id: u64 },
    /// Per-row counts of an array execute
    Counts(Vec<i64>),
    /// OUT values, one per placeholder
    Out(Vec<Value>),
    /// OUT values plus rows behind the ref cursors they return
    OutCursors {
        values: Vec<Value>,
        cursors: Vec<(u32, Vec<Row>)>,
    },
    /// A server error
    Error(ServerError),
    /// Block until the client sends an interrupt
    WaitForInterrupt,
}

impl Reply {
    pub fn update(rows_affected: i64) -> Self {
        Reply::Update {
            rows_affected,
            last_insert_id: 0,
        }
    }

    pub fn error(code: u32, state: &str, message: &str) -> Self {
        Reply::Error(ServerError::new(code, state, message))
    }
}

/// A table kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemTable {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    pub next_id: u64,
}

impl MemTable {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            next_id: 1,
        }
    }

    pub fn insert(&mut self, values: Vec<Value>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.rows.push(Row::new(values));
        id
    }

    pub fn find(&self, key: &Value) -> Option<&Row> {
        self.rows.iter().find(|r| r.get(0) == Some(key))
    }

    pub fn reply(&self) -> Reply {
        Reply::Rows {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
        }
    }
}

/// Handle to a running server
pub struct MockServer {
    pub log: Arc<Mutex<Vec<Request>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Every request received so far
    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }

    /// Execute requests received so far
    pub fn executes(&self) -> Vec<ExecuteRequest> {
        self.requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::Execute(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Piece requests received so far
    pub fn piece_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| matches!(r, Request::Piece(_)))
            .count()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct PieceSlot {
    chunks: Vec<Bytes>,
    next_seq: u32,
    done: bool,
}

struct ServerState<H> {
    handler: H,
    prepared: HashMap<u32, String>,
    open: HashMap<u32, VecDeque<Row>>,
    pieces: HashMap<(u16, u32), PieceSlot>,
    next_cursor: u32,
}

impl<H> ServerState<H>
where
    H: FnMut(Exec<'_>) -> Reply,
{
    fn new_cursor(&mut self) -> u32 {
        self.next_cursor += 1;
        self.next_cursor
    }

    fn piece(&mut self, bind_index: u16, row: u32, seq: u32, last: bool, data: Bytes) -> Vec<ServerMessage> {
        let slot = self.pieces.entry((bind_index, row)).or_default();
        if slot.done {
            *slot = PieceSlot::default();
        }
        if seq != slot.next_seq {
            return vec![ServerMessage::Error(ServerError::new(
                error_code::PIECE_OUT_OF_ORDER,
                sql_state::GENERAL,
                "piece out of order",
            ))];
        }
        slot.chunks.push(data);
        slot.next_seq += 1;
        slot.done = last;
        vec![
            ServerMessage::PieceAck { bind_index, seq },
            ServerMessage::Status(StatusInfo::default()),
        ]
    }

    fn execute(&mut self, request: &ExecuteRequest) -> Option<Vec<ServerMessage>> {
        let keep = request.has_option(exec_option::KEEP_CURSOR);
        let (sql, prepared_cursor) = match &request.sql {
            Some(sql) => {
                let cursor = if keep {
                    let id = self.new_cursor();
                    self.prepared.insert(id, sql.clone());
                    id
                } else {
                    0
                };
                (sql.clone(), cursor)
            }
            None => match self.prepared.get(&request.cursor_id) {
                Some(sql) => (sql.clone(), request.cursor_id),
                None => {
                    return Some(vec![ServerMessage::Error(ServerError::new(
                        error_code::UNKNOWN_CURSOR,
                        sql_state::GENERAL,
                        "Unknown prepared statement handler",
                    ))])
                }
            },
        };

        let mut rows = request.rows.clone();
        for (r, row) in rows.iter_mut().enumerate() {
            for (i, value) in row.iter_mut().enumerate() {
                if let Value::Piece(bind_index) = value {
                    let slot = self.pieces.remove(&(*bind_index, r as u32)).unwrap_or_default();
                    let buffer = PieceBuffer::from_chunks(slot.chunks);
                    *value = match request.binds.get(i).map(|b| b.sql_type) {
                        Some(SqlType::Blob) => Value::Blob(buffer),
                        _ => Value::Clob(buffer),
                    };
                }
            }
        }

        let reply = (self.handler)(Exec {
            sql: &sql,
            rows: &rows,
            request,
        });
        let status = StatusInfo {
            cursor_id: prepared_cursor,
            ..Default::default()
        };
        Some(match reply {
            Reply::Rows { columns, rows } => {
                let paged = request.has_option(exec_option::CURSOR_FETCH)
                    || request.has_option(exec_option::STREAMING);
                let page = match request.fetch_size {
                    STREAMING_FETCH_SIZE => 1,
                    n if n > 0 && paged => n as usize,
                    _ => rows.len(),
                };
                let mut rows: VecDeque<Row> = rows.into();
                let first: Vec<Row> = rows.drain(..page.min(rows.len())).collect();
                let more_rows = !rows.is_empty();
                let cursor_id = if more_rows {
                    let id = if prepared_cursor != 0 {
                        prepared_cursor
                    } else {
                        self.new_cursor()
                    };
                    self.open.insert(id, rows);
                    id
                } else {
                    prepared_cursor
                };
                let mut messages = vec![ServerMessage::Describe(columns)];
                messages.extend(first.into_iter().map(ServerMessage::RowData));
                messages.push(ServerMessage::Status(StatusInfo {
                    cursor_id,
                    more_rows,
                    ..status
                }));
                messages
            }
            Reply::Update {
                rows_affected,
                last_insert_id,
            } => vec![ServerMessage::Status(StatusInfo {
                rows_affected,
                last_insert_id,
                ..status
            })],
            Reply::Counts(counts) => {
                let total = counts.iter().filter(|c| **c > 0).sum();
                vec![
                    ServerMessage::BatchCounts(counts),
                    ServerMessage::Status(StatusInfo {
                        rows_affected: total,
                        ..status
                    }),
                ]
            }
            Reply::Out(values) => vec![ServerMessage::OutBinds(values), ServerMessage::Status(status)],
            Reply::OutCursors { values, cursors } => {
                for (id, rows) in cursors {
                    self.open.insert(id, rows.into());
                }
                vec![ServerMessage::OutBinds(values), ServerMessage::Status(status)]
            }
            Reply::Error(error) => vec![ServerMessage::Error(error)],
            Reply::WaitForInterrupt => return None,
        })
    }

    fn fetch(&mut self, cursor_id: u32, num_rows: u32) -> Vec<ServerMessage> {
        let Some(open) = self.open.get_mut(&cursor_id) else {
            return vec![ServerMessage::Error(ServerError::new(
                error_code::UNKNOWN_CURSOR,
                sql_state::GENERAL,
                "cursor is not open",
            ))];
        };
        let n = (num_rows as usize).max(1).min(open.len());
        let mut messages: Vec<ServerMessage> = open.drain(..n).map(ServerMessage::RowData).collect();
        let more_rows = !open.is_empty();
        if !more_rows {
            self.open.remove(&cursor_id);
        }
        messages.push(ServerMessage::Status(StatusInfo {
            cursor_id,
            more_rows,
            ..Default::default()
        }));
        messages
    }
}

fn interrupted() -> Vec<ServerMessage> {
    vec![ServerMessage::Error(ServerError::new(
        error_code::QUERY_INTERRUPTED,
        sql_state::INTERRUPTED,
        "Query execution was interrupted",
    ))]
}

/// Start a server with `handler` and connect to it with `config`
pub fn start<H>(config: Config, handler: H) -> (Connection, MockServer)
where
    H: FnMut(Exec<'_>) -> Reply + Send + 'static,
{
    let (client, server) = tokio::io::duplex(1 << 20);
    let (mut reader, mut writer) = transport::split(server);
    let log = Arc::new(Mutex::new(Vec::new()));
    let task_log = Arc::clone(&log);

    let task = tokio::spawn(async move {
        let mut state = ServerState {
            handler,
            prepared: HashMap::new(),
            open: HashMap::new(),
            pieces: HashMap::new(),
            next_cursor: 100,
        };
        loop {
            let packet = match reader.receive_packet().await {
                Ok(packet) => packet,
                Err(_) => break,
            };
            if packet.is_marker() {
                // interrupt with nothing running
                continue;
            }
            let Ok((_, request)) = Request::decode(packet.payload) else {
                break;
            };
            task_log.lock().unwrap().push(request.clone());

            let messages = match &request {
                Request::Execute(execute) => match state.execute(execute) {
                    Some(messages) => messages,
                    None => loop {
                        match reader.receive_packet().await {
                            Ok(p) if p.is_marker() => break interrupted(),
                            Ok(_) => continue,
                            Err(_) => return,
                        }
                    },
                },
                Request::Fetch(fetch) => state.fetch(fetch.cursor_id, fetch.num_rows),
                Request::Piece(piece) => {
                    state.piece(piece.bind_index, piece.row, piece.seq, piece.last, piece.data.clone())
                }
                Request::CloseCursors(ids) => {
                    for id in ids {
                        state.open.remove(id);
                        state.prepared.remove(id);
                    }
                    vec![ServerMessage::Status(StatusInfo::default())]
                }
                _ => vec![ServerMessage::Status(StatusInfo::default())],
            };
            let Ok(payload) = encode_response(&messages) else {
                break;
            };
            if writer.send_data(payload).await.is_err() {
                break;
            }
        }
    });

    let conn = Connection::from_stream(client, config);
    (conn, MockServer { log, task })
}

/// Integer column
pub fn int_col(name: &str) -> ColumnInfo {
    ColumnInfo::new(name, SqlType::BigInt)
}

/// Text column
pub fn text_col(name: &str) -> ColumnInfo {
    ColumnInfo::new(name, SqlType::Varchar)
}

/// First integer literal inside the last parenthesized group of `sql`
pub fn last_group_int(sql: &str) -> Option<i64> {
    let start = sql.rfind('(')?;
    let end = sql[start..].find(')')? + start;
    sql[start + 1..end].split(',').next()?.trim().parse().ok()
}

/// Install a test subscriber once
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
