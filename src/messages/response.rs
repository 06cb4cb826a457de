//! Server messages and response aggregation

use bytes::Bytes;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::MessageType;
use crate::error::{Error, Result};
use crate::row::{Row, Value};
use crate::statement::ColumnInfo;

/// Completion status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusInfo {
    /// Server cursor holding the statement (0 when none was kept)
    pub cursor_id: u32,
    /// Rows inserted, updated or deleted
    pub rows_affected: i64,
    /// First auto-increment value generated by the call
    pub last_insert_id: u64,
    /// The cursor has rows beyond those returned
    pub more_rows: bool,
    /// Warnings raised by the call
    pub warning_count: u16,
    /// Server-side row number after a fetch (0 when not scrolled)
    pub row_number: i64,
}

/// Error raised by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Vendor error code
    pub code: u32,
    /// SQLSTATE
    pub sql_state: String,
    /// Message text
    pub message: String,
    /// Rows affected before the error (array executes)
    pub rows_affected: i64,
}

impl ServerError {
    /// Build an error with no rows affected
    pub fn new(code: u32, sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state.into(),
            message: message.into(),
            rows_affected: 0,
        }
    }
}

impl From<ServerError> for Error {
    fn from(e: ServerError) -> Self {
        Error::server(e.code, e.sql_state, e.message)
    }
}

/// One message inside a server data packet
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Column metadata of the result set
    Describe(Vec<ColumnInfo>),
    /// One row
    RowData(Row),
    /// OUT parameter values, one per bind position
    OutBinds(Vec<Value>),
    /// Call completed
    Status(StatusInfo),
    /// Call failed
    Error(ServerError),
    /// Per-row counts of an array execute
    BatchCounts(Vec<i64>),
    /// A LOB piece was stored
    PieceAck {
        /// Slot of the piece
        bind_index: u16,
        /// Sequence number of the piece
        seq: u32,
    },
    /// End of the response
    EndOfResponse,
}

impl ServerMessage {
    /// Message type byte
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::Describe(_) => MessageType::Describe,
            ServerMessage::RowData(_) => MessageType::RowData,
            ServerMessage::OutBinds(_) => MessageType::OutBinds,
            ServerMessage::Status(_) => MessageType::Status,
            ServerMessage::Error(_) => MessageType::Error,
            ServerMessage::BatchCounts(_) => MessageType::BatchCounts,
            ServerMessage::PieceAck { .. } => MessageType::PieceAck,
            ServerMessage::EndOfResponse => MessageType::EndOfResponse,
        }
    }

    /// Encode with its type byte
    pub fn write(&self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_u8(self.message_type() as u8)?;
        match self {
            ServerMessage::Describe(columns) => {
                buf.write_ub2(columns.len() as u16)?;
                for column in columns {
                    column.write(buf)?;
                }
            }
            ServerMessage::RowData(row) => {
                buf.write_ub2(row.len() as u16)?;
                row.write(buf)?;
            }
            ServerMessage::OutBinds(values) => {
                buf.write_ub2(values.len() as u16)?;
                for value in values {
                    value.write(buf)?;
                }
            }
            ServerMessage::Status(s) => {
                buf.write_ub4(s.cursor_id)?;
                buf.write_sb8(s.rows_affected)?;
                buf.write_ub8(s.last_insert_id)?;
                buf.write_bool(s.more_rows)?;
                buf.write_ub2(s.warning_count)?;
                buf.write_sb8(s.row_number)?;
            }
            ServerMessage::Error(e) => {
                buf.write_ub4(e.code)?;
                buf.write_string(&e.sql_state)?;
                buf.write_string(&e.message)?;
                buf.write_sb8(e.rows_affected)?;
            }
            ServerMessage::BatchCounts(counts) => {
                buf.write_ub4(counts.len() as u32)?;
                for count in counts {
                    buf.write_sb8(*count)?;
                }
            }
            ServerMessage::PieceAck { bind_index, seq } => {
                buf.write_ub2(*bind_index)?;
                buf.write_ub4(*seq)?;
            }
            ServerMessage::EndOfResponse => {}
        }
        Ok(())
    }

    /// Decode one message
    pub fn read(buf: &mut ReadBuffer) -> Result<Self> {
        let kind = MessageType::try_from(buf.read_u8()?)?;
        Ok(match kind {
            MessageType::Describe => {
                let count = buf.read_ub2()? as usize;
                let mut columns = Vec::with_capacity(count);
                for _ in 0..count {
                    columns.push(ColumnInfo::read(buf)?);
                }
                ServerMessage::Describe(columns)
            }
            MessageType::RowData => {
                let count = buf.read_ub2()? as usize;
                ServerMessage::RowData(Row::read(buf, count)?)
            }
            MessageType::OutBinds => {
                let count = buf.read_ub2()? as usize;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(Value::read(buf)?);
                }
                ServerMessage::OutBinds(values)
            }
            MessageType::Status => ServerMessage::Status(StatusInfo {
                cursor_id: buf.read_ub4()?,
                rows_affected: buf.read_sb8()?,
                last_insert_id: buf.read_ub8()?,
                more_rows: buf.read_bool()?,
                warning_count: buf.read_ub2()?,
                row_number: buf.read_sb8()?,
            }),
            MessageType::Error => ServerMessage::Error(ServerError {
                code: buf.read_ub4()?,
                sql_state: buf.read_string()?,
                message: buf.read_string()?,
                rows_affected: buf.read_sb8()?,
            }),
            MessageType::BatchCounts => {
                let count = buf.read_ub4()? as usize;
                let mut counts = Vec::with_capacity(count.min(65536));
                for _ in 0..count {
                    counts.push(buf.read_sb8()?);
                }
                ServerMessage::BatchCounts(counts)
            }
            MessageType::PieceAck => ServerMessage::PieceAck {
                bind_index: buf.read_ub2()?,
                seq: buf.read_ub4()?,
            },
            MessageType::EndOfResponse => ServerMessage::EndOfResponse,
        })
    }
}

/// Encode a response; `EndOfResponse` is appended when missing
pub fn encode_response(messages: &[ServerMessage]) -> Result<Bytes> {
    let mut buf = WriteBuffer::new();
    for message in messages {
        message.write(&mut buf)?;
    }
    if messages.last() != Some(&ServerMessage::EndOfResponse) {
        ServerMessage::EndOfResponse.write(&mut buf)?;
    }
    Ok(buf.freeze())
}

/// Everything the server sent for one request
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Result-set columns, if the call produced a result set
    pub columns: Option<Vec<ColumnInfo>>,
    /// Rows returned with the response
    pub rows: Vec<Row>,
    /// OUT parameter values
    pub out_values: Option<Vec<Value>>,
    /// Completion status
    pub status: Option<StatusInfo>,
    /// Server error
    pub error: Option<ServerError>,
    /// Per-row counts of an array execute
    pub batch_counts: Option<Vec<i64>>,
    /// Acknowledged pieces as `(slot, seq)`
    pub piece_acks: Vec<(u16, u32)>,
    complete: bool,
}

impl Response {
    /// Decode a response held in one payload
    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut response = Self::default();
        response.absorb(payload)?;
        if !response.complete {
            return Err(Error::Protocol("response not terminated".to_string()));
        }
        Ok(response)
    }

    /// Fold the messages of one data packet into the response
    pub fn absorb(&mut self, payload: Bytes) -> Result<()> {
        let mut buf = ReadBuffer::new(payload);
        while buf.remaining() > 0 {
            if self.complete {
                return Err(Error::Protocol("data after end of response".to_string()));
            }
            match ServerMessage::read(&mut buf)? {
                ServerMessage::Describe(columns) => self.columns = Some(columns),
                ServerMessage::RowData(row) => self.rows.push(row),
                ServerMessage::OutBinds(values) => self.out_values = Some(values),
                ServerMessage::Status(status) => self.status = Some(status),
                ServerMessage::Error(error) => self.error = Some(error),
                ServerMessage::BatchCounts(counts) => self.batch_counts = Some(counts),
                ServerMessage::PieceAck { bind_index, seq } => {
                    self.piece_acks.push((bind_index, seq))
                }
                ServerMessage::EndOfResponse => self.complete = true,
            }
        }
        Ok(())
    }

    /// Whether `EndOfResponse` has been seen
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Convert a server error into `Err`
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(error) => Err(error.into()),
            None => Ok(self),
        }
    }

    /// Rows affected, 0 when no status was sent
    pub fn rows_affected(&self) -> i64 {
        self.status.map(|s| s.rows_affected).unwrap_or(0)
    }

    /// Server cursor id, 0 when none
    pub fn cursor_id(&self) -> u32 {
        self.status.map(|s| s.cursor_id).unwrap_or(0)
    }

    /// Whether the cursor has more rows
    pub fn more_rows(&self) -> bool {
        self.status.map(|s| s.more_rows).unwrap_or(false)
    }

    /// First generated auto-increment value
    pub fn last_insert_id(&self) -> u64 {
        self.status.map(|s| s.last_insert_id).unwrap_or(0)
    }

    /// Warnings raised by the call
    pub fn warning_count(&self) -> u16 {
        self.status.map(|s| s.warning_count).unwrap_or(0)
    }
}
