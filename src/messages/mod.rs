//! Protocol messages
//!
//! A client data packet holds exactly one [`Request`]: function code, sequence
//! number, then the function body. A server data packet holds a run of
//! [`ServerMessage`]s closed by `EndOfResponse`.
//!
//! Both sides encode and decode, so an in-process server can speak the
//! protocol using the same types.

mod execute;
mod fetch;
mod piece;
mod response;

pub use execute::{BindMeta, ExecuteRequest};
pub use fetch::FetchRequest;
pub use piece::PieceRequest;
pub use response::{encode_response, Response, ServerError, ServerMessage, StatusInfo};

use bytes::Bytes;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::FunctionCode;
use crate::error::{Error, Result};

/// A client request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Parse and/or execute a statement
    Execute(ExecuteRequest),
    /// Fetch from an open cursor
    Fetch(FetchRequest),
    /// Upload one LOB piece
    Piece(PieceRequest),
    /// Release server cursors
    CloseCursors(Vec<u32>),
    /// Commit
    Commit,
    /// Roll back
    Rollback,
    /// Switch autocommit
    SetAutoCommit(bool),
    /// No-op round trip
    Ping,
}

impl Request {
    /// Function code of this request
    pub fn function_code(&self) -> FunctionCode {
        match self {
            Request::Execute(_) => FunctionCode::Execute,
            Request::Fetch(_) => FunctionCode::Fetch,
            Request::Piece(_) => FunctionCode::Piece,
            Request::CloseCursors(_) => FunctionCode::CloseCursors,
            Request::Commit => FunctionCode::Commit,
            Request::Rollback => FunctionCode::Rollback,
            Request::SetAutoCommit(_) => FunctionCode::SetAutoCommit,
            Request::Ping => FunctionCode::Ping,
        }
    }

    /// Encode into a data packet payload
    pub fn encode(&self, seq: u8) -> Result<Bytes> {
        let mut buf = WriteBuffer::new();
        buf.write_u8(self.function_code() as u8)?;
        buf.write_u8(seq)?;
        match self {
            Request::Execute(req) => req.write(&mut buf)?,
            Request::Fetch(req) => req.write(&mut buf)?,
            Request::Piece(req) => req.write(&mut buf)?,
            Request::CloseCursors(ids) => {
                buf.write_ub4(ids.len() as u32)?;
                for id in ids {
                    buf.write_ub4(*id)?;
                }
            }
            Request::SetAutoCommit(on) => buf.write_bool(*on)?,
            Request::Commit | Request::Rollback | Request::Ping => {}
        }
        Ok(buf.freeze())
    }

    /// Decode a data packet payload into `(sequence, request)`
    pub fn decode(payload: Bytes) -> Result<(u8, Self)> {
        let mut buf = ReadBuffer::new(payload);
        let code = FunctionCode::try_from(buf.read_u8()?)?;
        let seq = buf.read_u8()?;
        let request = match code {
            FunctionCode::Execute => Request::Execute(ExecuteRequest::read(&mut buf)?),
            FunctionCode::Fetch => Request::Fetch(FetchRequest::read(&mut buf)?),
            FunctionCode::Piece => Request::Piece(PieceRequest::read(&mut buf)?),
            FunctionCode::CloseCursors => {
                let count = buf.read_ub4()? as usize;
                let mut ids = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    ids.push(buf.read_ub4()?);
                }
                Request::CloseCursors(ids)
            }
            FunctionCode::Commit => Request::Commit,
            FunctionCode::Rollback => Request::Rollback,
            FunctionCode::SetAutoCommit => Request::SetAutoCommit(buf.read_bool()?),
            FunctionCode::Ping => Request::Ping,
        };
        if buf.remaining() != 0 {
            return Err(Error::Protocol(format!(
                "{} trailing bytes after {:?} request",
                buf.remaining(),
                code
            )));
        }
        Ok((seq, request))
    }
}
