//! Piece request for streamed LOB binds
//!
//! A large LOB parameter is uploaded as a numbered run of pieces before the
//! execute that consumes it. The server appends pieces in `seq` order and
//! rejects gaps; `last` closes the value. A zero-length value is a single
//! empty piece with `last` set.

use bytes::Bytes;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{Error, Result};

/// Piece request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceRequest {
    /// 1-based parameter slot the value belongs to
    pub bind_index: u16,
    /// 0-based bind row (array executes)
    pub row: u32,
    /// 0-based piece number
    pub seq: u32,
    /// Final piece of the value
    pub last: bool,
    /// Piece content, possibly empty
    pub data: Bytes,
}

impl PieceRequest {
    pub(crate) fn write(&self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_ub2(self.bind_index)?;
        buf.write_ub4(self.row)?;
        buf.write_ub4(self.seq)?;
        buf.write_bool(self.last)?;
        let len = u32::try_from(self.data.len())
            .map_err(|_| Error::Protocol(format!("piece too large: {}", self.data.len())))?;
        buf.write_ub4(len)?;
        buf.write_bytes(&self.data)
    }

    pub(crate) fn read(buf: &mut ReadBuffer) -> Result<Self> {
        let bind_index = buf.read_ub2()?;
        let row = buf.read_ub4()?;
        let seq = buf.read_ub4()?;
        let last = buf.read_bool()?;
        let len = buf.read_ub4()? as usize;
        let data = buf.read_bytes_owned(len)?;
        Ok(Self {
            bind_index,
            row,
            seq,
            last,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Request;

    #[test]
    fn test_empty_last_piece() {
        let req = PieceRequest {
            bind_index: 2,
            row: 0,
            seq: 0,
            last: true,
            data: Bytes::new(),
        };
        let (_, decoded) = Request::decode(Request::Piece(req.clone()).encode(0).unwrap()).unwrap();
        assert_eq!(decoded, Request::Piece(req));
    }

    #[test]
    fn test_piece_data_longer_than_short_form() {
        let req = PieceRequest {
            bind_index: 1,
            row: 3,
            seq: 17,
            last: false,
            data: Bytes::from(vec![0xab; 8192]),
        };
        let (_, decoded) = Request::decode(Request::Piece(req.clone()).encode(0).unwrap()).unwrap();
        assert_eq!(decoded, Request::Piece(req));
    }
}
