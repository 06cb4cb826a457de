//! Fetch request for retrieving rows from an open cursor

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::FetchOrientation;
use crate::error::Result;

/// Fetch request body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// Cursor to fetch from
    pub cursor_id: u32,
    /// Maximum rows to return
    pub num_rows: u32,
    /// Direction of the fetch
    pub orientation: FetchOrientation,
    /// Row number for absolute fetches, delta for relative ones
    pub offset: i64,
}

impl FetchRequest {
    /// Fetch the next `num_rows` rows
    pub fn next(cursor_id: u32, num_rows: u32) -> Self {
        Self {
            cursor_id,
            num_rows,
            orientation: FetchOrientation::Next,
            offset: 0,
        }
    }

    /// Fetch starting at an absolute row number (1-based)
    pub fn absolute(cursor_id: u32, num_rows: u32, row: i64) -> Self {
        Self {
            cursor_id,
            num_rows,
            orientation: FetchOrientation::Absolute,
            offset: row,
        }
    }

    pub(crate) fn write(&self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_ub4(self.cursor_id)?;
        buf.write_ub4(self.num_rows)?;
        buf.write_u8(self.orientation as u8)?;
        buf.write_sb8(self.offset)
    }

    pub(crate) fn read(buf: &mut ReadBuffer) -> Result<Self> {
        Ok(Self {
            cursor_id: buf.read_ub4()?,
            num_rows: buf.read_ub4()?,
            orientation: FetchOrientation::try_from(buf.read_u8()?)?,
            offset: buf.read_sb8()?,
        })
    }
}
