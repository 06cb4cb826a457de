//! REF CURSOR values
//!
//! A procedure can hand back an open server cursor through an OUT
//! parameter. The value carries the cursor id and the column metadata; the
//! rows are fetched later through [`ResultSet`](crate::ResultSet).

use crate::statement::ColumnInfo;

/// A server cursor returned from a stored procedure
#[derive(Debug, Clone, PartialEq)]
pub struct RefCursor {
    pub(crate) cursor_id: u32,
    pub(crate) columns: Vec<ColumnInfo>,
}

impl RefCursor {
    /// Create a new REF CURSOR with the given cursor ID and columns
    pub fn new(cursor_id: u32, columns: Vec<ColumnInfo>) -> Self {
        Self { cursor_id, columns }
    }

    /// Get the cursor ID
    pub fn cursor_id(&self) -> u32 {
        self.cursor_id
    }

    /// Get the column metadata
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}
