//! Data type support
//!
//! Date/time text and wire forms, LOB piece buffers, REF CURSOR values and
//! the coercion rules used by typed getters.

pub mod coerce;
pub mod date;
mod cursor;
mod lob;

pub use coerce::CoercionContext;
pub use cursor::RefCursor;
pub use lob::{Lob, LobKind, PieceBuffer, PieceSink, PieceSource};
