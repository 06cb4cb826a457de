//! Buffer abstractions for the wire codec
//!
//! [`ReadBuffer`] decodes received payloads and [`WriteBuffer`] encodes
//! outgoing ones; both use the same integer and length conventions.

mod read;
mod write;

pub use read::ReadBuffer;
pub use write::WriteBuffer;
