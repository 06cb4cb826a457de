//! Write buffer for encoding wire messages
//!
//! Mirror image of [`ReadBuffer`](super::ReadBuffer): every `write_*` here has
//! a matching `read_*` there.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::length;
use crate::error::{Error, Result};

/// Chunk size used when a byte string is too long for a one-byte length
const LONG_CHUNK_SIZE: usize = 32767;

/// A growable buffer for an outgoing payload
#[derive(Debug)]
pub struct WriteBuffer {
    data: BytesMut,
    max_capacity: Option<usize>,
}

impl WriteBuffer {
    /// Create a new WriteBuffer with default capacity
    pub fn new() -> Self {
        Self::with_capacity(512)
    }

    /// Create a new WriteBuffer with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            max_capacity: None,
        }
    }

    /// Create a buffer that refuses to grow beyond `max_capacity`
    pub fn with_max_capacity(capacity: usize, max_capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity.min(max_capacity)),
            max_capacity: Some(max_capacity),
        }
    }

    /// Get the current length of data in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the buffer contents as a byte slice
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the buffer into immutable Bytes
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    #[inline]
    fn ensure_capacity(&self, n: usize) -> Result<()> {
        if let Some(max) = self.max_capacity {
            if self.data.len() + n > max {
                return Err(Error::BufferOverflow {
                    needed: n,
                    available: max.saturating_sub(self.data.len()),
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Fixed-width writes
    // =========================================================================

    /// Write a single byte
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.ensure_capacity(1)?;
        self.data.put_u8(value);
        Ok(())
    }

    /// Write a boolean as one byte
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(value as u8)
    }

    /// Write raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(bytes.len())?;
        self.data.put_slice(bytes);
        Ok(())
    }

    /// Write a big-endian u16
    pub fn write_u16_be(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Write a big-endian u32
    pub fn write_u32_be(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Write a big-endian u64
    pub fn write_u64_be(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Write a big-endian IEEE 754 single
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_u32_be(value.to_bits())
    }

    /// Write a big-endian IEEE 754 double
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_u64_be(value.to_bits())
    }

    // =========================================================================
    // Variable-length integers
    // =========================================================================

    fn write_var_uint(&mut self, value: u64, flags: u8) -> Result<()> {
        let len = (64 - value.leading_zeros()).div_ceil(8) as u8;
        self.write_u8(len | flags)?;
        for i in (0..len).rev() {
            self.write_u8((value >> (i * 8)) as u8)?;
        }
        Ok(())
    }

    /// Write a UB2
    pub fn write_ub2(&mut self, value: u16) -> Result<()> {
        self.write_var_uint(value as u64, 0)
    }

    /// Write a UB4
    pub fn write_ub4(&mut self, value: u32) -> Result<()> {
        self.write_var_uint(value as u64, 0)
    }

    /// Write a UB8
    pub fn write_ub8(&mut self, value: u64) -> Result<()> {
        self.write_var_uint(value, 0)
    }

    /// Write a signed integer (magnitude with the sign in the length byte)
    pub fn write_sb8(&mut self, value: i64) -> Result<()> {
        let flags = if value < 0 { 0x80 } else { 0 };
        self.write_var_uint(value.unsigned_abs(), flags)
    }

    // =========================================================================
    // Length-prefixed data
    // =========================================================================

    /// Write a length-prefixed byte sequence (`None` writes the NULL indicator)
    pub fn write_bytes_with_length(&mut self, bytes: Option<&[u8]>) -> Result<()> {
        match bytes {
            None => self.write_u8(length::NULL_INDICATOR),
            Some(data) if data.len() <= length::MAX_SHORT as usize => {
                self.write_u8(data.len() as u8)?;
                self.write_bytes(data)
            }
            Some(data) => {
                self.write_u8(length::LONG_INDICATOR)?;
                self.write_chunks(data.chunks(LONG_CHUNK_SIZE))
            }
        }
    }

    /// Write a length-prefixed UTF-8 string
    pub fn write_string_with_length(&mut self, s: Option<&str>) -> Result<()> {
        self.write_bytes_with_length(s.map(str::as_bytes))
    }

    /// Write a string that is always present
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_string_with_length(Some(s))
    }

    /// Write a chunk sequence terminated by a zero length.
    ///
    /// Zero-length chunks are skipped since a zero length ends the sequence.
    pub fn write_chunks<'a, I>(&mut self, chunks: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        for chunk in chunks {
            if chunk.is_empty() {
                continue;
            }
            let len = u32::try_from(chunk.len())
                .map_err(|_| Error::Protocol(format!("chunk too large: {}", chunk.len())))?;
            self.write_ub4(len)?;
            self.write_bytes(chunk)?;
        }
        self.write_ub4(0)
    }

    /// Overwrite a big-endian u32 previously written at `pos`
    pub fn patch_u32_be(&mut self, pos: usize, value: u32) -> Result<()> {
        if pos + 4 > self.data.len() {
            return Err(Error::BufferOverflow {
                needed: 4,
                available: self.data.len().saturating_sub(pos),
            });
        }
        self.data[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}
