//! Read buffer for decoding wire messages
//!
//! Integers use the variable-length `ub` encoding (a length byte followed by
//! that many big-endian bytes); byte strings use a one-byte length with a
//! chunked escape for long values.

use bytes::Bytes;

use crate::constants::length;
use crate::error::{Error, Result};

/// A cursor over a received payload
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    data: Bytes,
    pos: usize,
}

impl ReadBuffer {
    /// Create a new ReadBuffer from bytes
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a new ReadBuffer from a byte slice
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Get the current position in the buffer
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to be read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if there are at least `n` bytes remaining
    #[inline]
    pub fn has_remaining(&self, n: usize) -> bool {
        self.remaining() >= n
    }

    /// Skip `n` bytes in the buffer
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure_remaining(n)?;
        self.pos += n;
        Ok(())
    }

    /// Peek at the next byte without consuming it
    pub fn peek_u8(&self) -> Result<u8> {
        self.ensure_remaining(1)?;
        Ok(self.data[self.pos])
    }

    #[inline]
    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::BufferUnderflow {
                needed: n,
                available: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Fixed-width reads
    // =========================================================================

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_remaining(1)?;
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    /// Read a boolean stored as one byte
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read `n` bytes without copying
    pub fn read_bytes_owned(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_remaining(n)?;
        let bytes = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure_remaining(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Read a big-endian u16
    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian u32
    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian u64
    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian IEEE 754 single
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32_be()?))
    }

    /// Read a big-endian IEEE 754 double
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64_be()?))
    }

    // =========================================================================
    // Variable-length integers
    // =========================================================================

    /// Read a variable-length unsigned integer of at most `max` bytes
    fn read_var_uint(&mut self, max: u8) -> Result<u64> {
        let len = self.read_u8()? & 0x7F;
        if len > max {
            return Err(Error::InvalidLengthIndicator(len));
        }
        let mut value = 0u64;
        for _ in 0..len {
            value = (value << 8) | self.read_u8()? as u64;
        }
        Ok(value)
    }

    /// Read a UB2 (length byte 0..=2 followed by big-endian bytes)
    pub fn read_ub2(&mut self) -> Result<u16> {
        Ok(self.read_var_uint(2)? as u16)
    }

    /// Read a UB4 (length byte 0..=4 followed by big-endian bytes)
    pub fn read_ub4(&mut self) -> Result<u32> {
        Ok(self.read_var_uint(4)? as u32)
    }

    /// Read a UB8 (length byte 0..=8 followed by big-endian bytes)
    pub fn read_ub8(&mut self) -> Result<u64> {
        self.read_var_uint(8)
    }

    /// Read a signed integer: magnitude bytes, sign in the high bit of the
    /// length byte
    pub fn read_sb8(&mut self) -> Result<i64> {
        let len_byte = self.read_u8()?;
        let negative = len_byte & 0x80 != 0;
        let len = len_byte & 0x7F;
        if len > 8 {
            return Err(Error::InvalidLengthIndicator(len));
        }
        let mut magnitude = 0u64;
        for _ in 0..len {
            magnitude = (magnitude << 8) | self.read_u8()? as u64;
        }
        if negative {
            // i64::MIN has a magnitude one past i64::MAX
            Ok(0i64.wrapping_sub_unsigned(magnitude))
        } else {
            i64::try_from(magnitude)
                .map_err(|_| Error::Protocol(format!("integer out of range: {}", magnitude)))
        }
    }

    // =========================================================================
    // Length-prefixed data
    // =========================================================================

    /// Read a length-prefixed byte sequence
    ///
    /// Returns `None` for the NULL indicator. Values longer than
    /// [`length::MAX_SHORT`] arrive as `LONG_INDICATOR` followed by
    /// `ub4`-sized chunks terminated by a zero length.
    pub fn read_bytes_with_length(&mut self) -> Result<Option<Bytes>> {
        let len = self.read_u8()?;
        match len {
            length::NULL_INDICATOR => Ok(None),
            length::LONG_INDICATOR => {
                let chunks = self.read_chunks()?;
                Ok(Some(concat_chunks(chunks)))
            }
            n if n <= length::MAX_SHORT => self.read_bytes_owned(n as usize).map(Some),
            other => Err(Error::InvalidLengthIndicator(other)),
        }
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string_with_length(&mut self) -> Result<Option<String>> {
        match self.read_bytes_with_length()? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| Error::Protocol(format!("invalid UTF-8 on the wire: {}", e))),
        }
    }

    /// Read a string that must be present
    pub fn read_string(&mut self) -> Result<String> {
        self.read_string_with_length()?
            .ok_or_else(|| Error::Protocol("unexpected NULL string".to_string()))
    }

    /// Read a chunk sequence (`ub4` length + bytes, terminated by zero)
    ///
    /// Chunk boundaries are preserved in emission order.
    pub fn read_chunks(&mut self) -> Result<Vec<Bytes>> {
        let mut chunks = Vec::new();
        loop {
            let chunk_len = self.read_ub4()? as usize;
            if chunk_len == 0 {
                break;
            }
            chunks.push(self.read_bytes_owned(chunk_len)?);
        }
        Ok(chunks)
    }
}

fn concat_chunks(chunks: Vec<Bytes>) -> Bytes {
    if chunks.len() == 1 {
        return chunks.into_iter().next().unwrap_or_default();
    }
    let mut out = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in &chunks {
        out.extend_from_slice(chunk);
    }
    Bytes::from(out)
}

impl From<Bytes> for ReadBuffer {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for ReadBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u8() {
        let mut buf = ReadBuffer::from_slice(&[0x42, 0x43]);
        assert_eq!(buf.read_u8().unwrap(), 0x42);
        assert_eq!(buf.read_u8().unwrap(), 0x43);
        assert!(buf.read_u8().is_err());
    }

    #[test]
    fn test_read_fixed_width() {
        let mut buf = ReadBuffer::from_slice(&[0x01, 0x02, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buf.read_u16_be().unwrap(), 0x0102);
        assert_eq!(buf.read_u32_be().unwrap(), 0x01020304);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_read_ub4_lengths() {
        let mut buf = ReadBuffer::from_slice(&[0x00, 0x01, 0x42, 0x02, 0x01, 0x02]);
        assert_eq!(buf.read_ub4().unwrap(), 0);
        assert_eq!(buf.read_ub4().unwrap(), 0x42);
        assert_eq!(buf.read_ub4().unwrap(), 0x0102);
    }

    #[test]
    fn test_read_ub2_rejects_wide_length() {
        let mut buf = ReadBuffer::from_slice(&[0x04, 0, 0, 0, 1]);
        assert!(matches!(buf.read_ub2(), Err(Error::InvalidLengthIndicator(4))));
    }

    #[test]
    fn test_read_sb8() {
        let mut buf = ReadBuffer::from_slice(&[0x02, 0x01, 0x02, 0x82, 0x01, 0x02, 0x00]);
        assert_eq!(buf.read_sb8().unwrap(), 258);
        assert_eq!(buf.read_sb8().unwrap(), -258);
        assert_eq!(buf.read_sb8().unwrap(), 0);
    }

    #[test]
    fn test_read_bytes_with_length() {
        let mut buf = ReadBuffer::from_slice(&[0xff, 0x00, 0x03, b'a', b'b', b'c']);
        assert!(buf.read_bytes_with_length().unwrap().is_none());
        assert!(buf.read_bytes_with_length().unwrap().unwrap().is_empty());
        assert_eq!(&buf.read_bytes_with_length().unwrap().unwrap()[..], b"abc");
    }

    #[test]
    fn test_read_chunked_long_value() {
        let mut buf = ReadBuffer::from_slice(&[
            length::LONG_INDICATOR,
            0x01, 0x02, b'a', b'b',
            0x01, 0x01, b'c',
            0x00,
        ]);
        assert_eq!(&buf.read_bytes_with_length().unwrap().unwrap()[..], b"abc");
    }

    #[test]
    fn test_underflow_reports_sizes() {
        let mut buf = ReadBuffer::from_slice(&[0x05, b'a']);
        match buf.read_bytes_with_length() {
            Err(Error::BufferUnderflow { needed, available }) => {
                assert_eq!(needed, 5);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
