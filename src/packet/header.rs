//! Packet header encoding/decoding
//!
//! Every packet starts with an 8-byte header:
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! |          Length (u32 BE)          | Type(1)| Flags(1)|  Reserved(2)   |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! The length covers the header itself plus the payload.

use bytes::Bytes;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::constants::{PacketType, MAX_PACKET_SIZE, PACKET_HEADER_SIZE};
use crate::error::{Error, Result};

/// Packet header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet length including header
    pub length: u32,
    /// Packet type
    pub packet_type: PacketType,
    /// Packet flags
    pub flags: u8,
}

impl PacketHeader {
    /// Create a header for a payload of `payload_len` bytes
    pub fn for_payload(packet_type: PacketType, payload_len: usize) -> Result<Self> {
        let total = payload_len + PACKET_HEADER_SIZE;
        if total > MAX_PACKET_SIZE {
            return Err(Error::Protocol(format!(
                "packet of {} bytes exceeds the {} byte limit",
                total, MAX_PACKET_SIZE
            )));
        }
        Ok(Self {
            length: total as u32,
            packet_type,
            flags: 0,
        })
    }

    /// Parse a packet header from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(Error::PacketTooShort {
                expected: PACKET_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let mut buf = ReadBuffer::from_slice(&data[..PACKET_HEADER_SIZE]);
        Self::read(&mut buf)
    }

    /// Read a packet header from a buffer
    pub fn read(buf: &mut ReadBuffer) -> Result<Self> {
        let length = buf.read_u32_be()?;
        let packet_type = PacketType::try_from(buf.read_u8()?)?;
        let flags = buf.read_u8()?;
        buf.skip(2)?;

        if (length as usize) < PACKET_HEADER_SIZE {
            return Err(Error::PacketTooShort {
                expected: PACKET_HEADER_SIZE,
                actual: length as usize,
            });
        }
        if length as usize > MAX_PACKET_SIZE {
            return Err(Error::Protocol(format!("oversized packet: {} bytes", length)));
        }

        Ok(Self {
            length,
            packet_type,
            flags,
        })
    }

    /// Write a packet header to a buffer
    pub fn write(&self, buf: &mut WriteBuffer) -> Result<()> {
        buf.write_u32_be(self.length)?;
        buf.write_u8(self.packet_type as u8)?;
        buf.write_u8(self.flags)?;
        buf.write_u16_be(0)
    }

    /// Encode the header to bytes
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = WriteBuffer::with_capacity(PACKET_HEADER_SIZE);
        self.write(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Get the payload length (total length minus header)
    pub fn payload_length(&self) -> usize {
        (self.length as usize).saturating_sub(PACKET_HEADER_SIZE)
    }
}
