//! Packet framing
//!
//! A packet is an 8-byte [`PacketHeader`] followed by its payload. Data
//! packets carry one request (client) or one response (server); marker
//! packets carry a single [`MarkerType`] byte.

mod header;

pub use header::PacketHeader;

use bytes::{Bytes, BytesMut};

use crate::constants::{MarkerType, PacketType, PACKET_HEADER_SIZE};
use crate::error::{Error, Result};

/// A complete packet with header and payload
#[derive(Debug, Clone)]
pub struct Packet {
    /// The packet header
    pub header: PacketHeader,
    /// The packet payload (everything after the 8-byte header)
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet with the given header and payload
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Build a data packet around a payload
    pub fn data(payload: Bytes) -> Result<Self> {
        let header = PacketHeader::for_payload(PacketType::Data, payload.len())?;
        Ok(Self { header, payload })
    }

    /// Build a marker packet
    pub fn marker(kind: MarkerType) -> Result<Self> {
        let header = PacketHeader::for_payload(PacketType::Marker, 1)?;
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&[kind as u8]),
        })
    }

    /// Create a packet from raw bytes
    pub fn from_bytes(data: Bytes) -> Result<Self> {
        let header = PacketHeader::parse(&data)?;
        if data.len() < header.length as usize {
            return Err(Error::PacketTooShort {
                expected: header.length as usize,
                actual: data.len(),
            });
        }
        let payload = data.slice(PACKET_HEADER_SIZE..header.length as usize);
        Ok(Self { header, payload })
    }

    /// Encode header and payload into one contiguous buffer
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes()?);
        out.extend_from_slice(&self.payload);
        Ok(out.freeze())
    }

    /// Get the packet type
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// Check if this is a DATA packet
    pub fn is_data(&self) -> bool {
        self.header.packet_type == PacketType::Data
    }

    /// Check if this is a MARKER packet
    pub fn is_marker(&self) -> bool {
        self.header.packet_type == PacketType::Marker
    }

    /// Marker kind of a marker packet
    pub fn marker_type(&self) -> Result<MarkerType> {
        if !self.is_marker() {
            return Err(Error::Protocol("not a marker packet".to_string()));
        }
        let kind = self
            .payload
            .first()
            .copied()
            .ok_or_else(|| Error::Protocol("empty marker packet".to_string()))?;
        MarkerType::try_from(kind)
    }
}
