//! Transport layer
//!
//! The driver talks to an already-established byte stream. The stream is
//! split into a reading half and a writing half so that an interrupt marker
//! can be written while another task is blocked waiting for a response.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::constants::{MarkerType, PACKET_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketHeader};

/// Receiving side of a transport
#[async_trait::async_trait]
pub trait PacketReader: Send {
    /// Receive one complete packet
    async fn receive_packet(&mut self) -> Result<Packet>;
}

/// Sending side of a transport
#[async_trait::async_trait]
pub trait PacketWriter: Send {
    /// Send one packet and flush
    async fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Shut down the write side
    async fn close(&mut self) -> Result<()>;

    /// Wrap `payload` in a data packet and send it
    async fn send_data(&mut self, payload: Bytes) -> Result<()> {
        let packet = Packet::data(payload)?;
        self.send_packet(&packet).await
    }

    /// Send a marker packet
    async fn send_marker(&mut self, kind: MarkerType) -> Result<()> {
        let packet = Packet::marker(kind)?;
        self.send_packet(&packet).await
    }
}

/// Packet reader over any async byte source
///
/// Bytes are buffered until a whole packet is present, so a receive that is
/// dropped part way loses nothing and the next call resumes the same packet.
pub struct FramedReader<R> {
    inner: R,
    buffer: BytesMut,
}

impl<R> FramedReader<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Split one complete packet off the front of the buffer
    fn take_packet(&mut self) -> Result<Option<Packet>> {
        if self.buffer.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }
        let header = PacketHeader::parse(&self.buffer[..PACKET_HEADER_SIZE])?;
        let total = PACKET_HEADER_SIZE + header.payload_length();
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }
        let mut frame = self.buffer.split_to(total);
        let payload = frame.split_off(PACKET_HEADER_SIZE).freeze();
        Ok(Some(Packet::new(header, payload)))
    }
}

/// Packet writer over any async byte sink
pub struct FramedWriter<W> {
    inner: W,
    closed: bool,
}

impl<W> FramedWriter<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            closed: false,
        }
    }
}

/// Split a stream into framed halves
pub fn split<S>(stream: S) -> (FramedReader<ReadHalf<S>>, FramedWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    (FramedReader::new(read), FramedWriter::new(write))
}

fn map_read_error(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionLost("server closed the connection".to_string())
    } else {
        Error::Io(e)
    }
}

#[async_trait::async_trait]
impl<R> PacketReader for FramedReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn receive_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.take_packet()? {
                return Ok(packet);
            }
            let n = self
                .inner
                .read_buf(&mut self.buffer)
                .await
                .map_err(map_read_error)?;
            if n == 0 {
                return Err(Error::ConnectionLost(
                    "server closed the connection".to_string(),
                ));
            }
        }
    }
}

#[async_trait::async_trait]
impl<W> PacketWriter for FramedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let bytes = packet.to_bytes()?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.inner.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut writer) = split(client);
        let (mut reader, _) = split(server);

        writer.send_data(Bytes::from_static(b"hello")).await.unwrap();
        writer.send_marker(MarkerType::Interrupt).await.unwrap();

        let data = reader.receive_packet().await.unwrap();
        assert!(data.is_data());
        assert_eq!(&data.payload[..], b"hello");

        let marker = reader.receive_packet().await.unwrap();
        assert_eq!(marker.marker_type().unwrap(), MarkerType::Interrupt);
    }

    #[tokio::test]
    async fn test_dropped_receive_resumes_packet() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut writer) = split(client);
        let (mut reader, _) = split(server);

        let packet = Packet::data(Bytes::from_static(b"split payload")).unwrap();
        let bytes = packet.to_bytes().unwrap();
        let (head, tail) = bytes.split_at(10);
        writer.inner.write_all(head).await.unwrap();
        writer.inner.flush().await.unwrap();

        let partial = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            reader.receive_packet(),
        )
        .await;
        assert!(partial.is_err());

        writer.inner.write_all(tail).await.unwrap();
        writer.inner.flush().await.unwrap();
        let received = reader.receive_packet().await.unwrap();
        assert_eq!(&received.payload[..], b"split payload");
    }

    #[tokio::test]
    async fn test_eof_is_connection_lost() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let (mut reader, _) = split(client);
        let err = reader.receive_packet().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (client, _server) = tokio::io::duplex(64);
        let (_, mut writer) = split(client);
        writer.close().await.unwrap();
        assert!(matches!(
            writer.send_data(Bytes::new()).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
