//! LOB (Large Object) values and piecewise transfer
//!
//! A CLOB or BLOB value is held as a [`PieceBuffer`]: an ordered list of
//! chunks plus two flags that keep SQL NULL and the explicit zero-length
//! value apart. Values are built through a [`PieceSink`] and read back
//! through a [`PieceSource`]; a source always starts at the first byte, so a
//! buffer can be read any number of times.

use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

/// Character or binary LOB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LobKind {
    /// Character large object (UTF-8 content)
    Clob,
    /// Binary large object
    Blob,
}

/// Chunked representation of a LOB value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PieceBuffer {
    chunks: Vec<Bytes>,
    is_null: bool,
    is_empty_sentinel: bool,
}

impl PieceBuffer {
    /// SQL NULL
    pub fn null() -> Self {
        Self {
            chunks: Vec::new(),
            is_null: true,
            is_empty_sentinel: false,
        }
    }

    /// Explicit zero-length value
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            is_null: false,
            is_empty_sentinel: true,
        }
    }

    /// Split `data` into chunks of at most `piece_size` bytes
    pub fn from_bytes(data: impl Into<Bytes>, piece_size: usize) -> Self {
        let data: Bytes = data.into();
        if data.is_empty() {
            return Self::empty();
        }
        let piece_size = piece_size.max(1);
        let mut chunks = Vec::with_capacity(data.len().div_ceil(piece_size));
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + piece_size).min(data.len());
            chunks.push(data.slice(offset..end));
            offset = end;
        }
        Self {
            chunks,
            is_null: false,
            is_empty_sentinel: false,
        }
    }

    /// Build from chunks received in order. No chunks means the empty value.
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        let chunks: Vec<Bytes> = chunks.into_iter().filter(|c| !c.is_empty()).collect();
        if chunks.is_empty() {
            return Self::empty();
        }
        Self {
            chunks,
            is_null: false,
            is_empty_sentinel: false,
        }
    }

    /// Check for SQL NULL
    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// Check for the explicit zero-length value
    pub fn is_empty_sentinel(&self) -> bool {
        self.is_empty_sentinel
    }

    /// Total length in bytes
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Check if no content bytes are held (NULL or empty)
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks in emission order
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Concatenate all chunks
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks[0].clone(),
            _ => {
                let mut out = BytesMut::with_capacity(self.len());
                for chunk in &self.chunks {
                    out.extend_from_slice(chunk);
                }
                out.freeze()
            }
        }
    }

    /// Decode the content as UTF-8
    pub fn to_text(&self) -> Result<String> {
        String::from_utf8(self.to_bytes().to_vec())
            .map_err(|e| Error::conversion("String", format!("CLOB with invalid UTF-8: {}", e)))
    }

    /// Re-split the content into pieces of at most `piece_size` bytes
    pub fn pieces(&self, piece_size: usize) -> Vec<Bytes> {
        if self.chunks.iter().all(|c| c.len() <= piece_size) {
            return self.chunks.clone();
        }
        Self::from_bytes(self.to_bytes(), piece_size).chunks
    }

    /// Start building a value; [`PieceSink::finish`] yields the buffer
    pub fn open_write(piece_size: usize) -> PieceSink {
        PieceSink::new(piece_size)
    }

    /// Open a fresh reader positioned at the first byte
    pub fn open_read(&self) -> PieceSource {
        PieceSource::new(Arc::new(self.chunks.clone()))
    }
}

/// Writer that accumulates bytes into bounded chunks
#[derive(Debug)]
pub struct PieceSink {
    piece_size: usize,
    chunks: Vec<Bytes>,
    current: BytesMut,
}

impl PieceSink {
    /// Create a sink that seals a chunk every `piece_size` bytes
    pub fn new(piece_size: usize) -> Self {
        let piece_size = piece_size.max(1);
        Self {
            piece_size,
            chunks: Vec::new(),
            current: BytesMut::with_capacity(piece_size),
        }
    }

    /// Append UTF-8 text
    pub fn write_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = self.piece_size - self.current.len();
            let take = room.min(data.len());
            self.current.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.current.len() == self.piece_size {
                self.seal();
            }
        }
    }

    fn seal(&mut self) {
        if !self.current.is_empty() {
            let chunk = self.current.split().freeze();
            self.chunks.push(chunk);
        }
    }

    /// Seal the sink. Writing nothing yields the explicit empty value.
    pub fn finish(mut self) -> PieceBuffer {
        self.seal();
        PieceBuffer::from_chunks(self.chunks)
    }
}

impl Write for PieceSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    /// Seals the partially filled chunk
    fn flush(&mut self) -> io::Result<()> {
        self.seal();
        Ok(())
    }
}

/// Single-pass reader over a LOB's chunks
#[derive(Debug, Clone)]
pub struct PieceSource {
    chunks: Arc<Vec<Bytes>>,
    index: usize,
    offset: usize,
}

impl PieceSource {
    fn new(chunks: Arc<Vec<Bytes>>) -> Self {
        Self {
            chunks,
            index: 0,
            offset: 0,
        }
    }

    /// Take the rest of the current chunk, or the next one
    pub fn next_piece(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.get(self.index)?;
        let piece = chunk.slice(self.offset..);
        self.index += 1;
        self.offset = 0;
        Some(piece)
    }

    /// Read everything that is left as UTF-8
    pub fn read_to_text(&mut self) -> Result<String> {
        let mut out = String::new();
        self.read_to_string(&mut out)
            .map_err(|e| Error::conversion("String", e))?;
        Ok(out)
    }
}

impl Read for PieceSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some(chunk) = self.chunks.get(self.index) {
            if self.offset < chunk.len() {
                let n = buf.len().min(chunk.len() - self.offset);
                buf[..n].copy_from_slice(&chunk[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            self.index += 1;
            self.offset = 0;
        }
        Ok(0)
    }
}

/// In-memory LOB handle.
///
/// Cloning shares the content. Every bind or read opens a new
/// [`PieceSource`], so one handle may be bound to several slots or
/// executions and is re-read from the start each time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lob {
    kind: LobKind,
    content: Arc<PieceBuffer>,
}

impl Lob {
    /// Wrap an existing buffer
    pub fn new(kind: LobKind, content: PieceBuffer) -> Self {
        Self {
            kind,
            content: Arc::new(content),
        }
    }

    /// Character LOB from text
    pub fn clob(text: impl Into<String>, piece_size: usize) -> Self {
        Self::new(LobKind::Clob, PieceBuffer::from_bytes(text.into(), piece_size))
    }

    /// Binary LOB from bytes
    pub fn blob(data: impl Into<Bytes>, piece_size: usize) -> Self {
        Self::new(LobKind::Blob, PieceBuffer::from_bytes(data, piece_size))
    }

    /// Drain a reader into a LOB
    pub fn from_reader(kind: LobKind, mut reader: impl Read, piece_size: usize) -> Result<Self> {
        let mut sink = PieceSink::new(piece_size);
        io::copy(&mut reader, &mut sink)?;
        Ok(Self::new(kind, sink.finish()))
    }

    /// LOB kind
    pub fn kind(&self) -> LobKind {
        self.kind
    }

    /// Shared content
    pub fn content(&self) -> &PieceBuffer {
        &self.content
    }

    /// Content length in bytes
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Check for zero length
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Open a fresh reader at the start of the content
    pub fn open_read(&self) -> PieceSource {
        self.content.open_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_empty_are_distinct() {
        let null = PieceBuffer::null();
        let empty = PieceBuffer::empty();
        assert!(null.is_null() && !null.is_empty_sentinel());
        assert!(empty.is_empty_sentinel() && !empty.is_null());
        assert_ne!(null, empty);
        assert_eq!(PieceBuffer::from_bytes(Vec::<u8>::new(), 8), empty);
    }

    #[test]
    fn test_chunking_preserves_order() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let buf = PieceBuffer::from_bytes(data.clone(), 64);
        assert_eq!(buf.chunks().len(), 16);
        assert!(buf.chunks().iter().all(|c| c.len() <= 64));
        assert_eq!(buf.to_bytes().to_vec(), data);
    }

    #[test]
    fn test_sink_seals_at_piece_size() {
        let mut sink = PieceSink::new(4);
        sink.write_all(b"abcdefghij").unwrap();
        let buf = sink.finish();
        let sizes: Vec<usize> = buf.chunks().iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_sink_flush_keeps_emission_order() {
        let mut sink = PieceBuffer::open_write(8);
        sink.write_str("ab");
        sink.flush().unwrap();
        sink.write_str("cd");
        let buf = sink.finish();
        assert_eq!(buf.chunks().len(), 2);
        assert_eq!(buf.to_text().unwrap(), "abcd");
    }

    #[test]
    fn test_empty_sink_is_empty_value() {
        assert!(PieceSink::new(8).finish().is_empty_sentinel());
    }

    #[test]
    fn test_source_is_reopenable() {
        let lob = Lob::clob("héllo wörld, 你好", 3);
        let first = lob.open_read().read_to_text().unwrap();
        let second = lob.open_read().read_to_text().unwrap();
        assert_eq!(first, "héllo wörld, 你好");
        assert_eq!(first, second);
    }

    #[test]
    fn test_multibyte_text_across_boundaries() {
        let text = "日本語テキスト".repeat(50);
        let buf = PieceBuffer::from_bytes(text.clone(), 7);
        assert_eq!(buf.to_text().unwrap(), text);
        let mut source = buf.open_read();
        let mut small = [0u8; 5];
        let mut collected = Vec::new();
        loop {
            let n = source.read(&mut small).unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&small[..n]);
        }
        assert_eq!(String::from_utf8(collected).unwrap(), text);
    }

    #[test]
    fn test_pieces_rechunk() {
        let buf = PieceBuffer::from_bytes(vec![1u8; 100], 50);
        assert_eq!(buf.pieces(30).len(), 4);
        assert_eq!(buf.pieces(50).len(), 2);
    }
}
