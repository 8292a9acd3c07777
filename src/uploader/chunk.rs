//! Chunk slicing with streaming support

use crate::uploader::planner::{self, PlanError};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, BufReader, ReadBuf, SeekFrom, Take};
use tokio_util::io::ReaderStream;

/// Metadata about a single chunk (without the data)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Chunk index
    pub index: u64,
    /// Byte offset in file
    pub offset: u64,
    /// Chunk length in bytes
    pub size: u64,
}

impl ChunkInfo {
    /// Create new chunk info
    pub fn new(index: u64, offset: u64, size: u64) -> Self {
        Self {
            index,
            offset,
            size,
        }
    }

    /// Plan chunk `index` of a file
    pub fn plan(index: u64, file_size: u64, chunk_size: u64) -> Result<Self, PlanError> {
        let (start, end) = planner::chunk_range(index, file_size, chunk_size)?;
        Ok(Self::new(index, start, end - start))
    }

    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Buffer size for streaming reads (64KB)
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// A limited async reader that reads only a specific range from a file
pub struct ChunkReader {
    inner: Take<BufReader<File>>,
    size: u64,
}

impl ChunkReader {
    /// Create a new chunk reader for a specific byte range
    pub async fn new(path: &Path, offset: u64, size: u64) -> io::Result<Self> {
        let file = File::open(path).await?;
        let mut reader = BufReader::with_capacity(STREAM_BUFFER_SIZE, file);
        reader.seek(SeekFrom::Start(offset)).await?;

        Ok(Self {
            inner: reader.take(size),
            size,
        })
    }

    /// Get the total size of this chunk
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // Take<BufReader<File>> is Unpin
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// A stream that yields chunks of bytes from a ChunkReader.
/// Uses tokio_util's ReaderStream internally for simplicity.
pub struct ChunkStream {
    inner: ReaderStream<ChunkReader>,
    size: u64,
}

impl ChunkStream {
    /// Create a new chunk stream from a reader
    pub fn new(reader: ChunkReader) -> Self {
        let size = reader.size();
        Self {
            inner: ReaderStream::with_capacity(reader, STREAM_BUFFER_SIZE),
            size,
        }
    }

    /// Create a chunk stream from file path and chunk info
    pub async fn from_chunk(path: &Path, chunk: &ChunkInfo) -> io::Result<Self> {
        let reader = ChunkReader::new(path, chunk.offset, chunk.size).await?;
        Ok(Self::new(reader))
    }

    /// Expected number of bytes this stream yields
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Drain the stream into memory. Fails if the file ended before the chunk did.
    pub async fn read_all(mut self) -> io::Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size as usize);
        while let Some(piece) = self.next().await {
            buf.extend_from_slice(&piece?);
        }
        if buf.len() as u64 != self.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, read {}", self.size, buf.len()),
            ));
        }
        Ok(buf.freeze())
    }
}

impl Stream for ChunkStream {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
