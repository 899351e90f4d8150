//! In-memory writer that cuts the muxed stream into cluster-aligned chunks

use super::ebml::ids;
use super::MkvWriter;
use crate::error::{Error, Result};
use bytes::Bytes;
use tracing::trace;

/// Growable buffer of muxed bytes with a chunk boundary.
///
/// The boundary moves to the current buffered length whenever a Cluster is
/// about to start, so the bytes before it always end on a cluster edge. The
/// first chunk holds the EBML header, the Segment header, Info and Tracks;
/// every later chunk is exactly one Cluster.
#[derive(Debug, Default)]
pub struct ChunkBoundaryBuffer {
    buffer: Vec<u8>,
    bytes_written: u64,
    chunk_end: usize,
}

impl ChunkBoundaryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes ever written
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Bytes written but not drained yet
    pub fn bytes_buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Length of the complete chunk waiting at the front, if any
    pub fn chunk_ready(&self) -> Option<usize> {
        (self.chunk_end > 0).then_some(self.chunk_end)
    }

    /// Copy the ready chunk into `out` and drop it from the buffer.
    ///
    /// Nothing changes when no chunk is ready or `out` is too small.
    pub fn read_chunk(&mut self, out: &mut [u8]) -> Result<usize> {
        let len = self.chunk_ready().ok_or(Error::NoChunkReady)?;
        if out.len() < len {
            return Err(Error::BufferTooSmall {
                need: len,
                have: out.len(),
            });
        }
        out[..len].copy_from_slice(&self.buffer[..len]);
        self.erase_chunk();
        Ok(len)
    }

    /// Move the ready chunk out of the buffer
    pub fn take_chunk(&mut self) -> Option<Bytes> {
        let len = self.chunk_ready()?;
        let chunk: Vec<u8> = self.buffer[..len].to_vec();
        self.erase_chunk();
        Some(Bytes::from(chunk))
    }

    fn erase_chunk(&mut self) {
        let len = self.chunk_end;
        self.buffer.drain(..len);
        self.chunk_end = 0;
        trace!(len, buffered = self.buffer.len(), "chunk drained");
    }

    /// Mark everything buffered as one chunk
    pub(crate) fn close_chunk(&mut self) {
        self.chunk_end = self.buffer.len();
    }
}

impl MkvWriter for ChunkBoundaryBuffer {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::invalid_input("empty write"));
        }
        self.buffer.try_reserve(buf.len())?;
        self.buffer.extend_from_slice(buf);
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.bytes_written
    }

    fn element_start_notify(&mut self, element_id: u32, position: u64) {
        if element_id == ids::CLUSTER {
            self.close_chunk();
            trace!(position, chunk_end = self.chunk_end, "cluster boundary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_chunk_until_cluster_start() {
        let mut buffer = ChunkBoundaryBuffer::new();
        buffer.write(b"header").unwrap();
        assert_eq!(buffer.chunk_ready(), None);
        assert!(matches!(
            buffer.read_chunk(&mut [0u8; 16]),
            Err(Error::NoChunkReady)
        ));

        buffer.element_start_notify(ids::TRACKS, 6);
        assert_eq!(buffer.chunk_ready(), None);

        buffer.element_start_notify(ids::CLUSTER, 6);
        assert_eq!(buffer.chunk_ready(), Some(6));
    }

    #[test]
    fn test_read_chunk_drains_prefix() {
        let mut buffer = ChunkBoundaryBuffer::new();
        buffer.write(b"abc").unwrap();
        buffer.element_start_notify(ids::CLUSTER, 3);
        buffer.write(b"defg").unwrap();

        let mut out = [0u8; 8];
        assert_eq!(buffer.read_chunk(&mut out).unwrap(), 3);
        assert_eq!(&out[..3], b"abc");
        assert_eq!(buffer.chunk_ready(), None);
        assert_eq!(buffer.bytes_buffered(), 4);
        assert_eq!(buffer.bytes_written(), 7);
        assert_eq!(buffer.position(), 7);
    }

    #[test]
    fn test_small_buffer_leaves_state_untouched() {
        let mut buffer = ChunkBoundaryBuffer::new();
        buffer.write(b"0123456789").unwrap();
        buffer.element_start_notify(ids::CLUSTER, 10);

        let mut out = [0u8; 4];
        assert!(matches!(
            buffer.read_chunk(&mut out),
            Err(Error::BufferTooSmall { need: 10, have: 4 })
        ));
        assert_eq!(buffer.chunk_ready(), Some(10));
        assert_eq!(buffer.bytes_buffered(), 10);
    }

    #[test]
    fn test_take_chunk() {
        let mut buffer = ChunkBoundaryBuffer::new();
        assert!(buffer.take_chunk().is_none());
        buffer.write(b"xyz").unwrap();
        buffer.close_chunk();
        assert_eq!(buffer.take_chunk().unwrap(), Bytes::from_static(b"xyz"));
        assert_eq!(buffer.bytes_buffered(), 0);
    }

    #[test]
    fn test_empty_write_rejected() {
        let mut buffer = ChunkBoundaryBuffer::new();
        assert!(buffer.write(&[]).is_err());
        assert_eq!(buffer.bytes_written(), 0);
    }
}
