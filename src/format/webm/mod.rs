//! WebM/Matroska format support
//!
//! The reader side parses a WebM byte stream that arrives in pieces, the
//! writer side emits a WebM stream and cuts it into cluster-aligned chunks.
//! Both sides talk to the container code through two small seams:
//! [`MkvReader`] for positioned reads and [`MkvWriter`] for sequential
//! writes with element-start notifications.

use crate::error::{Error, Result};

/// Outcome of an operation that may run out of buffered input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status<T> {
    /// The operation completed
    Ready(T),
    /// Not enough bytes are buffered yet; retry after feeding more
    NeedMoreData,
}

impl<T> Status<T> {
    /// Completed value, if any
    pub fn ready(self) -> Option<T> {
        match self {
            Status::Ready(value) => Some(value),
            Status::NeedMoreData => None,
        }
    }

    pub fn is_need_more_data(&self) -> bool {
        matches!(self, Status::NeedMoreData)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Status<U> {
        match self {
            Status::Ready(value) => Status::Ready(f(value)),
            Status::NeedMoreData => Status::NeedMoreData,
        }
    }
}

/// Unwrap a `Result<Status<T>>`, returning early on errors and on
/// `NeedMoreData`.
macro_rules! try_ready {
    ($expr:expr) => {
        match $expr? {
            $crate::format::webm::Status::Ready(value) => value,
            $crate::format::webm::Status::NeedMoreData => {
                return Ok($crate::format::webm::Status::NeedMoreData)
            }
        }
    };
}

pub mod chunk_writer;
pub mod ebml;
pub mod live_muxer;
pub mod muxer;
pub mod parser;
pub mod reader;
pub mod segment;

pub use chunk_writer::ChunkBoundaryBuffer;
pub use live_muxer::{LiveMuxer, LiveMuxerConfig};
pub use muxer::{FileWriter, MuxMode, MuxTrack, SegmentMuxer, SegmentSettings, TrackMedia};
pub use parser::{Gated, IncrementalParser, Parsed, ParserState, TrackStats};
pub use reader::ByteWindow;
pub use segment::{
    Block, Cluster, Colour, Cues, EbmlHeader, MasteringMetadata, Segment, SegmentInfo, Track,
    TrackType, Tracks,
};

/// Total and currently available stream length as seen by a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLength {
    /// End of the stream, once known
    pub total: Option<u64>,
    /// One past the last stream offset that can be read right now
    pub available: u64,
}

/// Positioned reads over a stream that may only be partially buffered
pub trait MkvReader {
    /// Fill `buf` with the bytes starting at absolute stream `offset`.
    ///
    /// Returns `NeedMoreData` when any requested byte is not buffered.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<Status<()>>;

    /// Current length information
    fn length(&self) -> StreamLength;
}

/// Sequential sink for muxed WebM bytes
pub trait MkvWriter {
    /// Append `buf` at the current position
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Absolute position of the next byte written
    fn position(&self) -> u64;

    /// Whether `set_position` is supported
    fn seekable(&self) -> bool {
        false
    }

    /// Move the write position, for back-patching sizes
    fn set_position(&mut self, _position: u64) -> Result<()> {
        Err(Error::unsupported("writer is not seekable"))
    }

    /// Called just before a top-level element is written at `position`
    fn element_start_notify(&mut self, _element_id: u32, _position: u64) {}
}
