//! webm-live - incremental WebM parsing and live chunked muxing
//!
//! The crate works on caller-owned buffers and never blocks on I/O:
//!
//! - [`IncrementalParser`] accepts a WebM stream in arbitrary pieces and
//!   reports how many bytes each call consumed. Header values become
//!   available once the parser reaches the cluster phase, per-track
//!   aggregates and cues once it is done.
//! - [`LiveMuxer`] takes timestamped audio/video frames and emits a live
//!   WebM stream as cluster-aligned chunks: first the headers, then one
//!   chunk per Cluster.
//!
//! # Architecture
//!
//! - `format::webm::ebml`: EBML variable-length integers and element codec
//! - `format::webm::reader`: [`ByteWindow`], a read view over the bytes
//!   buffered so far
//! - `format::webm::segment`: EBML header, Segment, Tracks, Cluster, Cues
//! - `format::webm::parser`: the resumable parser state machine
//! - `format::webm::muxer`: the segment muxer (live and file modes)
//! - `format::webm::chunk_writer`: [`ChunkBoundaryBuffer`]
//! - `format::webm::live_muxer`: the [`LiveMuxer`] facade

pub mod error;
pub mod format;

pub use error::{Error, Result, TrackKind};
pub use format::webm::{
    ByteWindow, ChunkBoundaryBuffer, Colour, Gated, IncrementalParser, LiveMuxer, LiveMuxerConfig,
    MkvReader, MkvWriter, Parsed, ParserState, SegmentMuxer, SegmentSettings, Status,
};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Library configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

/// Initialize the library with the given configuration.
///
/// Installs a global `tracing` subscriber when `verbose` or `debug` is set.
/// `RUST_LOG` overrides the default level. Installing a second subscriber
/// fails with [`Error::Init`].
pub fn init(config: Config) -> Result<()> {
    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| Error::Init(format!("Failed to install subscriber: {}", e)))?;
    }

    Ok(())
}
