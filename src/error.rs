//! Error types for webm-live

use std::collections::TryReserveError;
use std::fmt;
use thiserror::Error;

/// Result type alias for webm-live operations
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of media track a muxer error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Video track
    Video,
    /// Audio track
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Main error type for webm-live
///
/// "Need more data" is deliberately absent: running out of buffered input is
/// reported through return values, never through `Err`.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unparseable container structure
    #[error("Format error: {0}")]
    Format(String),

    /// Caller passed arguments that violate an API contract
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Caller buffer cannot hold the ready chunk
    #[error("Buffer too small: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// No complete chunk is buffered
    #[error("No chunk ready")]
    NoChunkReady,

    /// The track of this kind was already added
    #[error("{0} track already exists")]
    TrackExists(TrackKind),

    /// No track of this kind was added
    #[error("No {0} track")]
    NoTrack(TrackKind),

    /// The muxing session rejected track parameters
    #[error("Track error: {0}")]
    Track(String),

    /// The muxing session rejected a frame
    #[error("Write error: {0}")]
    Write(String),

    /// Muxing session failure
    #[error("Muxer error: {0}")]
    Muxer(String),

    /// Allocation failed while growing a buffer
    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),

    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

impl Error {
    /// Create a format error
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Error::Format(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create a track error
    pub fn track<S: Into<String>>(msg: S) -> Self {
        Error::Track(msg.into())
    }

    /// Create a write error
    pub fn write<S: Into<String>>(msg: S) -> Self {
        Error::Write(msg.into())
    }

    /// Create a muxer error
    pub fn muxer<S: Into<String>>(msg: S) -> Self {
        Error::Muxer(msg.into())
    }

    /// True for errors caused by the caller misusing the API rather than by
    /// the stream contents.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::InvalidState(_)
                | Error::BufferTooSmall { .. }
                | Error::NoChunkReady
                | Error::TrackExists(_)
                | Error::NoTrack(_)
        )
    }
}
