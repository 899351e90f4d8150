//! Live WebM muxer producing cluster-aligned chunks
//!
//! [`LiveMuxer`] accepts at most one audio and one video track, writes frames
//! in live mode into a [`ChunkBoundaryBuffer`], and hands the output back as
//! chunks: first the stream headers, then one chunk per Cluster. Each chunk
//! can be sent or stored on its own, e.g. as a DASH or HLS segment.

use super::chunk_writer::ChunkBoundaryBuffer;
use super::ebml::ids;
use super::muxer::{SegmentMuxer, SegmentSettings};
use super::segment::Colour;
use super::MkvWriter;
use crate::error::{Error, Result, TrackKind};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Options applied when the muxer is initialized
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMuxerConfig {
    pub muxing_app: String,
    pub writing_app: String,
    /// Cut clusters at this span even without a video keyframe
    pub max_cluster_duration: Option<Duration>,
    /// Append Cues when finalized
    pub output_cues: bool,
}

impl Default for LiveMuxerConfig {
    fn default() -> Self {
        let settings = SegmentSettings::live();
        LiveMuxerConfig {
            muxing_app: settings.muxing_app,
            writing_app: "webm-live".to_string(),
            max_cluster_duration: settings.max_cluster_duration,
            output_cues: settings.output_cues,
        }
    }
}

/// Live WebM muxer with chunked output
#[derive(Debug, Default)]
pub struct LiveMuxer {
    config: LiveMuxerConfig,
    session: Option<SegmentMuxer<ChunkBoundaryBuffer>>,
    audio_track: Option<u64>,
    video_track: Option<u64>,
}

impl LiveMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LiveMuxerConfig) -> Self {
        LiveMuxer {
            config,
            ..Self::default()
        }
    }

    /// Create the output buffer and the live muxing session
    pub fn init(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::invalid_state("live muxer already initialized"));
        }
        let settings = SegmentSettings {
            muxing_app: self.config.muxing_app.clone(),
            writing_app: self.config.writing_app.clone(),
            max_cluster_duration: self.config.max_cluster_duration,
            output_cues: self.config.output_cues,
            ..SegmentSettings::live()
        };
        self.session = Some(SegmentMuxer::new(ChunkBoundaryBuffer::new(), settings)?);
        debug!(writing_app = %self.config.writing_app, "live muxer initialized");
        Ok(())
    }

    pub fn initialized(&self) -> bool {
        self.session.is_some()
    }

    fn session(&mut self) -> Result<&mut SegmentMuxer<ChunkBoundaryBuffer>> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::invalid_state("live muxer not initialized"))
    }

    fn buffer(&self) -> Option<&ChunkBoundaryBuffer> {
        self.session.as_ref().map(SegmentMuxer::writer)
    }

    /// Add the audio track with its codec private data (Vorbis headers,
    /// OpusHead, ...). Returns the track number.
    pub fn add_audio_track(
        &mut self,
        sample_rate: u32,
        channels: u16,
        codec_private: &[u8],
    ) -> Result<u64> {
        if self.audio_track.is_some() {
            return Err(Error::TrackExists(TrackKind::Audio));
        }
        if codec_private.is_empty() {
            return Err(Error::track("audio codec private data is required"));
        }
        let session = self.session()?;
        let track = session.add_audio_track(sample_rate as f64, channels as u64)?;
        session.set_codec_private(track, codec_private)?;
        self.audio_track = Some(track);
        Ok(track)
    }

    /// Add the audio track with an explicit codec ID such as `A_OPUS`
    pub fn add_audio_track_with_codec(
        &mut self,
        sample_rate: u32,
        channels: u16,
        codec_private: &[u8],
        codec_id: &str,
    ) -> Result<u64> {
        if codec_id.is_empty() {
            return Err(Error::track("audio codec id must not be empty"));
        }
        let track = self.add_audio_track(sample_rate, channels, codec_private)?;
        self.session()?.set_codec_id(track, codec_id)?;
        Ok(track)
    }

    /// Add the video track. Returns the track number.
    pub fn add_video_track(&mut self, width: u32, height: u32) -> Result<u64> {
        if self.video_track.is_some() {
            return Err(Error::TrackExists(TrackKind::Video));
        }
        let track = self
            .session()?
            .add_video_track(width as u64, height as u64)?;
        self.video_track = Some(track);
        Ok(track)
    }

    /// Add the video track with an explicit codec ID such as `V_VP9`
    pub fn add_video_track_with_codec(
        &mut self,
        width: u32,
        height: u32,
        codec_id: &str,
    ) -> Result<u64> {
        if codec_id.is_empty() {
            return Err(Error::track("video codec id must not be empty"));
        }
        let track = self.add_video_track(width, height)?;
        self.session()?.set_codec_id(track, codec_id)?;
        Ok(track)
    }

    /// Add the video track with a codec ID and Colour metadata (HDR
    /// transfer, primaries, mastering display)
    pub fn add_video_track_with_colour(
        &mut self,
        width: u32,
        height: u32,
        codec_id: &str,
        colour: &Colour,
    ) -> Result<u64> {
        let track = self.add_video_track_with_codec(width, height, codec_id)?;
        self.session()?.set_colour(track, colour)?;
        Ok(track)
    }

    /// Mark `track` as encrypted with the given key ID
    pub fn add_content_enc_key_id(&mut self, track: u64, key_id: &[u8]) -> Result<()> {
        self.session()?.set_content_enc_key_id(track, key_id)
    }

    pub fn set_muxing_app(&mut self, app: &str) -> Result<()> {
        self.session()?.set_muxing_app(app)?;
        self.config.muxing_app = app.to_string();
        Ok(())
    }

    pub fn set_writing_app(&mut self, app: &str) -> Result<()> {
        self.session()?.set_writing_app(app)?;
        self.config.writing_app = app.to_string();
        Ok(())
    }

    pub fn audio_track(&self) -> Option<u64> {
        self.audio_track
    }

    pub fn video_track(&self) -> Option<u64> {
        self.video_track
    }

    pub fn write_audio_frame(&mut self, data: &[u8], timestamp_ns: u64, is_key: bool) -> Result<()> {
        let track = self.audio_track.ok_or(Error::NoTrack(TrackKind::Audio))?;
        self.write_frame(data, timestamp_ns, track, is_key)
    }

    pub fn write_video_frame(&mut self, data: &[u8], timestamp_ns: u64, is_key: bool) -> Result<()> {
        let track = self.video_track.ok_or(Error::NoTrack(TrackKind::Video))?;
        self.write_frame(data, timestamp_ns, track, is_key)
    }

    fn write_frame(&mut self, data: &[u8], timestamp_ns: u64, track: u64, is_key: bool) -> Result<()> {
        self.session()?.write_frame(data, track, timestamp_ns, is_key)
    }

    /// Length of the complete chunk waiting to be read, if any
    pub fn chunk_ready(&self) -> Option<usize> {
        self.buffer().and_then(ChunkBoundaryBuffer::chunk_ready)
    }

    /// Copy the ready chunk into `out` and drop it from the buffer.
    ///
    /// Fails with [`Error::NoChunkReady`] or [`Error::BufferTooSmall`]
    /// without changing anything.
    pub fn read_chunk(&mut self, out: &mut [u8]) -> Result<usize> {
        match self.session.as_mut() {
            Some(session) => session.writer_mut().read_chunk(out),
            None => Err(Error::NoChunkReady),
        }
    }

    /// Move the ready chunk out of the buffer
    pub fn take_chunk(&mut self) -> Option<Bytes> {
        self.session.as_mut()?.writer_mut().take_chunk()
    }

    /// Finish the stream. Whatever is still buffered becomes the last chunk.
    pub fn finalize(&mut self) -> Result<()> {
        let session = self.session()?;
        session.finalize()?;
        let buffer = session.writer_mut();
        if buffer.bytes_buffered() > 0 {
            let position = buffer.position();
            buffer.element_start_notify(ids::CLUSTER, position);
        }
        debug!(bytes_written = buffer.bytes_written(), "live muxer finalized");
        Ok(())
    }

    /// Total bytes produced so far, drained or not
    pub fn bytes_written(&self) -> u64 {
        self.buffer().map_or(0, ChunkBoundaryBuffer::bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPUS_HEAD: &[u8] = b"OpusHead\x01\x02\x38\x01\x80\xbb\x00\x00\x00\x00\x00";

    fn initialized() -> LiveMuxer {
        let mut muxer = LiveMuxer::new();
        muxer.init().unwrap();
        muxer
    }

    #[test]
    fn test_requires_init() {
        let mut muxer = LiveMuxer::new();
        assert!(!muxer.initialized());
        assert!(matches!(muxer.add_video_track(640, 480), Err(Error::InvalidState(_))));
        assert_eq!(muxer.chunk_ready(), None);
        assert_eq!(muxer.bytes_written(), 0);
        assert!(matches!(muxer.read_chunk(&mut [0u8; 4]), Err(Error::NoChunkReady)));

        muxer.init().unwrap();
        assert!(muxer.initialized());
        assert!(muxer.init().is_err());
    }

    #[test]
    fn test_second_track_of_a_kind_fails() {
        let mut muxer = initialized();
        assert_eq!(muxer.add_video_track(640, 480).unwrap(), 1);
        assert!(matches!(
            muxer.add_video_track(640, 480),
            Err(Error::TrackExists(TrackKind::Video))
        ));
        assert_eq!(muxer.add_audio_track(48000, 2, OPUS_HEAD).unwrap(), 2);
        assert!(matches!(
            muxer.add_audio_track(48000, 2, OPUS_HEAD),
            Err(Error::TrackExists(TrackKind::Audio))
        ));
    }

    #[test]
    fn test_rejected_track_parameters_are_track_errors() {
        let mut muxer = initialized();
        assert!(matches!(muxer.add_video_track(0, 480), Err(Error::Track(_))));
        assert!(matches!(muxer.add_audio_track(48000, 2, &[]), Err(Error::Track(_))));
        assert!(matches!(
            muxer.add_video_track_with_codec(640, 480, ""),
            Err(Error::Track(_))
        ));
        assert_eq!(muxer.video_track(), None);
        assert_eq!(muxer.add_video_track_with_codec(640, 480, "V_VP9").unwrap(), 1);
    }

    #[test]
    fn test_frame_without_track() {
        let mut muxer = initialized();
        assert!(matches!(
            muxer.write_audio_frame(&[1], 0, true),
            Err(Error::NoTrack(TrackKind::Audio))
        ));
        assert!(matches!(
            muxer.write_video_frame(&[1], 0, true),
            Err(Error::NoTrack(TrackKind::Video))
        ));
    }

    #[test]
    fn test_finalize_flushes_tail() {
        let mut muxer = initialized();
        muxer.add_video_track(320, 240).unwrap();
        muxer.write_video_frame(&[0xAB; 100], 0, true).unwrap();
        let headers = muxer.take_chunk().unwrap();
        assert!(!headers.is_empty());
        assert_eq!(muxer.chunk_ready(), None);

        muxer.finalize().unwrap();
        let tail = muxer.take_chunk().unwrap();
        assert_eq!(headers.len() + tail.len(), muxer.bytes_written() as usize);
        assert_eq!(muxer.chunk_ready(), None);
    }
}
