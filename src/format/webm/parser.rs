//! Incremental WebM parser
//!
//! [`IncrementalParser`] is fed the caller's unconsumed bytes on every call
//! and reports how many leading bytes formed one complete top-level unit:
//! the whole header group (everything before the first Cluster) or a single
//! Cluster. The caller drops exactly that many bytes and feeds the rest,
//! plus whatever arrived since, on the next call.
//!
//! ```no_run
//! use webm_live::{IncrementalParser, ParserState};
//!
//! # fn run(mut incoming: impl FnMut() -> Option<Vec<u8>>) -> webm_live::Result<()> {
//! let mut parser = IncrementalParser::new();
//! let mut buffer = Vec::new();
//! while let Some(bytes) = incoming() {
//!     buffer.extend_from_slice(&bytes);
//!     loop {
//!         let parsed = parser.parse_next(&buffer)?;
//!         buffer.drain(..parsed.consumed);
//!         if parsed.consumed == 0 || parsed.state == ParserState::Done {
//!             break;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use super::reader::{set_end_position, ByteWindow};
use super::segment::{
    Cluster, ClusterHandle, ClusterStep, Cues, EbmlHeader, LoadCluster, Segment, SegmentInfo,
    Tracks,
};
use super::{MkvReader, Status, StreamLength};
use crate::error::{Error, Result, TrackKind};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Parser lifecycle. `Error` is terminal; the others only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserState {
    ParsingHeader,
    ParsingClusters,
    Done,
    Error,
}

impl ParserState {
    fn rank(self) -> Option<u8> {
        match self {
            ParserState::ParsingHeader => Some(0),
            ParserState::ParsingClusters => Some(1),
            ParserState::Done => Some(2),
            ParserState::Error => None,
        }
    }

    /// Whether this state is `min` or later. `Error` reaches nothing.
    pub fn has_reached(self, min: ParserState) -> bool {
        match (self.rank(), min.rank()) {
            (Some(current), Some(min)) => current >= min,
            _ => false,
        }
    }
}

/// Result of one [`IncrementalParser::parse_next`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parsed {
    pub state: ParserState,
    /// Leading bytes of the fed buffer the caller may now discard
    pub consumed: usize,
}

/// A query answer tagged with the state it was computed in.
///
/// `ready` is false when the parser has not reached the state the query
/// needs; `value` is then a placeholder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gated<T> {
    pub value: T,
    pub state: ParserState,
    pub ready: bool,
}

impl<T> Gated<T> {
    pub fn ok(self) -> Option<T> {
        if self.ready {
            Some(self.value)
        } else {
            None
        }
    }
}

/// Running per-track counters, folded in as each cluster completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackStats {
    /// Sum of block payload sizes
    pub bytes: u64,
    /// Number of blocks
    pub frames: u64,
    pub first_timestamp_ns: Option<i64>,
}

/// Incremental WebM parser driven by caller-owned buffers
#[derive(Debug)]
pub struct IncrementalParser {
    state: ParserState,
    ebml_header: Option<EbmlHeader>,
    segment: Option<Segment>,
    cluster: Option<ClusterHandle>,
    last_cluster: Option<ClusterHandle>,
    end_of_file: Option<u64>,
    total_bytes_parsed: u64,
    track_stats: BTreeMap<u64, TrackStats>,
    retain_blocks: bool,
}

impl Default for IncrementalParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalParser {
    pub fn new() -> Self {
        IncrementalParser {
            state: ParserState::ParsingHeader,
            ebml_header: None,
            segment: None,
            cluster: None,
            last_cluster: None,
            end_of_file: None,
            total_bytes_parsed: 0,
            track_stats: BTreeMap::new(),
            retain_blocks: true,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Stream offset of the first byte not yet consumed
    pub fn total_bytes_parsed(&self) -> u64 {
        self.total_bytes_parsed
    }

    /// Declare the total stream length. Only the first value sticks;
    /// repeating it is accepted.
    pub fn set_end_of_file_position(&mut self, position: u64) -> Result<()> {
        set_end_position(&mut self.end_of_file, position)
    }

    pub fn end_of_file_position(&self) -> Option<u64> {
        self.end_of_file
    }

    /// Every completed cluster keeps its block list by default, so memory
    /// grows with the stream. With `false`, a cluster is trimmed to the
    /// first block of each track once the next cluster completes. Stats,
    /// cues and bitrates stay exact; [`last_cluster`] keeps every block.
    ///
    /// [`last_cluster`]: IncrementalParser::last_cluster
    pub fn set_retain_cluster_blocks(&mut self, retain: bool) {
        self.retain_blocks = retain;
    }

    /// Advance by at most one top-level unit.
    ///
    /// `buf` must hold the stream bytes starting at [`total_bytes_parsed`].
    /// `consumed` is 0 while the next unit is incomplete. An empty `buf` is
    /// accepted and only checks whether the stream has ended.
    ///
    /// A malformed stream moves the parser to [`ParserState::Error`] and
    /// every later call fails.
    ///
    /// [`total_bytes_parsed`]: IncrementalParser::total_bytes_parsed
    pub fn parse_next(&mut self, buf: &[u8]) -> Result<Parsed> {
        match self.state {
            ParserState::Error => {
                return Err(Error::invalid_state("parser stopped after an error"))
            }
            ParserState::Done => return Ok(self.parsed(0)),
            ParserState::ParsingHeader | ParserState::ParsingClusters => {}
        }

        let result = if buf.is_empty() {
            self.check_end()
        } else {
            self.parse_window(buf)
        };

        match result {
            Ok(consumed) => Ok(self.parsed(consumed)),
            Err(err) => {
                debug!(offset = self.total_bytes_parsed, error = %err, "parse failed");
                self.state = ParserState::Error;
                Err(err)
            }
        }
    }

    fn parsed(&self, consumed: usize) -> Parsed {
        Parsed {
            state: self.state,
            consumed,
        }
    }

    fn parse_window(&mut self, buf: &[u8]) -> Result<usize> {
        let mut window = ByteWindow::new(buf, self.total_bytes_parsed)?;
        if let Some(end) = self.end_of_file {
            window.set_end_of_segment_position(end)?;
        }
        let consumed = match self.state {
            ParserState::ParsingHeader => self.parse_segment_headers(&window)?,
            _ => self.parse_cluster(&window)?,
        };
        usize::try_from(consumed).map_err(|_| Error::format("element too large for this platform"))
    }

    fn check_end(&mut self) -> Result<usize> {
        if self.state != ParserState::ParsingClusters || self.cluster.is_some() {
            return Ok(0);
        }
        let length = StreamLength {
            total: self.end_of_file,
            available: self.total_bytes_parsed,
        };
        let ended = self
            .segment
            .as_ref()
            .map_or(false, |segment| segment.reached_end(self.total_bytes_parsed, length));
        if ended {
            self.finish()?;
        }
        Ok(0)
    }

    fn parse_segment_headers<R: MkvReader + ?Sized>(&mut self, reader: &R) -> Result<u64> {
        if self.segment.is_none() {
            let (header, segment_pos) = match EbmlHeader::parse(reader)? {
                Status::Ready(parsed) => parsed,
                Status::NeedMoreData => return Ok(0),
            };
            let segment = match Segment::create_instance(reader, segment_pos)? {
                Status::Ready(segment) => segment,
                Status::NeedMoreData => return Ok(0),
            };
            debug!(doc_type = %header.doc_type, "EBML header parsed");
            self.ebml_header = Some(header);
            self.segment = Some(segment);
        }

        let segment = self
            .segment
            .as_mut()
            .ok_or_else(|| Error::invalid_state("segment missing"))?;
        if segment.parse_headers(reader)?.is_need_more_data() {
            return Ok(0);
        }
        let headers_end = segment
            .headers_end()
            .ok_or_else(|| Error::invalid_state("headers parsed without an end offset"))?;

        if let Some(tracks) = segment.tracks() {
            for track in tracks.iter() {
                self.track_stats.entry(track.number).or_default();
            }
        }
        self.total_bytes_parsed = headers_end;
        self.state = ParserState::ParsingClusters;
        debug!(headers_end, "segment headers parsed");
        Ok(headers_end)
    }

    fn parse_cluster<R: MkvReader + ?Sized>(&mut self, reader: &R) -> Result<u64> {
        let segment = self
            .segment
            .as_mut()
            .ok_or_else(|| Error::invalid_state("segment missing"))?;

        let handle = match self.cluster {
            Some(handle) => handle,
            None => match segment.load_cluster(reader, self.total_bytes_parsed)? {
                Status::NeedMoreData => return Ok(0),
                Status::Ready(LoadCluster::End) => {
                    self.finish()?;
                    return Ok(0);
                }
                Status::Ready(LoadCluster::Skipped { id, len }) => {
                    trace!(id, len, "top-level element between clusters");
                    self.total_bytes_parsed += len;
                    return Ok(len);
                }
                Status::Ready(LoadCluster::Opened(handle)) => {
                    self.cluster = Some(handle);
                    handle
                }
            },
        };

        let segment_stop = segment.stop();
        let cluster = segment
            .cluster_mut(handle)
            .ok_or_else(|| Error::invalid_state("cluster handle out of range"))?;
        loop {
            match cluster.parse_next(reader, segment_stop)? {
                Status::NeedMoreData => return Ok(0),
                Status::Ready(ClusterStep::Progress) => {}
                Status::Ready(ClusterStep::Complete) => break,
            }
        }

        let size = cluster
            .element_size()
            .ok_or_else(|| Error::invalid_state("complete cluster without a size"))?;
        if cluster.element_start() + size > reader.length().available {
            return Ok(0);
        }

        fold_cluster_stats(cluster, &mut self.track_stats);
        self.cluster = None;
        let previous = self.last_cluster.replace(handle);
        if !self.retain_blocks {
            if let Some(previous) = previous.and_then(|h| segment.cluster_mut(h)) {
                previous.release_blocks();
            }
        }
        self.total_bytes_parsed += size;
        trace!(
            size,
            total_bytes_parsed = self.total_bytes_parsed,
            "cluster parsed"
        );
        Ok(size)
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(cues) = self.segment.as_mut().and_then(Segment::cues_mut) {
            cues.load_all()?;
        }
        self.state = ParserState::Done;
        debug!(total_bytes_parsed = self.total_bytes_parsed, "parsing done");
        Ok(())
    }

    fn gated<'a, T>(
        &'a self,
        min: ParserState,
        placeholder: T,
        query: impl FnOnce(&'a Self) -> T,
    ) -> Gated<T> {
        if self.state.has_reached(min) {
            Gated {
                value: query(self),
                state: self.state,
                ready: true,
            }
        } else {
            Gated {
                value: placeholder,
                state: self.state,
                ready: false,
            }
        }
    }

    pub fn ebml_header(&self) -> Option<&EbmlHeader> {
        self.ebml_header.as_ref()
    }

    pub fn segment(&self) -> Option<&Segment> {
        self.segment.as_ref()
    }

    /// Most recently completed cluster
    pub fn last_cluster(&self) -> Option<&Cluster> {
        let handle = self.last_cluster?;
        self.segment.as_ref()?.cluster(handle)
    }

    fn info(&self) -> Option<&SegmentInfo> {
        self.segment.as_ref().and_then(Segment::info)
    }

    fn tracks_ref(&self) -> Option<&Tracks> {
        self.segment.as_ref().and_then(Segment::tracks)
    }

    fn timecode_scale(&self) -> u64 {
        self.segment
            .as_ref()
            .map_or(super::segment::DEFAULT_TIMECODE_SCALE, Segment::timecode_scale)
    }

    fn duration_seconds(&self) -> f64 {
        self.info().map_or(0.0, |info| info.duration_ns() as f64 / 1e9)
    }

    fn stats_for(&self, kind: TrackKind) -> Option<&TrackStats> {
        let track = self.tracks_ref()?.first_of(kind)?;
        self.track_stats.get(&track.number)
    }

    pub fn segment_info(&self) -> Gated<Option<&SegmentInfo>> {
        self.gated(ParserState::ParsingClusters, None, Self::info)
    }

    pub fn tracks(&self) -> Gated<Option<&Tracks>> {
        self.gated(ParserState::ParsingClusters, None, Self::tracks_ref)
    }

    pub fn has_audio(&self) -> Gated<bool> {
        self.gated(ParserState::ParsingClusters, false, |p| {
            p.tracks_ref()
                .map_or(false, |t| t.first_of(TrackKind::Audio).is_some())
        })
    }

    pub fn has_video(&self) -> Gated<bool> {
        self.gated(ParserState::ParsingClusters, false, |p| {
            p.tracks_ref()
                .map_or(false, |t| t.first_of(TrackKind::Video).is_some())
        })
    }

    pub fn audio_channels(&self) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            p.tracks_ref()
                .and_then(|t| t.first_of(TrackKind::Audio))
                .and_then(|t| t.audio.as_ref())
                .map_or(0, |a| a.channels)
        })
    }

    pub fn audio_sample_rate(&self) -> Gated<f64> {
        self.gated(ParserState::ParsingClusters, 0.0, |p| {
            p.tracks_ref()
                .and_then(|t| t.first_of(TrackKind::Audio))
                .and_then(|t| t.audio.as_ref())
                .map_or(0.0, |a| a.sampling_frequency)
        })
    }

    /// Audio bit depth, 0 when not declared
    pub fn audio_sample_size(&self) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            p.tracks_ref()
                .and_then(|t| t.first_of(TrackKind::Audio))
                .and_then(|t| t.audio.as_ref())
                .and_then(|a| a.bit_depth)
                .unwrap_or(0)
        })
    }

    pub fn video_width(&self) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            p.tracks_ref()
                .and_then(|t| t.first_of(TrackKind::Video))
                .and_then(|t| t.video.as_ref())
                .map_or(0, |v| v.width)
        })
    }

    pub fn video_height(&self) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            p.tracks_ref()
                .and_then(|t| t.first_of(TrackKind::Video))
                .and_then(|t| t.video.as_ref())
                .map_or(0, |v| v.height)
        })
    }

    /// Frames per second over the whole duration
    pub fn video_frame_rate(&self) -> Gated<f64> {
        self.gated(ParserState::ParsingClusters, 0.0, |p| {
            let seconds = p.duration_seconds();
            match p.stats_for(TrackKind::Video) {
                Some(stats) if seconds > 0.0 => stats.frames as f64 / seconds,
                _ => 0.0,
            }
        })
    }

    /// Codec names of the first two tracks, comma separated
    pub fn codec(&self) -> Gated<String> {
        self.gated(ParserState::ParsingClusters, String::new(), |p| {
            p.tracks_ref().map_or_else(String::new, |tracks| {
                tracks
                    .iter()
                    .take(2)
                    .map(|t| t.codec_name().unwrap_or(t.codec_id.as_str()))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
        })
    }

    /// `audio/webm` for audio-only streams, `video/webm` otherwise
    pub fn mime_type(&self) -> Gated<String> {
        self.gated(ParserState::ParsingClusters, String::new(), |p| {
            let audio_only = p
                .tracks_ref()
                .map_or(false, |t| t.count(TrackKind::Video) == 0 && t.count(TrackKind::Audio) > 0);
            if audio_only {
                "audio/webm".to_string()
            } else {
                "video/webm".to_string()
            }
        })
    }

    /// Mime type with a `codecs` parameter, e.g. `video/webm; codecs="vp9, opus"`
    pub fn mime_type_with_codec(&self) -> Gated<String> {
        let mime = self.mime_type();
        let codec = self.codec();
        Gated {
            value: if mime.ready && !codec.value.is_empty() {
                format!("{}; codecs=\"{}\"", mime.value, codec.value)
            } else {
                mime.value
            },
            ..mime
        }
    }

    /// Declared duration in nanoseconds, 0 when absent
    pub fn duration_ns(&self) -> Gated<i64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            p.info().map_or(0, SegmentInfo::duration_ns)
        })
    }

    /// Offset of the first Segment payload byte
    pub fn segment_start_offset(&self) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            p.segment.as_ref().map_or(0, Segment::start)
        })
    }

    /// True when the stream holds exactly one audio or video track of a
    /// WebM codec
    pub fn only_one_stream(&self) -> Gated<bool> {
        self.gated(ParserState::ParsingClusters, false, |p| {
            let Some(tracks) = p.tracks_ref() else {
                return false;
            };
            let video = tracks.count(TrackKind::Video);
            let audio = tracks.count(TrackKind::Audio);
            if video + audio != 1 {
                return false;
            }
            tracks
                .iter()
                .filter(|t| t.kind().is_some())
                .all(|t| t.codec_name().is_some())
        })
    }

    pub fn track_count(&self, kind: TrackKind) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            p.tracks_ref().map_or(0, |t| t.count(kind) as u64)
        })
    }

    /// Running counters for `track_number`, updated as clusters complete
    pub fn track_stats(&self, track_number: u64) -> Gated<Option<TrackStats>> {
        self.gated(ParserState::ParsingClusters, None, |p| {
            p.track_stats.get(&track_number).copied()
        })
    }

    pub fn track_frame_count(&self, kind: TrackKind) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            p.stats_for(kind).map_or(0, |s| s.frames)
        })
    }

    pub fn track_size(&self, kind: TrackKind) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| p.stats_for(kind).map_or(0, |s| s.bytes))
    }

    /// Timestamp of the first block of the first track of `kind`, once seen
    pub fn track_start_ns(&self, kind: TrackKind) -> Gated<i64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            p.stats_for(kind)
                .and_then(|s| s.first_timestamp_ns)
                .unwrap_or(0)
        })
    }

    pub fn track_average_bits_per_second(&self, kind: TrackKind) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            let seconds = p.duration_seconds();
            match p.stats_for(kind) {
                Some(stats) if seconds > 0.0 => (stats.bytes as f64 * 8.0 / seconds) as u64,
                _ => 0,
            }
        })
    }

    /// Declared stream length, 0 when unknown
    pub fn file_length(&self) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| p.end_of_file.unwrap_or(0))
    }

    pub fn file_average_bits_per_second(&self) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, |p| {
            let seconds = p.duration_seconds();
            match p.end_of_file {
                Some(length) if seconds > 0.0 => (length as f64 * 8.0 / seconds) as u64,
                _ => 0,
            }
        })
    }

    /// Highest rate needed to download from any cue point to the end in
    /// the remaining playback time
    pub fn file_maximum_bits_per_second(&self) -> Gated<u64> {
        self.gated(ParserState::Done, 0, |p| p.maximum_bits_per_second())
    }

    fn maximum_bits_per_second(&self) -> u64 {
        let (Some(segment), Some(info)) = (self.segment.as_ref(), self.info()) else {
            return 0;
        };
        let Some(cues) = segment.cues() else {
            return 0;
        };
        let Some(end) = segment
            .clusters()
            .iter()
            .rev()
            .find_map(|c| c.element_size().map(|size| c.element_start() + size))
        else {
            return 0;
        };
        let duration_ns = info.duration_ns();
        let scale = info.timecode_scale;

        let mut max_bps = 0u64;
        for point in cues.points() {
            let Some(cluster) = segment.find_cluster(point.time_ns(scale)) else {
                continue;
            };
            let remaining_ns = duration_ns - cluster.time_ns();
            if remaining_ns <= 0 {
                continue;
            }
            let bytes = end.saturating_sub(cluster.element_start());
            let bps = (bytes as f64 * 8.0 / (remaining_ns as f64 / 1e9)) as u64;
            max_bps = max_bps.max(bps);
        }
        max_bps
    }

    /// True when the stream carries cue points for its first track
    pub fn has_cues(&self) -> Gated<bool> {
        self.gated(ParserState::Done, false, |p| {
            let Some(track) = p.tracks_ref().and_then(|t| t.get(0)) else {
                return false;
            };
            p.cues_ref().map_or(false, |cues| {
                cues.points().iter().any(|pt| pt.position_for(track.number).is_some())
            })
        })
    }

    fn cues_ref(&self) -> Option<&Cues> {
        self.segment.as_ref().and_then(Segment::cues)
    }

    pub fn cues(&self) -> Gated<Option<&Cues>> {
        self.gated(ParserState::Done, None, Self::cues_ref)
    }

    /// True when every cue point for the first track of `kind` lands on a
    /// keyframe that starts its cluster's run of that track
    pub fn cues_first_in_cluster(&self, kind: TrackKind) -> Gated<bool> {
        self.gated(ParserState::Done, false, |p| p.check_cues_first_in_cluster(kind))
    }

    fn check_cues_first_in_cluster(&self, kind: TrackKind) -> bool {
        let (Some(segment), Some(track)) = (
            self.segment.as_ref(),
            self.tracks_ref().and_then(|t| t.first_of(kind)),
        ) else {
            return false;
        };
        let Some(cues) = segment.cues() else {
            return false;
        };
        let scale = segment.timecode_scale();
        let mut checked = 0;
        for point in cues.points() {
            if point.position_for(track.number).is_none() {
                continue;
            }
            let time_ns = point.time_ns(scale);
            let Some(cluster) = segment.find_cluster(time_ns) else {
                return false;
            };
            match cluster.first_block_of(track.number) {
                Some(block) if block.is_key && block.timestamp_ns == time_ns => checked += 1,
                _ => return false,
            }
        }
        checked > 0
    }

    /// Timecode scale in effect, in nanoseconds per unit
    pub fn timecode_scale_ns(&self) -> Gated<u64> {
        self.gated(ParserState::ParsingClusters, 0, Self::timecode_scale)
    }
}

fn fold_cluster_stats(cluster: &Cluster, stats: &mut BTreeMap<u64, TrackStats>) {
    for block in cluster.blocks() {
        let entry = stats.entry(block.track_number).or_default();
        entry.bytes += block.size;
        entry.frames += 1;
        if entry.first_timestamp_ns.is_none() {
            entry.first_timestamp_ns = Some(block.timestamp_ns);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering() {
        use ParserState::*;
        assert!(ParsingClusters.has_reached(ParsingHeader));
        assert!(Done.has_reached(ParsingClusters));
        assert!(!ParsingHeader.has_reached(ParsingClusters));
        assert!(!Error.has_reached(ParsingHeader));
    }

    #[test]
    fn test_gated_queries_before_headers() {
        let parser = IncrementalParser::new();
        let width = parser.video_width();
        assert!(!width.ready);
        assert_eq!(width.state, ParserState::ParsingHeader);
        assert_eq!(width.ok(), None);
        assert!(parser.cues().ok().is_none());
        assert!(parser.last_cluster().is_none());
    }

    #[test]
    fn test_garbage_moves_to_error() {
        let mut parser = IncrementalParser::new();
        let err = parser.parse_next(&[0x00, 0x00, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(parser.state(), ParserState::Error);
        assert!(parser.parse_next(&[0x1A]).is_err());
    }

    #[test]
    fn test_partial_header_consumes_nothing() {
        let mut parser = IncrementalParser::new();
        let parsed = parser.parse_next(&[0x1A, 0x45]).unwrap();
        assert_eq!(parsed.consumed, 0);
        assert_eq!(parsed.state, ParserState::ParsingHeader);
    }

    #[test]
    fn test_empty_buffer_before_headers() {
        let mut parser = IncrementalParser::new();
        let parsed = parser.parse_next(&[]).unwrap();
        assert_eq!(parsed, Parsed { state: ParserState::ParsingHeader, consumed: 0 });
    }

    #[test]
    fn test_end_of_file_set_once() {
        let mut parser = IncrementalParser::new();
        parser.set_end_of_file_position(4096).unwrap();
        parser.set_end_of_file_position(4096).unwrap();
        assert!(parser.set_end_of_file_position(10).is_err());
        assert_eq!(parser.end_of_file_position(), Some(4096));
    }
}
