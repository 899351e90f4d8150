//! WebM muxing session (VP8/VP9/AV1 video + Vorbis/Opus audio)
//!
//! [`SegmentMuxer`] writes SimpleBlock clusters through an [`MkvWriter`].
//! In live mode the Segment and every Cluster are written with unknown
//! sizes so bytes can leave as soon as they are produced. In file mode the
//! sizes are patched in place, and the duration and cues are written on
//! finalize, which needs a seekable writer.
//!
//! The EBML header, Info, Tracks and Cues are built with `mkv-element` and
//! serialized into memory, then handed to the writer as one level-1
//! element each. Segment and Cluster headers are written by hand since
//! their sizes stay unknown or get patched later.

use super::ebml::{self, ids};
use super::segment::{Colour, MasteringMetadata};
use super::MkvWriter;
use crate::error::{Error, Result, TrackKind};
use mkv_element::io::blocking_impl::WriteTo;
use mkv_element::prelude as mkv;
use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::time::Duration;
use tracing::{debug, trace};

/// Byte length of an ID plus 8-byte size field for Segment and Cluster
const SIZED_HEADER_LEN: u64 = 12;

/// Duration written before the real one is known. It has no 4-byte float
/// form, so the field is always 8 bytes wide.
const DURATION_PLACEHOLDER: f64 = f64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxMode {
    /// Unknown sizes, nothing is rewritten
    Live,
    /// Sizes and duration patched on finalize
    File,
}

/// Segment-wide muxing options
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSettings {
    pub mode: MuxMode,
    /// Nanoseconds per timecode unit
    pub timecode_scale: u64,
    pub muxing_app: String,
    pub writing_app: String,
    /// Start a new cluster once the current one spans this long
    pub max_cluster_duration: Option<Duration>,
    pub output_cues: bool,
    /// Write a Duration into Info (file mode only)
    pub write_duration: bool,
}

impl SegmentSettings {
    pub fn live() -> Self {
        SegmentSettings {
            mode: MuxMode::Live,
            timecode_scale: 1_000_000,
            muxing_app: format!("webm-live-{}", crate::VERSION),
            writing_app: format!("webm-live-{}", crate::VERSION),
            max_cluster_duration: None,
            output_cues: false,
            write_duration: false,
        }
    }

    pub fn file() -> Self {
        SegmentSettings {
            mode: MuxMode::File,
            output_cues: true,
            write_duration: true,
            ..Self::live()
        }
    }
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self::live()
    }
}

/// Media parameters of a muxed track
#[derive(Debug, Clone, PartialEq)]
pub enum TrackMedia {
    Video {
        width: u64,
        height: u64,
        colour: Option<Colour>,
    },
    Audio {
        sample_rate: f64,
        channels: u64,
        bit_depth: Option<u64>,
    },
}

/// A track as it will be written into Tracks
#[derive(Debug, Clone, PartialEq)]
pub struct MuxTrack {
    pub number: u64,
    pub uid: u64,
    pub codec_id: String,
    pub codec_private: Option<Vec<u8>>,
    pub content_enc_key_id: Option<Vec<u8>>,
    pub codec_delay: u64,
    pub seek_pre_roll: u64,
    pub media: TrackMedia,
}

impl MuxTrack {
    pub fn kind(&self) -> TrackKind {
        match self.media {
            TrackMedia::Video { .. } => TrackKind::Video,
            TrackMedia::Audio { .. } => TrackKind::Audio,
        }
    }

    fn track_entry(&self) -> mkv::TrackEntry {
        let mut entry = mkv::TrackEntry::default();
        entry.track_number = mkv::TrackNumber(self.number);
        entry.track_uid = mkv::TrackUid(self.uid);
        entry.track_type = mkv::TrackType(match self.kind() {
            TrackKind::Video => 1,
            TrackKind::Audio => 2,
        });
        entry.flag_enabled = mkv::FlagEnabled(1);
        entry.flag_default = mkv::FlagDefault(1);
        entry.flag_forced = mkv::FlagForced(0);
        entry.flag_lacing = mkv::FlagLacing(0);
        entry.language = mkv::Language("und".to_string());
        entry.codec_id = mkv::CodecId(self.codec_id.clone());
        entry.codec_private = self.codec_private.clone().map(mkv::CodecPrivate);
        entry.codec_delay = mkv::CodecDelay(self.codec_delay);
        entry.seek_pre_roll = mkv::SeekPreRoll(self.seek_pre_roll);

        match &self.media {
            TrackMedia::Video {
                width,
                height,
                colour,
            } => {
                entry.video = Some(mkv::Video {
                    pixel_width: mkv::PixelWidth(*width),
                    pixel_height: mkv::PixelHeight(*height),
                    colour: colour.as_ref().map(colour_element),
                    ..Default::default()
                });
            }
            TrackMedia::Audio {
                sample_rate,
                channels,
                bit_depth,
            } => {
                entry.audio = Some(mkv::Audio {
                    sampling_frequency: mkv::SamplingFrequency(*sample_rate),
                    channels: mkv::Channels(*channels),
                    bit_depth: bit_depth.map(mkv::BitDepth),
                    ..Default::default()
                });
            }
        }

        // AES encryption of frame contents
        entry.content_encodings = self.content_enc_key_id.clone().map(|key_id| {
            mkv::ContentEncodings {
                content_encoding: vec![mkv::ContentEncoding {
                    content_encoding_order: mkv::ContentEncodingOrder(0),
                    content_encoding_scope: mkv::ContentEncodingScope(1),
                    content_encoding_type: mkv::ContentEncodingType(1),
                    content_encryption: Some(mkv::ContentEncryption {
                        content_enc_algo: mkv::ContentEncAlgo(5),
                        content_enc_key_id: Some(mkv::ContentEncKeyId(key_id)),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }
        });
        entry
    }
}

fn colour_element(colour: &Colour) -> mkv::Colour {
    mkv::Colour {
        matrix_coefficients: mkv::MatrixCoefficients(colour.matrix_coefficients),
        bits_per_channel: mkv::BitsPerChannel(colour.bits_per_channel),
        chroma_subsampling_horz: colour.chroma_subsampling_horz.map(mkv::ChromaSubsamplingHorz),
        chroma_subsampling_vert: colour.chroma_subsampling_vert.map(mkv::ChromaSubsamplingVert),
        cb_subsampling_horz: colour.cb_subsampling_horz.map(mkv::CbSubsamplingHorz),
        cb_subsampling_vert: colour.cb_subsampling_vert.map(mkv::CbSubsamplingVert),
        chroma_siting_horz: mkv::ChromaSitingHorz(colour.chroma_siting_horz),
        chroma_siting_vert: mkv::ChromaSitingVert(colour.chroma_siting_vert),
        range: mkv::Range(colour.range),
        transfer_characteristics: mkv::TransferCharacteristics(colour.transfer_characteristics),
        primaries: mkv::Primaries(colour.primaries),
        max_cll: colour.max_cll.map(mkv::MaxCll),
        max_fall: colour.max_fall.map(mkv::MaxFall),
        mastering_metadata: colour.mastering_metadata.as_ref().map(mastering_element),
        ..Default::default()
    }
}

fn mastering_element(metadata: &MasteringMetadata) -> mkv::MasteringMetadata {
    mkv::MasteringMetadata {
        primary_r_chromaticity_x: metadata.primary_r_chromaticity_x.map(mkv::PrimaryRChromaticityX),
        primary_r_chromaticity_y: metadata.primary_r_chromaticity_y.map(mkv::PrimaryRChromaticityY),
        primary_g_chromaticity_x: metadata.primary_g_chromaticity_x.map(mkv::PrimaryGChromaticityX),
        primary_g_chromaticity_y: metadata.primary_g_chromaticity_y.map(mkv::PrimaryGChromaticityY),
        primary_b_chromaticity_x: metadata.primary_b_chromaticity_x.map(mkv::PrimaryBChromaticityX),
        primary_b_chromaticity_y: metadata.primary_b_chromaticity_y.map(mkv::PrimaryBChromaticityY),
        white_point_chromaticity_x: metadata
            .white_point_chromaticity_x
            .map(mkv::WhitePointChromaticityX),
        white_point_chromaticity_y: metadata
            .white_point_chromaticity_y
            .map(mkv::WhitePointChromaticityY),
        luminance_max: metadata.luminance_max.map(mkv::LuminanceMax),
        luminance_min: metadata.luminance_min.map(mkv::LuminanceMin),
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenCluster {
    timecode: u64,
    start: u64,
    blocks: usize,
}

#[derive(Debug, Clone, Copy)]
struct MuxCue {
    time: u64,
    track: u64,
    cluster_position: u64,
}

/// WebM muxing session over an [`MkvWriter`]
#[derive(Debug)]
pub struct SegmentMuxer<W: MkvWriter> {
    writer: W,
    settings: SegmentSettings,
    tracks: Vec<MuxTrack>,
    header_written: bool,
    finalized: bool,
    segment_size_pos: u64,
    segment_data_start: u64,
    /// Position of the 8-byte Duration payload
    duration_pos: Option<u64>,
    cluster: Option<OpenCluster>,
    cues: Vec<MuxCue>,
    last_timestamps: HashMap<u64, u64>,
    max_timestamp_ns: u64,
    frames_written: u64,
}

impl<W: MkvWriter> SegmentMuxer<W> {
    pub fn new(writer: W, settings: SegmentSettings) -> Result<Self> {
        if settings.mode == MuxMode::File && !writer.seekable() {
            return Err(Error::muxer("file mode needs a seekable writer"));
        }
        if settings.timecode_scale == 0 {
            return Err(Error::invalid_input("timecode scale must be positive"));
        }
        Ok(SegmentMuxer {
            writer,
            settings,
            tracks: Vec::new(),
            header_written: false,
            finalized: false,
            segment_size_pos: 0,
            segment_data_start: 0,
            duration_pos: None,
            cluster: None,
            cues: Vec::new(),
            last_timestamps: HashMap::new(),
            max_timestamp_ns: 0,
            frames_written: 0,
        })
    }

    pub fn settings(&self) -> &SegmentSettings {
        &self.settings
    }

    pub fn tracks(&self) -> &[MuxTrack] {
        &self.tracks
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.header_written {
            return Err(Error::invalid_state(
                "segment headers are already written",
            ));
        }
        Ok(())
    }

    fn next_track_number(&self) -> u64 {
        self.tracks.len() as u64 + 1
    }

    /// Add a VP8 video track, returning its track number
    pub fn add_video_track(&mut self, width: u64, height: u64) -> Result<u64> {
        self.ensure_mutable()?;
        if width == 0 || height == 0 {
            return Err(Error::track(format!(
                "invalid video dimensions {}x{}",
                width, height
            )));
        }
        let number = self.next_track_number();
        self.tracks.push(MuxTrack {
            number,
            uid: number,
            codec_id: "V_VP8".to_string(),
            codec_private: None,
            content_enc_key_id: None,
            codec_delay: 0,
            seek_pre_roll: 0,
            media: TrackMedia::Video {
                width,
                height,
                colour: None,
            },
        });
        debug!(number, width, height, "video track added");
        Ok(number)
    }

    /// Add a Vorbis audio track, returning its track number
    pub fn add_audio_track(&mut self, sample_rate: f64, channels: u64) -> Result<u64> {
        self.ensure_mutable()?;
        if !(sample_rate > 0.0) || channels == 0 {
            return Err(Error::track(format!(
                "invalid audio parameters {} Hz x {}",
                sample_rate, channels
            )));
        }
        let number = self.next_track_number();
        self.tracks.push(MuxTrack {
            number,
            uid: number,
            codec_id: "A_VORBIS".to_string(),
            codec_private: None,
            content_enc_key_id: None,
            codec_delay: 0,
            seek_pre_roll: 0,
            media: TrackMedia::Audio {
                sample_rate,
                channels,
                bit_depth: None,
            },
        });
        debug!(number, sample_rate, channels, "audio track added");
        Ok(number)
    }

    fn track_mut(&mut self, number: u64) -> Result<&mut MuxTrack> {
        self.ensure_mutable()?;
        self.tracks
            .iter_mut()
            .find(|t| t.number == number)
            .ok_or_else(|| Error::track(format!("no track {}", number)))
    }

    pub fn set_codec_id(&mut self, track: u64, codec_id: &str) -> Result<()> {
        if codec_id.is_empty() {
            return Err(Error::track("codec id must not be empty"));
        }
        let track = self.track_mut(track)?;
        track.codec_id = codec_id.to_string();
        if codec_id == "A_OPUS" {
            track.codec_delay = 6_500_000;
            track.seek_pre_roll = 80_000_000;
        }
        Ok(())
    }

    /// Attach Colour metadata to a video track
    pub fn set_colour(&mut self, track: u64, colour: &Colour) -> Result<()> {
        let number = track;
        let track = self.track_mut(number)?;
        match &mut track.media {
            TrackMedia::Video { colour: slot, .. } => {
                *slot = Some(colour.clone());
                Ok(())
            }
            TrackMedia::Audio { .. } => Err(Error::track(format!(
                "track {} is not a video track",
                number
            ))),
        }
    }

    pub fn set_codec_private(&mut self, track: u64, private: &[u8]) -> Result<()> {
        if private.is_empty() {
            return Err(Error::track("codec private data must not be empty"));
        }
        self.track_mut(track)?.codec_private = Some(private.to_vec());
        Ok(())
    }

    pub fn set_content_enc_key_id(&mut self, track: u64, key_id: &[u8]) -> Result<()> {
        if key_id.is_empty() {
            return Err(Error::track("content encryption key id must not be empty"));
        }
        self.track_mut(track)?.content_enc_key_id = Some(key_id.to_vec());
        Ok(())
    }

    pub fn set_muxing_app(&mut self, app: &str) -> Result<()> {
        self.ensure_mutable()?;
        self.settings.muxing_app = app.to_string();
        Ok(())
    }

    pub fn set_writing_app(&mut self, app: &str) -> Result<()> {
        self.ensure_mutable()?;
        self.settings.writing_app = app.to_string();
        Ok(())
    }

    fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind() == TrackKind::Video)
    }

    /// Write one frame. Headers go out with the first frame.
    pub fn write_frame(
        &mut self,
        data: &[u8],
        track_number: u64,
        timestamp_ns: u64,
        is_key: bool,
    ) -> Result<()> {
        if self.finalized {
            return Err(Error::invalid_state("segment already finalized"));
        }
        if data.is_empty() {
            return Err(Error::write("empty frame"));
        }
        let kind = self
            .tracks
            .iter()
            .find(|t| t.number == track_number)
            .map(MuxTrack::kind)
            .ok_or_else(|| Error::write(format!("unknown track {}", track_number)))?;
        if let Some(&last) = self.last_timestamps.get(&track_number) {
            if timestamp_ns < last {
                return Err(Error::write(format!(
                    "timestamp {} before previous {} on track {}",
                    timestamp_ns, last, track_number
                )));
            }
        }

        if !self.header_written {
            self.write_header()?;
        }

        let timecode = timestamp_ns / self.settings.timecode_scale;
        if self.needs_new_cluster(timecode, kind, is_key)? {
            self.start_cluster(timecode)?;
            if self.settings.output_cues
                && is_key
                && (kind == TrackKind::Video || !self.has_video())
            {
                if let Some(cluster) = self.cluster {
                    self.cues.push(MuxCue {
                        time: timecode,
                        track: track_number,
                        cluster_position: cluster.start - self.segment_data_start,
                    });
                }
            }
        }

        let cluster = self
            .cluster
            .as_mut()
            .ok_or_else(|| Error::invalid_state("no open cluster"))?;
        let relative = (timecode as i64 - cluster.timecode as i64) as i16;
        cluster.blocks += 1;

        let header = simple_block_header(track_number, relative, is_key, data.len());
        self.writer.write(&header)?;
        self.writer.write(data)?;

        self.last_timestamps.insert(track_number, timestamp_ns);
        self.max_timestamp_ns = self.max_timestamp_ns.max(timestamp_ns);
        self.frames_written += 1;
        trace!(track_number, timestamp_ns, is_key, len = data.len(), "frame written");
        Ok(())
    }

    fn needs_new_cluster(&self, timecode: u64, kind: TrackKind, is_key: bool) -> Result<bool> {
        let Some(cluster) = self.cluster else {
            return Ok(true);
        };
        let relative = timecode as i64 - cluster.timecode as i64;
        if relative < i16::MIN as i64 {
            return Err(Error::write(format!(
                "timecode {} too far before cluster timecode {}",
                timecode, cluster.timecode
            )));
        }
        if relative > i16::MAX as i64 {
            return Ok(true);
        }
        if cluster.blocks == 0 {
            return Ok(false);
        }
        if is_key && kind == TrackKind::Video {
            return Ok(true);
        }
        if let Some(max) = self.settings.max_cluster_duration {
            let span_ns = relative.max(0) as u128 * self.settings.timecode_scale as u128;
            if span_ns >= max.as_nanos() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn write_top_level(&mut self, id: u32, bytes: &[u8]) -> Result<()> {
        let position = self.writer.position();
        self.writer.element_start_notify(id, position);
        self.writer.write(bytes)
    }

    fn write_header(&mut self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(Error::muxer("no tracks added"));
        }

        let header = mkv::Ebml {
            ebml_max_id_length: mkv::EbmlMaxIdLength(4),
            ebml_max_size_length: mkv::EbmlMaxSizeLength(8),
            doc_type: Some(mkv::DocType("webm".to_string())),
            doc_type_version: Some(mkv::DocTypeVersion(4)),
            doc_type_read_version: Some(mkv::DocTypeReadVersion(2)),
            ..Default::default()
        };
        let mut element = Vec::new();
        header
            .write_to(&mut element)
            .map_err(|e| Error::muxer(format!("Failed to write EBML header: {}", e)))?;
        self.write_top_level(ids::EBML, &element)?;

        // Segment size stays unknown until finalize
        let segment_start = self.writer.position();
        let mut segment = Vec::new();
        ebml::write_id(&mut segment, ids::SEGMENT);
        segment.extend_from_slice(&ebml::UNKNOWN_SIZE);
        self.write_top_level(ids::SEGMENT, &segment)?;
        self.segment_size_pos = segment_start + 4;
        self.segment_data_start = segment_start + SIZED_HEADER_LEN;

        let write_duration = self.settings.mode == MuxMode::File && self.settings.write_duration;
        let info = mkv::Info {
            timestamp_scale: mkv::TimestampScale(self.settings.timecode_scale),
            duration: write_duration.then(|| mkv::Duration(DURATION_PLACEHOLDER)),
            muxing_app: mkv::MuxingApp(self.settings.muxing_app.clone()),
            writing_app: mkv::WritingApp(self.settings.writing_app.clone()),
            ..Default::default()
        };
        let mut element = Vec::new();
        info.write_to(&mut element)
            .map_err(|e| Error::muxer(format!("Failed to write Info: {}", e)))?;
        let info_start = self.writer.position();
        self.duration_pos = if write_duration {
            Some(info_start + duration_offset(&element)? as u64)
        } else {
            None
        };
        self.write_top_level(ids::INFO, &element)?;

        let tracks = mkv::Tracks {
            track_entry: self.tracks.iter().map(MuxTrack::track_entry).collect(),
            ..Default::default()
        };
        let mut element = Vec::new();
        tracks
            .write_to(&mut element)
            .map_err(|e| Error::muxer(format!("Failed to write Tracks: {}", e)))?;
        self.write_top_level(ids::TRACKS, &element)?;

        self.header_written = true;
        debug!(
            tracks = self.tracks.len(),
            mode = ?self.settings.mode,
            "segment headers written"
        );
        Ok(())
    }

    fn start_cluster(&mut self, timecode: u64) -> Result<()> {
        self.close_cluster()?;
        let start = self.writer.position();
        let mut header = Vec::new();
        ebml::write_id(&mut header, ids::CLUSTER);
        header.extend_from_slice(&ebml::UNKNOWN_SIZE);
        ebml::write_uint_element(&mut header, ids::TIMECODE, timecode);
        self.write_top_level(ids::CLUSTER, &header)?;
        self.cluster = Some(OpenCluster {
            timecode,
            start,
            blocks: 0,
        });
        trace!(timecode, start, "cluster started");
        Ok(())
    }

    fn close_cluster(&mut self) -> Result<()> {
        let Some(cluster) = self.cluster.take() else {
            return Ok(());
        };
        if self.settings.mode == MuxMode::File {
            let size = self.writer.position() - (cluster.start + SIZED_HEADER_LEN);
            self.patch_size(cluster.start + 4, size)?;
        }
        Ok(())
    }

    fn patch(&mut self, position: u64, bytes: &[u8]) -> Result<()> {
        let end = self.writer.position();
        self.writer.set_position(position)?;
        self.writer.write(bytes)?;
        self.writer.set_position(end)
    }

    fn patch_size(&mut self, position: u64, size: u64) -> Result<()> {
        let mut bytes = Vec::with_capacity(8);
        ebml::write_vint_width(&mut bytes, size, 8);
        self.patch(position, &bytes)
    }

    fn write_cues(&mut self) -> Result<()> {
        let cues = mkv::Cues {
            cue_point: self
                .cues
                .iter()
                .map(|cue| mkv::CuePoint {
                    cue_time: mkv::CueTime(cue.time),
                    cue_track_positions: vec![mkv::CueTrackPositions {
                        cue_track: mkv::CueTrack(cue.track),
                        cue_cluster_position: mkv::CueClusterPosition(cue.cluster_position),
                        ..Default::default()
                    }],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let mut element = Vec::new();
        cues.write_to(&mut element)
            .map_err(|e| Error::muxer(format!("Failed to write Cues: {}", e)))?;
        self.write_top_level(ids::CUES, &element)
    }

    /// Close the open cluster and write the trailer. Later writes fail.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(Error::invalid_state("segment already finalized"));
        }
        if !self.header_written && !self.tracks.is_empty() {
            self.write_header()?;
        }
        self.close_cluster()?;

        if self.header_written {
            if self.settings.output_cues && !self.cues.is_empty() {
                self.write_cues()?;
            }
            if self.settings.mode == MuxMode::File {
                let size = self.writer.position() - self.segment_data_start;
                self.patch_size(self.segment_size_pos, size)?;
                if let Some(position) = self.duration_pos {
                    let duration =
                        self.max_timestamp_ns as f64 / self.settings.timecode_scale as f64;
                    self.patch(position, &duration.to_be_bytes())?;
                }
            }
        }

        self.finalized = true;
        debug!(
            frames = self.frames_written,
            bytes = self.writer.position(),
            cues = self.cues.len(),
            "segment finalized"
        );
        Ok(())
    }
}

/// Offset of the 8-byte Duration payload inside an encoded Info element
fn duration_offset(info: &[u8]) -> Result<usize> {
    let header_len = ebml::element_header_len(info)?;
    let payload = &info[header_len..];
    for child in ebml::children(payload) {
        let child = child?;
        if child.id != ids::DURATION {
            continue;
        }
        if child.data.len() != 8 {
            return Err(Error::muxer(format!(
                "Duration written as {} bytes",
                child.data.len()
            )));
        }
        let child_header_len = ebml::element_header_len(&payload[child.offset..])?;
        return Ok(header_len + child.offset + child_header_len);
    }
    Err(Error::muxer("Info was written without a Duration"))
}

/// SimpleBlock element header: ID, size, TrackNumber (vint), Timecode
/// (i16 BE) and Flags. The frame bytes follow.
fn simple_block_header(
    track_number: u64,
    relative_timecode: i16,
    keyframe: bool,
    frame_len: usize,
) -> Vec<u8> {
    let mut body = Vec::with_capacity(11);
    ebml::write_vint(&mut body, track_number);
    body.extend_from_slice(&relative_timecode.to_be_bytes());
    let mut flags = 0u8;
    if keyframe {
        flags |= 0x80;
    }
    body.push(flags);

    let mut header = Vec::with_capacity(body.len() + 9);
    ebml::write_id(&mut header, ids::SIMPLE_BLOCK);
    ebml::write_vint(&mut header, (body.len() + frame_len) as u64);
    header.extend_from_slice(&body);
    header
}

/// [`MkvWriter`] over any seekable byte sink, such as a file
#[derive(Debug)]
pub struct FileWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write + Seek> FileWriter<W> {
    pub fn new(mut inner: W) -> Result<Self> {
        let position = inner.stream_position()?;
        Ok(FileWriter { inner, position })
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> MkvWriter for FileWriter<W> {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seekable(&self) -> bool {
        true
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }
}
