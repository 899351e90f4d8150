//! Read-side WebM object model
//!
//! Everything here is loaded through an [`MkvReader`] and may stop with
//! `NeedMoreData` at any point. Each loader either completes a whole
//! element or leaves its state untouched, so it can simply be called again
//! once more bytes are buffered.

use super::ebml::{self, ids, ElementHeader};
use super::{MkvReader, Status, StreamLength};
use crate::error::{Error, Result, TrackKind};
use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace};

/// Timecode scale used when Info does not carry one (1ms)
pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// EBML header fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbmlHeader {
    pub version: u64,
    pub read_version: u64,
    pub max_id_length: u64,
    pub max_size_length: u64,
    pub doc_type: String,
    pub doc_type_version: u64,
    pub doc_type_read_version: u64,
}

impl Default for EbmlHeader {
    fn default() -> Self {
        EbmlHeader {
            version: 1,
            read_version: 1,
            max_id_length: 4,
            max_size_length: 8,
            doc_type: "matroska".to_string(),
            doc_type_version: 1,
            doc_type_read_version: 1,
        }
    }
}

impl EbmlHeader {
    /// Parse the EBML header at stream offset 0, returning it together
    /// with the offset just past it.
    pub fn parse<R: MkvReader + ?Sized>(reader: &R) -> Result<Status<(EbmlHeader, u64)>> {
        let header = try_ready!(ebml::read_element_header(reader, 0));
        if header.id != ids::EBML {
            return Err(Error::format(format!(
                "stream does not start with an EBML header (found id {:#x})",
                header.id
            )));
        }
        let size = header.known_size()?;
        let payload = try_ready!(ebml::read_payload(reader, header.data_start(), size));

        let mut parsed = EbmlHeader::default();
        for child in ebml::children(&payload) {
            let child = child?;
            match child.id {
                ids::EBML_VERSION => parsed.version = ebml::read_uint(child.data)?,
                ids::EBML_READ_VERSION => parsed.read_version = ebml::read_uint(child.data)?,
                ids::EBML_MAX_ID_LENGTH => parsed.max_id_length = ebml::read_uint(child.data)?,
                ids::EBML_MAX_SIZE_LENGTH => {
                    parsed.max_size_length = ebml::read_uint(child.data)?
                }
                ids::DOC_TYPE => parsed.doc_type = ebml::read_string(child.data),
                ids::DOC_TYPE_VERSION => parsed.doc_type_version = ebml::read_uint(child.data)?,
                ids::DOC_TYPE_READ_VERSION => {
                    parsed.doc_type_read_version = ebml::read_uint(child.data)?
                }
                _ => {}
            }
        }
        parsed.validate()?;
        Ok(Status::Ready((parsed, header.data_start() + size)))
    }

    fn validate(&self) -> Result<()> {
        if self.read_version > 1 {
            return Err(Error::unsupported(format!(
                "EBML read version {}",
                self.read_version
            )));
        }
        if self.doc_type != "webm" && self.doc_type != "matroska" {
            return Err(Error::unsupported(format!("DocType {:?}", self.doc_type)));
        }
        if self.max_id_length as usize > ebml::MAX_ID_LENGTH
            || self.max_size_length as usize > ebml::MAX_SIZE_LENGTH
        {
            return Err(Error::unsupported(format!(
                "EBML max id/size length {}/{}",
                self.max_id_length, self.max_size_length
            )));
        }
        Ok(())
    }
}

/// Segment Info
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    /// Nanoseconds per timecode unit
    pub timecode_scale: u64,
    /// Duration in timecode units
    pub duration: Option<f64>,
    pub title: Option<String>,
    pub muxing_app: String,
    pub writing_app: String,
}

impl SegmentInfo {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut info = SegmentInfo {
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            duration: None,
            title: None,
            muxing_app: String::new(),
            writing_app: String::new(),
        };
        for child in ebml::children(payload) {
            let child = child?;
            match child.id {
                ids::TIMECODE_SCALE => info.timecode_scale = ebml::read_uint(child.data)?,
                ids::DURATION => info.duration = Some(ebml::read_float(child.data)?),
                ids::TITLE => info.title = Some(ebml::read_string(child.data)),
                ids::MUXING_APP => info.muxing_app = ebml::read_string(child.data),
                ids::WRITING_APP => info.writing_app = ebml::read_string(child.data),
                _ => {}
            }
        }
        if info.timecode_scale == 0 {
            return Err(Error::format("TimecodeScale must be positive"));
        }
        Ok(info)
    }

    /// Duration in nanoseconds, 0 when absent
    pub fn duration_ns(&self) -> i64 {
        self.duration
            .map_or(0, |d| (d * self.timecode_scale as f64) as i64)
    }
}

/// Matroska track type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Video,
    Audio,
    Other(u64),
}

impl TrackType {
    fn from_code(code: u64) -> Self {
        match code {
            1 => TrackType::Video,
            2 => TrackType::Audio,
            other => TrackType::Other(other),
        }
    }

    pub fn kind(self) -> Option<TrackKind> {
        match self {
            TrackType::Video => Some(TrackKind::Video),
            TrackType::Audio => Some(TrackKind::Audio),
            TrackType::Other(_) => None,
        }
    }
}

/// Short codec name for a Matroska codec ID
pub fn codec_name(codec_id: &str) -> Option<&'static str> {
    match codec_id {
        "V_VP8" => Some("vp8"),
        "V_VP9" => Some("vp9"),
        "V_AV1" => Some("av1"),
        "A_VORBIS" => Some("vorbis"),
        "A_OPUS" => Some("opus"),
        _ => None,
    }
}

/// SMPTE 2086 mastering display metadata, chromaticities as CIE 1931 xy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasteringMetadata {
    pub primary_r_chromaticity_x: Option<f64>,
    pub primary_r_chromaticity_y: Option<f64>,
    pub primary_g_chromaticity_x: Option<f64>,
    pub primary_g_chromaticity_y: Option<f64>,
    pub primary_b_chromaticity_x: Option<f64>,
    pub primary_b_chromaticity_y: Option<f64>,
    pub white_point_chromaticity_x: Option<f64>,
    pub white_point_chromaticity_y: Option<f64>,
    /// cd/m²
    pub luminance_max: Option<f64>,
    pub luminance_min: Option<f64>,
}

/// Video Colour element. Values use the ISO/IEC 23091-4 code points.
#[derive(Debug, Clone, PartialEq)]
pub struct Colour {
    pub matrix_coefficients: u64,
    pub bits_per_channel: u64,
    pub chroma_subsampling_horz: Option<u64>,
    pub chroma_subsampling_vert: Option<u64>,
    pub cb_subsampling_horz: Option<u64>,
    pub cb_subsampling_vert: Option<u64>,
    pub chroma_siting_horz: u64,
    pub chroma_siting_vert: u64,
    pub range: u64,
    pub transfer_characteristics: u64,
    pub primaries: u64,
    /// Maximum content light level, cd/m²
    pub max_cll: Option<u64>,
    /// Maximum frame-average light level, cd/m²
    pub max_fall: Option<u64>,
    pub mastering_metadata: Option<MasteringMetadata>,
}

impl Default for Colour {
    /// Matroska defaults: unspecified matrix, transfer and primaries
    fn default() -> Self {
        Colour {
            matrix_coefficients: 2,
            bits_per_channel: 0,
            chroma_subsampling_horz: None,
            chroma_subsampling_vert: None,
            cb_subsampling_horz: None,
            cb_subsampling_vert: None,
            chroma_siting_horz: 0,
            chroma_siting_vert: 0,
            range: 0,
            transfer_characteristics: 2,
            primaries: 2,
            max_cll: None,
            max_fall: None,
            mastering_metadata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSettings {
    pub width: u64,
    pub height: u64,
    pub display_width: Option<u64>,
    pub display_height: Option<u64>,
    pub frame_rate: Option<f64>,
    pub colour: Option<Colour>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub sampling_frequency: f64,
    pub channels: u64,
    pub bit_depth: Option<u64>,
}

/// One TrackEntry
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub number: u64,
    pub uid: u64,
    pub track_type: TrackType,
    pub codec_id: String,
    pub codec_private: Vec<u8>,
    pub name: Option<String>,
    pub language: Option<String>,
    pub default_duration: Option<u64>,
    pub codec_delay: u64,
    pub seek_pre_roll: u64,
    pub video: Option<VideoSettings>,
    pub audio: Option<AudioSettings>,
    pub content_enc_key_id: Option<Vec<u8>>,
}

impl Track {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut number = None;
        let mut track_type = None;
        let mut track = Track {
            number: 0,
            uid: 0,
            track_type: TrackType::Other(0),
            codec_id: String::new(),
            codec_private: Vec::new(),
            name: None,
            language: None,
            default_duration: None,
            codec_delay: 0,
            seek_pre_roll: 0,
            video: None,
            audio: None,
            content_enc_key_id: None,
        };
        for child in ebml::children(payload) {
            let child = child?;
            match child.id {
                ids::TRACK_NUMBER => number = Some(ebml::read_uint(child.data)?),
                ids::TRACK_UID => track.uid = ebml::read_uint(child.data)?,
                ids::TRACK_TYPE => track_type = Some(ebml::read_uint(child.data)?),
                ids::CODEC_ID => track.codec_id = ebml::read_string(child.data),
                ids::CODEC_PRIVATE => track.codec_private = child.data.to_vec(),
                ids::NAME => track.name = Some(ebml::read_string(child.data)),
                ids::LANGUAGE => track.language = Some(ebml::read_string(child.data)),
                ids::DEFAULT_DURATION => {
                    track.default_duration = Some(ebml::read_uint(child.data)?)
                }
                ids::CODEC_DELAY => track.codec_delay = ebml::read_uint(child.data)?,
                ids::SEEK_PRE_ROLL => track.seek_pre_roll = ebml::read_uint(child.data)?,
                ids::VIDEO => track.video = Some(parse_video(child.data)?),
                ids::AUDIO => track.audio = Some(parse_audio(child.data)?),
                ids::CONTENT_ENCODINGS => {
                    track.content_enc_key_id = find_content_enc_key_id(child.data)?
                }
                _ => {}
            }
        }

        track.number = match number {
            Some(0) | None => return Err(Error::format("TrackEntry without a track number")),
            Some(n) => n,
        };
        track.track_type = TrackType::from_code(
            track_type.ok_or_else(|| Error::format("TrackEntry without a track type"))?,
        );
        Ok(track)
    }

    pub fn kind(&self) -> Option<TrackKind> {
        self.track_type.kind()
    }

    /// Short codec name ("vp9", "opus", ...) for WebM codecs
    pub fn codec_name(&self) -> Option<&'static str> {
        codec_name(&self.codec_id)
    }
}

fn parse_video(payload: &[u8]) -> Result<VideoSettings> {
    let mut video = VideoSettings {
        width: 0,
        height: 0,
        display_width: None,
        display_height: None,
        frame_rate: None,
        colour: None,
    };
    for child in ebml::children(payload) {
        let child = child?;
        match child.id {
            ids::PIXEL_WIDTH => video.width = ebml::read_uint(child.data)?,
            ids::PIXEL_HEIGHT => video.height = ebml::read_uint(child.data)?,
            ids::DISPLAY_WIDTH => video.display_width = Some(ebml::read_uint(child.data)?),
            ids::DISPLAY_HEIGHT => video.display_height = Some(ebml::read_uint(child.data)?),
            ids::FRAME_RATE => video.frame_rate = Some(ebml::read_float(child.data)?),
            ids::COLOUR => video.colour = Some(parse_colour(child.data)?),
            _ => {}
        }
    }
    Ok(video)
}

fn parse_colour(payload: &[u8]) -> Result<Colour> {
    let mut colour = Colour::default();
    for child in ebml::children(payload) {
        let child = child?;
        let data = child.data;
        match child.id {
            ids::MATRIX_COEFFICIENTS => colour.matrix_coefficients = ebml::read_uint(data)?,
            ids::BITS_PER_CHANNEL => colour.bits_per_channel = ebml::read_uint(data)?,
            ids::CHROMA_SUBSAMPLING_HORZ => {
                colour.chroma_subsampling_horz = Some(ebml::read_uint(data)?)
            }
            ids::CHROMA_SUBSAMPLING_VERT => {
                colour.chroma_subsampling_vert = Some(ebml::read_uint(data)?)
            }
            ids::CB_SUBSAMPLING_HORZ => colour.cb_subsampling_horz = Some(ebml::read_uint(data)?),
            ids::CB_SUBSAMPLING_VERT => colour.cb_subsampling_vert = Some(ebml::read_uint(data)?),
            ids::CHROMA_SITING_HORZ => colour.chroma_siting_horz = ebml::read_uint(data)?,
            ids::CHROMA_SITING_VERT => colour.chroma_siting_vert = ebml::read_uint(data)?,
            ids::RANGE => colour.range = ebml::read_uint(data)?,
            ids::TRANSFER_CHARACTERISTICS => {
                colour.transfer_characteristics = ebml::read_uint(data)?
            }
            ids::PRIMARIES => colour.primaries = ebml::read_uint(data)?,
            ids::MAX_CLL => colour.max_cll = Some(ebml::read_uint(data)?),
            ids::MAX_FALL => colour.max_fall = Some(ebml::read_uint(data)?),
            ids::MASTERING_METADATA => {
                colour.mastering_metadata = Some(parse_mastering_metadata(data)?)
            }
            _ => {}
        }
    }
    Ok(colour)
}

fn parse_mastering_metadata(payload: &[u8]) -> Result<MasteringMetadata> {
    let mut metadata = MasteringMetadata::default();
    for child in ebml::children(payload) {
        let child = child?;
        let field = match child.id {
            ids::PRIMARY_R_CHROMATICITY_X => &mut metadata.primary_r_chromaticity_x,
            ids::PRIMARY_R_CHROMATICITY_Y => &mut metadata.primary_r_chromaticity_y,
            ids::PRIMARY_G_CHROMATICITY_X => &mut metadata.primary_g_chromaticity_x,
            ids::PRIMARY_G_CHROMATICITY_Y => &mut metadata.primary_g_chromaticity_y,
            ids::PRIMARY_B_CHROMATICITY_X => &mut metadata.primary_b_chromaticity_x,
            ids::PRIMARY_B_CHROMATICITY_Y => &mut metadata.primary_b_chromaticity_y,
            ids::WHITE_POINT_CHROMATICITY_X => &mut metadata.white_point_chromaticity_x,
            ids::WHITE_POINT_CHROMATICITY_Y => &mut metadata.white_point_chromaticity_y,
            ids::LUMINANCE_MAX => &mut metadata.luminance_max,
            ids::LUMINANCE_MIN => &mut metadata.luminance_min,
            _ => continue,
        };
        *field = Some(ebml::read_float(child.data)?);
    }
    Ok(metadata)
}

fn parse_audio(payload: &[u8]) -> Result<AudioSettings> {
    let mut audio = AudioSettings {
        sampling_frequency: 8000.0,
        channels: 1,
        bit_depth: None,
    };
    for child in ebml::children(payload) {
        let child = child?;
        match child.id {
            ids::SAMPLING_FREQUENCY => audio.sampling_frequency = ebml::read_float(child.data)?,
            ids::CHANNELS => audio.channels = ebml::read_uint(child.data)?,
            ids::BIT_DEPTH => audio.bit_depth = Some(ebml::read_uint(child.data)?),
            _ => {}
        }
    }
    Ok(audio)
}

fn find_content_enc_key_id(payload: &[u8]) -> Result<Option<Vec<u8>>> {
    for encoding in ebml::children(payload) {
        let encoding = encoding?;
        if encoding.id != ids::CONTENT_ENCODING {
            continue;
        }
        for field in ebml::children(encoding.data) {
            let field = field?;
            if field.id != ids::CONTENT_ENCRYPTION {
                continue;
            }
            for setting in ebml::children(field.data) {
                let setting = setting?;
                if setting.id == ids::CONTENT_ENC_KEY_ID {
                    return Ok(Some(setting.data.to_vec()));
                }
            }
        }
    }
    Ok(None)
}

/// The Tracks element
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tracks {
    entries: Vec<Track>,
}

impl Tracks {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut tracks = Tracks::default();
        for child in ebml::children(payload) {
            let child = child?;
            if child.id != ids::TRACK_ENTRY {
                continue;
            }
            let track = Track::parse(child.data)?;
            if tracks.by_number(track.number).is_some() {
                return Err(Error::format(format!(
                    "duplicate track number {}",
                    track.number
                )));
            }
            tracks.entries.push(track);
        }
        Ok(tracks)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.entries.get(index)
    }

    pub fn by_number(&self, number: u64) -> Option<&Track> {
        self.entries.iter().find(|t| t.number == number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.entries.iter()
    }

    /// First track of the given kind
    pub fn first_of(&self, kind: TrackKind) -> Option<&Track> {
        self.entries.iter().find(|t| t.kind() == Some(kind))
    }

    pub fn count(&self, kind: TrackKind) -> usize {
        self.entries.iter().filter(|t| t.kind() == Some(kind)).count()
    }
}

/// Location of one frame's bytes in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub offset: u64,
    pub len: u64,
}

impl FrameRange {
    /// The frame bytes in `buf`, whose first byte sits at stream offset `buf_start`
    pub fn slice<'a>(&self, buf: &'a [u8], buf_start: u64) -> Option<&'a [u8]> {
        let start = usize::try_from(self.offset.checked_sub(buf_start)?).ok()?;
        let end = start.checked_add(usize::try_from(self.len).ok()?)?;
        buf.get(start..end)
    }
}

/// Metadata of one SimpleBlock or BlockGroup; frame data stays in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub track_number: u64,
    pub relative_timecode: i16,
    /// Absolute timestamp in nanoseconds
    pub timestamp_ns: i64,
    pub is_key: bool,
    /// Stream offset of the SimpleBlock or BlockGroup element
    pub element_start: u64,
    /// Size of the block payload (block header plus frame data)
    pub size: u64,
    /// BlockGroup duration in timecode units
    pub duration: Option<u64>,
    pub frames: Vec<FrameRange>,
}

struct BlockCursor<'r, R: ?Sized> {
    reader: &'r R,
    pos: u64,
    end: u64,
}

impl<R: MkvReader + ?Sized> BlockCursor<'_, R> {
    fn bytes(&mut self, out: &mut [u8]) -> Result<Status<()>> {
        if self.pos + out.len() as u64 > self.end {
            return Err(Error::format("block header overruns the block"));
        }
        try_ready!(self.reader.read(self.pos, out));
        self.pos += out.len() as u64;
        Ok(Status::Ready(()))
    }

    fn byte(&mut self) -> Result<Status<u8>> {
        let mut b = [0u8; 1];
        try_ready!(self.bytes(&mut b));
        Ok(Status::Ready(b[0]))
    }

    fn vint(&mut self) -> Result<Status<(u64, usize)>> {
        let mut buf = [0u8; 8];
        buf[0] = try_ready!(self.byte());
        let len = buf[0].leading_zeros() as usize + 1;
        if len > 8 {
            return Err(Error::format("invalid lace or track number"));
        }
        if len > 1 {
            try_ready!(self.bytes(&mut buf[1..len]));
        }
        Ok(Status::Ready(ebml::decode_vint(&buf[..len], 8)?))
    }
}

const LACING_NONE: u8 = 0;
const LACING_XIPH: u8 = 1;
const LACING_FIXED: u8 = 2;
const LACING_EBML: u8 = 3;

/// Decode a block header and its lacing. The whole block must be buffered.
fn parse_block<R: MkvReader + ?Sized>(
    reader: &R,
    header: &ElementHeader,
    cluster_timecode: u64,
    timecode_scale: u64,
) -> Result<Status<Block>> {
    let size = header.known_size()?;
    let end = header.data_start() + size;
    let mut cursor = BlockCursor {
        reader,
        pos: header.data_start(),
        end,
    };

    let (track_number, _) = try_ready!(cursor.vint());
    if track_number == 0 {
        return Err(Error::format("block with track number 0"));
    }
    let mut timecode = [0u8; 2];
    try_ready!(cursor.bytes(&mut timecode));
    let relative_timecode = BigEndian::read_i16(&timecode);
    let flags = try_ready!(cursor.byte());

    let lacing = (flags >> 1) & 0x03;
    let mut lace_sizes = Vec::new();
    let mut frame_count = 1usize;
    if lacing != LACING_NONE {
        frame_count = try_ready!(cursor.byte()) as usize + 1;
        match lacing {
            LACING_XIPH => {
                for _ in 0..frame_count - 1 {
                    let mut lace = 0u64;
                    loop {
                        let b = try_ready!(cursor.byte());
                        lace = lace
                            .checked_add(b as u64)
                            .ok_or_else(|| Error::format("lace sizes overflow"))?;
                        if b != 0xFF {
                            break;
                        }
                    }
                    lace_sizes.push(lace);
                }
            }
            LACING_EBML if frame_count > 1 => {
                let (first, _) = try_ready!(cursor.vint());
                lace_sizes.push(first);
                let mut prev = first as i64;
                for _ in 0..frame_count - 2 {
                    let (raw, len) = try_ready!(cursor.vint());
                    let bias = (1i64 << (7 * len as u32 - 1)) - 1;
                    let lace = prev
                        .checked_add(raw as i64 - bias)
                        .ok_or_else(|| Error::format("lace sizes overflow"))?;
                    if lace < 0 {
                        return Err(Error::format("negative EBML lace size"));
                    }
                    lace_sizes.push(lace as u64);
                    prev = lace;
                }
            }
            _ => {}
        }
    }

    let payload_start = cursor.pos;
    let payload_len = end - payload_start;
    let mut frames = Vec::with_capacity(frame_count);
    match lacing {
        LACING_FIXED => {
            if payload_len % frame_count as u64 != 0 {
                return Err(Error::format("fixed-size lacing does not divide the block"));
            }
            let len = payload_len / frame_count as u64;
            for i in 0..frame_count as u64 {
                frames.push(FrameRange {
                    offset: payload_start + i * len,
                    len,
                });
            }
        }
        LACING_XIPH | LACING_EBML => {
            let laced = lace_sizes
                .iter()
                .try_fold(0u64, |total, &len| total.checked_add(len))
                .ok_or_else(|| Error::format("lace sizes overflow"))?;
            if laced > payload_len {
                return Err(Error::format("lace sizes exceed the block"));
            }
            let mut offset = payload_start;
            for len in lace_sizes.into_iter().chain(std::iter::once(payload_len - laced)) {
                frames.push(FrameRange { offset, len });
                offset += len;
            }
        }
        _ => frames.push(FrameRange {
            offset: payload_start,
            len: payload_len,
        }),
    }

    let timestamp_ns = (cluster_timecode as i64 + relative_timecode as i64)
        .saturating_mul(timecode_scale as i64);
    Ok(Status::Ready(Block {
        track_number,
        relative_timecode,
        timestamp_ns,
        is_key: flags & 0x80 != 0,
        element_start: header.start,
        size,
        duration: None,
        frames,
    }))
}

/// Index of a cluster inside its [`Segment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterHandle(usize);

impl ClusterHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Progress made by one [`Cluster::parse_next`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStep {
    /// One child element was consumed
    Progress,
    /// The cluster is complete
    Complete,
}

/// One Cluster, loaded child by child
#[derive(Debug, Clone)]
pub struct Cluster {
    element_start: u64,
    data_start: u64,
    size: Option<u64>,
    timecode: Option<u64>,
    timecode_scale: u64,
    blocks: Vec<Block>,
    parse_pos: u64,
    element_size: Option<u64>,
}

impl Cluster {
    fn new(header: &ElementHeader, timecode_scale: u64) -> Self {
        Cluster {
            element_start: header.start,
            data_start: header.data_start(),
            size: header.size,
            timecode: None,
            timecode_scale,
            blocks: Vec::new(),
            parse_pos: header.data_start(),
            element_size: None,
        }
    }

    pub fn element_start(&self) -> u64 {
        self.element_start
    }

    /// Total element size (header and payload), known once complete
    pub fn element_size(&self) -> Option<u64> {
        self.element_size
    }

    pub fn is_complete(&self) -> bool {
        self.element_size.is_some()
    }

    /// Whether the cluster was written with an unknown size
    pub fn is_unknown_size(&self) -> bool {
        self.size.is_none()
    }

    /// Cluster timecode in timecode units
    pub fn timecode(&self) -> Option<u64> {
        self.timecode
    }

    /// Cluster time in nanoseconds
    pub fn time_ns(&self) -> i64 {
        self.timecode
            .map_or(0, |tc| (tc as i64).saturating_mul(self.timecode_scale as i64))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// First block belonging to `track_number`
    pub fn first_block_of(&self, track_number: u64) -> Option<&Block> {
        self.blocks.iter().find(|b| b.track_number == track_number)
    }

    /// Drop every block except the first one of each track, which is all
    /// the cue checks look at
    pub fn release_blocks(&mut self) {
        let mut seen = Vec::new();
        self.blocks.retain(|block| {
            if seen.contains(&block.track_number) {
                return false;
            }
            seen.push(block.track_number);
            true
        });
        self.blocks.shrink_to_fit();
    }

    fn finish(&mut self, end: u64) {
        self.element_size = Some(end - self.element_start);
        trace!(
            start = self.element_start,
            end,
            blocks = self.blocks.len(),
            "cluster complete"
        );
    }

    /// Load the next child element.
    ///
    /// Known-size clusters end at their declared size. Unknown-size clusters
    /// end where the next top-level element begins, or at the segment or
    /// stream end.
    pub fn parse_next<R: MkvReader + ?Sized>(
        &mut self,
        reader: &R,
        segment_stop: Option<u64>,
    ) -> Result<Status<ClusterStep>> {
        if self.is_complete() {
            return Ok(Status::Ready(ClusterStep::Complete));
        }
        let length = reader.length();
        let stop = self.size.map(|size| self.data_start + size);
        match stop {
            Some(stop) if self.parse_pos >= stop => {
                self.finish(stop);
                return Ok(Status::Ready(ClusterStep::Complete));
            }
            None if at_end(self.parse_pos, segment_stop, length) => {
                self.finish(self.parse_pos);
                return Ok(Status::Ready(ClusterStep::Complete));
            }
            _ => {}
        }

        let header = try_ready!(ebml::read_element_header(reader, self.parse_pos));
        if stop.is_none() && (ebml::is_level1(header.id) || header.id == ids::EBML) {
            self.finish(self.parse_pos);
            return Ok(Status::Ready(ClusterStep::Complete));
        }
        let size = header.known_size()?;
        let end = header
            .end()?
            .ok_or_else(|| Error::format("cluster child without size"))?;
        if let Some(stop) = stop {
            if end > stop {
                return Err(Error::format(format!(
                    "element {:#x} at {} crosses the cluster end {}",
                    header.id, header.start, stop
                )));
            }
        }
        if let Some(total) = length.total {
            if end > total {
                return Err(Error::format(format!(
                    "element {:#x} at {} runs past end of stream {}",
                    header.id, header.start, total
                )));
            }
        }

        match header.id {
            ids::TIMECODE => {
                let data = try_ready!(ebml::read_payload(reader, header.data_start(), size));
                self.timecode = Some(ebml::read_uint(&data)?);
            }
            ids::SIMPLE_BLOCK => {
                if end > length.available {
                    return Ok(Status::NeedMoreData);
                }
                let timecode = self.require_timecode()?;
                let block = try_ready!(parse_block(reader, &header, timecode, self.timecode_scale));
                self.blocks.push(block);
            }
            ids::BLOCK_GROUP => {
                if end > length.available {
                    return Ok(Status::NeedMoreData);
                }
                let timecode = self.require_timecode()?;
                let block = try_ready!(self.parse_block_group(reader, &header, timecode));
                self.blocks.push(block);
            }
            _ => {
                if end > length.available {
                    return Ok(Status::NeedMoreData);
                }
            }
        }
        self.parse_pos = end;
        Ok(Status::Ready(ClusterStep::Progress))
    }

    fn require_timecode(&self) -> Result<u64> {
        self.timecode.ok_or_else(|| {
            Error::format(format!(
                "block before cluster timecode in cluster at {}",
                self.element_start
            ))
        })
    }

    fn parse_block_group<R: MkvReader + ?Sized>(
        &self,
        reader: &R,
        group: &ElementHeader,
        timecode: u64,
    ) -> Result<Status<Block>> {
        let group_end = group.data_start() + group.known_size()?;
        let mut pos = group.data_start();
        let mut block = None;
        let mut duration = None;
        let mut referenced = false;
        while pos < group_end {
            let child = try_ready!(ebml::read_element_header(reader, pos));
            let size = child.known_size()?;
            let end = child.data_start() + size;
            if end > group_end {
                return Err(Error::format("BlockGroup child overruns its group"));
            }
            match child.id {
                ids::BLOCK => {
                    block = Some(try_ready!(parse_block(
                        reader,
                        &child,
                        timecode,
                        self.timecode_scale
                    )));
                }
                ids::BLOCK_DURATION => {
                    let data = try_ready!(ebml::read_payload(reader, child.data_start(), size));
                    duration = Some(ebml::read_uint(&data)?);
                }
                ids::REFERENCE_BLOCK => referenced = true,
                _ => {}
            }
            pos = end;
        }
        let mut block = block.ok_or_else(|| Error::format("BlockGroup without a Block"))?;
        block.element_start = group.start;
        block.is_key = !referenced;
        block.duration = duration;
        Ok(Status::Ready(block))
    }
}

fn at_end(pos: u64, segment_stop: Option<u64>, length: StreamLength) -> bool {
    segment_stop.map_or(false, |stop| pos >= stop) || length.total.map_or(false, |t| pos >= t)
}

/// One CueTrackPositions entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueTrackPosition {
    pub track: u64,
    /// Cluster offset relative to the segment payload start
    pub cluster_position: u64,
    pub relative_position: Option<u64>,
    pub block_number: Option<u64>,
}

/// One CuePoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuePoint {
    /// Cue time in timecode units
    pub time: u64,
    pub positions: Vec<CueTrackPosition>,
}

impl CuePoint {
    fn parse(payload: &[u8]) -> Result<Self> {
        let mut time = None;
        let mut positions = Vec::new();
        for child in ebml::children(payload) {
            let child = child?;
            match child.id {
                ids::CUE_TIME => time = Some(ebml::read_uint(child.data)?),
                ids::CUE_TRACK_POSITIONS => {
                    let mut position = CueTrackPosition {
                        track: 0,
                        cluster_position: 0,
                        relative_position: None,
                        block_number: None,
                    };
                    for field in ebml::children(child.data) {
                        let field = field?;
                        match field.id {
                            ids::CUE_TRACK => position.track = ebml::read_uint(field.data)?,
                            ids::CUE_CLUSTER_POSITION => {
                                position.cluster_position = ebml::read_uint(field.data)?
                            }
                            ids::CUE_RELATIVE_POSITION => {
                                position.relative_position = Some(ebml::read_uint(field.data)?)
                            }
                            ids::CUE_BLOCK_NUMBER => {
                                position.block_number = Some(ebml::read_uint(field.data)?)
                            }
                            _ => {}
                        }
                    }
                    positions.push(position);
                }
                _ => {}
            }
        }
        let time = time.ok_or_else(|| Error::format("CuePoint without CueTime"))?;
        Ok(CuePoint { time, positions })
    }

    /// Cue time in nanoseconds
    pub fn time_ns(&self, timecode_scale: u64) -> i64 {
        (self.time as i64).saturating_mul(timecode_scale as i64)
    }

    pub fn position_for(&self, track: u64) -> Option<&CueTrackPosition> {
        self.positions.iter().find(|p| p.track == track)
    }
}

/// The Cues element. Its payload is kept and cue points are decoded lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct Cues {
    element_start: u64,
    payload: Vec<u8>,
    parse_pos: usize,
    points: Vec<CuePoint>,
}

impl Cues {
    fn new(element_start: u64, payload: Vec<u8>) -> Self {
        Cues {
            element_start,
            payload,
            parse_pos: 0,
            points: Vec::new(),
        }
    }

    pub fn element_start(&self) -> u64 {
        self.element_start
    }

    /// Decode the next CuePoint; returns false once every point is loaded
    pub fn load_cue_point(&mut self) -> Result<bool> {
        while self.parse_pos < self.payload.len() {
            let mut iter = ebml::children(&self.payload[self.parse_pos..]);
            let child = match iter.next() {
                Some(child) => child?,
                None => break,
            };
            self.parse_pos += iter.offset();
            if child.id == ids::CUE_POINT {
                self.points.push(CuePoint::parse(child.data)?);
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn load_all(&mut self) -> Result<()> {
        while self.load_cue_point()? {}
        Ok(())
    }

    pub fn done_parsing(&self) -> bool {
        self.parse_pos >= self.payload.len()
    }

    /// Cue points decoded so far
    pub fn points(&self) -> &[CuePoint] {
        &self.points
    }

    /// Last cue point at or before `time_ns` that references `track`
    pub fn find(&self, time_ns: i64, track: u64, timecode_scale: u64) -> Option<&CuePoint> {
        self.points
            .iter()
            .filter(|p| p.position_for(track).is_some())
            .take_while(|p| p.time_ns(timecode_scale) <= time_ns)
            .last()
    }
}

/// What [`Segment::load_cluster`] found at a top-level position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadCluster {
    /// A cluster header was read and the cluster opened
    Opened(ClusterHandle),
    /// A complete non-cluster element of `len` bytes was read or skipped
    Skipped { id: u32, len: u64 },
    /// No more clusters: the segment or stream end was reached
    End,
}

/// The Segment with its headers and the clusters loaded so far
#[derive(Debug, Clone)]
pub struct Segment {
    element_start: u64,
    start: u64,
    size: Option<u64>,
    info: Option<SegmentInfo>,
    tracks: Option<Tracks>,
    cues: Option<Cues>,
    clusters: Vec<Cluster>,
    pos: u64,
    headers_done: bool,
}

impl Segment {
    /// Read the Segment element header at `pos`
    pub fn create_instance<R: MkvReader + ?Sized>(reader: &R, pos: u64) -> Result<Status<Segment>> {
        let header = try_ready!(ebml::read_element_header(reader, pos));
        if header.id != ids::SEGMENT {
            return Err(Error::format(format!(
                "expected Segment at offset {}, found id {:#x}",
                pos, header.id
            )));
        }
        header.end()?;
        debug!(
            start = header.data_start(),
            size = ?header.size,
            "segment header"
        );
        Ok(Status::Ready(Segment {
            element_start: header.start,
            start: header.data_start(),
            size: header.size,
            info: None,
            tracks: None,
            cues: None,
            clusters: Vec::new(),
            pos: header.data_start(),
            headers_done: false,
        }))
    }

    /// Stream offset of the Segment ID
    pub fn element_start(&self) -> u64 {
        self.element_start
    }

    /// Stream offset of the first Segment payload byte
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Payload size; `None` for live streams
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// One past the last payload byte, when the size is known
    pub fn stop(&self) -> Option<u64> {
        self.size.map(|size| self.start + size)
    }

    /// Offset where the header group ends (the first Cluster or segment end)
    pub fn headers_end(&self) -> Option<u64> {
        self.headers_done.then_some(self.pos)
    }

    pub fn reached_end(&self, pos: u64, length: StreamLength) -> bool {
        at_end(pos, self.stop(), length)
    }

    /// Load the level-1 elements preceding the first Cluster.
    ///
    /// Resumes from the last complete element on each call.
    pub fn parse_headers<R: MkvReader + ?Sized>(&mut self, reader: &R) -> Result<Status<()>> {
        if self.headers_done {
            return Ok(Status::Ready(()));
        }
        loop {
            if self.reached_end(self.pos, reader.length()) {
                break;
            }
            let header = try_ready!(ebml::read_element_header(reader, self.pos));
            if header.id == ids::CLUSTER {
                break;
            }
            let end = try_ready!(self.load_level1(reader, &header));
            trace!(id = header.id, start = header.start, end, "level 1 element");
            self.pos = end;
        }

        if self.info.is_none() {
            return Err(Error::format("segment has no Info element"));
        }
        match &self.tracks {
            Some(tracks) if !tracks.is_empty() => {}
            _ => return Err(Error::format("segment has no tracks")),
        }
        self.headers_done = true;
        Ok(Status::Ready(()))
    }

    /// Read or skip one complete non-cluster level-1 element, returning its end
    fn load_level1<R: MkvReader + ?Sized>(
        &mut self,
        reader: &R,
        header: &ElementHeader,
    ) -> Result<Status<u64>> {
        if header.id == ids::EBML || header.id == ids::SEGMENT {
            return Err(Error::unsupported("chained segments"));
        }
        let size = header.known_size()?;
        let end = header
            .end()?
            .ok_or_else(|| Error::format("level 1 element without size"))?;
        if let Some(stop) = self.stop() {
            if end > stop {
                return Err(Error::format(format!(
                    "element {:#x} at {} crosses the segment end {}",
                    header.id, header.start, stop
                )));
            }
        }
        match header.id {
            ids::INFO => {
                let data = try_ready!(ebml::read_payload(reader, header.data_start(), size));
                if self.info.is_some() {
                    return Err(Error::format("duplicate Info element"));
                }
                self.info = Some(SegmentInfo::parse(&data)?);
            }
            ids::TRACKS => {
                let data = try_ready!(ebml::read_payload(reader, header.data_start(), size));
                if self.tracks.is_some() {
                    return Err(Error::format("duplicate Tracks element"));
                }
                self.tracks = Some(Tracks::parse(&data)?);
            }
            ids::CUES => {
                let data = try_ready!(ebml::read_payload(reader, header.data_start(), size));
                self.cues = Some(Cues::new(header.start, data));
            }
            _ => {
                if let Some(total) = reader.length().total {
                    if end > total {
                        return Err(Error::format(format!(
                            "element {:#x} at {} runs past end of stream {}",
                            header.id, header.start, total
                        )));
                    }
                }
                if end > reader.length().available {
                    return Ok(Status::NeedMoreData);
                }
            }
        }
        Ok(Status::Ready(end))
    }

    /// Open the cluster starting at `pos`, or consume the non-cluster
    /// element found there.
    pub fn load_cluster<R: MkvReader + ?Sized>(
        &mut self,
        reader: &R,
        pos: u64,
    ) -> Result<Status<LoadCluster>> {
        if self.reached_end(pos, reader.length()) {
            return Ok(Status::Ready(LoadCluster::End));
        }
        let header = try_ready!(ebml::read_element_header(reader, pos));
        if header.id == ids::CLUSTER {
            let cluster = Cluster::new(&header, self.timecode_scale());
            self.clusters.push(cluster);
            let handle = ClusterHandle(self.clusters.len() - 1);
            trace!(index = handle.0, start = pos, "cluster opened");
            return Ok(Status::Ready(LoadCluster::Opened(handle)));
        }
        let end = try_ready!(self.load_level1(reader, &header));
        Ok(Status::Ready(LoadCluster::Skipped {
            id: header.id,
            len: end - pos,
        }))
    }

    pub fn info(&self) -> Option<&SegmentInfo> {
        self.info.as_ref()
    }

    pub fn tracks(&self) -> Option<&Tracks> {
        self.tracks.as_ref()
    }

    pub fn cues(&self) -> Option<&Cues> {
        self.cues.as_ref()
    }

    pub fn cues_mut(&mut self) -> Option<&mut Cues> {
        self.cues.as_mut()
    }

    pub fn timecode_scale(&self) -> u64 {
        self.info
            .as_ref()
            .map_or(DEFAULT_TIMECODE_SCALE, |info| info.timecode_scale)
    }

    /// Clusters opened so far, in stream order
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster(&self, handle: ClusterHandle) -> Option<&Cluster> {
        self.clusters.get(handle.0)
    }

    pub fn cluster_mut(&mut self, handle: ClusterHandle) -> Option<&mut Cluster> {
        self.clusters.get_mut(handle.0)
    }

    /// Last complete cluster whose time is at or before `time_ns`
    pub fn find_cluster(&self, time_ns: i64) -> Option<&Cluster> {
        self.clusters
            .iter()
            .filter(|c| c.is_complete())
            .take_while(|c| c.time_ns() <= time_ns)
            .last()
    }
}
