//! Common test utilities for webm-live integration tests
//!
//! Builds small WebM streams with the crate's own muxer, assembles
//! malformed input by hand, and drives the incremental parser the way a
//! network reader would.

#![allow(dead_code)]

use std::io::Cursor;
use webm_live::format::webm::ebml::{self, ids};
use webm_live::format::webm::{FileWriter, MuxMode, SegmentMuxer, SegmentSettings};
use webm_live::{IncrementalParser, LiveMuxer, Parsed, ParserState, TrackKind};

pub const VIDEO_WIDTH: u64 = 320;
pub const VIDEO_HEIGHT: u64 = 240;
pub const AUDIO_RATE: f64 = 48000.0;
pub const AUDIO_CHANNELS: u64 = 2;

/// OpusHead identification header, 2 channels, 48 kHz
pub const OPUS_HEAD: &[u8] = b"OpusHead\x01\x02\x38\x01\x80\xbb\x00\x00\x00\x00\x00";

pub const MS: u64 = 1_000_000;

// ============================================================================
// Frame Generation
// ============================================================================

/// One frame handed to a muxer
#[derive(Debug, Clone)]
pub struct TestFrame {
    pub kind: TrackKind,
    pub timestamp_ns: u64,
    pub is_key: bool,
    pub data: Vec<u8>,
}

/// Frame payload of `len` bytes with a recognizable pattern
pub fn frame_payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Video-only frames: `clusters` keyframes one second apart, each followed
/// by `deltas` delta frames 100 ms apart.
pub fn video_frames(clusters: usize, deltas: usize) -> Vec<TestFrame> {
    let mut frames = Vec::new();
    for c in 0..clusters {
        let base = c as u64 * 1000 * MS;
        for f in 0..=deltas {
            frames.push(TestFrame {
                kind: TrackKind::Video,
                timestamp_ns: base + f as u64 * 100 * MS,
                is_key: f == 0,
                data: frame_payload((c * 16 + f) as u8, 40 + f * 3),
            });
        }
    }
    frames
}

/// Interleaved audio/video frames producing one cluster per video keyframe:
/// per cluster a keyframe, two delta frames and two audio frames.
pub fn av_frames(clusters: usize) -> Vec<TestFrame> {
    let mut frames = Vec::new();
    for c in 0..clusters {
        let base = c as u64 * 1000 * MS;
        let seed = (c * 16) as u8;
        frames.push(video(base, true, frame_payload(seed, 60)));
        frames.push(audio(base + 50 * MS, frame_payload(seed + 1, 20)));
        frames.push(video(base + 100 * MS, false, frame_payload(seed + 2, 30)));
        frames.push(audio(base + 150 * MS, frame_payload(seed + 3, 20)));
        frames.push(video(base + 200 * MS, false, frame_payload(seed + 4, 30)));
    }
    frames
}

pub fn video(timestamp_ns: u64, is_key: bool, data: Vec<u8>) -> TestFrame {
    TestFrame {
        kind: TrackKind::Video,
        timestamp_ns,
        is_key,
        data,
    }
}

pub fn audio(timestamp_ns: u64, data: Vec<u8>) -> TestFrame {
    TestFrame {
        kind: TrackKind::Audio,
        timestamp_ns,
        is_key: true,
        data,
    }
}

// ============================================================================
// Muxing
// ============================================================================

/// Mux `frames` with `settings` into an in-memory stream. Tracks are
/// created for the kinds that occur in `frames`, video first.
pub fn mux(frames: &[TestFrame], settings: SegmentSettings) -> Vec<u8> {
    let writer = FileWriter::new(Cursor::new(Vec::new())).unwrap();
    let mut muxer = SegmentMuxer::new(writer, settings).unwrap();

    let mut video_track = None;
    let mut audio_track = None;
    if frames.iter().any(|f| f.kind == TrackKind::Video) {
        let track = muxer.add_video_track(VIDEO_WIDTH, VIDEO_HEIGHT).unwrap();
        video_track = Some(track);
    }
    if frames.iter().any(|f| f.kind == TrackKind::Audio) {
        let track = muxer.add_audio_track(AUDIO_RATE, AUDIO_CHANNELS).unwrap();
        muxer.set_codec_id(track, "A_OPUS").unwrap();
        muxer.set_codec_private(track, OPUS_HEAD).unwrap();
        audio_track = Some(track);
    }

    for frame in frames {
        let track = match frame.kind {
            TrackKind::Video => video_track.unwrap(),
            TrackKind::Audio => audio_track.unwrap(),
        };
        muxer
            .write_frame(&frame.data, track, frame.timestamp_ns, frame.is_key)
            .unwrap();
    }
    muxer.finalize().unwrap();
    muxer.into_writer().into_inner().into_inner()
}

/// File-mode stream with sizes, duration and cues
pub fn mux_file(frames: &[TestFrame]) -> Vec<u8> {
    mux(frames, SegmentSettings::file())
}

/// File-mode stream with neither cues nor duration
pub fn mux_file_plain(frames: &[TestFrame]) -> Vec<u8> {
    mux(
        frames,
        SegmentSettings {
            output_cues: false,
            write_duration: false,
            ..SegmentSettings::file()
        },
    )
}

/// Live-mode stream: unknown Segment and Cluster sizes, no cues
pub fn mux_live(frames: &[TestFrame]) -> Vec<u8> {
    let settings = SegmentSettings::live();
    assert_eq!(settings.mode, MuxMode::Live);
    mux(frames, settings)
}

/// File-mode stream matching what [`LiveMuxer`] with its default config
/// writes for the same frames, apart from the size fields
pub fn mux_file_like_live(frames: &[TestFrame]) -> Vec<u8> {
    mux(
        frames,
        SegmentSettings {
            output_cues: false,
            write_duration: false,
            writing_app: "webm-live".to_string(),
            ..SegmentSettings::file()
        },
    )
}

/// Push `frames` through `muxer`, draining every chunk as soon as it is
/// ready. Tracks are added first for the kinds that occur in `frames`.
pub fn live_chunks_with(muxer: &mut LiveMuxer, frames: &[TestFrame]) -> Vec<Vec<u8>> {
    if !muxer.initialized() {
        muxer.init().unwrap();
    }
    if frames.iter().any(|f| f.kind == TrackKind::Video) {
        muxer
            .add_video_track(VIDEO_WIDTH as u32, VIDEO_HEIGHT as u32)
            .unwrap();
    }
    if frames.iter().any(|f| f.kind == TrackKind::Audio) {
        muxer
            .add_audio_track_with_codec(AUDIO_RATE as u32, AUDIO_CHANNELS as u16, OPUS_HEAD, "A_OPUS")
            .unwrap();
    }

    let mut chunks = Vec::new();
    for frame in frames {
        match frame.kind {
            TrackKind::Video => muxer
                .write_video_frame(&frame.data, frame.timestamp_ns, frame.is_key)
                .unwrap(),
            TrackKind::Audio => muxer
                .write_audio_frame(&frame.data, frame.timestamp_ns, frame.is_key)
                .unwrap(),
        }
        while let Some(chunk) = muxer.take_chunk() {
            chunks.push(chunk.to_vec());
        }
    }
    muxer.finalize().unwrap();
    while let Some(chunk) = muxer.take_chunk() {
        chunks.push(chunk.to_vec());
    }
    chunks
}

pub fn live_chunks(frames: &[TestFrame]) -> Vec<Vec<u8>> {
    live_chunks_with(&mut LiveMuxer::new(), frames)
}

/// Zero the 8-byte size fields of the Segment and of every Cluster, as
/// located by parsing `reference`
pub fn mask_size_fields(reference: &[u8], outputs: &mut [&mut Vec<u8>]) {
    let (parser, _) = parse_all(reference, 64);
    let segment = parser.segment().unwrap();
    let mut starts = vec![segment.element_start()];
    starts.extend(segment.clusters().iter().map(|c| c.element_start()));
    for start in starts {
        let from = start as usize + 4;
        for output in outputs.iter_mut() {
            output[from..from + 8].fill(0);
        }
    }
}

// ============================================================================
// Hand-assembled EBML
// ============================================================================

pub fn element(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    ebml::write_element(&mut out, id, payload);
    out
}

pub fn uint_element(id: u32, value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    ebml::write_uint_element(&mut out, id, value);
    out
}

pub fn string_element(id: u32, value: &str) -> Vec<u8> {
    let mut out = Vec::new();
    ebml::write_string_element(&mut out, id, value);
    out
}

/// EBML header declaring `doc_type`
pub fn ebml_header(doc_type: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend(uint_element(ids::EBML_VERSION, 1));
    payload.extend(uint_element(ids::EBML_READ_VERSION, 1));
    payload.extend(string_element(ids::DOC_TYPE, doc_type));
    payload.extend(uint_element(ids::DOC_TYPE_VERSION, 4));
    payload.extend(uint_element(ids::DOC_TYPE_READ_VERSION, 2));
    element(ids::EBML, &payload)
}

/// Segment element with a known size holding `children`
pub fn segment(children: &[Vec<u8>]) -> Vec<u8> {
    element(ids::SEGMENT, &children.concat())
}

pub fn info() -> Vec<u8> {
    let mut payload = uint_element(ids::TIMECODE_SCALE, 1_000_000);
    payload.extend(string_element(ids::MUXING_APP, "test"));
    payload.extend(string_element(ids::WRITING_APP, "test"));
    element(ids::INFO, &payload)
}

/// Tracks holding one VP8 video track numbered `number`
pub fn video_tracks(number: u64) -> Vec<u8> {
    let mut video = uint_element(ids::PIXEL_WIDTH, VIDEO_WIDTH);
    video.extend(uint_element(ids::PIXEL_HEIGHT, VIDEO_HEIGHT));
    let mut entry = uint_element(ids::TRACK_NUMBER, number);
    entry.extend(uint_element(ids::TRACK_UID, 1));
    entry.extend(uint_element(ids::TRACK_TYPE, 1));
    entry.extend(string_element(ids::CODEC_ID, "V_VP8"));
    entry.extend(element(ids::VIDEO, &video));
    element(ids::TRACKS, &element(ids::TRACK_ENTRY, &entry))
}

/// Cluster at `timecode` holding the given raw children
pub fn cluster(timecode: u64, children: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = uint_element(ids::TIMECODE, timecode);
    payload.extend(children.concat());
    element(ids::CLUSTER, &payload)
}

/// SimpleBlock without lacing
pub fn simple_block(track: u8, relative: i16, key: bool, frame: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x80 | track];
    payload.extend_from_slice(&relative.to_be_bytes());
    payload.push(if key { 0x80 } else { 0x00 });
    payload.extend_from_slice(frame);
    element(ids::SIMPLE_BLOCK, &payload)
}

// ============================================================================
// Parser Driving
// ============================================================================

/// One `parse_next` call as observed by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state_before: ParserState,
    pub parsed: Parsed,
    pub fed: u64,
}

/// Feed `data` into `parser` growing the window by `step` bytes whenever a
/// call consumes nothing. Stops at Done, on the first error, or when all
/// bytes are buffered and the parser still wants more.
pub fn drive(
    parser: &mut IncrementalParser,
    data: &[u8],
    step: usize,
) -> (Vec<Step>, webm_live::Result<()>) {
    let mut steps = Vec::new();
    let mut start = 0usize;
    let mut available = step.min(data.len());
    loop {
        let state_before = parser.state();
        let parsed = match parser.parse_next(&data[start..available]) {
            Ok(parsed) => parsed,
            Err(err) => return (steps, Err(err)),
        };
        steps.push(Step {
            state_before,
            parsed,
            fed: available as u64,
        });
        start += parsed.consumed;
        if parsed.state == ParserState::Done {
            return (steps, Ok(()));
        }
        if parsed.consumed > 0 {
            continue;
        }
        if available == data.len() {
            return (steps, Ok(()));
        }
        available = (available + step).min(data.len());
    }
}

/// Parse a complete stream with the end position declared up front
pub fn parse_all(data: &[u8], step: usize) -> (IncrementalParser, Vec<Step>) {
    let mut parser = IncrementalParser::new();
    parser.set_end_of_file_position(data.len() as u64).unwrap();
    let (steps, result) = drive(&mut parser, data, step);
    result.unwrap();
    assert_eq!(parser.state(), ParserState::Done);
    (parser, steps)
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
