//! Incremental parser integration tests
//!
//! Streams are produced by the crate's muxer or assembled by hand and fed
//! to the parser in small pieces, the way bytes arrive from a socket.

use webm_live::format::webm::ebml::ids;
use webm_live::{IncrementalParser, ParserState, TrackKind};

#[path = "common/mod.rs"]
mod common;

use common::*;

// ============================================================================
// Feeding
// ============================================================================

#[test]
fn test_four_byte_feeds_yield_headers_then_one_unit_per_cluster() {
    let data = mux_file_plain(&video_frames(3, 2));
    let mut parser = IncrementalParser::new();
    parser.set_end_of_file_position(data.len() as u64).unwrap();

    let mut start = 0usize;
    let mut available = 0usize;
    let mut header_calls = 0;
    let mut header_units = 0;
    let mut cluster_units = Vec::new();
    let mut saw_track_count = false;

    loop {
        let before = parser.state();
        let parsed = parser.parse_next(&data[start..available]).unwrap();
        match before {
            ParserState::ParsingHeader => {
                header_calls += 1;
                if parsed.consumed > 0 {
                    header_units += 1;
                    assert_eq!(parsed.state, ParserState::ParsingClusters);
                } else {
                    assert_eq!(parsed.state, ParserState::ParsingHeader);
                }
            }
            ParserState::ParsingClusters => {
                assert_eq!(parser.track_count(TrackKind::Video).ok(), Some(1));
                saw_track_count = true;
                if parsed.consumed > 0 {
                    cluster_units.push(parsed.consumed);
                }
            }
            other => panic!("unexpected state {:?}", other),
        }
        start += parsed.consumed;
        if parsed.state == ParserState::Done {
            break;
        }
        if parsed.consumed == 0 {
            assert!(available < data.len(), "stalled with every byte buffered");
            available = (available + 4).min(data.len());
        }
    }

    assert!(header_calls > 1);
    assert_eq!(header_units, 1);
    assert_eq!(cluster_units.len(), 3);
    assert!(saw_track_count);
    assert_eq!(start, data.len());
    assert_eq!(parser.total_bytes_parsed(), data.len() as u64);

    let segment = parser.segment().unwrap();
    let clusters = segment.clusters();
    assert_eq!(clusters.len(), 3);
    for (cluster, consumed) in clusters.iter().zip(&cluster_units) {
        assert_eq!(cluster.element_size(), Some(*consumed as u64));
        assert!(!cluster.is_unknown_size());
    }
}

#[test]
fn test_whole_stream_in_one_buffer() {
    let data = mux_file_plain(&video_frames(2, 1));
    let mut parser = IncrementalParser::new();

    let headers = parser.parse_next(&data).unwrap();
    assert_eq!(headers.state, ParserState::ParsingClusters);
    let first_cluster = parser.segment().unwrap().headers_end().unwrap();
    assert_eq!(headers.consumed as u64, first_cluster);
    assert_eq!(&data[headers.consumed..headers.consumed + 4], &[0x1F, 0x43, 0xB6, 0x75]);

    let mut start = headers.consumed;
    let mut clusters = 0;
    loop {
        let parsed = parser.parse_next(&data[start..]).unwrap();
        if parsed.consumed == 0 {
            assert_eq!(parsed.state, ParserState::Done);
            break;
        }
        clusters += 1;
        start += parsed.consumed;
    }
    assert_eq!(clusters, 2);
    assert_eq!(start, data.len());
}

#[test]
fn test_done_is_sticky() {
    let data = mux_file_plain(&video_frames(1, 0));
    let (mut parser, _) = parse_all(&data, 64);
    let again = parser.parse_next(&[0xAA; 8]).unwrap();
    assert_eq!(again.state, ParserState::Done);
    assert_eq!(again.consumed, 0);
}

// ============================================================================
// Aggregates
// ============================================================================

#[test]
fn test_track_statistics() {
    let data = mux_file(&av_frames(3));
    let (parser, _) = parse_all(&data, 7);

    assert_eq!(parser.track_count(TrackKind::Video).ok(), Some(1));
    assert_eq!(parser.track_count(TrackKind::Audio).ok(), Some(1));
    assert_eq!(parser.track_frame_count(TrackKind::Video).ok(), Some(9));
    assert_eq!(parser.track_frame_count(TrackKind::Audio).ok(), Some(6));
    // Block payload = 4 header bytes + frame
    assert_eq!(parser.track_size(TrackKind::Video).ok(), Some(3 * (64 + 34 + 34)));
    assert_eq!(parser.track_size(TrackKind::Audio).ok(), Some(6 * 24));
    assert_eq!(parser.track_start_ns(TrackKind::Video).ok(), Some(0));
    assert_eq!(parser.track_start_ns(TrackKind::Audio).ok(), Some(50 * MS as i64));

    let stats = parser.track_stats(2).ok().flatten().unwrap();
    assert_eq!(stats.frames, 6);
    assert_eq!(stats.first_timestamp_ns, Some(50 * MS as i64));
    assert_eq!(parser.track_stats(9).ok(), Some(None));
}

#[test]
fn test_header_values() {
    let data = mux_file(&av_frames(3));
    let (parser, _) = parse_all(&data, 32);

    assert_eq!(parser.has_video().ok(), Some(true));
    assert_eq!(parser.has_audio().ok(), Some(true));
    assert_eq!(parser.video_width().ok(), Some(VIDEO_WIDTH));
    assert_eq!(parser.video_height().ok(), Some(VIDEO_HEIGHT));
    assert_eq!(parser.audio_channels().ok(), Some(AUDIO_CHANNELS));
    assert_eq!(parser.audio_sample_rate().ok(), Some(AUDIO_RATE));
    assert_eq!(parser.audio_sample_size().ok(), Some(0));
    assert_eq!(parser.codec().ok().as_deref(), Some("vp8, opus"));
    assert_eq!(parser.mime_type().ok().as_deref(), Some("video/webm"));
    assert_eq!(
        parser.mime_type_with_codec().ok().as_deref(),
        Some("video/webm; codecs=\"vp8, opus\"")
    );
    assert_eq!(parser.only_one_stream().ok(), Some(false));
    assert_eq!(parser.timecode_scale_ns().ok(), Some(1_000_000));
    assert_eq!(parser.file_length().ok(), Some(data.len() as u64));

    // Last frame sits at 2.2 s
    assert_eq!(parser.duration_ns().ok(), Some(2_200_000_000));
    let fps = parser.video_frame_rate().ok().unwrap();
    assert!((fps - 9.0 / 2.2).abs() < 1e-9);

    let header = parser.ebml_header().unwrap();
    assert_eq!(header.doc_type, "webm");
    let segment = parser.segment().unwrap();
    assert_eq!(parser.segment_start_offset().ok(), Some(segment.start()));
    assert_eq!(segment.element_start() + 12, segment.start());

    let tracks = parser.tracks().ok().flatten().unwrap();
    let opus = tracks.by_number(2).unwrap();
    assert_eq!(opus.codec_id, "A_OPUS");
    assert_eq!(opus.codec_private, OPUS_HEAD);
    assert_eq!(opus.codec_delay, 6_500_000);
    assert_eq!(opus.seek_pre_roll, 80_000_000);
}

#[test]
fn test_audio_only_stream() {
    let frames: Vec<_> = (0..5)
        .map(|i| audio(i * 20 * MS, frame_payload(i as u8, 16)))
        .collect();
    let data = mux_file(&frames);
    let (parser, _) = parse_all(&data, 16);

    assert_eq!(parser.mime_type().ok().as_deref(), Some("audio/webm"));
    assert_eq!(parser.only_one_stream().ok(), Some(true));
    assert_eq!(parser.has_video().ok(), Some(false));
    assert_eq!(parser.video_width().ok(), Some(0));
    assert_eq!(parser.track_frame_count(TrackKind::Audio).ok(), Some(5));

    // Without video every audio frame that opens a cluster is cued
    let cues = parser.cues().ok().flatten().unwrap();
    assert_eq!(cues.points().len(), 1);
    assert_eq!(parser.cues_first_in_cluster(TrackKind::Audio).ok(), Some(true));
}

#[test]
fn test_bitrates() {
    let data = mux_file(&av_frames(3));
    let (parser, _) = parse_all(&data, 100);

    let expected_file = (data.len() as f64 * 8.0 / 2.2) as u64;
    assert_eq!(parser.file_average_bits_per_second().ok(), Some(expected_file));
    let expected_video = (3.0 * 132.0 * 8.0 / 2.2) as u64;
    assert_eq!(
        parser.track_average_bits_per_second(TrackKind::Video).ok(),
        Some(expected_video)
    );
    let max = parser.file_maximum_bits_per_second().ok().unwrap();
    assert!(max > 0);
}

#[test]
fn test_aggregates_grow_cluster_by_cluster() {
    let data = mux_file(&av_frames(2));
    let mut parser = IncrementalParser::new();
    parser.set_end_of_file_position(data.len() as u64).unwrap();

    let headers = parser.parse_next(&data).unwrap();
    assert_eq!(headers.state, ParserState::ParsingClusters);
    assert_eq!(parser.track_frame_count(TrackKind::Video).ok(), Some(0));
    assert_eq!(parser.track_size(TrackKind::Audio).ok(), Some(0));

    let mut start = headers.consumed;
    let first = parser.parse_next(&data[start..]).unwrap();
    assert!(first.consumed > 0);
    start += first.consumed;

    let frames = parser.track_frame_count(TrackKind::Video);
    assert!(frames.ready);
    assert_eq!(frames.state, ParserState::ParsingClusters);
    assert_eq!(frames.ok(), Some(3));
    assert_eq!(parser.track_frame_count(TrackKind::Audio).ok(), Some(2));
    let video_bytes = parser.track_size(TrackKind::Video).ok().unwrap();
    assert!(video_bytes >= 120);
    assert!(parser.track_average_bits_per_second(TrackKind::Video).ok().unwrap() > 0);
    assert!(parser.video_frame_rate().ok().unwrap() > 0.0);

    // Cue-derived values still wait for Done
    assert!(parser.cues().ok().is_none());
    assert!(parser.has_cues().ok().is_none());

    let running = parser.track_stats(1).ok().flatten().unwrap();
    assert_eq!(running.frames, 3);
    assert_eq!(parser.video_width().ok(), Some(VIDEO_WIDTH));
    assert_eq!(parser.last_cluster().unwrap().blocks().len(), 5);

    let second = parser.parse_next(&data[start..]).unwrap();
    assert!(second.consumed > 0);
    assert_eq!(parser.track_frame_count(TrackKind::Video).ok(), Some(6));
    assert_eq!(parser.track_frame_count(TrackKind::Audio).ok(), Some(4));
    assert_eq!(
        parser.track_size(TrackKind::Video).ok(),
        Some(video_bytes * 2)
    );
}

// ============================================================================
// Cues
// ============================================================================

#[test]
fn test_cues_point_at_cluster_keyframes() {
    let data = mux_file(&av_frames(3));
    let (parser, _) = parse_all(&data, 5);

    assert_eq!(parser.has_cues().ok(), Some(true));
    assert_eq!(parser.cues_first_in_cluster(TrackKind::Video).ok(), Some(true));

    let cues = parser.cues().ok().flatten().unwrap();
    assert!(cues.done_parsing());
    assert_eq!(cues.points().len(), 3);

    let segment = parser.segment().unwrap();
    for (point, cluster) in cues.points().iter().zip(segment.clusters()) {
        let position = point.position_for(1).unwrap();
        assert_eq!(position.cluster_position + segment.start(), cluster.element_start());
        assert_eq!(point.time_ns(segment.timecode_scale()), cluster.time_ns());
    }

    let found = cues.find(1_500 * MS as i64, 1, segment.timecode_scale()).unwrap();
    assert_eq!(found.time_ns(segment.timecode_scale()), 1_000 * MS as i64);
}

#[test]
fn test_cues_consumed_as_their_own_unit() {
    let data = mux_file(&av_frames(2));
    let (_, steps) = parse_all(&data, 3);
    let cues_at = find(&data, &[0x1C, 0x53, 0xBB, 0x6B]).unwrap();

    let units: Vec<_> = steps.iter().filter(|s| s.parsed.consumed > 0).collect();
    // headers, two clusters, cues
    assert_eq!(units.len(), 4);
    assert_eq!(units[3].parsed.consumed, data.len() - cues_at);
}

#[test]
fn test_trimmed_clusters_keep_stats_and_cues() {
    let data = mux_file(&av_frames(3));
    let mut parser = IncrementalParser::new();
    parser.set_retain_cluster_blocks(false);
    parser.set_end_of_file_position(data.len() as u64).unwrap();
    let (_, result) = drive(&mut parser, &data, 7);
    result.unwrap();
    assert_eq!(parser.state(), ParserState::Done);

    let clusters = parser.segment().unwrap().clusters();
    // First video and first audio block of each earlier cluster survive
    assert_eq!(clusters[0].blocks().len(), 2);
    assert_eq!(clusters[1].blocks().len(), 2);
    assert_eq!(parser.last_cluster().unwrap().blocks().len(), 5);

    assert_eq!(parser.track_frame_count(TrackKind::Video).ok(), Some(9));
    assert_eq!(parser.track_frame_count(TrackKind::Audio).ok(), Some(6));
    assert_eq!(parser.cues_first_in_cluster(TrackKind::Video).ok(), Some(true));

    let (full, _) = parse_all(&data, 7);
    assert_eq!(
        parser.file_maximum_bits_per_second().ok(),
        full.file_maximum_bits_per_second().ok()
    );
}

// ============================================================================
// Live (unknown-size) streams
// ============================================================================

#[test]
fn test_unknown_size_clusters() {
    let data = mux_live(&av_frames(3));
    let (parser, steps) = parse_all(&data, 4);

    let segment = parser.segment().unwrap();
    assert_eq!(segment.size(), None);
    assert_eq!(segment.clusters().len(), 3);
    assert!(segment.clusters().iter().all(|c| c.is_unknown_size()));

    let consumed: usize = steps.iter().map(|s| s.parsed.consumed).sum();
    assert_eq!(consumed, data.len());
    assert_eq!(parser.track_frame_count(TrackKind::Video).ok(), Some(9));
    assert_eq!(parser.duration_ns().ok(), Some(0));
    assert_eq!(parser.cues().ok(), Some(None));
    assert_eq!(parser.has_cues().ok(), Some(false));
}

#[test]
fn test_open_stream_holds_last_cluster_until_end_is_known() {
    let data = mux_live(&video_frames(2, 2));
    let mut parser = IncrementalParser::new();
    let (_, result) = drive(&mut parser, &data, 16);
    result.unwrap();

    assert_eq!(parser.state(), ParserState::ParsingClusters);
    let last_start = parser.segment().unwrap().clusters()[1].element_start();
    assert_eq!(parser.total_bytes_parsed(), last_start);
    assert!(!parser.segment().unwrap().clusters()[1].is_complete());

    let rest = &data[last_start as usize..];
    parser.set_end_of_file_position(data.len() as u64).unwrap();
    let tail = parser.parse_next(rest).unwrap();
    assert_eq!(tail.consumed, rest.len());
    assert_eq!(parser.last_cluster().unwrap().blocks().len(), 3);

    let end = parser.parse_next(&[]).unwrap();
    assert_eq!(end.state, ParserState::Done);
    assert_eq!(parser.track_frame_count(TrackKind::Video).ok(), Some(6));
}

// ============================================================================
// Hand-assembled streams
// ============================================================================

#[test]
fn test_matroska_doc_type_and_elements_between_clusters() {
    let frame = frame_payload(7, 10);
    let tags = element(ids::TAGS, &[0x00; 6]);
    let data = [
        ebml_header("matroska"),
        segment(&[
            info(),
            video_tracks(3),
            cluster(0, &[simple_block(3, 0, true, &frame)]),
            tags.clone(),
            cluster(40, &[simple_block(3, 5, false, &frame)]),
        ]),
    ]
    .concat();

    let (parser, steps) = parse_all(&data, 2);
    assert_eq!(parser.ebml_header().unwrap().doc_type, "matroska");

    let units: Vec<_> = steps
        .iter()
        .filter(|s| s.parsed.consumed > 0)
        .map(|s| s.parsed.consumed)
        .collect();
    assert_eq!(units.len(), 4);
    assert_eq!(units[2], tags.len());

    let block = &parser.last_cluster().unwrap().blocks()[0];
    assert_eq!(block.track_number, 3);
    assert_eq!(block.timestamp_ns, 45 * MS as i64);
    assert!(!block.is_key);
    assert_eq!(block.frames[0].len, 10);
    assert_eq!(parser.track_frame_count(TrackKind::Video).ok(), Some(2));
    assert_eq!(parser.track_size(TrackKind::Video).ok(), Some(28));
}

#[test]
fn test_block_group_keyframes() {
    let block_payload = |track: u8, relative: i16| {
        let mut payload = vec![0x80 | track];
        payload.extend_from_slice(&relative.to_be_bytes());
        payload.push(0x00);
        payload.extend_from_slice(&[0x55; 8]);
        element(ids::BLOCK, &payload)
    };
    let key_group = element(
        ids::BLOCK_GROUP,
        &[block_payload(1, 0), uint_element(ids::BLOCK_DURATION, 33)].concat(),
    );
    let mut reference = Vec::new();
    reference.extend(element(ids::REFERENCE_BLOCK, &[0xDF]));
    let delta_group = element(ids::BLOCK_GROUP, &[block_payload(1, 33), reference].concat());

    let data = [
        ebml_header("webm"),
        segment(&[info(), video_tracks(1), cluster(0, &[key_group, delta_group])]),
    ]
    .concat();
    let (parser, _) = parse_all(&data, 9);

    let blocks = parser.last_cluster().unwrap().blocks();
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].is_key);
    assert_eq!(blocks[0].duration, Some(33));
    assert!(!blocks[1].is_key);
    assert_eq!(blocks[1].timestamp_ns, 33 * MS as i64);
}
