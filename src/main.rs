//! webm-live CLI
//!
//! Feeds WebM files through the incremental parser and the live muxer

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use webm_live::format::webm::{Block, TrackType};
use webm_live::{init, Config, IncrementalParser, LiveMuxer, ParserState, TrackKind};

#[derive(Parser)]
#[command(name = "webm-live")]
#[command(about = "Incremental WebM parsing and live chunking", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a WebM file piece by piece and show what was learned
    Info {
        /// Input file path
        input: PathBuf,

        /// Bytes handed to the parser per step
        #[arg(long, default_value = "4096")]
        feed_size: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-mux a WebM file into live chunks (headers, then one per cluster)
    Rechunk {
        /// Input file path
        input: PathBuf,

        /// Directory receiving chunk_NNNNN.webm files
        output_dir: PathBuf,

        /// Bytes handed to the parser per step
        #[arg(long, default_value = "4096")]
        feed_size: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init(Config {
        verbose: cli.verbose,
        debug: cli.debug,
    })?;

    info!("webm-live v{}", webm_live::VERSION);

    match cli.command {
        Commands::Info {
            input,
            feed_size,
            json,
        } => {
            info!("Getting info for: {}", input.display());
            cmd_info(&input, feed_size, json)?;
        }
        Commands::Rechunk {
            input,
            output_dir,
            feed_size,
        } => {
            info!("Rechunking {} -> {}", input.display(), output_dir.display());
            cmd_rechunk(&input, &output_dir, feed_size)?;
        }
    }

    Ok(())
}

/// Drive `parser` over `data`, handing it at most `feed_size` new bytes per
/// step. `on_unit` sees every consumed unit together with its stream offset.
fn feed<F>(
    parser: &mut IncrementalParser,
    data: &[u8],
    feed_size: usize,
    mut on_unit: F,
) -> anyhow::Result<()>
where
    F: FnMut(&IncrementalParser, u64, &[u8]) -> anyhow::Result<()>,
{
    if feed_size == 0 {
        anyhow::bail!("feed size must be at least 1");
    }
    parser.set_end_of_file_position(data.len() as u64)?;

    let mut start = 0usize;
    let mut available = 0usize;
    while parser.state() != ParserState::Done {
        let parsed = parser.parse_next(&data[start..available])?;
        if parsed.consumed > 0 {
            let unit = &data[start..start + parsed.consumed];
            on_unit(parser, start as u64, unit)?;
            start += parsed.consumed;
            continue;
        }
        if parsed.state == ParserState::Done {
            break;
        }
        if available == data.len() {
            anyhow::bail!(
                "stream ended inside an element at offset {}",
                parser.total_bytes_parsed()
            );
        }
        available = (available + feed_size).min(data.len());
    }
    debug!(consumed = start, "parser finished");
    Ok(())
}

/// What `info` learned about a stream, printed as text or JSON
#[derive(Serialize)]
struct InfoReport {
    file: String,
    doc_type: Option<String>,
    doc_type_version: Option<u64>,
    mime_type: Option<String>,
    duration_seconds: Option<f64>,
    timecode_scale_ns: Option<u64>,
    segment_data_start: Option<u64>,
    clusters: u64,
    tracks: Vec<TrackReport>,
    video_bit_rate: Option<u64>,
    audio_bit_rate: Option<u64>,
    average_bit_rate: Option<u64>,
    peak_bit_rate: Option<u64>,
    cue_points: Option<usize>,
}

#[derive(Serialize)]
struct TrackReport {
    number: u64,
    #[serde(rename = "type")]
    track_type: String,
    codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u64>,
    frames: Option<u64>,
    bytes: Option<u64>,
    first_timestamp_ns: Option<i64>,
}

fn cmd_info(input: &Path, feed_size: usize, json: bool) -> anyhow::Result<()> {
    let data = fs::read(input)?;
    let mut parser = IncrementalParser::new();
    let mut clusters = 0u64;
    feed(&mut parser, &data, feed_size, |parser, unit_start, _| {
        if parser.last_cluster().map(|c| c.element_start()) == Some(unit_start) {
            clusters += 1;
        }
        Ok(())
    })?;

    let header = parser.ebml_header();
    let tracks = parser
        .tracks()
        .ok()
        .flatten()
        .map(|tracks| {
            tracks
                .iter()
                .map(|track| {
                    let stats = parser.track_stats(track.number).ok().flatten();
                    TrackReport {
                        number: track.number,
                        track_type: format!("{:?}", track.track_type),
                        codec: track.codec_id.clone(),
                        width: track.video.as_ref().map(|v| v.width),
                        height: track.video.as_ref().map(|v| v.height),
                        frame_rate: track.video.as_ref().and_then(|v| v.frame_rate),
                        sample_rate: track.audio.as_ref().map(|a| a.sampling_frequency),
                        channels: track.audio.as_ref().map(|a| a.channels),
                        frames: stats.map(|s| s.frames),
                        bytes: stats.map(|s| s.bytes),
                        first_timestamp_ns: stats.and_then(|s| s.first_timestamp_ns),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    let nonzero = |rate: Option<u64>| rate.filter(|&r| r > 0);

    let report = InfoReport {
        file: input.display().to_string(),
        doc_type: header.map(|h| h.doc_type.clone()),
        doc_type_version: header.map(|h| h.doc_type_version),
        mime_type: parser.mime_type_with_codec().ok(),
        duration_seconds: parser.duration_ns().ok().map(|d| d as f64 / 1e9),
        timecode_scale_ns: parser.timecode_scale_ns().ok(),
        segment_data_start: parser.segment_start_offset().ok(),
        clusters,
        tracks,
        video_bit_rate: nonzero(parser.track_average_bits_per_second(TrackKind::Video).ok()),
        audio_bit_rate: nonzero(parser.track_average_bits_per_second(TrackKind::Audio).ok()),
        average_bit_rate: parser.file_average_bits_per_second().ok(),
        peak_bit_rate: parser.file_maximum_bits_per_second().ok(),
        cue_points: parser.cues().ok().flatten().map(|cues| cues.points().len()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_info(&report);
    }
    Ok(())
}

fn print_info(report: &InfoReport) {
    println!("File: {}", report.file);
    println!();
    if let (Some(doc_type), Some(version)) = (&report.doc_type, report.doc_type_version) {
        println!("DocType: {} v{}", doc_type, version);
    }
    if let Some(mime) = &report.mime_type {
        println!("MIME: {}", mime);
    }
    if let Some(duration) = report.duration_seconds {
        println!("Duration: {:.3}s", duration);
    }
    if let Some(scale) = report.timecode_scale_ns {
        println!("Timecode scale: {} ns", scale);
    }
    if let Some(offset) = report.segment_data_start {
        println!("Segment data starts at: {}", offset);
    }
    println!("Clusters: {}", report.clusters);
    println!();

    println!("Tracks: {}", report.tracks.len());
    for track in &report.tracks {
        println!();
        println!("Track #{}:", track.number);
        println!("  Type: {}", track.track_type);
        println!("  Codec: {}", track.codec);
        if let (Some(width), Some(height)) = (track.width, track.height) {
            println!("  Resolution: {}x{}", width, height);
        }
        if let Some(rate) = track.frame_rate {
            println!("  Frame Rate: {:.3}", rate);
        }
        if let Some(rate) = track.sample_rate {
            println!("  Sample Rate: {} Hz", rate);
        }
        if let Some(channels) = track.channels {
            println!("  Channels: {}", channels);
        }
        if let (Some(frames), Some(bytes)) = (track.frames, track.bytes) {
            println!("  Frames: {}", frames);
            println!("  Bytes: {}", bytes);
        }
        if let Some(first) = track.first_timestamp_ns {
            println!("  First timestamp: {} ns", first);
        }
    }
    println!();

    if let Some(rate) = report.video_bit_rate {
        println!("Average video bitrate: {} kbps", rate / 1000);
    }
    if let Some(rate) = report.audio_bit_rate {
        println!("Average audio bitrate: {} kbps", rate / 1000);
    }
    if let Some(rate) = report.average_bit_rate {
        println!("Average file bitrate: {} kbps", rate / 1000);
    }
    if let Some(rate) = report.peak_bit_rate {
        println!("Peak cluster bitrate: {} kbps", rate / 1000);
    }
    match report.cue_points {
        Some(points) => println!("Cue points: {}", points),
        None => println!("Cue points: none"),
    }
}

fn cmd_rechunk(input: &Path, output_dir: &Path, feed_size: usize) -> anyhow::Result<()> {
    let data = fs::read(input)?;
    fs::create_dir_all(output_dir)?;

    let mut parser = IncrementalParser::new();
    let mut muxer = LiveMuxer::new();
    muxer.init()?;
    let mut chunks = 0usize;
    let mut audio_source = None;
    let mut video_source = None;

    feed(&mut parser, &data, feed_size, |parser, unit_start, unit| {
        if muxer.audio_track().is_none() && muxer.video_track().is_none() {
            let tracks = parser
                .tracks()
                .ok()
                .flatten()
                .ok_or_else(|| anyhow::anyhow!("no tracks in input"))?;
            if let Some(track) = tracks.first_of(TrackKind::Video) {
                let video = track
                    .video
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("video track without settings"))?;
                muxer.add_video_track_with_codec(
                    u32::try_from(video.width)?,
                    u32::try_from(video.height)?,
                    &track.codec_id,
                )?;
                video_source = Some(track.number);
            }
            if let Some(track) = tracks.first_of(TrackKind::Audio) {
                let audio = track
                    .audio
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("audio track without settings"))?;
                muxer.add_audio_track_with_codec(
                    audio.sampling_frequency as u32,
                    u16::try_from(audio.channels)?,
                    &track.codec_private,
                    &track.codec_id,
                )?;
                audio_source = Some(track.number);
            }
            if audio_source.is_none() && video_source.is_none() {
                anyhow::bail!("input has neither audio nor video");
            }
        }

        let cluster = match parser.last_cluster() {
            Some(cluster) if cluster.element_start() == unit_start => cluster,
            _ => return Ok(()),
        };
        for block in cluster.blocks() {
            let kind = parser
                .tracks()
                .ok()
                .flatten()
                .and_then(|tracks| tracks.by_number(block.track_number))
                .map(|track| track.track_type);
            write_block(&mut muxer, block, kind, unit_start, unit, audio_source, video_source)?;
        }
        while let Some(chunk) = muxer.take_chunk() {
            write_chunk(output_dir, chunks, &chunk)?;
            chunks += 1;
        }
        Ok(())
    })?;

    muxer.finalize()?;
    while let Some(chunk) = muxer.take_chunk() {
        write_chunk(output_dir, chunks, &chunk)?;
        chunks += 1;
    }
    println!(
        "Wrote {} chunks ({} bytes) to {}",
        chunks,
        muxer.bytes_written(),
        output_dir.display()
    );
    Ok(())
}

fn write_block(
    muxer: &mut LiveMuxer,
    block: &Block,
    track_type: Option<TrackType>,
    unit_start: u64,
    unit: &[u8],
    audio_source: Option<u64>,
    video_source: Option<u64>,
) -> anyhow::Result<()> {
    let timestamp_ns = u64::try_from(block.timestamp_ns.max(0))?;
    for frame in &block.frames {
        let bytes = frame
            .slice(unit, unit_start)
            .ok_or_else(|| anyhow::anyhow!("frame outside its cluster"))?;
        match track_type {
            Some(TrackType::Video) if video_source == Some(block.track_number) => {
                muxer.write_video_frame(bytes, timestamp_ns, block.is_key)?
            }
            Some(TrackType::Audio) if audio_source == Some(block.track_number) => {
                muxer.write_audio_frame(bytes, timestamp_ns, block.is_key)?
            }
            _ => debug!(track = block.track_number, "skipping frame of unmapped track"),
        }
    }
    Ok(())
}

fn write_chunk(output_dir: &Path, index: usize, chunk: &[u8]) -> anyhow::Result<()> {
    let path = output_dir.join(format!("chunk_{:05}.webm", index));
    fs::write(&path, chunk)?;
    debug!(path = %path.display(), len = chunk.len(), "chunk written");
    Ok(())
}
