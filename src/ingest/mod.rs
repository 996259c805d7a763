//! Frame sources.
//!
//! This module provides the sources the playback loop reads from:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Network streams, RTSP/HTTP (feature: rtsp-gstreamer)
//! - Animated GIFs, decoded eagerly into memory
//! - Synthetic `stub://` sources and in-memory clips (testing, demo)
//!
//! Every source follows the same contract: `open_source` either returns a
//! handle or `SourceUnavailable`; `next_frame` yields a frame, reports
//! `EndOfStream`, or fails one frame with `DecodeFailure` while staying usable;
//! `close` releases the underlying resources and is safe to call twice.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod gif;
pub mod memory;
pub mod rtsp;
pub mod synthetic;

use std::path::Path;

pub use file::FileSource;
pub use gif::{GifClip, GifPlayer, GifSource};
pub use memory::MemorySource;
pub use rtsp::{RtspConfig, RtspSource};
pub use synthetic::SyntheticSource;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Result of asking a source for its next frame.
#[derive(Debug)]
pub enum Next {
    Frame(Frame),
    EndOfStream,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Gif,
    Stream,
    Synthetic,
}

/// Counters reported by a source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_read: u64,
    pub decode_failures: u64,
    pub source: String,
}

pub trait FrameSource {
    fn kind(&self) -> SourceKind;

    /// Path or URL this source was opened from.
    fn source_id(&self) -> &str;

    fn next_frame(&mut self) -> PipelineResult<Next>;

    /// Release decoder / network resources. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Continuous sources have no natural end of stream.
    fn is_continuous(&self) -> bool {
        self.kind() == SourceKind::Stream
    }
}

/// Decide what kind of source a path or URL names.
pub fn classify(spec: &str) -> SourceKind {
    let lower = spec.trim().to_ascii_lowercase();
    if lower.starts_with("stub://") {
        SourceKind::Synthetic
    } else if is_stream_url(&lower) {
        SourceKind::Stream
    } else if lower.ends_with(".gif") {
        SourceKind::Gif
    } else {
        SourceKind::File
    }
}

fn is_stream_url(lower: &str) -> bool {
    ["rtsp://", "rtsps://", "rtmp://", "http://", "https://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Open a file path, GIF path, stream URL or `stub://` source.
///
/// Never creates anything on disk. Any failure is `SourceUnavailable`.
pub fn open_source(spec: &str) -> PipelineResult<Box<dyn FrameSource>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(PipelineError::source_unavailable(spec, "empty source"));
    }
    let source: Box<dyn FrameSource> = match classify(spec) {
        SourceKind::Synthetic => Box::new(SyntheticSource::parse(spec)?),
        SourceKind::Stream => Box::new(RtspSource::open(RtspConfig {
            url: spec.to_string(),
            ..RtspConfig::default()
        })?),
        SourceKind::Gif => {
            ensure_local_file(spec)?;
            Box::new(GifSource::open(Path::new(spec))?)
        }
        SourceKind::File => {
            if spec.contains("://") {
                return Err(PipelineError::source_unavailable(
                    spec,
                    "unsupported URL scheme",
                ));
            }
            ensure_local_file(spec)?;
            Box::new(FileSource::open(spec)?)
        }
    };
    log::info!("opened {:?} source {}", source.kind(), source.source_id());
    Ok(source)
}

fn ensure_local_file(spec: &str) -> PipelineResult<()> {
    let path = Path::new(spec);
    if !path.is_file() {
        return Err(PipelineError::source_unavailable(
            spec,
            "no such file",
        ));
    }
    Ok(())
}
