//! Local video file source.
//!
//! Decoding goes through FFmpeg when the `ingest-file-ffmpeg` feature is on.
//! Without it, opening a video file reports `SourceUnavailable`.

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{FrameSource, Next, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};

/// Finite frame source over a local video file.
pub struct FileSource {
    path: String,
    backend: Option<FileBackend>,
    stats: SourceStats,
}

#[cfg(feature = "ingest-file-ffmpeg")]
type FileBackend = FfmpegFileSource;
#[cfg(not(feature = "ingest-file-ffmpeg"))]
type FileBackend = std::convert::Infallible;

impl FileSource {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let backend = open_backend(path)?;
        log::info!("FileSource: opened {}", path);
        Ok(Self {
            path: path.to_string(),
            backend: Some(backend),
            stats: SourceStats {
                source: path.to_string(),
                ..SourceStats::default()
            },
        })
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_backend(path: &str) -> PipelineResult<FileBackend> {
    FfmpegFileSource::open(path)
        .map_err(|e| PipelineError::source_unavailable(path, format!("{:#}", e)))
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn decode_next(backend: &mut FileBackend) -> PipelineResult<Next> {
    backend.next_frame()
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn decode_next(backend: &mut FileBackend) -> PipelineResult<Next> {
    match *backend {}
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_backend(path: &str) -> PipelineResult<FileBackend> {
    Err(PipelineError::source_unavailable(
        path,
        "video file decoding requires the ingest-file-ffmpeg feature",
    ))
}

impl FrameSource for FileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn source_id(&self) -> &str {
        &self.path
    }

    fn next_frame(&mut self) -> PipelineResult<Next> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(Next::EndOfStream);
        };
        let result = decode_next(backend);
        match &result {
            Ok(Next::Frame(_)) => self.stats.frames_read += 1,
            Err(PipelineError::DecodeFailure { .. }) => self.stats.decode_failures += 1,
            _ => {}
        }
        result
    }

    fn close(&mut self) {
        if self.backend.take().is_some() {
            log::debug!("FileSource: closed {}", self.path);
        }
    }

    fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
