//! Session-scoped persistence of annotated frames.
//!
//! Each processing session writes into its own directory,
//! `<output_dir>/<session_id>/frame_0000.jpg`, `frame_0001.jpg`, ... The
//! directory is created on the first write, so a session that never emits a
//! frame leaves nothing behind.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::{ImageFormat, RgbImage};
use rand::Rng;

use crate::config::FrameFormat;
use crate::error::{PipelineError, PipelineResult};
use crate::playback::{FrameReport, FrameSink};

/// `<unix-seconds>-<8 hex digits>`.
pub fn new_session_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let nonce: u32 = rand::thread_rng().gen();
    format!("{}-{:08x}", secs, nonce)
}

pub struct FrameWriter {
    session_dir: PathBuf,
    format: FrameFormat,
    next_number: u64,
    dir_ready: bool,
}

impl FrameWriter {
    pub fn new(output_dir: impl AsRef<Path>, session_id: &str, format: FrameFormat) -> Self {
        Self {
            session_dir: output_dir.as_ref().join(session_id),
            format,
            next_number: 0,
            dir_ready: false,
        }
    }

    /// Writer for a fresh session under `output_dir`.
    pub fn for_new_session(output_dir: impl AsRef<Path>, format: FrameFormat) -> Self {
        Self::new(output_dir, &new_session_id(), format)
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn frames_written(&self) -> u64 {
        self.next_number
    }

    /// Write the next numbered frame and return its path.
    pub fn write(&mut self, image: &RgbImage) -> PipelineResult<PathBuf> {
        let path = self.session_dir.join(format!(
            "frame_{:04}.{}",
            self.next_number,
            self.format.extension()
        ));
        if !self.dir_ready {
            std::fs::create_dir_all(&self.session_dir).map_err(|e| persist_error(&self.session_dir, e))?;
            self.dir_ready = true;
        }
        let format = match self.format {
            FrameFormat::Jpeg => ImageFormat::Jpeg,
            FrameFormat::Png => ImageFormat::Png,
        };
        image
            .save_with_format(&path, format)
            .map_err(|e| persist_error(&path, e))?;
        self.next_number += 1;
        Ok(path)
    }
}

impl FrameSink for FrameWriter {
    fn name(&self) -> &'static str {
        "frame_writer"
    }

    fn emit(&mut self, report: &FrameReport, image: &RgbImage) -> PipelineResult<()> {
        let path = self.write(image)?;
        log::debug!("frame {} saved to {}", report.index, path.display());
        Ok(())
    }

    fn finish(&mut self) {
        if self.next_number > 0 {
            log::info!(
                "saved {} frames to {}",
                self.next_number,
                self.session_dir.display()
            );
        }
    }
}

fn persist_error(path: &Path, err: impl ToString) -> PipelineError {
    PipelineError::PersistFailure {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
