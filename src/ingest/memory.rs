use std::collections::HashSet;

use image::RgbImage;

use super::{FrameSource, Next, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Finite source over frames already held in memory.
pub struct MemorySource {
    id: String,
    frames: std::vec::IntoIter<RgbImage>,
    failures: HashSet<u64>,
    next_index: u64,
    stats: SourceStats,
    closed: bool,
}

impl MemorySource {
    pub fn new(id: impl Into<String>, frames: Vec<RgbImage>) -> Self {
        let id = id.into();
        Self {
            stats: SourceStats {
                source: id.clone(),
                ..SourceStats::default()
            },
            id,
            frames: frames.into_iter(),
            failures: HashSet::new(),
            next_index: 0,
            closed: false,
        }
    }

    /// Report the frame at `index` as undecodable.
    pub fn with_decode_failure(mut self, index: u64) -> Self {
        self.failures.insert(index);
        self
    }
}

impl FrameSource for MemorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Synthetic
    }

    fn source_id(&self) -> &str {
        &self.id
    }

    fn next_frame(&mut self) -> PipelineResult<Next> {
        if self.closed {
            return Ok(Next::EndOfStream);
        }
        let Some(image) = self.frames.next() else {
            return Ok(Next::EndOfStream);
        };
        let index = self.next_index;
        self.next_index += 1;
        if self.failures.contains(&index) {
            self.stats.decode_failures += 1;
            return Err(PipelineError::decode(index, "frame marked undecodable"));
        }
        self.stats.frames_read += 1;
        Ok(Next::Frame(Frame::new(index, image)))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.frames = Vec::new().into_iter();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
