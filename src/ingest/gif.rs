//! Animated GIF support.
//!
//! GIFs are decoded eagerly into memory. `GifPlayer` loops them for display;
//! `GifSource` walks them once for the detection loop.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbImage};

use super::{FrameSource, Next, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

pub const DEFAULT_MAX_FRAMES: usize = 10_000;
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

/// Every frame of a GIF, composited and converted to RGB.
#[derive(Clone, Debug)]
pub struct GifClip {
    frames: Vec<RgbImage>,
    truncated: bool,
}

impl GifClip {
    /// Decode up to `max_frames` frames. A GIF with no frames is an error.
    pub fn decode(path: &Path, max_frames: usize) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open gif {}", path.display()))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .with_context(|| format!("read gif header {}", path.display()))?;

        // One extra frame tells a clip of exactly `max_frames` from a longer one.
        let mut frames = Vec::new();
        for frame in decoder.into_frames().take(max_frames.saturating_add(1)) {
            let frame = frame.with_context(|| format!("decode gif frame {}", frames.len()))?;
            frames.push(image::DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8());
        }
        let truncated = frames.len() > max_frames;
        if truncated {
            frames.truncate(max_frames);
            log::warn!(
                "gif {} truncated to {} frames",
                path.display(),
                max_frames
            );
        }
        let mut clip = Self::from_frames(frames).with_context(|| format!("gif {}", path.display()))?;
        clip.truncated = truncated;
        Ok(clip)
    }

    pub fn from_frames(frames: Vec<RgbImage>) -> Result<Self> {
        if frames.is_empty() {
            return Err(anyhow!("gif contains no frames"));
        }
        Ok(Self {
            frames,
            truncated: false,
        })
    }

    /// True when the file had more than `max_frames` frames.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, index: usize) -> Option<&RgbImage> {
        self.frames.get(index)
    }

    pub fn into_frames(self) -> Vec<RgbImage> {
        self.frames
    }
}

/// Cycles a clip forever at a fixed delay.
#[derive(Clone, Debug)]
pub struct GifPlayer {
    clip: GifClip,
    index: usize,
    delay: Duration,
}

impl GifPlayer {
    pub fn new(clip: GifClip, delay: Duration) -> Self {
        Self {
            clip,
            index: 0,
            delay,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> &RgbImage {
        &self.clip.frames[self.index]
    }

    /// Advance one frame, wrapping at the end, and return the new index.
    pub fn tick(&mut self) -> usize {
        self.index = (self.index + 1) % self.clip.len();
        self.index
    }
}

/// A GIF read once, front to back.
pub struct GifSource {
    id: String,
    frames: Option<std::vec::IntoIter<RgbImage>>,
    next_index: u64,
    stats: SourceStats,
}

impl GifSource {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let id = path.display().to_string();
        let clip = GifClip::decode(path, DEFAULT_MAX_FRAMES)
            .map_err(|e| PipelineError::source_unavailable(&id, format!("{:#}", e)))?;
        Ok(Self::from_clip(id, clip))
    }

    pub fn from_clip(id: impl Into<String>, clip: GifClip) -> Self {
        let id = id.into();
        Self {
            stats: SourceStats {
                source: id.clone(),
                ..SourceStats::default()
            },
            id,
            frames: Some(clip.into_frames().into_iter()),
            next_index: 0,
        }
    }
}

impl FrameSource for GifSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Gif
    }

    fn source_id(&self) -> &str {
        &self.id
    }

    fn next_frame(&mut self) -> PipelineResult<Next> {
        let Some(image) = self.frames.as_mut().and_then(|frames| frames.next()) else {
            return Ok(Next::EndOfStream);
        };
        let index = self.next_index;
        self.next_index += 1;
        self.stats.frames_read += 1;
        Ok(Next::Frame(Frame::new(index, image)))
    }

    fn close(&mut self) {
        self.frames = None;
    }

    fn is_closed(&self) -> bool {
        self.frames.is_none()
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
