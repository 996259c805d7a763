//! Synthetic `stub://` sources.
//!
//! `stub://clip?frames=10&width=64&height=48&fail=4,7` yields a finite clip;
//! `stub://stream?...` never ends. Frames listed in `fail` report a decode
//! failure instead of pixels.

use std::collections::HashSet;

use image::{Rgb, RgbImage};

use super::{FrameSource, Next, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

const DEFAULT_FRAMES: u64 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

pub struct SyntheticSource {
    spec: String,
    /// `None` for a continuous stream.
    frames: Option<u64>,
    width: u32,
    height: u32,
    failures: HashSet<u64>,
    next_index: u64,
    stats: SourceStats,
    closed: bool,
}

impl SyntheticSource {
    pub fn parse(spec: &str) -> PipelineResult<Self> {
        let rest = spec
            .strip_prefix("stub://")
            .ok_or_else(|| PipelineError::source_unavailable(spec, "not a stub:// source"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut source = Self {
            spec: spec.to_string(),
            frames: Some(DEFAULT_FRAMES),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            failures: HashSet::new(),
            next_index: 0,
            stats: SourceStats {
                source: spec.to_string(),
                ..SourceStats::default()
            },
            closed: false,
        };
        if name.starts_with("stream") {
            source.frames = None;
        }

        let bad = |key: &str| PipelineError::source_unavailable(spec, format!("invalid {}", key));
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "frames" => source.frames = Some(value.parse().map_err(|_| bad(key))?),
                "width" => source.width = value.parse().map_err(|_| bad(key))?,
                "height" => source.height = value.parse().map_err(|_| bad(key))?,
                "fail" => {
                    for idx in value.split(',').filter(|v| !v.is_empty()) {
                        source.failures.insert(idx.trim().parse().map_err(|_| bad(key))?);
                    }
                }
                _ => return Err(bad(key)),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(PipelineError::source_unavailable(spec, "zero frame size"));
        }
        Ok(source)
    }

    fn render(&self, index: u64) -> RgbImage {
        let shift = index as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x.wrapping_add(shift) % 256) as u8,
                (y.wrapping_add(shift) % 256) as u8,
                (shift.wrapping_mul(7) % 256) as u8,
            ])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Synthetic
    }

    fn source_id(&self) -> &str {
        &self.spec
    }

    fn next_frame(&mut self) -> PipelineResult<Next> {
        if self.closed {
            return Ok(Next::EndOfStream);
        }
        if self.frames.is_some_and(|n| self.next_index >= n) {
            return Ok(Next::EndOfStream);
        }
        let index = self.next_index;
        self.next_index += 1;
        if self.failures.contains(&index) {
            self.stats.decode_failures += 1;
            return Err(PipelineError::decode(index, "synthetic decode failure"));
        }
        self.stats.frames_read += 1;
        Ok(Next::Frame(Frame::new(index, self.render(index))))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            log::debug!("SyntheticSource: closed {}", self.spec);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    fn is_continuous(&self) -> bool {
        self.frames.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_ends_after_frame_count() -> anyhow::Result<()> {
        let mut source = SyntheticSource::parse("stub://clip?frames=3&width=8&height=6")?;
        for expected in 0..3 {
            match source.next_frame()? {
                Next::Frame(frame) => {
                    assert_eq!(frame.index, expected);
                    assert_eq!((frame.width(), frame.height()), (8, 6));
                }
                Next::EndOfStream => panic!("ended early"),
            }
        }
        assert!(matches!(source.next_frame()?, Next::EndOfStream));
        assert!(!source.is_continuous());
        Ok(())
    }

    #[test]
    fn scripted_failures_skip_one_frame() -> anyhow::Result<()> {
        let mut source = SyntheticSource::parse("stub://clip?frames=3&width=4&height=4&fail=1")?;
        assert!(matches!(source.next_frame()?, Next::Frame(_)));
        assert!(matches!(
            source.next_frame(),
            Err(PipelineError::DecodeFailure { frame: 1, .. })
        ));
        match source.next_frame()? {
            Next::Frame(frame) => assert_eq!(frame.index, 2),
            Next::EndOfStream => panic!("ended early"),
        }
        let stats = source.stats();
        assert_eq!(stats.frames_read, 2);
        assert_eq!(stats.decode_failures, 1);
        Ok(())
    }

    #[test]
    fn stream_is_continuous_and_close_is_idempotent() -> anyhow::Result<()> {
        let mut source = SyntheticSource::parse("stub://stream?width=4&height=4")?;
        assert!(source.is_continuous());
        for _ in 0..50 {
            assert!(matches!(source.next_frame()?, Next::Frame(_)));
        }
        source.close();
        source.close();
        assert!(source.is_closed());
        assert!(matches!(source.next_frame()?, Next::EndOfStream));
        Ok(())
    }

    #[test]
    fn rejects_unknown_parameters() {
        assert!(SyntheticSource::parse("stub://clip?fps=3").is_err());
        assert!(SyntheticSource::parse("stub://clip?width=0").is_err());
    }
}
