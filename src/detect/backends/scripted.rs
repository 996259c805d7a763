use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Backend that replays scripted results keyed by frame index.
///
/// Frames with no script yield no detections. Used by the demo binary and by
/// tests that need a deterministic detector.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    results: HashMap<u64, Vec<RawDetection>>,
    failures: HashSet<u64>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detections to report for the frame at `index`.
    pub fn on_frame(mut self, index: u64, detections: Vec<RawDetection>) -> Self {
        self.results.insert(index, detections);
        self
    }

    /// Make the detector fail for the frame at `index`.
    pub fn fail_on(mut self, index: u64) -> Self {
        self.failures.insert(index);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        if self.failures.contains(&frame.index) {
            return Err(anyhow!("scripted failure at frame {}", frame.index));
        }
        Ok(self.results.get(&frame.index).cloned().unwrap_or_default())
    }
}
