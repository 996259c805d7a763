#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, RawDetection};
use crate::frame::Frame;

const BOX_CHANNELS: usize = 4;

/// Tract-based backend for YOLOv8-style ONNX exports.
///
/// Expects a single `1x3xSxS` float input (RGB scaled to 0..1) and a
/// `1x(4+nc)xN` output of `cx, cy, w, h` followed by per-class scores.
/// Transposed `1xNx(4+nc)` outputs are accepted too.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    /// Scores below this are dropped before NMS.
    score_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            score_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(&frame.image, side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not rank 3")?;

        let (_, d1, d2) = view.dim();
        let channels_first = d1 <= d2;
        let (channels, anchors) = if channels_first { (d1, d2) } else { (d2, d1) };
        if channels <= BOX_CHANNELS {
            return Err(anyhow!("model output has {} channels, need > 4", channels));
        }
        let value = |c: usize, a: usize| {
            if channels_first {
                view[[0, c, a]]
            } else {
                view[[0, a, c]]
            }
        };

        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;
        let max_x = frame.width() as f32;
        let max_y = frame.height() as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in BOX_CHANNELS..channels {
                let score = value(c, a);
                if score > best.1 {
                    best = (c - BOX_CHANNELS, score);
                }
            }
            let (class_id, score) = best;
            if !score.is_finite() || score < self.score_threshold {
                continue;
            }
            let (cx, cy, w, h) = (value(0, a), value(1, a), value(2, a), value(3, a));
            candidates.push(RawDetection::new(
                ((cx - w / 2.0) * sx).clamp(0.0, max_x),
                ((cy - h / 2.0) * sy).clamp(0.0, max_y),
                ((cx + w / 2.0) * sx).clamp(0.0, max_x),
                ((cy + h / 2.0) * sy).clamp(0.0, max_y),
                class_id as u32,
                score.min(1.0),
            ));
        }

        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = Frame::new(0, image::RgbImage::new(side, side));
        self.detect(&blank).map(|_| ())
    }
}
