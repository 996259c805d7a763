//! Frames flowing through the pipeline.
//!
//! A `Frame` is owned by the tick that produced it: the source hands it to the
//! loop, the loop lends it to the detector, annotates it in place, emits it to
//! the sinks and then drops it.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

/// One decoded RGB frame plus its position in the source.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Zero-based position in the source, counting frames that failed to decode.
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Build a frame from tightly packed RGB24 bytes.
    pub fn from_rgb(index: u64, pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self { index, image })
    }

    /// Build a frame from RGB24 rows that may carry per-row padding.
    pub fn from_strided_rgb(
        index: u64,
        data: &[u8],
        stride: usize,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let row_bytes = (width as usize) * 3;
        if stride == row_bytes {
            let len = rgb_len(width, height)?;
            let pixels = data
                .get(..len)
                .context("frame buffer is shorter than its dimensions")?
                .to_vec();
            return Self::from_rgb(index, pixels, width, height);
        }

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("frame row is out of bounds")?,
            );
        }
        Self::from_rgb(index, pixels, width, height)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}
