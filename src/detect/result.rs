use anyhow::{anyhow, Result};

/// Unvalidated detector output, in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: u32,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class_id: u32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            class_id,
            confidence,
        }
    }

    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union of two boxes.
    pub fn iou(&self, other: &RawDetection) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// A validated detection: box in pixel coordinates, class id and confidence.
///
/// Only constructed through [`Detection::new`], so every instance satisfies
/// `x1 <= x2`, `y1 <= y2`, finite coordinates and `confidence` in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: u32,
    confidence: f32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class_id: u32, confidence: f32) -> Result<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(anyhow!("detection box has non-finite coordinates"));
        }
        if x1 > x2 || y1 > y2 {
            return Err(anyhow!(
                "detection box is inverted: ({}, {}) .. ({}, {})",
                x1,
                y1,
                x2,
                y2
            ));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!("detection confidence {} outside [0, 1]", confidence));
        }
        Ok(Self {
            x1,
            y1,
            x2,
            y2,
            class_id,
            confidence,
        })
    }

    pub fn x1(&self) -> f32 {
        self.x1
    }

    pub fn y1(&self) -> f32 {
        self.y1
    }

    pub fn x2(&self) -> f32 {
        self.x2
    }

    pub fn y2(&self) -> f32 {
        self.y2
    }

    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Normalized `(x_center, y_center, width, height)` for a frame of the given size.
    pub fn to_yolo(&self, frame_width: u32, frame_height: u32) -> [f32; 4] {
        let w = frame_width.max(1) as f32;
        let h = frame_height.max(1) as f32;
        [
            (self.x1 + self.x2) / 2.0 / w,
            (self.y1 + self.y2) / 2.0 / h,
            self.width() / w,
            self.height() / h,
        ]
    }
}

impl TryFrom<RawDetection> for Detection {
    type Error = anyhow::Error;

    fn try_from(raw: RawDetection) -> Result<Self> {
        Detection::new(raw.x1, raw.y1, raw.x2, raw.y2, raw.class_id, raw.confidence)
    }
}

/// `class_id -> class_name` mapping exposed by the model artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassNames {
    names: Vec<String>,
}

impl ClassNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Name for a class id; ids outside the table render as `class_<id>`.
    pub fn name(&self, class_id: u32) -> String {
        self.names
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|idx| idx as u32)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.names
    }
}

/// Greedy non-maximum suppression, per class. Keeps the highest-confidence box
/// of each overlapping group. Output is sorted by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
