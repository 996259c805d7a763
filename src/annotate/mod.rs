//! Frame annotation: detection boxes, labels and the verdict banner.
//!
//! `Annotator::annotate` is a pure function of its inputs. Drawing the same
//! detections onto two copies of a frame gives identical pixels.

pub mod font;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Deserialize;

use crate::decision::FrameVerdict;
use crate::detect::{ClassNames, Detection};

const LABEL_GAP: i32 = 4;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnnotationStyle {
    /// RGB color for detections that satisfy the decision rule.
    pub alert_color: [u8; 3],
    pub normal_color: [u8; 3],
    pub box_thickness: u32,
    pub label_scale: u32,
    pub banner_scale: u32,
    pub show_alert_banner: bool,
    pub show_normal_banner: bool,
    pub alert_banner: String,
    pub normal_banner: String,
    /// Top-left corner of the banner text.
    pub banner_position: (i32, i32),
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            alert_color: [255, 0, 0],
            normal_color: [0, 255, 0],
            box_thickness: 2,
            label_scale: 1,
            banner_scale: 2,
            show_alert_banner: true,
            show_normal_banner: false,
            alert_banner: "Alert condition detected".to_string(),
            normal_banner: "Normal".to_string(),
            banner_position: (10, 40),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Annotator {
    style: AnnotationStyle,
}

impl Annotator {
    pub fn new(style: AnnotationStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &AnnotationStyle {
        &self.style
    }

    /// Draw every detection scoring above `threshold`, then the banner.
    pub fn annotate(
        &self,
        image: &mut RgbImage,
        detections: &[Detection],
        verdict: &FrameVerdict,
        threshold: f32,
        names: &ClassNames,
    ) {
        for (idx, detection) in detections.iter().enumerate() {
            if detection.confidence() <= threshold {
                continue;
            }
            let color = if verdict.is_trigger(idx) {
                Rgb(self.style.alert_color)
            } else {
                Rgb(self.style.normal_color)
            };
            let Some(bounds) = clamp_box(detection, image.width(), image.height()) else {
                continue;
            };
            self.draw_box(image, bounds, color);

            let label = format!(
                "{} {:.2}",
                names.name(detection.class_id()),
                detection.confidence()
            );
            let (x, y) = self.label_origin(bounds);
            font::draw_text(image, &label, x, y, self.style.label_scale, color);
        }

        if verdict.alert && self.style.show_alert_banner {
            self.draw_banner(image, &self.style.alert_banner, Rgb(self.style.alert_color));
        } else if !verdict.alert && self.style.show_normal_banner {
            self.draw_banner(image, &self.style.normal_banner, Rgb(self.style.normal_color));
        }
    }

    /// Annotated copy of `image`; the input is left untouched.
    pub fn annotated(
        &self,
        image: &RgbImage,
        detections: &[Detection],
        verdict: &FrameVerdict,
        threshold: f32,
        names: &ClassNames,
    ) -> RgbImage {
        let mut out = image.clone();
        self.annotate(&mut out, detections, verdict, threshold, names);
        out
    }

    fn draw_box(&self, image: &mut RgbImage, bounds: [i32; 4], color: Rgb<u8>) {
        let [x0, y0, x1, y1] = bounds;
        for t in 0..self.style.box_thickness.max(1) as i32 {
            let w = x1 - x0 + 1 - 2 * t;
            let h = y1 - y0 + 1 - 2 * t;
            if w < 1 || h < 1 {
                break;
            }
            let rect = Rect::at(x0 + t, y0 + t).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    /// Just above the box's top-left corner, or just inside it when the box
    /// touches the top edge.
    fn label_origin(&self, bounds: [i32; 4]) -> (i32, i32) {
        let text_h = font::text_height(self.style.label_scale) as i32;
        let above = bounds[1] - LABEL_GAP - text_h;
        if above >= 0 {
            (bounds[0], above)
        } else {
            (
                bounds[0] + self.style.box_thickness as i32 + 1,
                bounds[1] + self.style.box_thickness as i32 + 1,
            )
        }
    }

    fn draw_banner(&self, image: &mut RgbImage, text: &str, color: Rgb<u8>) {
        let (x, y) = self.style.banner_position;
        font::draw_text(image, text, x, y, self.style.banner_scale, color);
    }
}

/// Clamp a detection box to the frame. `None` when nothing of it is visible.
fn clamp_box(detection: &Detection, width: u32, height: u32) -> Option<[i32; 4]> {
    if width == 0 || height == 0 {
        return None;
    }
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;
    if detection.x1() > max_x || detection.y1() > max_y || detection.x2() < 0.0 || detection.y2() < 0.0
    {
        return None;
    }
    let x0 = detection.x1().max(0.0).floor() as i32;
    let y0 = detection.y1().max(0.0).floor() as i32;
    let x1 = detection.x2().min(max_x).floor() as i32;
    let y1 = detection.y2().min(max_y).floor() as i32;
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some([x0, y0, x1, y1])
}
