//! Box and label overlay.

use std::borrow::Cow;

use anyhow::Result;
use image::{Rgb, RgbImage};

use super::font::{glyph_bits, text_width, GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH};
use super::viewer::{FrameViewer, ViewerEvent};
use super::{DetectionSink, SinkControl};
use crate::detect::FilteredDetection;
use crate::frame::Frame;

const LABEL_PADDING: u32 = 2;
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([163, 81, 251]),
    Rgb([255, 64, 64]),
    Rgb([64, 200, 64]),
    Rgb([48, 128, 255]),
    Rgb([255, 165, 0]),
    Rgb([0, 200, 200]),
    Rgb([255, 0, 200]),
    Rgb([200, 200, 0]),
];

/// Color assigned to a class id.
pub fn class_color(class_id: u32) -> Rgb<u8> {
    PALETTE[class_id as usize % PALETTE.len()]
}

/// Label drawn above a box, e.g. `cup 82%`.
pub fn label_for(detection: &FilteredDetection) -> String {
    format!(
        "{} {:.0}%",
        detection.class_name(),
        detection.confidence() * 100.0
    )
}

/// Draw one rectangle and one label per detection.
///
/// With no detections the input frame is returned borrowed and untouched;
/// otherwise a modified copy is returned and the input is never written.
pub fn annotate<'a>(frame: &'a Frame, detections: &[FilteredDetection]) -> Cow<'a, Frame> {
    if detections.is_empty() || frame.width() == 0 || frame.height() == 0 {
        return Cow::Borrowed(frame);
    }

    let mut image = frame.to_image();
    for det in detections {
        let color = class_color(det.raw.class_id);
        let bbox = det.bbox();
        let max_x = (image.width() - 1) as f32;
        let max_y = (image.height() - 1) as f32;
        let left = bbox.x1.clamp(0.0, max_x).round() as u32;
        let top = bbox.y1.clamp(0.0, max_y).round() as u32;
        let right = bbox.x2.clamp(0.0, max_x).round() as u32;
        let bottom = bbox.y2.clamp(0.0, max_y).round() as u32;
        draw_rectangle(&mut image, left, top, right, bottom, color);
        draw_label(&mut image, left, top, &label_for(det), color);
    }
    Cow::Owned(Frame::from_image(image))
}

fn draw_rectangle(image: &mut RgbImage, left: u32, top: u32, right: u32, bottom: u32, color: Rgb<u8>) {
    for x in left..=right {
        image.put_pixel(x, top, color);
        image.put_pixel(x, bottom, color);
    }
    for y in top..=bottom {
        image.put_pixel(left, y, color);
        image.put_pixel(right, y, color);
    }
}

/// Filled tag above the box (inside it when the box touches the top edge).
fn draw_label(image: &mut RgbImage, left: u32, top: u32, text: &str, background: Rgb<u8>) {
    let tag_height = GLYPH_HEIGHT + 2 * LABEL_PADDING;
    let tag_top = top.checked_sub(tag_height).unwrap_or(top);
    let tag_right = (left + text_width(text) + 2 * LABEL_PADDING).min(image.width());
    let tag_bottom = (tag_top + tag_height).min(image.height());

    for y in tag_top..tag_bottom {
        for x in left..tag_right {
            image.put_pixel(x, y, background);
        }
    }

    let mut x = left + LABEL_PADDING;
    let y = tag_top + LABEL_PADDING;
    for ch in text.chars() {
        if let Some(rows) = glyph_bits(ch) {
            for (row, pattern) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        let (px, py) = (x + col, y + row as u32);
                        if px < image.width() && py < image.height() {
                            image.put_pixel(px, py, LABEL_TEXT);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

/// Annotates each frame and hands it to a viewer.
pub struct OverlaySink<V: FrameViewer> {
    viewer: V,
}

impl<V: FrameViewer> OverlaySink<V> {
    pub fn new(viewer: V) -> Self {
        Self { viewer }
    }

    pub fn viewer(&self) -> &V {
        &self.viewer
    }
}

impl<V: FrameViewer> DetectionSink for OverlaySink<V> {
    fn consume(
        &mut self,
        frame_index: u64,
        frame: &Frame,
        detections: &[FilteredDetection],
    ) -> Result<SinkControl> {
        let annotated = annotate(frame, detections);
        match self.viewer.show(frame_index, &annotated)? {
            ViewerEvent::Continue => Ok(SinkControl::Continue),
            ViewerEvent::Quit => Ok(SinkControl::Stop),
        }
    }
}
