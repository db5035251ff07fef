//! Turns results into files: a grayscale class map, boxes drawn over the
//! input, and a JSON dump of the raw response.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use log::debug;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::adapter::{BoundingBox, DetectionResult, SegmentationResult};
use crate::error::Result;

/// Gray level step between neighbouring class ids.
pub const CLASS_GRAY_STEP: i64 = 20;

/// Stroke width of detection boxes, in pixels.
pub const BOX_THICKNESS: u32 = 3;

const PALETTE: [[u8; 3]; 10] = [
    [0x0B, 0x6C, 0x7E],
    [0x1F, 0x89, 0xA7],
    [0xF2, 0xD7, 0xAE],
    [0xE8, 0x95, 0x2E],
    [0x7C, 0xA3, 0x21],
    [0xDB, 0xCF, 0x64],
    [0xE9, 0xB3, 0x43],
    [0xDF, 0x47, 0x4E],
    [0x5D, 0x2A, 0x36],
    [0x3D, 0x36, 0x3A],
];

/// Color used for boxes of `class_id`. Always the same for a given id.
pub fn class_color(class_id: i64) -> Rgb<u8> {
    let index = class_id.rem_euclid(PALETTE.len() as i64) as usize;
    Rgb(PALETTE[index])
}

/// One gray pixel per class id, `class_id * 20` saturated to 0..=255.
pub fn render_segmentation(result: &SegmentationResult) -> GrayImage {
    GrayImage::from_fn(result.width as u32, result.height as u32, |x, y| {
        let class_id = result.class_at(x as usize, y as usize).unwrap_or(0);
        let level = class_id.saturating_mul(CLASS_GRAY_STEP).clamp(0, 255);
        Luma([level as u8])
    })
}

/// Pixel rectangle for a fractional box, clamped to `width` x `height`.
/// Returns `None` when nothing of the box is left inside the image.
pub fn pixel_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    if width == 0 || height == 0 {
        return None;
    }
    let scale = |v: f32, extent: u32| (v * extent as f32).clamp(0.0, (extent - 1) as f32);

    let x0 = scale(bbox.x0, width).floor() as i32;
    let y0 = scale(bbox.y0, height).floor() as i32;
    let x1 = scale(bbox.x1, width).ceil() as i32;
    let y1 = scale(bbox.y1, height).ceil() as i32;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect::at(x0, y0).of_size((x1 - x0) as u32 + 1, (y1 - y0) as u32 + 1))
}

/// Draw every detection onto a copy of `source`.
pub fn render_detections(source: &DynamicImage, result: &DetectionResult) -> RgbImage {
    let mut canvas = source.to_rgb8();
    let (width, height) = canvas.dimensions();

    for detection in &result.detections {
        let rect = match pixel_rect(&detection.bbox, width, height) {
            Some(rect) => rect,
            None => {
                debug!("slot {} box is empty after clamping", detection.slot);
                continue;
            }
        };
        let color = class_color(detection.class_id);

        // Inset each stroke so the box grows inwards.
        for inset in 0..BOX_THICKNESS {
            if rect.width() <= 2 * inset || rect.height() <= 2 * inset {
                break;
            }
            let stroke = Rect::at(rect.left() + inset as i32, rect.top() + inset as i32)
                .of_size(rect.width() - 2 * inset, rect.height() - 2 * inset);
            draw_hollow_rect_mut(&mut canvas, stroke, color);
        }
    }

    canvas
}

/// Write `value` as pretty-printed JSON.
pub fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}
