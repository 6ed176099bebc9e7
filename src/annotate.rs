use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use thiserror::Error;

use crate::detector::Detection;
use crate::labels::ClassLabels;

const BOX_THICKNESS: i32 = 3;
const LABEL_OFFSET_X: i32 = 5;
const LABEL_OFFSET_Y: i32 = 10;
const FONT_HEIGHT_RATIO: f32 = 0.02;
const MIN_FONT_HEIGHT: f32 = 12.;

#[derive(Error, Debug)]
pub enum FontError {
    #[error("failed to read font file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("{path} is not a valid TrueType font")]
    Parse { path: String },
}

/// Loads the label font from disk, once at startup. Requests never
/// touch the network for assets.
pub fn load_font(path: &Path) -> Result<FontVec, FontError> {
    let bytes = std::fs::read(path).map_err(|source| FontError::Read {
        path: path.display().to_string(),
        source,
    })?;

    FontVec::try_from_vec(bytes).map_err(|_| FontError::Parse {
        path: path.display().to_string(),
    })
}

/// Draws every detection onto the image: hollow class-colored box plus
/// a `label confidence` caption just inside the top-left corner.
pub fn render(image: &mut RgbImage, detections: &[Detection], labels: &ClassLabels, font: &FontVec) {
    let scale = label_scale(image.width());

    for detection in detections {
        let color = labels.color(detection.class_id);
        let Some((x1, y1, x2, y2)) = clamp_box(detection, image.width(), image.height()) else {
            continue;
        };

        draw_box(image, x1, y1, x2, y2, color);

        let caption = format!("{} {:.2}", labels.label(detection.class_id), detection.confidence);
        draw_text_mut(
            image,
            color,
            x1 + LABEL_OFFSET_X,
            y1 + LABEL_OFFSET_Y,
            scale,
            font,
            &caption,
        );
    }
}

/// Caption height tracks the image width so labels stay readable on
/// large photos without swamping small ones.
fn label_scale(image_width: u32) -> PxScale {
    PxScale::from((image_width as f32 * FONT_HEIGHT_RATIO).max(MIN_FONT_HEIGHT))
}

/// Clips a detection to the image bounds. Returns `None` when nothing
/// of the box lies inside the image.
fn clamp_box(detection: &Detection, width: u32, height: u32) -> Option<(i32, i32, i32, i32)> {
    let max_x = width.saturating_sub(1) as i32;
    let max_y = height.saturating_sub(1) as i32;

    let x1 = (detection.x1 as i32).clamp(0, max_x);
    let y1 = (detection.y1 as i32).clamp(0, max_y);
    let x2 = (detection.x2 as i32).clamp(0, max_x);
    let y2 = (detection.y2 as i32).clamp(0, max_y);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2, y2))
}

fn draw_box(image: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    for inset in 0..BOX_THICKNESS {
        let w = x2 - x1 - 2 * inset;
        let h = y2 - y1 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn label_scale_tracks_image_width() {
        assert_eq!(label_scale(1000).y, 20.);
        // Tiny images floor at the minimum legible height.
        assert_eq!(label_scale(100).y, MIN_FONT_HEIGHT);
    }

    #[test]
    fn boxes_are_clipped_to_image_bounds() {
        let clipped = clamp_box(&det(-20., -10., 50., 50.), 100, 100).unwrap();
        assert_eq!(clipped, (0, 0, 50, 50));

        let clipped = clamp_box(&det(50., 50., 500., 500.), 100, 100).unwrap();
        assert_eq!(clipped, (50, 50, 99, 99));
    }

    #[test]
    fn fully_outside_boxes_are_dropped() {
        assert!(clamp_box(&det(200., 200., 300., 300.), 100, 100).is_none());
        assert!(clamp_box(&det(-50., -50., -10., -10.), 100, 100).is_none());
    }

    #[test]
    fn draw_box_paints_a_three_pixel_border() {
        let mut image = RgbImage::from_pixel(50, 50, Rgb([0, 0, 0]));
        let red = Rgb([255, 0, 0]);

        draw_box(&mut image, 10, 10, 40, 40, red);

        assert_eq!(*image.get_pixel(10, 10), red);
        assert_eq!(*image.get_pixel(12, 10), red);
        assert_eq!(*image.get_pixel(10, 12), red);
        // One pixel past the border stays untouched.
        assert_eq!(*image.get_pixel(13, 25), Rgb([0, 0, 0]));
        // Interior stays untouched.
        assert_eq!(*image.get_pixel(25, 25), Rgb([0, 0, 0]));
    }

    #[test]
    fn degenerate_box_does_not_panic() {
        let mut image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        draw_box(&mut image, 5, 5, 7, 7, Rgb([255, 0, 0]));
        assert_eq!(*image.get_pixel(5, 5), Rgb([255, 0, 0]));
    }

    #[test]
    fn loading_a_missing_font_fails() {
        let result = load_font(Path::new("/nonexistent/font.ttf"));
        assert!(matches!(result, Err(FontError::Read { .. })));
    }
}
