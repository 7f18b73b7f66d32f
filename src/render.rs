//! Frame annotation and JPEG encoding.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use crate::config::RenderSettings;
use crate::track::TrackedObject;

const LABEL_SCALE: f32 = 16.0;
const LABEL_PADDING: u32 = 4;
const LABEL_HEIGHT_NO_FONT: u32 = 6;

/// Draws tracked objects onto frames. Stateless between frames.
pub struct Annotator {
    line_thickness: u32,
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(settings: &RenderSettings) -> Result<Self> {
        let font = match &settings.font_path {
            Some(path) => Some(load_font(path)?),
            None => None,
        };
        Ok(Self {
            line_thickness: settings.line_thickness.max(1),
            font,
        })
    }

    /// Return a copy of `image` with boxes, labels and trajectories drawn on it.
    pub fn annotate(&self, image: &RgbImage, objects: &[TrackedObject]) -> RgbImage {
        let mut canvas = image.clone();
        for object in objects {
            let bbox = object.bbox.clamp_to(canvas.width(), canvas.height());
            if bbox.width() == 0 || bbox.height() == 0 {
                continue;
            }
            let color = Rgb(object.class.color());

            for inset in 0..self.line_thickness as i32 {
                let w = bbox.width() - 2 * inset;
                let h = bbox.height() - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                let rect = Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            let label = format!(
                "{} #{} {:.2}",
                object.class.name(),
                object.track_id,
                object.confidence
            );
            self.draw_label(&mut canvas, bbox.x1, bbox.y1, &label, color);

            let points: Vec<(f32, f32)> = object
                .trajectory
                .iter()
                .map(|(x, y)| (*x as f32, *y as f32))
                .collect();
            for segment in points.windows(2) {
                draw_line_segment_mut(&mut canvas, segment[0], segment[1], color);
            }
        }
        canvas
    }

    fn draw_label(&self, canvas: &mut RgbImage, x: i32, y: i32, label: &str, color: Rgb<u8>) {
        let scale = PxScale::from(LABEL_SCALE);
        let (width, height) = match &self.font {
            Some(font) => {
                let (w, h) = text_size(scale, font, label);
                (w + LABEL_PADDING, h + LABEL_PADDING)
            }
            // Without a font the label background still marks the class color.
            None => (
                (label.len() as u32 * 7).min(canvas.width()),
                LABEL_HEIGHT_NO_FONT,
            ),
        };
        if width == 0 || height == 0 {
            return;
        }
        let top = (y - height as i32).max(0);
        draw_filled_rect_mut(canvas, Rect::at(x, top).of_size(width, height), color);
        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                Rgb([255, 255, 255]),
                x + (LABEL_PADDING / 2) as i32,
                top + (LABEL_PADDING / 2) as i32,
                scale,
                font,
                label,
            );
        }
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read label font {}", path.display()))?;
    FontVec::try_from_vec(bytes)
        .with_context(|| format!("invalid label font {}", path.display()))
}

/// Encode an RGB image as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode_image(image)
        .context("failed to encode frame as JPEG")?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, TrafficClass};
    use std::collections::VecDeque;

    fn tracked(bbox: BoundingBox, class: TrafficClass) -> TrackedObject {
        TrackedObject {
            track_id: 3,
            bbox,
            confidence: 0.8,
            class,
            trajectory: VecDeque::from(vec![(20, 20), (30, 30)]),
            disappeared: 0,
        }
    }

    #[test]
    fn draws_box_in_class_color() -> Result<()> {
        let annotator = Annotator::new(&RenderSettings::default())?;
        let image = RgbImage::new(64, 64);
        let out = annotator.annotate(
            &image,
            &[tracked(BoundingBox::new(10, 20, 50, 60), TrafficClass::Car)],
        );
        assert_eq!(out.get_pixel(10, 40), &Rgb(TrafficClass::Car.color()));
        assert_eq!(out.get_pixel(11, 40), &Rgb(TrafficClass::Car.color()));
        // interior untouched away from the trajectory
        assert_eq!(out.get_pixel(45, 55), &Rgb([0, 0, 0]));
        // source image is not modified
        assert_eq!(image.get_pixel(10, 40), &Rgb([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn skips_boxes_outside_the_frame() -> Result<()> {
        let annotator = Annotator::new(&RenderSettings::default())?;
        let image = RgbImage::new(16, 16);
        let out = annotator.annotate(
            &image,
            &[tracked(BoundingBox::new(40, 40, 80, 80), TrafficClass::Bus)],
        );
        assert_eq!(out, image);
        Ok(())
    }

    #[test]
    fn missing_font_fails_construction() {
        let settings = RenderSettings {
            font_path: Some("/nonexistent/font.ttf".into()),
            ..RenderSettings::default()
        };
        assert!(Annotator::new(&settings).is_err());
    }

    #[test]
    fn encodes_jpeg() -> Result<()> {
        let image = RgbImage::from_pixel(8, 8, Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&image, 80)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }
}
