use anyhow::{anyhow, Result};

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection, TrafficClass};
use crate::frame::Frame;

/// Tuning for the motion backend.
#[derive(Clone, Debug)]
pub struct MotionConfig {
    /// Side of the square luma cell, in pixels.
    pub cell_size: u32,
    /// Mean luma difference for a cell to count as moving.
    pub diff_threshold: f32,
    /// Background running-average weight of the current frame.
    pub learning_rate: f32,
    /// Smallest connected group of moving cells reported as an object.
    pub min_cells: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            cell_size: 8,
            diff_threshold: 25.0,
            learning_rate: 0.05,
            min_cells: 4,
        }
    }
}

/// Class-agnostic detector based on frame differencing.
///
/// Keeps a running-average background on a coarse luma grid and reports
/// connected groups of changed cells. The first frame (and any frame whose
/// size differs from the background) only primes the background.
pub struct MotionBackend {
    config: MotionConfig,
    background: Option<LumaGrid>,
}

impl MotionBackend {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            background: None,
        }
    }
}

#[derive(Clone, Debug)]
struct LumaGrid {
    cols: usize,
    rows: usize,
    values: Vec<f32>,
}

impl LumaGrid {
    fn from_frame(frame: &Frame, cell: u32) -> Self {
        let width = frame.width();
        let height = frame.height();
        let cols = width.div_ceil(cell) as usize;
        let rows = height.div_ceil(cell) as usize;
        let mut sums = vec![0f32; cols * rows];
        let mut counts = vec![0u32; cols * rows];
        for (x, y, pixel) in frame.image().enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            let idx = (y / cell) as usize * cols + (x / cell) as usize;
            sums[idx] += luma;
            counts[idx] += 1;
        }
        let values = sums
            .iter()
            .zip(&counts)
            .map(|(sum, count)| if *count == 0 { 0.0 } else { sum / *count as f32 })
            .collect();
        Self { cols, rows, values }
    }

    fn same_shape(&self, other: &LumaGrid) -> bool {
        self.cols == other.cols && self.rows == other.rows
    }
}

impl Detector for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn warm_up(&mut self) -> Result<()> {
        if self.config.cell_size == 0 {
            return Err(anyhow!("motion cell size must be > 0"));
        }
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("frame has no pixels"));
        }
        let cell = self.config.cell_size.max(1);
        let current = LumaGrid::from_frame(frame, cell);

        let primed = matches!(&self.background, Some(bg) if bg.same_shape(&current));
        if !primed {
            self.background = Some(current);
            return Ok(Vec::new());
        }
        let background = self
            .background
            .as_mut()
            .ok_or_else(|| anyhow!("motion background missing"))?;

        let moving: Vec<bool> = current
            .values
            .iter()
            .zip(&background.values)
            .map(|(cur, bg)| (cur - bg).abs() > self.config.diff_threshold)
            .collect();

        let rate = self.config.learning_rate.clamp(0.0, 1.0);
        for (bg, cur) in background.values.iter_mut().zip(&current.values) {
            *bg = *bg * (1.0 - rate) + cur * rate;
        }

        let detections = connected_regions(&moving, current.cols, current.rows)
            .into_iter()
            .filter(|region| region.cells >= self.config.min_cells)
            .map(|region| {
                let bbox = BoundingBox::new(
                    (region.min_col * cell as usize) as i32,
                    (region.min_row * cell as usize) as i32,
                    ((region.max_col + 1) * cell as usize) as i32,
                    ((region.max_row + 1) * cell as usize) as i32,
                )
                .clamp_to(frame.width(), frame.height());
                let span = (region.max_col - region.min_col + 1) * (region.max_row - region.min_row + 1);
                let fill = region.cells as f32 / span as f32;
                Detection::new(bbox, fill, TrafficClass::Unknown)
            })
            .collect();
        Ok(detections)
    }
}

#[derive(Debug)]
struct Region {
    cells: usize,
    min_col: usize,
    min_row: usize,
    max_col: usize,
    max_row: usize,
}

/// 4-connected components over a row-major mask.
fn connected_regions(mask: &[bool], cols: usize, rows: usize) -> Vec<Region> {
    let mut visited = vec![false; mask.len()];
    let mut regions = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        let mut region = Region {
            cells: 0,
            min_col: usize::MAX,
            min_row: usize::MAX,
            max_col: 0,
            max_row: 0,
        };
        while let Some(idx) = stack.pop() {
            let (col, row) = (idx % cols, idx / cols);
            region.cells += 1;
            region.min_col = region.min_col.min(col);
            region.min_row = region.min_row.min(row);
            region.max_col = region.max_col.max(col);
            region.max_row = region.max_row.max(row);

            let mut visit = |n: usize| {
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if col > 0 {
                visit(idx - 1);
            }
            if col + 1 < cols {
                visit(idx + 1);
            }
            if row > 0 {
                visit(idx - cols);
            }
            if row + 1 < rows {
                visit(idx + cols);
            }
        }
        regions.push(region);
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn frame_with_square(square: Option<(u32, u32, u32)>, sequence: u64) -> Frame {
        let mut image = RgbImage::from_pixel(64, 64, Rgb([40, 40, 40]));
        if let Some((x0, y0, size)) = square {
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    image.put_pixel(x, y, Rgb([250, 250, 250]));
                }
            }
        }
        Frame::new(image, sequence)
    }

    #[test]
    fn first_frame_primes_background() -> Result<()> {
        let mut backend = MotionBackend::new(MotionConfig::default());
        let detections = backend.detect(&frame_with_square(Some((8, 8, 16)), 1))?;
        assert!(detections.is_empty());
        Ok(())
    }

    #[test]
    fn static_scene_yields_empty_result() -> Result<()> {
        let mut backend = MotionBackend::new(MotionConfig::default());
        for seq in 1..=5 {
            let detections = backend.detect(&frame_with_square(None, seq))?;
            assert!(detections.is_empty());
        }
        Ok(())
    }

    #[test]
    fn new_object_is_boxed() -> Result<()> {
        let mut backend = MotionBackend::new(MotionConfig::default());
        backend.detect(&frame_with_square(None, 1))?;
        let detections = backend.detect(&frame_with_square(Some((16, 16, 16)), 2))?;
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.bbox, BoundingBox::new(16, 16, 32, 32));
        assert_eq!(det.class, TrafficClass::Unknown);
        assert!((det.confidence - 1.0).abs() < f32::EPSILON);
        Ok(())
    }

    #[test]
    fn small_changes_are_ignored() -> Result<()> {
        let mut backend = MotionBackend::new(MotionConfig::default());
        backend.detect(&frame_with_square(None, 1))?;
        // one 8x8 cell is below min_cells
        let detections = backend.detect(&frame_with_square(Some((8, 8, 8)), 2))?;
        assert!(detections.is_empty());
        Ok(())
    }

    #[test]
    fn resolution_change_reprimes() -> Result<()> {
        let mut backend = MotionBackend::new(MotionConfig::default());
        backend.detect(&frame_with_square(None, 1))?;
        let other = Frame::new(RgbImage::from_pixel(32, 32, Rgb([255, 255, 255])), 2);
        assert!(backend.detect(&other)?.is_empty());
        Ok(())
    }

    #[test]
    fn separate_objects_are_separate_regions() {
        #[rustfmt::skip]
        let mask = vec![
            true,  true,  false, false,
            true,  true,  false, true,
            false, false, false, true,
        ];
        let regions = connected_regions(&mask, 4, 3);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].cells, 4);
        assert_eq!(regions[1].cells, 2);
        assert_eq!((regions[1].min_col, regions[1].min_row), (3, 1));
    }
}
