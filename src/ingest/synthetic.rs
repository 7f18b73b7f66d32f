//! Deterministic synthetic feed for demos and tests.
//!
//! Draws `objects` solid rectangles moving left to right across a static road
//! background, one lane each. Identical configs produce identical frames.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

const BACKGROUND: Rgb<u8> = Rgb([70, 70, 70]);
const LANE_MARK: Rgb<u8> = Rgb([200, 200, 200]);
const PALETTE: [[u8; 3]; 6] = [
    [220, 40, 40],
    [40, 180, 60],
    [40, 90, 220],
    [230, 200, 30],
    [200, 60, 200],
    [30, 200, 200],
];

/// Parameters parsed from `stub://name?key=value&...`.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub name: String,
    /// Stop after this many frames; unbounded when `None`.
    pub frames: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub objects: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            frames: None,
            width: 640,
            height: 360,
            objects: 3,
        }
    }
}

impl SyntheticConfig {
    /// Parse the part after `stub://`.
    pub(crate) fn parse(rest: &str) -> Result<Self> {
        let (name, query) = match rest.split_once('?') {
            Some((name, query)) => (name, query),
            None => (rest, ""),
        };
        let mut config = Self::default();
        if !name.is_empty() {
            config.name = name.to_string();
        }
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed query parameter '{}'", pair))?;
            let bad = |_| anyhow!("invalid value '{}' for '{}'", value, key);
            match key {
                "frames" => config.frames = Some(value.parse().map_err(bad)?),
                "width" => config.width = value.parse().map_err(bad)?,
                "height" => config.height = value.parse().map_err(bad)?,
                "objects" => config.objects = value.parse().map_err(bad)?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if config.width < 16 || config.height < 16 {
            return Err(anyhow!(
                "stub frames must be at least 16x16, got {}x{}",
                config.width,
                config.height
            ));
        }
        if config.objects > PALETTE.len() {
            return Err(anyhow!(
                "stub supports at most {} objects",
                PALETTE.len()
            ));
        }
        Ok(config)
    }
}

pub(crate) struct SyntheticSource {
    config: SyntheticConfig,
    background: RgbImage,
    produced: u64,
}

impl SyntheticSource {
    pub(crate) fn new(config: SyntheticConfig) -> Self {
        let background = road_background(config.width, config.height, config.objects);
        Self {
            config,
            background,
            produced: 0,
        }
    }

    pub(crate) fn next_image(&mut self) -> Option<RgbImage> {
        if let Some(limit) = self.config.frames {
            if self.produced >= limit {
                return None;
            }
        }
        let image = self.render(self.produced);
        self.produced += 1;
        Some(image)
    }

    fn render(&self, t: u64) -> RgbImage {
        let mut image = self.background.clone();
        let (width, height) = (self.config.width as i64, self.config.height as i64);
        let lanes = self.config.objects as i64;
        let obj_w = (width / 10).max(4);
        let obj_h = (height / (2 * (lanes + 1))).max(4);
        let span = width + obj_w;

        for (lane, color) in PALETTE.iter().take(self.config.objects).enumerate() {
            let lane = lane as i64;
            let speed = 4 + 2 * lane;
            let offset = lane * width / (lanes + 1);
            let x0 = (offset + t as i64 * speed).rem_euclid(span) - obj_w;
            let cy = (lane + 1) * height / (lanes + 1);
            let y0 = cy - obj_h / 2;
            for y in y0.max(0)..(y0 + obj_h).min(height) {
                for x in x0.max(0)..(x0 + obj_w).min(width) {
                    image.put_pixel(x as u32, y as u32, Rgb(*color));
                }
            }
        }
        image
    }
}

fn road_background(width: u32, height: u32, lanes: usize) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, BACKGROUND);
    let lanes = lanes as u32;
    // dashed separators between lanes
    for boundary in 1..=lanes {
        let y = boundary * height / (lanes + 1) + height / (2 * (lanes + 1));
        if y >= height {
            continue;
        }
        for x in (0..width).filter(|x| (x / 12) % 2 == 0) {
            image.put_pixel(x, y, LANE_MARK);
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_parameters() -> Result<()> {
        let config = SyntheticConfig::parse("junction?frames=10&width=320&height=240&objects=2")?;
        assert_eq!(config.name, "junction");
        assert_eq!(config.frames, Some(10));
        assert_eq!((config.width, config.height), (320, 240));
        assert_eq!(config.objects, 2);
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SyntheticConfig::parse("x?frames=ten").is_err());
        assert!(SyntheticConfig::parse("x?speed=3").is_err());
        assert!(SyntheticConfig::parse("x?width=4").is_err());
        assert!(SyntheticConfig::parse("x?objects=99").is_err());
        assert!(SyntheticConfig::parse("x?frames").is_err());
    }

    #[test]
    fn bounded_feed_ends() -> Result<()> {
        let mut source = SyntheticSource::new(SyntheticConfig::parse("x?frames=3")?);
        assert!(source.next_image().is_some());
        assert!(source.next_image().is_some());
        assert!(source.next_image().is_some());
        assert!(source.next_image().is_none());
        Ok(())
    }

    #[test]
    fn frames_are_deterministic_and_moving() -> Result<()> {
        let config = SyntheticConfig::parse("x?width=128&height=64&objects=1")?;
        let mut a = SyntheticSource::new(config.clone());
        let mut b = SyntheticSource::new(config);
        let first = a.next_image();
        assert_eq!(first, b.next_image());
        assert_ne!(first, a.next_image());
        Ok(())
    }
}
