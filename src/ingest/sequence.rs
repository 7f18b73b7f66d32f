//! Directory of still images played back as a video.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

pub(crate) struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    pub(crate) fn open(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to list {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no image files in {}", dir.display()));
        }
        files.sort();
        log::debug!("image sequence {}: {} frames", dir.display(), files.len());
        Ok(Self { files, next: 0 })
    }

    /// Decode the next file. A file that fails to decode still advances the
    /// cursor, so the caller may skip it and continue.
    pub(crate) fn next_image(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        Ok(Some(image.to_rgb8()))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
