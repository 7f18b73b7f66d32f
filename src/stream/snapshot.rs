//! Writing the current annotated frame of a stream to disk.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::RgbImage;

use crate::error::MonitorError;
use crate::render::encode_jpeg;

const SNAPSHOT_QUALITY: u8 = 95;
const MAX_COLLISIONS: u32 = 1000;

/// Save `image` as `snapshot_{slot+1}_{YYYYmmdd-HHMMSS}.jpg` in `dir`.
///
/// Never overwrites: a name already taken gets a `-1`, `-2`, ... suffix, so
/// each call creates exactly one new file.
pub fn write_snapshot(
    dir: &Path,
    slot: usize,
    image: &RgbImage,
    now: DateTime<Local>,
) -> Result<PathBuf, MonitorError> {
    let failed = |reason: String| MonitorError::Snapshot { reason };
    std::fs::create_dir_all(dir)
        .map_err(|e| failed(format!("cannot create {}: {}", dir.display(), e)))?;
    let jpeg = encode_jpeg(image, SNAPSHOT_QUALITY).map_err(|e| failed(format!("{:#}", e)))?;

    let stem = format!("snapshot_{}_{}", slot + 1, now.format("%Y%m%d-%H%M%S"));
    for attempt in 0..MAX_COLLISIONS {
        let name = if attempt == 0 {
            format!("{}.jpg", stem)
        } else {
            format!("{}-{}.jpg", stem, attempt)
        };
        let path = dir.join(name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(failed(format!("cannot create {}: {}", path.display(), e))),
        };
        file.write_all(&jpeg)
            .map_err(|e| failed(format!("cannot write {}: {}", path.display(), e)))?;
        log::info!("snapshot saved to {}", path.display());
        return Ok(path);
    }
    Err(failed(format!("too many snapshots named {}", stem)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 1, 12, 30, 5)
            .earliest()
            .unwrap()
    }

    #[test]
    fn names_follow_slot_and_time() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_snapshot(dir.path(), 1, &RgbImage::new(8, 8), noon())?;
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("snapshot_2_20240501-123005.jpg")
        );
        Ok(())
    }

    #[test]
    fn same_second_never_overwrites() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let image = RgbImage::new(8, 8);
        let first = write_snapshot(dir.path(), 0, &image, noon())?;
        let second = write_snapshot(dir.path(), 0, &image, noon())?;
        assert_ne!(first, second);
        assert!(second.ends_with("snapshot_1_20240501-123005-1.jpg"));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 2);
        Ok(())
    }
}
