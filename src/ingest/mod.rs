//! Video sources.
//!
//! A source identifier from the catalog is classified into a [`SourceSpec`],
//! opened as a [`VideoSource`], then consumed frame by frame through
//! [`Frames`]. Supported inputs:
//! - `stub://` synthetic feeds (always available, deterministic)
//! - directories of still images, played back in file-name order
//! - video files, network URLs and capture devices (feature: ffmpeg)
//!
//! Sources hand each decoded frame to exactly one consumer and never retain it.

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod sequence;
mod synthetic;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use crate::error::MonitorError;
use crate::frame::Frame;

#[cfg(feature = "ffmpeg")]
use self::ffmpeg::FfmpegSource;
use self::sequence::ImageSequenceSource;
pub use self::synthetic::SyntheticConfig;
use self::synthetic::SyntheticSource;

/// Shared cancellation flag for a running stream.
///
/// Clones observe the same flag. Once raised it stays raised.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a source identifier points at.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceSpec {
    Synthetic(SyntheticConfig),
    ImageSequence(PathBuf),
    File(PathBuf),
    /// Local capture device index (`/dev/video{N}` on Linux).
    Device(u32),
    Network(String),
}

impl SourceSpec {
    /// Classify a catalog identifier.
    pub fn parse(identifier: &str, video_dir: &Path) -> Result<Self, MonitorError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(MonitorError::source_unavailable(
                "<empty>",
                "empty source identifier",
            ));
        }
        if let Some(rest) = identifier.strip_prefix("stub://") {
            return SyntheticConfig::parse(rest)
                .map(SourceSpec::Synthetic)
                .map_err(|e| MonitorError::source_unavailable(identifier, e));
        }
        if identifier.chars().all(|c| c.is_ascii_digit()) {
            return identifier
                .parse::<u32>()
                .map(SourceSpec::Device)
                .map_err(|e| MonitorError::source_unavailable(identifier, e));
        }
        if has_url_scheme(identifier) {
            return Ok(SourceSpec::Network(identifier.to_string()));
        }

        let path = resolve_path(identifier, video_dir);
        if path.is_dir() {
            Ok(SourceSpec::ImageSequence(path))
        } else {
            Ok(SourceSpec::File(path))
        }
    }

    /// Human-readable name used in status lines and logs.
    pub fn label(&self) -> String {
        match self {
            SourceSpec::Synthetic(config) => format!("stub://{}", config.name),
            SourceSpec::ImageSequence(path) | SourceSpec::File(path) => {
                path.display().to_string()
            }
            SourceSpec::Device(index) => format!("device {}", index),
            SourceSpec::Network(url) => url.clone(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, SourceSpec::Network(_))
    }
}

fn has_url_scheme(identifier: &str) -> bool {
    match identifier.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        }
        None => false,
    }
}

fn resolve_path(identifier: &str, video_dir: &Path) -> PathBuf {
    let given = PathBuf::from(identifier);
    if given.exists() || given.is_absolute() {
        return given;
    }
    let joined = video_dir.join(&given);
    if joined.exists() {
        joined
    } else {
        given
    }
}

/// Frame counters for an open source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub label: String,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    Sequence(ImageSequenceSource),
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(Box<FfmpegSource>),
}

/// An opened video source.
pub struct VideoSource {
    spec: SourceSpec,
    label: String,
    backend: SourceBackend,
    frames_captured: u64,
}

impl VideoSource {
    /// Open the source described by `spec`.
    pub fn open(spec: SourceSpec) -> Result<Self, MonitorError> {
        let label = spec.label();
        let backend = match &spec {
            SourceSpec::Synthetic(config) => {
                SourceBackend::Synthetic(SyntheticSource::new(config.clone()))
            }
            SourceSpec::ImageSequence(dir) => SourceBackend::Sequence(
                ImageSequenceSource::open(dir)
                    .map_err(|e| MonitorError::source_unavailable(&label, format!("{:#}", e)))?,
            ),
            SourceSpec::File(path) if !path.exists() => {
                return Err(MonitorError::source_unavailable(&label, "no such file"));
            }
            #[cfg(feature = "ffmpeg")]
            other => SourceBackend::Ffmpeg(Box::new(
                FfmpegSource::open(other)
                    .map_err(|e| MonitorError::source_unavailable(&label, format!("{:#}", e)))?,
            )),
            #[cfg(not(feature = "ffmpeg"))]
            _ => {
                return Err(MonitorError::source_unavailable(
                    &label,
                    "video decoding requires the ffmpeg feature",
                ));
            }
        };
        log::info!("opened source {}", label);
        Ok(Self {
            spec,
            label,
            backend,
            frames_captured: 0,
        })
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Read the next frame. `Ok(None)` means the source is exhausted.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, MonitorError> {
        let next: Result<Option<RgbImage>> = match &mut self.backend {
            SourceBackend::Synthetic(source) => Ok(source.next_image()),
            SourceBackend::Sequence(source) => source.next_image(),
            #[cfg(feature = "ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.next_image(),
        };
        match next {
            Ok(Some(image)) => {
                self.frames_captured += 1;
                Ok(Some(Frame::new(image, self.frames_captured)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(MonitorError::source_read(&self.label, format!("{:#}", e))),
        }
    }

    /// Consume the source as an iterator that ends at end-of-stream or on `stop`.
    pub fn frames(self, stop: StopSignal) -> Frames {
        Frames {
            source: self,
            stop,
            finished: false,
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            label: self.label.clone(),
        }
    }
}

/// Frame iterator over one source. Not restartable.
pub struct Frames {
    source: VideoSource,
    stop: StopSignal,
    finished: bool,
}

impl Frames {
    pub fn source(&self) -> &VideoSource {
        &self.source
    }
}

impl Iterator for Frames {
    type Item = Result<Frame, MonitorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.stop.is_raised() {
            self.finished = true;
            return None;
        }
        match self.source.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn classifies_identifiers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let videos = dir.path();
        assert_eq!(SourceSpec::parse("0", videos)?, SourceSpec::Device(0));
        assert_eq!(
            SourceSpec::parse("rtsp://10.0.0.2/live", videos)?,
            SourceSpec::Network("rtsp://10.0.0.2/live".to_string())
        );
        assert!(matches!(
            SourceSpec::parse("stub://road?frames=5", videos)?,
            SourceSpec::Synthetic(SyntheticConfig { frames: Some(5), .. })
        ));
        assert_eq!(
            SourceSpec::parse(&videos.display().to_string(), videos)?,
            SourceSpec::ImageSequence(videos.to_path_buf())
        );
        assert_eq!(
            SourceSpec::parse("missing.mp4", videos)?,
            SourceSpec::File(PathBuf::from("missing.mp4"))
        );
        assert!(SourceSpec::parse("  ", videos).is_err());
        Ok(())
    }

    #[test]
    fn relative_paths_resolve_against_video_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"not really a video")?;
        assert_eq!(
            SourceSpec::parse("clip.mp4", dir.path())?,
            SourceSpec::File(clip)
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_unavailable() {
        let spec = SourceSpec::File(PathBuf::from("/nonexistent/clip.mp4"));
        match VideoSource::open(spec) {
            Err(MonitorError::SourceUnavailable { reason, .. }) => {
                assert_eq!(reason, "no such file")
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("opened a missing file"),
        }
    }

    #[test]
    fn frames_stop_on_signal() -> Result<()> {
        let spec = SourceSpec::parse("stub://cars", Path::new("."))?;
        let stop = StopSignal::new();
        let mut frames = VideoSource::open(spec)?.frames(stop.clone());
        assert!(frames.next().is_some());
        stop.raise();
        assert!(frames.next().is_none());
        assert!(frames.next().is_none());
        assert_eq!(frames.source().stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn image_sequence_yields_every_frame_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for i in 0..4u8 {
            let image = RgbImage::from_pixel(8, 6, Rgb([i * 10, 0, 0]));
            image.save(dir.path().join(format!("frame_{:03}.png", i)))?;
        }
        let spec = SourceSpec::parse(&dir.path().display().to_string(), Path::new("."))?;
        let frames: Vec<Frame> = VideoSource::open(spec)?
            .frames(StopSignal::new())
            .collect::<Result<_, _>>()?;
        assert_eq!(frames.len(), 4);
        let reds: Vec<u8> = frames.iter().map(|f| f.image().get_pixel(0, 0)[0]).collect();
        assert_eq!(reds, vec![0, 10, 20, 30]);
        assert_eq!(frames[3].sequence, 4);
        Ok(())
    }
}
