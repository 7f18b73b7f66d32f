use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::detect::{MotionConfig, TrafficClass};
use crate::error::MonitorError;

const DEFAULT_WEB_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_VIDEO_DIR: &str = "sample_videos";
const DEFAULT_SNAPSHOT_DIR: &str = "static/snapshots";
const DEFAULT_DETECTOR: &str = "motion";
const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MAX_DISAPPEARED: u32 = 30;
const DEFAULT_MIN_IOU: f32 = 0.3;
const DEFAULT_MAX_TRAJECTORY_POINTS: usize = 30;
const DEFAULT_MAX_STREAMS: usize = 4;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 30;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_MAX_READ_ERRORS: u32 = 25;
const DEFAULT_LINE_THICKNESS: u32 = 2;
const MAX_STREAM_SLOTS: usize = 16;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    web: Option<WebConfigFile>,
    video_dir: Option<PathBuf>,
    snapshots: Option<SnapshotConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    render: Option<RenderConfigFile>,
    sources: Option<Vec<SourceEntry>>,
}

#[derive(Debug, Deserialize, Default)]
struct WebConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    conf_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
    classes: Option<Vec<String>>,
    motion: Option<MotionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    cell_size: Option<u32>,
    diff_threshold: Option<f32>,
    learning_rate: Option<f32>,
    min_cells: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    max_disappeared: Option<u32>,
    min_iou: Option<f32>,
    max_trajectory_points: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    max_streams: Option<usize>,
    frame_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    max_consecutive_read_errors: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    line_thickness: Option<u32>,
    font_path: Option<PathBuf>,
}

/// A named entry in the source catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub uri: String,
}

impl SourceEntry {
    pub fn new(name: &str, uri: &str) -> Self {
        Self {
            name: name.to_string(),
            uri: uri.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub web_addr: String,
    pub video_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub detector: DetectorSettings,
    pub tracker: TrackerSettings,
    pub pipeline: PipelineSettings,
    pub render: RenderSettings,
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub classes: Vec<TrafficClass>,
    /// Tuning for the `motion` backend.
    pub motion: MotionConfig,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR.to_string(),
            model_path: None,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
            classes: TrafficClass::ALL.to_vec(),
            motion: MotionConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Frames a track may go unmatched before it is dropped.
    pub max_disappeared: u32,
    pub min_iou: f32,
    pub max_trajectory_points: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_disappeared: DEFAULT_MAX_DISAPPEARED,
            min_iou: DEFAULT_MIN_IOU,
            max_trajectory_points: DEFAULT_MAX_TRAJECTORY_POINTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_streams: usize,
    /// Pause between frames of one stream. Zero runs as fast as the source allows.
    pub frame_interval_ms: u64,
    pub jpeg_quality: u8,
    pub max_consecutive_read_errors: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_streams: DEFAULT_MAX_STREAMS,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_consecutive_read_errors: DEFAULT_MAX_READ_ERRORS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub line_thickness: u32,
    pub font_path: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            line_thickness: DEFAULT_LINE_THICKNESS,
            font_path: None,
        }
    }
}

/// The built-in source catalog (the "None" entry is added by the catalog itself).
pub fn default_sources() -> Vec<SourceEntry> {
    vec![
        SourceEntry::new("1625973-hd (25fps)", "1625973-hd_1920_1080_25fps.mp4"),
        SourceEntry::new("4791734-hd (30fps)", "4791734-hd_1920_1080_30fps.mp4"),
        SourceEntry::new("Webcam", "0"),
        SourceEntry::new(
            "Pula Traffic Cam",
            "https://cdn-004.whatsupcams.com/hls/hr_pula01.m3u8",
        ),
        SourceEntry::new(
            "Zagreb Traffic Cam",
            "https://cdn-004.whatsupcams.com/hls/hr_zagreb01.m3u8",
        ),
        SourceEntry::new("Synthetic Traffic", "stub://traffic?objects=3"),
    ]
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            web_addr: DEFAULT_WEB_ADDR.to_string(),
            video_dir: PathBuf::from(DEFAULT_VIDEO_DIR),
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            detector: DetectorSettings::default(),
            tracker: TrackerSettings::default(),
            pipeline: PipelineSettings::default(),
            render: RenderSettings::default(),
            sources: default_sources(),
        }
    }
}

impl MonitorConfig {
    /// Load from `TRAFFIC_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit file, falling back to `TRAFFIC_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("TRAFFIC_CONFIG").ok().map(PathBuf::from);
        let config_path = path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let web_addr = file
            .web
            .and_then(|web| web.addr)
            .unwrap_or(defaults.web_addr);
        let video_dir = file.video_dir.unwrap_or(defaults.video_dir);
        let snapshot_dir = file
            .snapshots
            .and_then(|snapshots| snapshots.dir)
            .unwrap_or(defaults.snapshot_dir);

        let detector_file = file.detector.unwrap_or_default();
        let classes = match detector_file.classes {
            Some(names) => names
                .iter()
                .map(|name| name.parse::<TrafficClass>())
                .collect::<Result<Vec<_>>>()?,
            None => defaults.detector.classes,
        };
        let motion_file = detector_file.motion.unwrap_or_default();
        let motion_defaults = defaults.detector.motion;
        let motion = MotionConfig {
            cell_size: motion_file.cell_size.unwrap_or(motion_defaults.cell_size),
            diff_threshold: motion_file
                .diff_threshold
                .unwrap_or(motion_defaults.diff_threshold),
            learning_rate: motion_file
                .learning_rate
                .unwrap_or(motion_defaults.learning_rate),
            min_cells: motion_file.min_cells.unwrap_or(motion_defaults.min_cells),
        };
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(defaults.detector.backend),
            model_path: detector_file.model_path,
            conf_threshold: detector_file
                .conf_threshold
                .unwrap_or(defaults.detector.conf_threshold),
            iou_threshold: detector_file
                .iou_threshold
                .unwrap_or(defaults.detector.iou_threshold),
            input_size: detector_file
                .input_size
                .unwrap_or(defaults.detector.input_size),
            classes,
            motion,
        };

        let tracker_file = file.tracker.unwrap_or_default();
        let tracker = TrackerSettings {
            max_disappeared: tracker_file
                .max_disappeared
                .unwrap_or(defaults.tracker.max_disappeared),
            min_iou: tracker_file.min_iou.unwrap_or(defaults.tracker.min_iou),
            max_trajectory_points: tracker_file
                .max_trajectory_points
                .unwrap_or(defaults.tracker.max_trajectory_points),
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            max_streams: pipeline_file
                .max_streams
                .unwrap_or(defaults.pipeline.max_streams),
            frame_interval_ms: pipeline_file
                .frame_interval_ms
                .unwrap_or(defaults.pipeline.frame_interval_ms),
            jpeg_quality: pipeline_file
                .jpeg_quality
                .unwrap_or(defaults.pipeline.jpeg_quality),
            max_consecutive_read_errors: pipeline_file
                .max_consecutive_read_errors
                .unwrap_or(defaults.pipeline.max_consecutive_read_errors),
        };

        let render_file = file.render.unwrap_or_default();
        let render = RenderSettings {
            line_thickness: render_file
                .line_thickness
                .unwrap_or(defaults.render.line_thickness),
            font_path: render_file.font_path,
        };

        Ok(Self {
            web_addr,
            video_dir,
            snapshot_dir,
            detector,
            tracker,
            pipeline,
            render,
            sources: file.sources.unwrap_or(defaults.sources),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("TRAFFIC_WEB_ADDR") {
            self.web_addr = addr;
        }
        if let Some(dir) = non_empty_env("TRAFFIC_VIDEO_DIR") {
            self.video_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env("TRAFFIC_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(backend) = non_empty_env("TRAFFIC_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("TRAFFIC_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(threshold) = non_empty_env("TRAFFIC_CONF_THRESHOLD") {
            self.detector.conf_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("TRAFFIC_CONF_THRESHOLD must be a number between 0 and 1"))?;
        }
        if let Some(max_streams) = non_empty_env("TRAFFIC_MAX_STREAMS") {
            self.pipeline.max_streams = max_streams
                .parse()
                .map_err(|_| anyhow!("TRAFFIC_MAX_STREAMS must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if self.detector.backend.is_empty() {
            return Err(anyhow!("detector.backend must not be empty"));
        }
        check_unit("detector.conf_threshold", self.detector.conf_threshold)?;
        check_unit("detector.iou_threshold", self.detector.iou_threshold)?;
        check_unit("tracker.min_iou", self.tracker.min_iou)?;
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!("detector.input_size must be a positive multiple of 32"));
        }
        let motion = &self.detector.motion;
        if motion.cell_size == 0 || motion.min_cells == 0 {
            return Err(anyhow!(
                "detector.motion.cell_size and detector.motion.min_cells must be greater than zero"
            ));
        }
        if !motion.diff_threshold.is_finite() || motion.diff_threshold < 0.0 {
            return Err(anyhow!("detector.motion.diff_threshold must be a non-negative number"));
        }
        check_unit("detector.motion.learning_rate", motion.learning_rate)?;
        if self.detector.classes.is_empty() {
            return Err(anyhow!("detector.classes must name at least one class"));
        }
        if self.pipeline.max_streams == 0 || self.pipeline.max_streams > MAX_STREAM_SLOTS {
            return Err(anyhow!(
                "pipeline.max_streams must be between 1 and {}",
                MAX_STREAM_SLOTS
            ));
        }
        if self.pipeline.jpeg_quality == 0 || self.pipeline.jpeg_quality > 100 {
            return Err(anyhow!("pipeline.jpeg_quality must be between 1 and 100"));
        }
        if self.tracker.max_trajectory_points == 0 {
            return Err(anyhow!("tracker.max_trajectory_points must be greater than zero"));
        }
        if self.render.line_thickness == 0 {
            return Err(anyhow!("render.line_thickness must be greater than zero"));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!(
                "detector.model_path (or TRAFFIC_MODEL_PATH) is required for the tract backend"
            ));
        }
        if let Some(path) = &self.detector.model_path {
            require_file("detector model", path)?;
        }
        if let Some(path) = &self.render.font_path {
            require_file("label font", path)?;
        }
        for entry in &self.sources {
            if entry.name.trim().is_empty() || entry.uri.trim().is_empty() {
                return Err(anyhow!("source entries need a name and a uri"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: MonitorConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be between 0 and 1 (got {})", name, value));
    }
    Ok(())
}

fn require_file(what: &'static str, path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(MonitorError::MissingFile {
            what,
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(())
}
