use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use anyhow::Result;
use chrono::Local;
use serde::Serialize;

use super::catalog::SourceCatalog;
use super::snapshot::write_snapshot;
use super::worker::{StreamOutput, StreamWorker};
use crate::config::{MonitorConfig, PipelineSettings, TrackerSettings};
use crate::detect::{DetectorRegistry, TrafficClass};
use crate::error::MonitorError;
use crate::ingest::{SourceSpec, StopSignal, VideoSource};
use crate::render::Annotator;
use crate::stats::{ClassCounts, StatsHistory};

/// Lifecycle of one stream slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum StreamStatus {
    Idle,
    Running { source: String },
    Finished { source: String, frames: u64 },
    /// The source could not be opened.
    Unavailable { source: String, reason: String },
    /// The stream stopped after repeated read errors.
    Failed { source: String, reason: String },
}

impl StreamStatus {
    /// Status line shown next to the slot.
    pub fn message(&self) -> String {
        match self {
            StreamStatus::Idle => "No Stream Selected".to_string(),
            StreamStatus::Running { source } => format!("Connected: {}", source),
            StreamStatus::Finished { source, frames } => {
                format!("Finished: {} ({} frames)", source, frames)
            }
            StreamStatus::Unavailable { source, .. } => format!("Failed to connect: {}", source),
            StreamStatus::Failed { reason, .. } => format!("Stream error: {}", reason),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, StreamStatus::Running { .. })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SlotStatus {
    pub slot: usize,
    pub source_index: usize,
    pub source_name: String,
    pub status: StreamStatus,
    pub message: String,
    pub frames: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SlotStats {
    pub slot: usize,
    pub counts: ClassCounts,
    pub total_registered: u64,
    pub frames: u64,
    pub detection_failures: u64,
}

/// Counts for every slot plus the cross-stream aggregate.
#[derive(Clone, Debug, Serialize)]
pub struct StatsReport {
    pub streams: Vec<SlotStats>,
    pub total: ClassCounts,
    /// Every tracked object, classified or not.
    pub objects: u32,
    pub vehicles: u32,
    /// Objects from class-agnostic detectors (motion), not part of `vehicles`.
    pub unclassified: u32,
}

impl StatsReport {
    /// One-line summary for the dashboards.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "Objects in view: {} | Vehicles: {}",
            self.objects, self.vehicles
        );
        if self.unclassified > 0 {
            line.push_str(&format!(
                " | Unclassified: {} (vehicle classes need a class-aware detector)",
                self.unclassified
            ));
        }
        line
    }
}

type StatusCell = Arc<Mutex<StreamStatus>>;

fn set_status(cell: &StatusCell, status: StreamStatus) {
    *cell.lock().unwrap_or_else(PoisonError::into_inner) = status;
}

fn get_status(cell: &StatusCell) -> StreamStatus {
    cell.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

struct ActiveStream {
    stop: StopSignal,
    output: Arc<StreamOutput>,
    handle: Option<JoinHandle<()>>,
}

struct Slot {
    source_index: usize,
    status: StatusCell,
    active: Option<ActiveStream>,
}

impl Slot {
    fn idle() -> Self {
        Self {
            source_index: 0,
            status: Arc::new(Mutex::new(StreamStatus::Idle)),
            active: None,
        }
    }
}

/// Owns every stream slot. Shared by reference (usually through an `Arc`)
/// with the web server or console; there is no global stream list.
pub struct StreamRegistry {
    catalog: SourceCatalog,
    video_dir: PathBuf,
    snapshot_dir: PathBuf,
    detectors: DetectorRegistry,
    tracker: TrackerSettings,
    pipeline: PipelineSettings,
    annotator: Arc<Annotator>,
    slots: Mutex<Vec<Slot>>,
    history: Mutex<StatsHistory>,
    // Serializes start/stop so slot changes never interleave.
    control: Mutex<()>,
}

impl StreamRegistry {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let detectors = DetectorRegistry::from_settings(&config.detector)?;
        let annotator = Annotator::new(&config.render)?;
        Ok(Self::with_parts(config, detectors, annotator))
    }

    /// Build a registry around an already configured detector registry.
    pub fn with_parts(
        config: &MonitorConfig,
        detectors: DetectorRegistry,
        annotator: Annotator,
    ) -> Self {
        let slots = (0..config.pipeline.max_streams.max(1))
            .map(|_| Slot::idle())
            .collect();
        Self {
            catalog: SourceCatalog::new(config.sources.clone()),
            video_dir: config.video_dir.clone(),
            snapshot_dir: config.snapshot_dir.clone(),
            detectors,
            tracker: config.tracker.clone(),
            pipeline: config.pipeline.clone(),
            annotator: Arc::new(annotator),
            slots: Mutex::new(slots),
            history: Mutex::new(StatsHistory::default()),
            control: Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    pub fn video_dir(&self) -> &Path {
        &self.video_dir
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn slot_count(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_slot(&self, slot: usize) -> Result<(), MonitorError> {
        let max = self.slot_count();
        if slot >= max {
            return Err(MonitorError::InvalidSlot { slot, max });
        }
        Ok(())
    }

    /// Start `spec` in `slot`, replacing whatever ran there.
    ///
    /// Returns once the source is open; an unopenable source leaves the slot
    /// in `Unavailable` and returns `SourceUnavailable`.
    pub fn start(&self, slot: usize, spec: SourceSpec) -> Result<(), MonitorError> {
        self.check_slot(slot)?;
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        self.halt(slot);
        self.launch(slot, spec)
    }

    fn launch(&self, slot: usize, spec: SourceSpec) -> Result<(), MonitorError> {
        let label = spec.label();
        let detector =
            self.detectors
                .create_default()
                .map_err(|e| MonitorError::DetectionFailed {
                    detector: self.detectors.default_name().unwrap_or("none").to_string(),
                    reason: format!("{:#}", e),
                })?;
        let status = self.slots()[slot].status.clone();
        let stop = StopSignal::new();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Arc<StreamOutput>, MonitorError>>();

        let thread_stop = stop.clone();
        let thread_status = status.clone();
        let tracker = self.tracker.clone();
        let pipeline = self.pipeline.clone();
        let annotator = self.annotator.clone();
        let thread_label = label.clone();
        let handle = std::thread::Builder::new()
            .name(format!("stream-{}", slot + 1))
            .spawn(move || {
                let source = match VideoSource::open(spec) {
                    Ok(source) => source,
                    Err(e) => {
                        log::warn!("slot {}: {}", slot + 1, e);
                        set_status(
                            &thread_status,
                            StreamStatus::Unavailable {
                                source: thread_label,
                                reason: e.to_string(),
                            },
                        );
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let worker =
                    StreamWorker::new(source, detector, tracker, annotator, pipeline, thread_stop);
                set_status(
                    &thread_status,
                    StreamStatus::Running {
                        source: thread_label.clone(),
                    },
                );
                let _ = ready_tx.send(Ok(worker.output()));
                let final_status = match worker.run() {
                    Ok(summary) => StreamStatus::Finished {
                        source: thread_label,
                        frames: summary.frames,
                    },
                    Err(e) => StreamStatus::Failed {
                        source: thread_label,
                        reason: e.to_string(),
                    },
                };
                set_status(&thread_status, final_status);
            })
            .map_err(|e| MonitorError::source_unavailable(&label, e))?;

        match ready_rx.recv() {
            Ok(Ok(output)) => {
                self.slots()[slot].active = Some(ActiveStream {
                    stop,
                    output,
                    handle: Some(handle),
                });
                log::info!("slot {}: {}", slot + 1, label);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                let reason = "stream thread exited during startup";
                set_status(
                    &status,
                    StreamStatus::Unavailable {
                        source: label.clone(),
                        reason: reason.to_string(),
                    },
                );
                Err(MonitorError::source_unavailable(&label, reason))
            }
        }
    }

    /// Switch `slot` to catalog entry `index`; index 0 stops the slot.
    pub fn select(&self, slot: usize, index: usize) -> Result<StreamStatus, MonitorError> {
        self.check_slot(slot)?;
        if index == 0 {
            self.stop(slot)?;
            return Ok(StreamStatus::Idle);
        }
        let entry = self
            .catalog
            .get(index)
            .ok_or(MonitorError::UnknownSource(index))?;
        let spec = SourceSpec::parse(&entry.uri, &self.video_dir)?;
        let result = self.start(slot, spec);
        self.slots()[slot].source_index = index;
        result?;
        Ok(get_status(&self.slots()[slot].status))
    }

    /// Apply one selection per slot, in slot order. Zero entries leave their
    /// slot untouched and extra selections are ignored.
    pub fn start_all(&self, selections: &[usize]) -> Vec<Result<StreamStatus, MonitorError>> {
        selections
            .iter()
            .take(self.slot_count())
            .enumerate()
            .map(|(slot, index)| match index {
                0 => Ok(get_status(&self.slots()[slot].status)),
                index => self.select(slot, *index),
            })
            .collect()
    }

    pub fn stop(&self, slot: usize) -> Result<(), MonitorError> {
        self.check_slot(slot)?;
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        self.halt(slot);
        self.slots()[slot].source_index = 0;
        Ok(())
    }

    pub fn stop_all(&self) {
        for slot in 0..self.slot_count() {
            let _ = self.stop(slot);
        }
    }

    // Caller holds `control`.
    fn halt(&self, slot: usize) {
        let (active, status) = {
            let mut slots = self.slots();
            (slots[slot].active.take(), slots[slot].status.clone())
        };
        if let Some(mut active) = active {
            active.stop.raise();
            if let Some(handle) = active.handle.take() {
                if handle.join().is_err() {
                    log::error!("slot {}: stream thread panicked", slot + 1);
                }
            }
            log::info!("slot {}: stopped", slot + 1);
        }
        set_status(&status, StreamStatus::Idle);
    }

    fn output(&self, slot: usize) -> Result<Arc<StreamOutput>, MonitorError> {
        self.check_slot(slot)?;
        self.slots()[slot]
            .active
            .as_ref()
            .map(|active| active.output.clone())
            .ok_or(MonitorError::SlotInactive(slot))
    }

    /// Latest annotated JPEG of `slot`.
    pub fn latest_jpeg(&self, slot: usize) -> Result<Arc<Vec<u8>>, MonitorError> {
        self.output(slot)?
            .latest()
            .map(|frame| frame.jpeg)
            .ok_or(MonitorError::NoFrame(slot))
    }

    /// Save the current annotated frame of `slot` under the snapshot directory.
    pub fn snapshot(&self, slot: usize) -> Result<PathBuf, MonitorError> {
        let frame = self
            .output(slot)?
            .latest()
            .ok_or(MonitorError::NoFrame(slot))?;
        write_snapshot(&self.snapshot_dir, slot, &frame.image, Local::now())
    }

    pub fn status(&self) -> Vec<SlotStatus> {
        let slots = self.slots();
        slots
            .iter()
            .enumerate()
            .map(|(slot, state)| {
                let status = get_status(&state.status);
                let frames = state
                    .active
                    .as_ref()
                    .map(|active| active.output.published().frames)
                    .unwrap_or(0);
                SlotStatus {
                    slot,
                    source_index: state.source_index,
                    source_name: self.catalog.name(state.source_index).to_string(),
                    message: status.message(),
                    status,
                    frames,
                }
            })
            .collect()
    }

    pub fn stats(&self) -> StatsReport {
        let slots = self.slots();
        let mut total = ClassCounts::new();
        let mut streams = Vec::with_capacity(slots.len());
        for (slot, state) in slots.iter().enumerate() {
            let published = state
                .active
                .as_ref()
                .map(|active| active.output.published())
                .unwrap_or_default();
            total.merge(&published.counts);
            streams.push(SlotStats {
                slot,
                counts: published.counts,
                total_registered: published.total_registered,
                frames: published.frames,
                detection_failures: published.detection_failures,
            });
        }
        StatsReport {
            objects: total.total(),
            vehicles: total.vehicles(),
            unclassified: total.get(TrafficClass::Unknown),
            total,
            streams,
        }
    }

    /// Append the current cross-stream totals to the rolling history.
    pub fn record_history(&self) {
        let total = self.stats().total;
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&total);
    }

    pub fn history(&self) -> StatsHistory {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True when no slot has a running stream.
    pub fn all_finished(&self) -> bool {
        let slots = self.slots();
        slots.iter().all(|slot| !get_status(&slot.status).is_running())
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceEntry;
    use std::time::{Duration, Instant};

    fn config(snapshot_dir: &Path) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.detector.backend = "stub".to_string();
        config.pipeline.max_streams = 2;
        config.pipeline.frame_interval_ms = 0;
        config.snapshot_dir = snapshot_dir.to_path_buf();
        config.sources = vec![
            SourceEntry::new("Short", "stub://short?frames=5&width=64&height=48"),
            SourceEntry::new("Endless", "stub://endless?width=64&height=48"),
            SourceEntry::new("Missing", "/nonexistent/clip.mp4"),
        ];
        config
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn bounded_stream_finishes_with_its_frame_count() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = StreamRegistry::new(&config(dir.path()))?;
        registry.select(0, 1)?;
        assert!(wait_until(|| registry.all_finished()));
        let status = &registry.status()[0];
        assert_eq!(
            status.status,
            StreamStatus::Finished {
                source: "stub://short".to_string(),
                frames: 5
            }
        );
        assert_eq!(status.source_name, "Short");
        assert_eq!(status.frames, 5);
        Ok(())
    }

    #[test]
    fn unavailable_source_leaves_other_slots_running() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = StreamRegistry::new(&config(dir.path()))?;
        registry.select(1, 2)?;
        let err = registry.select(0, 3).unwrap_err();
        assert!(matches!(err, MonitorError::SourceUnavailable { .. }));
        let status = registry.status();
        assert_eq!(status[0].message, "Failed to connect: /nonexistent/clip.mp4");
        assert!(status[1].status.is_running());
        registry.stop_all();
        assert_eq!(registry.status()[1].status, StreamStatus::Idle);
        Ok(())
    }

    #[test]
    fn snapshot_requires_a_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = StreamRegistry::new(&config(dir.path()))?;
        assert!(matches!(
            registry.snapshot(0),
            Err(MonitorError::SlotInactive(0))
        ));
        registry.select(0, 2)?;
        assert!(wait_until(|| registry.latest_jpeg(0).is_ok()));
        let path = registry.snapshot(0)?;
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn rejects_bad_slots_and_indices() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = StreamRegistry::new(&config(dir.path()))?;
        assert!(matches!(
            registry.select(5, 1),
            Err(MonitorError::InvalidSlot { slot: 5, max: 2 })
        ));
        assert!(matches!(
            registry.select(0, 42),
            Err(MonitorError::UnknownSource(42))
        ));
        assert_eq!(registry.select(0, 0)?, StreamStatus::Idle);
        Ok(())
    }

    #[test]
    fn start_all_leaves_zero_entries_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = StreamRegistry::new(&config(dir.path()))?;
        let outcomes = registry.start_all(&[2, 0]);
        assert!(outcomes[0].as_ref().is_ok_and(StreamStatus::is_running));
        assert!(matches!(outcomes[1], Ok(StreamStatus::Idle)));

        let outcomes = registry.start_all(&[0, 3, 1]);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].as_ref().is_ok_and(StreamStatus::is_running));
        assert!(matches!(
            outcomes[1],
            Err(MonitorError::SourceUnavailable { .. })
        ));
        let status = registry.status();
        assert_eq!(status[0].source_name, "Endless");
        assert!(status[0].status.is_running());
        Ok(())
    }

    fn corrupt_sequence(dir: &Path, good: usize, bad: usize) -> Result<()> {
        for i in 0..good {
            image::RgbImage::new(32, 24).save(dir.join(format!("a_{:02}.png", i)))?;
        }
        for i in 0..bad {
            std::fs::write(dir.join(format!("b_{:02}.png", i)), b"not a png")?;
        }
        Ok(())
    }

    #[test]
    fn repeated_read_errors_fail_the_stream() -> Result<()> {
        let snapshots = tempfile::tempdir()?;
        let frames = tempfile::tempdir()?;
        corrupt_sequence(frames.path(), 1, 5)?;
        let mut config = config(snapshots.path());
        config.pipeline.max_consecutive_read_errors = 3;
        config.sources = vec![SourceEntry::new(
            "Corrupt",
            &frames.path().display().to_string(),
        )];
        let registry = StreamRegistry::new(&config)?;
        registry.select(0, 1)?;
        assert!(wait_until(|| registry.all_finished()));
        let status = &registry.status()[0];
        assert!(matches!(status.status, StreamStatus::Failed { .. }));
        assert!(status.message.starts_with("Stream error: "));
        assert_eq!(status.frames, 1);
        Ok(())
    }

    #[test]
    fn isolated_read_errors_are_skipped() -> Result<()> {
        let snapshots = tempfile::tempdir()?;
        let frames = tempfile::tempdir()?;
        corrupt_sequence(frames.path(), 3, 2)?;
        let mut config = config(snapshots.path());
        config.pipeline.max_consecutive_read_errors = 3;
        config.sources = vec![SourceEntry::new(
            "Patchy",
            &frames.path().display().to_string(),
        )];
        let registry = StreamRegistry::new(&config)?;
        registry.select(0, 1)?;
        assert!(wait_until(|| registry.all_finished()));
        assert!(matches!(
            registry.status()[0].status,
            StreamStatus::Finished { frames: 3, .. }
        ));
        Ok(())
    }

    #[test]
    fn unclassified_objects_are_reported_apart_from_vehicles() -> Result<()> {
        use crate::detect::{BoundingBox, Detection, Detector};
        use crate::frame::Frame;

        struct Blob;

        impl Detector for Blob {
            fn name(&self) -> &'static str {
                "blob"
            }

            fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
                Ok(vec![Detection::new(
                    BoundingBox::new(2, 2, 20, 20),
                    1.0,
                    TrafficClass::Unknown,
                )])
            }
        }

        let dir = tempfile::tempdir()?;
        let config = config(dir.path());
        let mut detectors = DetectorRegistry::new();
        detectors.register("blob", || Ok(Box::new(Blob) as Box<dyn Detector>));
        let registry = StreamRegistry::with_parts(
            &config,
            detectors,
            Annotator::new(&config.render)?,
        );
        registry.select(0, 1)?;
        assert!(wait_until(|| registry.all_finished()));

        let stats = registry.stats();
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.vehicles, 0);
        assert_eq!(stats.unclassified, 1);
        assert!(stats.summary().contains("Unclassified: 1"));
        Ok(())
    }

    #[test]
    fn history_tracks_samples() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = StreamRegistry::new(&config(dir.path()))?;
        registry.record_history();
        registry.record_history();
        assert_eq!(registry.history().samples(), 2);
        Ok(())
    }
}
