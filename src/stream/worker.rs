//! One stream, end to end: read, detect, track, annotate, publish.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::config::{PipelineSettings, TrackerSettings};
use crate::detect::Detector;
use crate::error::MonitorError;
use crate::ingest::{StopSignal, VideoSource};
use crate::render::{encode_jpeg, Annotator};
use crate::stats::ClassCounts;
use crate::track::IouTracker;

/// Most recent annotated frame of a stream.
#[derive(Clone, Debug)]
pub struct LatestFrame {
    pub sequence: u64,
    pub image: Arc<RgbImage>,
    pub jpeg: Arc<Vec<u8>>,
}

/// What a worker has published so far.
#[derive(Clone, Debug, Default)]
pub struct Published {
    pub latest: Option<LatestFrame>,
    pub counts: ClassCounts,
    pub total_registered: u64,
    pub frames: u64,
    pub detection_failures: u64,
}

/// Latest-value cell shared between a worker and its readers.
///
/// Readers never wait on the worker's frame processing, only on the swap.
#[derive(Debug, Default)]
pub struct StreamOutput {
    inner: Mutex<Published>,
}

impl StreamOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Published> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn published(&self) -> Published {
        self.lock().clone()
    }

    pub fn latest(&self) -> Option<LatestFrame> {
        self.lock().latest.clone()
    }

    pub fn counts(&self) -> ClassCounts {
        self.lock().counts.clone()
    }
}

/// Totals reported when a worker finishes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames: u64,
    pub read_errors: u64,
    pub detection_failures: u64,
    pub dropped_frames: u64,
    pub tracks: u64,
}

pub struct StreamWorker {
    source: VideoSource,
    detector: Box<dyn Detector>,
    tracker: IouTracker,
    annotator: Arc<Annotator>,
    settings: PipelineSettings,
    output: Arc<StreamOutput>,
    stop: StopSignal,
}

impl StreamWorker {
    pub fn new(
        source: VideoSource,
        detector: Box<dyn Detector>,
        tracker: TrackerSettings,
        annotator: Arc<Annotator>,
        settings: PipelineSettings,
        stop: StopSignal,
    ) -> Self {
        Self {
            source,
            detector,
            tracker: IouTracker::new(tracker),
            annotator,
            settings,
            output: StreamOutput::new(),
            stop,
        }
    }

    /// Handle readers use to poll this worker's latest frame and counts.
    pub fn output(&self) -> Arc<StreamOutput> {
        self.output.clone()
    }

    /// Process frames until the source ends or the stop signal is raised.
    ///
    /// Unreadable frames and failed detections are skipped. The stream fails
    /// only after `max_consecutive_read_errors` reads in a row go wrong.
    pub fn run(self) -> Result<StreamSummary, MonitorError> {
        let StreamWorker {
            source,
            mut detector,
            mut tracker,
            annotator,
            settings,
            output,
            stop,
        } = self;
        let label = source.label().to_string();
        let interval = Duration::from_millis(settings.frame_interval_ms);
        let mut summary = StreamSummary::default();
        let mut consecutive_errors = 0u32;

        log::info!("stream {} started (detector {})", label, detector.name());

        for item in source.frames(stop.clone()) {
            let started = Instant::now();
            let frame = match item {
                Ok(frame) => {
                    consecutive_errors = 0;
                    frame
                }
                Err(e) => {
                    consecutive_errors += 1;
                    summary.read_errors += 1;
                    log::warn!("{}", e);
                    if consecutive_errors >= settings.max_consecutive_read_errors {
                        log::error!(
                            "stream {} giving up after {} consecutive read errors",
                            label,
                            consecutive_errors
                        );
                        return Err(e);
                    }
                    continue;
                }
            };

            let objects = match detector.detect(&frame) {
                Ok(detections) => tracker.update(&detections),
                Err(e) => {
                    let err = MonitorError::DetectionFailed {
                        detector: detector.name().to_string(),
                        reason: format!("{:#}", e),
                    };
                    log::warn!("stream {} frame {}: {}", label, frame.sequence, err);
                    summary.detection_failures += 1;
                    tracker.objects()
                }
            };

            let annotated = annotator.annotate(frame.image(), &objects);
            match encode_jpeg(&annotated, settings.jpeg_quality) {
                Ok(jpeg) => {
                    let mut published = output.lock();
                    published.latest = Some(LatestFrame {
                        sequence: frame.sequence,
                        image: Arc::new(annotated),
                        jpeg: Arc::new(jpeg),
                    });
                    published.counts = ClassCounts::from_objects(&objects);
                    published.total_registered = tracker.total_registered();
                    published.frames += 1;
                    published.detection_failures = summary.detection_failures;
                }
                Err(e) => {
                    log::warn!("stream {} dropped frame {}: {:#}", label, frame.sequence, e);
                    summary.dropped_frames += 1;
                }
            }
            summary.frames += 1;

            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                if !stop.is_raised() {
                    std::thread::sleep(rest);
                }
            }
        }

        summary.tracks = tracker.total_registered();
        log::info!(
            "stream {} finished: {} frames, {} read errors, {} detection failures, {} tracks",
            label,
            summary.frames,
            summary.read_errors,
            summary.detection_failures,
            summary.tracks
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderSettings;
    use crate::detect::backends::StubBackend;
    use crate::detect::{BoundingBox, Detection, TrafficClass};
    use crate::frame::Frame;
    use crate::ingest::SourceSpec;
    use anyhow::{anyhow, Result};
    use std::path::Path;

    struct FixedCar;

    impl Detector for FixedCar {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Ok(vec![Detection::new(
                BoundingBox::new(4, 4, 20, 20),
                0.9,
                TrafficClass::Car,
            )])
        }
    }

    struct FailsOddFrames;

    impl Detector for FailsOddFrames {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
            if frame.sequence % 2 == 1 {
                Err(anyhow!("inference timed out"))
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn worker(uri: &str, detector: Box<dyn Detector>) -> Result<StreamWorker> {
        let source = VideoSource::open(SourceSpec::parse(uri, Path::new("."))?)?;
        let settings = PipelineSettings {
            frame_interval_ms: 0,
            ..PipelineSettings::default()
        };
        Ok(StreamWorker::new(
            source,
            detector,
            TrackerSettings::default(),
            Arc::new(Annotator::new(&RenderSettings::default())?),
            settings,
            StopSignal::new(),
        ))
    }

    #[test]
    fn bounded_source_processes_every_frame() -> Result<()> {
        let worker = worker("stub://t?frames=7&width=64&height=48", Box::new(StubBackend::new()))?;
        let output = worker.output();
        let summary = worker.run()?;
        assert_eq!(summary.frames, 7);
        assert_eq!(output.published().frames, 7);
        assert_eq!(output.latest().map(|f| f.sequence), Some(7));
        Ok(())
    }

    #[test]
    fn publishes_counts_and_tracks() -> Result<()> {
        let worker = worker("stub://t?frames=3&width=64&height=48", Box::new(FixedCar))?;
        let output = worker.output();
        let summary = worker.run()?;
        assert_eq!(summary.tracks, 1);
        assert_eq!(output.counts().get(TrafficClass::Car), 1);
        let latest = output.latest().ok_or_else(|| anyhow!("no frame"))?;
        assert_eq!(&latest.jpeg[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn detection_failures_do_not_stop_the_stream() -> Result<()> {
        let worker = worker("stub://t?frames=6&width=64&height=48", Box::new(FailsOddFrames))?;
        let summary = worker.run()?;
        assert_eq!(summary.frames, 6);
        assert_eq!(summary.detection_failures, 3);
        Ok(())
    }

    #[test]
    fn raised_stop_ends_an_unbounded_stream() -> Result<()> {
        let worker = worker("stub://t?width=64&height=48", Box::new(StubBackend::new()))?;
        let stop = worker.stop.clone();
        stop.raise();
        let summary = worker.run()?;
        assert_eq!(summary.frames, 0);
        Ok(())
    }
}
