//! Greedy IoU tracker.
//!
//! Assigns stable ids to detections across frames of one stream. Each
//! detection is matched to the unmatched track with the highest IoU at or
//! above `min_iou`; leftovers start new tracks, and tracks missing for more
//! than `max_disappeared` consecutive frames are dropped.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::config::TrackerSettings;
use crate::detect::{BoundingBox, Detection, TrafficClass};

/// A detection with identity and recent motion.
#[derive(Clone, Debug, Serialize)]
pub struct TrackedObject {
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class: TrafficClass,
    /// Box centers, oldest first.
    pub trajectory: VecDeque<(i32, i32)>,
    /// Consecutive frames without a matching detection.
    #[serde(skip)]
    pub disappeared: u32,
}

impl TrackedObject {
    fn from_detection(track_id: u64, detection: &Detection, max_points: usize) -> Self {
        let mut trajectory = VecDeque::with_capacity(max_points);
        trajectory.push_back(detection.bbox.center());
        Self {
            track_id,
            bbox: detection.bbox,
            confidence: detection.confidence,
            class: detection.class,
            trajectory,
            disappeared: 0,
        }
    }

    fn absorb(&mut self, detection: &Detection, max_points: usize) {
        self.bbox = detection.bbox;
        self.confidence = detection.confidence;
        self.class = detection.class;
        self.trajectory.push_back(detection.bbox.center());
        while self.trajectory.len() > max_points {
            self.trajectory.pop_front();
        }
        self.disappeared = 0;
    }
}

pub struct IouTracker {
    settings: TrackerSettings,
    objects: BTreeMap<u64, TrackedObject>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            objects: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Forget every track and restart ids from zero.
    pub fn reset(&mut self) {
        self.objects.clear();
        self.next_id = 0;
    }

    /// Number of distinct objects seen since the last reset.
    pub fn total_registered(&self) -> u64 {
        self.next_id
    }

    /// Current tracks, ordered by id.
    pub fn objects(&self) -> Vec<TrackedObject> {
        self.objects.values().cloned().collect()
    }

    /// Fold one frame's detections into the tracks and return the live set.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackedObject> {
        let existing: Vec<u64> = self.objects.keys().copied().collect();
        let mut matched: Vec<u64> = Vec::new();
        let mut unmatched: Vec<&Detection> = Vec::new();

        for detection in detections {
            let mut best: Option<(u64, f32)> = None;
            for id in &existing {
                if matched.contains(id) {
                    continue;
                }
                let Some(object) = self.objects.get(id) else {
                    continue;
                };
                let iou = detection.bbox.iou(&object.bbox);
                let better = best.map_or(true, |(_, best_iou)| iou > best_iou);
                if iou >= self.settings.min_iou && iou > 0.0 && better {
                    best = Some((*id, iou));
                }
            }
            match best {
                Some((id, _)) => {
                    if let Some(object) = self.objects.get_mut(&id) {
                        object.absorb(detection, self.settings.max_trajectory_points);
                    }
                    matched.push(id);
                }
                None => unmatched.push(detection),
            }
        }

        for id in existing {
            if matched.contains(&id) {
                continue;
            }
            let remove = match self.objects.get_mut(&id) {
                Some(object) => {
                    object.disappeared += 1;
                    object.disappeared > self.settings.max_disappeared
                }
                None => false,
            };
            if remove {
                self.objects.remove(&id);
            }
        }

        for detection in unmatched {
            self.register(detection);
        }

        self.objects()
    }

    fn register(&mut self, detection: &Detection) {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(
            id,
            TrackedObject::from_detection(id, detection, self.settings.max_trajectory_points),
        );
    }
}
