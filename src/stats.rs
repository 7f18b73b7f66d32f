//! Per-stream object counts and the rolling cross-stream history.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::detect::TrafficClass;
use crate::track::TrackedObject;

/// Number of samples kept per class.
pub const HISTORY_LEN: usize = 100;

/// Currently tracked objects per class.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ClassCounts(BTreeMap<TrafficClass, u32>);

impl ClassCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_objects(objects: &[TrackedObject]) -> Self {
        let mut counts = Self::new();
        for object in objects {
            counts.add(object.class, 1);
        }
        counts
    }

    pub fn add(&mut self, class: TrafficClass, count: u32) {
        *self.0.entry(class).or_insert(0) += count;
    }

    pub fn get(&self, class: TrafficClass) -> u32 {
        self.0.get(&class).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn vehicles(&self) -> u32 {
        self.0
            .iter()
            .filter(|(class, _)| class.is_vehicle())
            .map(|(_, count)| count)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrafficClass, u32)> + '_ {
        self.0.iter().map(|(class, count)| (*class, *count))
    }

    pub fn merge(&mut self, other: &ClassCounts) {
        for (class, count) in other.iter() {
            self.add(class, count);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Rolling window of aggregated counts, one series per class.
///
/// A class seen for the first time starts with a zero-filled series so every
/// series has the same length and lines up on the time axis.
#[derive(Clone, Debug, Serialize)]
pub struct StatsHistory {
    capacity: usize,
    series: BTreeMap<TrafficClass, VecDeque<u32>>,
    samples: u64,
}

impl StatsHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
            samples: 0,
        }
    }

    /// Append one sample of counts aggregated across all streams.
    pub fn record(&mut self, aggregated: &ClassCounts) {
        for (class, _) in aggregated.iter() {
            let capacity = self.capacity;
            self.series
                .entry(class)
                .or_insert_with(|| std::iter::repeat(0).take(capacity).collect());
        }
        for (class, series) in self.series.iter_mut() {
            series.push_back(aggregated.get(*class));
            while series.len() > self.capacity {
                series.pop_front();
            }
        }
        self.samples += 1;
    }

    pub fn series(&self, class: TrafficClass) -> Option<&VecDeque<u32>> {
        self.series.get(&class)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for StatsHistory {
    fn default() -> Self {
        Self::new(HISTORY_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn object(id: u64, class: TrafficClass) -> TrackedObject {
        TrackedObject {
            track_id: id,
            bbox: BoundingBox::new(0, 0, 10, 10),
            confidence: 0.5,
            class,
            trajectory: VecDeque::new(),
            disappeared: 0,
        }
    }

    #[test]
    fn counts_objects_by_class() {
        let counts = ClassCounts::from_objects(&[
            object(0, TrafficClass::Car),
            object(1, TrafficClass::Car),
            object(2, TrafficClass::Person),
        ]);
        assert_eq!(counts.get(TrafficClass::Car), 2);
        assert_eq!(counts.get(TrafficClass::Person), 1);
        assert_eq!(counts.get(TrafficClass::Bus), 0);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.vehicles(), 2);
    }

    #[test]
    fn serializes_as_name_map() {
        let mut counts = ClassCounts::new();
        counts.add(TrafficClass::Truck, 4);
        assert_eq!(serde_json::to_string(&counts).unwrap(), r#"{"truck":4}"#);
    }

    #[test]
    fn history_zero_fills_new_classes() {
        let mut history = StatsHistory::new(4);
        let mut sample = ClassCounts::new();
        sample.add(TrafficClass::Car, 2);
        history.record(&sample);
        let series: Vec<u32> = history.series(TrafficClass::Car).unwrap().iter().copied().collect();
        assert_eq!(series, vec![0, 0, 0, 2]);
    }

    #[test]
    fn history_keeps_missing_classes_aligned() {
        let mut history = StatsHistory::new(3);
        let mut cars = ClassCounts::new();
        cars.add(TrafficClass::Car, 1);
        history.record(&cars);
        history.record(&ClassCounts::new());
        let series: Vec<u32> = history.series(TrafficClass::Car).unwrap().iter().copied().collect();
        assert_eq!(series, vec![0, 1, 0]);
        assert_eq!(history.samples(), 2);
    }
}
