use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

/// Traffic-relevant object classes.
///
/// Model outputs outside this set are dropped by the backends that know class
/// ids; class-agnostic backends (motion) report `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficClass {
    Person,
    Bicycle,
    Car,
    Motorcycle,
    Bus,
    Truck,
    Unknown,
}

impl TrafficClass {
    pub const ALL: [TrafficClass; 6] = [
        TrafficClass::Person,
        TrafficClass::Bicycle,
        TrafficClass::Car,
        TrafficClass::Motorcycle,
        TrafficClass::Bus,
        TrafficClass::Truck,
    ];

    /// Map a COCO class id to a traffic class.
    pub fn from_coco_id(id: usize) -> Option<Self> {
        match id {
            0 => Some(Self::Person),
            1 => Some(Self::Bicycle),
            2 => Some(Self::Car),
            3 => Some(Self::Motorcycle),
            5 => Some(Self::Bus),
            7 => Some(Self::Truck),
            _ => None,
        }
    }

    pub fn coco_id(self) -> Option<usize> {
        match self {
            Self::Person => Some(0),
            Self::Bicycle => Some(1),
            Self::Car => Some(2),
            Self::Motorcycle => Some(3),
            Self::Bus => Some(5),
            Self::Truck => Some(7),
            Self::Unknown => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Bicycle => "bicycle",
            Self::Car => "car",
            Self::Motorcycle => "motorcycle",
            Self::Bus => "bus",
            Self::Truck => "truck",
            Self::Unknown => "unknown",
        }
    }

    /// Plural label used by the dashboards.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Person => "Pedestrians",
            Self::Bicycle => "Bicycles",
            Self::Car => "Cars",
            Self::Motorcycle => "Motorcycles",
            Self::Bus => "Buses",
            Self::Truck => "Trucks",
            Self::Unknown => "Other",
        }
    }

    pub fn is_vehicle(self) -> bool {
        matches!(
            self,
            Self::Bicycle | Self::Car | Self::Motorcycle | Self::Bus | Self::Truck
        )
    }

    /// Overlay color (RGB).
    pub fn color(self) -> [u8; 3] {
        match self {
            Self::Person => [255, 128, 0],
            Self::Bicycle => [0, 255, 0],
            Self::Car => [255, 0, 0],
            Self::Motorcycle => [0, 0, 255],
            Self::Bus => [255, 0, 255],
            Self::Truck => [0, 255, 255],
            Self::Unknown => [128, 128, 128],
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrafficClass {
    type Err = anyhow::Error;

    // Accepts names and the numeric COCO ids some model exports emit as labels.
    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim().to_lowercase();
        if let Ok(id) = value.parse::<usize>() {
            return Self::from_coco_id(id).ok_or_else(|| anyhow!("COCO id {} is not a traffic class", id));
        }
        match value.as_str() {
            "person" | "pedestrian" => Ok(Self::Person),
            "bicycle" => Ok(Self::Bicycle),
            "car" => Ok(Self::Car),
            "motorcycle" | "motorbike" => Ok(Self::Motorcycle),
            "bus" => Ok(Self::Bus),
            "truck" => Ok(Self::Truck),
            "unknown" => Ok(Self::Unknown),
            other => Err(anyhow!("unknown traffic class '{}'", other)),
        }
    }
}

/// Pixel-space box, corners inclusive of `(x1, y1)` and exclusive of `(x2, y2)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    /// Intersection over union. Degenerate boxes yield 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 < x1 || y2 < y1 {
            return 0.0;
        }
        let intersection = (x2 - x1) as i64 * (y2 - y1) as i64;
        let union = self.area() + other.area() - intersection;
        if union <= 0 {
            return 0.0;
        }
        intersection as f32 / union as f32
    }

    /// Clamp into a `width` x `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as i32;
        let h = height as i32;
        Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }
}

/// One labeled box produced by a detector for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class: TrafficClass,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, class: TrafficClass) -> Self {
        Self {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            class,
        }
    }
}
