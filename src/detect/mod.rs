//! Detection invocation.
//!
//! The stream loop only sees the `Detector` trait. Concrete backends (stub,
//! motion differencing, ONNX via tract) are built per stream by the
//! `DetectorRegistry`.

mod backend;
pub mod backends;
mod nms;
mod registry;
mod result;

pub use backend::Detector;
pub use backends::{MotionBackend, MotionConfig, StubBackend};
pub use nms::non_max_suppression;
pub use registry::DetectorRegistry;
pub use result::{BoundingBox, Detection, TrafficClass};
