//! Traffic Monitor
//!
//! Multi-stream traffic video analytics: frames are pulled from video files,
//! cameras, network streams or synthetic feeds, run through an object
//! detector and an IoU tracker, annotated, and served live to a web
//! dashboard or a console dashboard. A separate set of dataset reports covers
//! the offline CSV analyses.
//!
//! # Module Structure
//!
//! - `ingest`: video sources and the frame iterator
//! - `detect`: the `Detector` capability, backends and their registry
//! - `track`: greedy IoU tracking across frames
//! - `render`: box, label and trajectory overlays plus JPEG encoding
//! - `stats`: per-class counts and rolling history
//! - `stream`: per-stream workers and the `StreamRegistry` that owns them
//! - `web`: HTTP dashboard server
//! - `dataset`: CSV loading and analysis
//! - `config`, `error`: layered configuration and the typed error taxonomy

pub mod config;
pub mod dataset;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod render;
pub mod stats;
pub mod stream;
pub mod track;
pub mod web;

pub use config::{MonitorConfig, SourceEntry};
pub use detect::{BoundingBox, Detection, Detector, DetectorRegistry, TrafficClass};
pub use error::MonitorError;
pub use frame::Frame;
pub use ingest::{SourceSpec, StopSignal, VideoSource};
pub use stats::{ClassCounts, StatsHistory};
pub use stream::{StreamRegistry, StreamStatus};
pub use track::{IouTracker, TrackedObject};
pub use web::{WebConfig, WebHandle, WebServer};
