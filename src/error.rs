//! Failure conditions callers need to branch on.
//!
//! Everything else travels as `anyhow::Error`; these variants are produced at
//! stream startup, per-frame detection, snapshot capture and dataset loading,
//! and can be recovered with `anyhow::Error::downcast_ref::<MonitorError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The source could not be opened (missing file, unreachable URL, no backend).
    #[error("source unavailable: {source_id}: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// A single frame could not be read or decoded.
    #[error("failed to read frame from {source_id}: {reason}")]
    SourceRead { source_id: String, reason: String },

    /// The detector rejected one frame. The stream keeps running.
    #[error("detection failed for this frame ({detector}): {reason}")]
    DetectionFailed { detector: String, reason: String },

    /// A file required at startup is missing.
    #[error("missing {what}: {} does not exist", path.display())]
    MissingFile { what: &'static str, path: PathBuf },

    #[error("failed to load dataset {}: {reason}", path.display())]
    DatasetLoad { path: PathBuf, reason: String },

    #[error("stream slot {slot} out of range (0..{max})")]
    InvalidSlot { slot: usize, max: usize },

    #[error("no source at catalog index {0}")]
    UnknownSource(usize),

    #[error("stream slot {0} is not active")]
    SlotInactive(usize),

    #[error("stream slot {0} has not produced a frame yet")]
    NoFrame(usize),

    #[error("snapshot failed: {reason}")]
    Snapshot { reason: String },
}

impl MonitorError {
    pub fn source_unavailable(source_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn source_read(source_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceRead {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn dataset(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DatasetLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for conditions that only affect one stream or one frame.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::MissingFile { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_source() {
        let err = MonitorError::source_unavailable("rtsp://cam", "connection refused");
        assert_eq!(
            err.to_string(),
            "source unavailable: rtsp://cam: connection refused"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = MonitorError::MissingFile {
            what: "detector model",
            path: PathBuf::from("models/yolov8n.onnx"),
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("models/yolov8n.onnx"));
    }

    #[test]
    fn downcasts_from_anyhow() {
        let err: anyhow::Error = MonitorError::SlotInactive(2).into();
        assert!(matches!(
            err.downcast_ref::<MonitorError>(),
            Some(MonitorError::SlotInactive(2))
        ));
    }
}
