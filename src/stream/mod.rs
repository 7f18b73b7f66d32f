//! Per-stream processing loops and the registry that owns them.
//!
//! Each running stream has its own thread, source handle and detector. The
//! only state shared across streams is what the registry reads back out of
//! each worker's [`StreamOutput`]: the latest annotated frame and the
//! current class counts.

mod catalog;
mod registry;
mod snapshot;
mod worker;

pub use crate::ingest::StopSignal;
pub use catalog::{CatalogItem, SourceCatalog, NONE_LABEL};
pub use registry::{SlotStats, SlotStatus, StatsReport, StreamRegistry, StreamStatus};
pub use snapshot::write_snapshot;
pub use worker::{LatestFrame, Published, StreamOutput, StreamSummary, StreamWorker};
