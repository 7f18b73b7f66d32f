//! Request routing for the dashboard API.

use serde::{Deserialize, Serialize};

use super::http::HttpRequest;
use crate::error::MonitorError;
use crate::stream::{StreamRegistry, StreamStatus};

const INDEX_HTML: &str = include_str!("index.html");

/// What the connection handler should send back.
#[derive(Debug)]
pub(crate) enum Reply {
    Full {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// Multipart JPEG stream of one slot.
    Mjpeg(usize),
    /// Server-sent events with stats and status updates.
    Events,
}

impl Reply {
    fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Reply::Full {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Reply::error(500, &format!("failed to encode response: {}", e)),
        }
    }

    pub(crate) fn error(status: u16, message: &str) -> Self {
        Reply::Full {
            status,
            content_type: "application/json",
            body: serde_json::json!({ "error": message }).to_string().into_bytes(),
        }
    }

    pub(crate) fn status(&self) -> u16 {
        match self {
            Reply::Full { status, .. } => *status,
            Reply::Mjpeg(_) | Reply::Events => 200,
        }
    }
}

impl From<MonitorError> for Reply {
    fn from(err: MonitorError) -> Self {
        let status = match &err {
            MonitorError::InvalidSlot { .. } => 404,
            MonitorError::UnknownSource(_)
            | MonitorError::SourceUnavailable { .. }
            | MonitorError::SourceRead { .. } => 400,
            MonitorError::SlotInactive(_) | MonitorError::NoFrame(_) => 409,
            _ => 500,
        };
        Reply::error(status, &err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChangeStream {
    stream_index: usize,
}

#[derive(Debug, Serialize)]
struct StartOutcome {
    slot: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<StreamStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SnapshotTaken {
    position: usize,
    filepath: String,
    filename: String,
}

pub(crate) fn route(request: &HttpRequest, registry: &StreamRegistry) -> Reply {
    let segments = request.segments();
    match (request.method.as_str(), segments.as_slice()) {
        ("GET", []) => Reply::Full {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: INDEX_HTML.as_bytes().to_vec(),
        },
        ("GET", ["health"]) => Reply::json(200, &serde_json::json!({ "status": "ok" })),
        ("GET", ["api", "sources"]) => Reply::json(200, &registry.catalog().items()),
        ("GET", ["api", "streams"]) => Reply::json(200, &registry.status()),
        ("GET", ["api", "stats"]) => Reply::json(200, &registry.stats()),
        ("GET", ["api", "history"]) => Reply::json(200, &registry.history()),
        ("GET", ["api", "events"]) => Reply::Events,
        ("POST", ["api", "streams", "start_all"]) => start_all(&request.body, registry),
        ("POST", ["api", "streams", "stop_all"]) => {
            registry.stop_all();
            Reply::json(200, &registry.status())
        }
        ("POST", ["api", "streams", pos]) => change_stream(pos, &request.body, registry),
        ("POST", ["api", "streams", pos, "snapshot"]) => snapshot(pos, registry),
        ("GET", ["api", "streams", pos, "frame.jpg"]) => match parse_slot(pos, registry) {
            Ok(slot) => match registry.latest_jpeg(slot) {
                Ok(jpeg) => Reply::Full {
                    status: 200,
                    content_type: "image/jpeg",
                    body: jpeg.as_ref().clone(),
                },
                Err(e) => e.into(),
            },
            Err(reply) => reply,
        },
        ("GET", ["api", "streams", pos, "mjpeg"]) => match parse_slot(pos, registry) {
            Ok(slot) => Reply::Mjpeg(slot),
            Err(reply) => reply,
        },
        (_, path) if is_known_path(path) => Reply::error(405, "method not allowed"),
        _ => Reply::error(404, "not found"),
    }
}

fn is_known_path(segments: &[&str]) -> bool {
    matches!(
        segments,
        [] | ["health"]
            | ["api", "sources" | "streams" | "stats" | "history" | "events"]
            | ["api", "streams", _]
            | ["api", "streams", _, "snapshot" | "frame.jpg" | "mjpeg"]
    )
}

fn parse_slot(pos: &str, registry: &StreamRegistry) -> Result<usize, Reply> {
    let slot: usize = pos
        .parse()
        .map_err(|_| Reply::error(400, &format!("invalid stream position '{}'", pos)))?;
    let max = registry.slot_count();
    if slot >= max {
        return Err(MonitorError::InvalidSlot { slot, max }.into());
    }
    Ok(slot)
}

fn change_stream(pos: &str, body: &[u8], registry: &StreamRegistry) -> Reply {
    let slot = match parse_slot(pos, registry) {
        Ok(slot) => slot,
        Err(reply) => return reply,
    };
    let request: ChangeStream = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return Reply::error(400, &format!("invalid body: {}", e)),
    };
    match registry.select(slot, request.stream_index) {
        Ok(_) => match registry.status().into_iter().nth(slot) {
            Some(status) => Reply::json(200, &status),
            None => Reply::error(500, "slot disappeared"),
        },
        Err(e) => e.into(),
    }
}

fn start_all(body: &[u8], registry: &StreamRegistry) -> Reply {
    let selections: Vec<usize> = match serde_json::from_slice(body) {
        Ok(selections) => selections,
        Err(e) => return Reply::error(400, &format!("expected an array of source indices: {}", e)),
    };
    let outcomes: Vec<StartOutcome> = registry
        .start_all(&selections)
        .into_iter()
        .enumerate()
        .map(|(slot, result)| match result {
            Ok(status) => StartOutcome {
                slot,
                status: Some(status),
                error: None,
            },
            Err(e) => StartOutcome {
                slot,
                status: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    Reply::json(200, &outcomes)
}

fn snapshot(pos: &str, registry: &StreamRegistry) -> Reply {
    let slot = match parse_slot(pos, registry) {
        Ok(slot) => slot,
        Err(reply) => return reply,
    };
    match registry.snapshot(slot) {
        Ok(path) => Reply::json(
            200,
            &SnapshotTaken {
                position: slot,
                filename: path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                filepath: path.display().to_string(),
            },
        ),
        Err(e) => e.into(),
    }
}
