//! Long-lived responses: MJPEG frames and server-sent events.

use anyhow::Result;
use serde::Serialize;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::http::write_streaming_header;
use crate::error::MonitorError;
use crate::stream::StreamRegistry;

const MJPEG_BOUNDARY: &str = "frame";
const MJPEG_POLL: Duration = Duration::from_millis(30);
const EVENT_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Slot in the streaming-client budget, released on drop.
pub(crate) struct ClientPermit {
    active: Arc<AtomicUsize>,
}

impl ClientPermit {
    pub(crate) fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let mut current = active.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return None;
            }
            match active.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    return Some(Self {
                        active: active.clone(),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for ClientPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Push every new annotated frame of `slot` until the client disconnects,
/// the slot is stopped, or the server shuts down.
pub(crate) fn serve_mjpeg(
    mut stream: TcpStream,
    slot: usize,
    registry: &StreamRegistry,
    shutdown: &AtomicBool,
) -> Result<()> {
    write_streaming_header(
        &mut stream,
        &format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
    )?;
    let mut last: Option<Arc<Vec<u8>>> = None;
    while !shutdown.load(Ordering::SeqCst) {
        match registry.latest_jpeg(slot) {
            Ok(jpeg) => {
                let fresh = last.as_ref().map_or(true, |prev| !Arc::ptr_eq(prev, &jpeg));
                if fresh {
                    write!(
                        stream,
                        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        MJPEG_BOUNDARY,
                        jpeg.len()
                    )?;
                    stream.write_all(&jpeg)?;
                    stream.write_all(b"\r\n")?;
                    stream.flush()?;
                    last = Some(jpeg);
                }
            }
            Err(MonitorError::NoFrame(_)) => {}
            Err(e) => {
                log::debug!("mjpeg client for slot {} closed: {}", slot + 1, e);
                break;
            }
        }
        std::thread::sleep(MJPEG_POLL);
    }
    Ok(())
}

/// Emit `stream_status` whenever any slot changes and `stats_update` every
/// second, until the client disconnects or the server shuts down.
pub(crate) fn serve_events(
    mut stream: TcpStream,
    registry: &StreamRegistry,
    shutdown: &AtomicBool,
) -> Result<()> {
    write_streaming_header(&mut stream, "text/event-stream")?;
    let mut last_status: Option<Vec<String>> = None;
    while !shutdown.load(Ordering::SeqCst) {
        let status = registry.status();
        let messages: Vec<String> = status.iter().map(|s| s.message.clone()).collect();
        if last_status.as_ref() != Some(&messages) {
            write_event(&mut stream, "stream_status", &status)?;
            last_status = Some(messages);
        }
        write_event(&mut stream, "stats_update", &registry.stats())?;
        pause(shutdown, EVENT_INTERVAL);
    }
    Ok(())
}

fn write_event<T: Serialize + ?Sized>(stream: &mut TcpStream, name: &str, data: &T) -> Result<()> {
    let payload = serde_json::to_string(data)?;
    write!(stream, "event: {}\ndata: {}\n\n", name, payload)?;
    stream.flush()?;
    Ok(())
}

fn pause(shutdown: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(SHUTDOWN_POLL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_are_bounded_and_released() {
        let active = Arc::new(AtomicUsize::new(0));
        let first = ClientPermit::acquire(&active, 2);
        let second = ClientPermit::acquire(&active, 2);
        assert!(first.is_some() && second.is_some());
        assert!(ClientPermit::acquire(&active, 2).is_none());
        drop(first);
        assert!(ClientPermit::acquire(&active, 2).is_some());
        assert_eq!(active.load(Ordering::SeqCst), 1);
    }
}
