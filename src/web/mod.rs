//! Web dashboard server.
//!
//! A single accept loop on a background thread hands every connection to
//! its own thread, capped at `max_connections`. MJPEG and server-sent-event
//! clients also count against `max_streaming_clients`. The loop samples the
//! cross-stream history once per `history_interval`.

mod http;
mod live;
mod routes;

use anyhow::{anyhow, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use self::http::{read_request, write_json_error, write_response};
use self::live::{serve_events, serve_mjpeg, ClientPermit};
use self::routes::{route, Reply};
use crate::stream::StreamRegistry;

const DEFAULT_MAX_STREAMING_CLIENTS: usize = 32;
const DEFAULT_MAX_CONNECTIONS: usize = 64;

#[derive(Clone, Debug)]
pub struct WebConfig {
    pub addr: String,
    pub max_streaming_clients: usize,
    /// Concurrent connections of any kind, streaming ones included.
    pub max_connections: usize,
    pub history_interval: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
            max_streaming_clients: DEFAULT_MAX_STREAMING_CLIENTS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            history_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
pub struct WebHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WebHandle {
    /// Stop accepting connections and wait for the accept loop to exit.
    /// Streaming clients notice the flag and close on their next tick.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("web server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct WebServer {
    cfg: WebConfig,
    registry: Arc<StreamRegistry>,
}

impl WebServer {
    pub fn new(cfg: WebConfig, registry: Arc<StreamRegistry>) -> Self {
        Self { cfg, registry }
    }

    pub fn spawn(self) -> Result<WebHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid web address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)
            .map_err(|e| anyhow!("failed to bind {}: {}", configured_addr, e))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let registry = self.registry;
        let join = std::thread::Builder::new()
            .name("web-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, cfg, registry, shutdown_thread) {
                    log::error!("web server stopped: {}", err);
                }
            })?;

        Ok(WebHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    cfg: WebConfig,
    registry: Arc<StreamRegistry>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let cfg = Arc::new(cfg);
    let connections = Arc::new(AtomicUsize::new(0));
    let streaming_clients = Arc::new(AtomicUsize::new(0));
    let mut last_history = Instant::now();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if last_history.elapsed() >= cfg.history_interval {
            registry.record_history();
            last_history = Instant::now();
        }
        match listener.accept() {
            Ok((mut stream, peer)) => {
                let Some(permit) = ClientPermit::acquire(&connections, cfg.max_connections) else {
                    log::warn!("rejecting {}: connection limit reached", peer);
                    let _ = stream.set_nonblocking(false);
                    let _ = write_json_error(&mut stream, 503, "too many connections");
                    continue;
                };
                let cfg = cfg.clone();
                let registry = registry.clone();
                let shutdown = shutdown.clone();
                let streaming_clients = streaming_clients.clone();
                let spawned = std::thread::Builder::new()
                    .name("web-conn".to_string())
                    .spawn(move || {
                        let _permit = permit;
                        if let Err(err) =
                            handle_connection(stream, &cfg, &registry, &shutdown, &streaming_clients)
                        {
                            log::debug!("request from {} failed: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("failed to spawn handler for {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &WebConfig,
    registry: &Arc<StreamRegistry>,
    shutdown: &Arc<AtomicBool>,
    streaming_clients: &Arc<AtomicUsize>,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json_error(&mut stream, 400, "malformed request")?;
            return Err(err);
        }
    };
    let reply = route(&request, registry);
    log::debug!("{} {} -> {}", request.method, request.path, reply.status());

    match reply {
        Reply::Full {
            status,
            content_type,
            body,
        } => write_response(&mut stream, status, content_type, &body),
        live => {
            let Some(_permit) =
                ClientPermit::acquire(streaming_clients, cfg.max_streaming_clients)
            else {
                return write_json_error(&mut stream, 503, "too many streaming clients");
            };
            stream.set_read_timeout(None)?;
            match live {
                Reply::Mjpeg(slot) => serve_mjpeg(stream, slot, registry, shutdown),
                _ => serve_events(stream, registry, shutdown),
            }
        }
    }
}
