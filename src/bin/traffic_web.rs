//! traffic_web - web dashboard for up to four live traffic streams
//!
//! This server:
//! 1. Loads the layered configuration (file, then TRAFFIC_* environment)
//! 2. Builds the stream registry and optionally starts initial selections
//! 3. Serves the dashboard, JSON API, MJPEG and server-sent events
//! 4. Stops every stream on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use traffic_monitor::{MonitorConfig, StreamRegistry, WebConfig, WebServer};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (TOML or JSON).
    #[arg(long, env = "TRAFFIC_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address, overriding the configuration.
    #[arg(long)]
    addr: Option<String>,
    /// Catalog indices to start per slot, e.g. "1,2,0,6".
    #[arg(long, value_delimiter = ',')]
    start: Vec<usize>,
    /// Maximum concurrent MJPEG/event clients.
    #[arg(long, default_value_t = 32)]
    max_streaming_clients: usize,
    /// Maximum concurrent connections of any kind.
    #[arg(long, default_value_t = 64)]
    max_connections: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.web_addr = addr;
    }
    log::info!(
        "detector backend={}, max_streams={}, video_dir={}",
        cfg.detector.backend,
        cfg.pipeline.max_streams,
        cfg.video_dir.display()
    );

    let registry = Arc::new(StreamRegistry::new(&cfg)?);
    for item in registry.catalog().items().iter().skip(1) {
        log::info!("source {}: {} ({})", item.index, item.name, item.uri);
    }
    for (slot, result) in registry.start_all(&args.start).into_iter().enumerate() {
        match result {
            Ok(status) => log::info!("slot {}: {}", slot + 1, status.message()),
            Err(e) => log::warn!("slot {}: {}", slot + 1, e),
        }
    }

    let web_config = WebConfig {
        addr: cfg.web_addr.clone(),
        max_streaming_clients: args.max_streaming_clients,
        max_connections: args.max_connections,
        ..WebConfig::default()
    };
    let handle = WebServer::new(web_config, registry.clone()).spawn()?;
    log::info!("dashboard listening on http://{}", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("traffic_web waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping streams and web server...");
    handle.stop()?;
    registry.stop_all();

    Ok(())
}
