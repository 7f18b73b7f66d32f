//! traffic_console - terminal dashboard for the traffic stream pipeline
//!
//! Starts the requested streams, shows one live line per slot, and reads
//! commands from stdin:
//!   start <slot> <index>   switch a slot to a catalog source (0 stops it)
//!   stop <slot>            stop a slot
//!   snap <slot>            save the current annotated frame
//!   stats | list | quit

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use traffic_monitor::{MonitorConfig, SourceSpec, StreamRegistry, StreamStatus};

#[path = "../ui.rs"]
mod ui;

const TICK: Duration = Duration::from_millis(250);
const HISTORY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (TOML or JSON).
    #[arg(long, env = "TRAFFIC_CONFIG")]
    config: Option<PathBuf>,
    /// Catalog indices to start per slot, e.g. "1,2,0,6".
    #[arg(long, value_delimiter = ',')]
    start: Vec<usize>,
    /// Ad-hoc source identifiers started in slot order after --start.
    #[arg(long = "source", value_name = "URI")]
    sources: Vec<String>,
    /// Print the source catalog and exit.
    #[arg(long)]
    list: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Start { slot: usize, index: usize },
    Stop(usize),
    Snapshot(usize),
    Stats,
    List,
    Quit,
}

/// Parse one console line. Slots are 1-based on the console.
fn parse_command(line: &str) -> Result<Option<Command>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let slot = |word: &str| -> Result<usize> {
        match word.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n - 1),
            _ => Err(anyhow!("slot must be a number starting at 1, got '{}'", word)),
        }
    };
    let command = match words.as_slice() {
        [] => return Ok(None),
        ["start", s, index] => Command::Start {
            slot: slot(*s)?,
            index: index
                .parse()
                .map_err(|_| anyhow!("source index must be a number, got '{}'", index))?,
        },
        ["stop", s] => Command::Stop(slot(*s)?),
        ["snap" | "snapshot", s] => Command::Snapshot(slot(*s)?),
        ["stats"] => Command::Stats,
        ["list"] => Command::List,
        ["quit" | "exit" | "q"] => Command::Quit,
        _ => return Err(anyhow!("unknown command '{}'", line.trim())),
    };
    Ok(Some(command))
}

fn spawn_stdin_reader(tx: Sender<Command>) {
    let spawned = std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{}", e),
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("console input disabled: {}", e);
    }
}

fn slot_line(registry: &StreamRegistry) -> Vec<String> {
    let stats = registry.stats();
    registry
        .status()
        .iter()
        .zip(&stats.streams)
        .map(|(status, stats)| {
            let counts: Vec<String> = stats
                .counts
                .iter()
                .map(|(class, count)| format!("{}={}", class, count))
                .collect();
            format!(
                "{} | frames {} | {}",
                status.message,
                stats.frames,
                if counts.is_empty() {
                    "-".to_string()
                } else {
                    counts.join(" ")
                }
            )
        })
        .collect()
}

fn print_catalog(registry: &StreamRegistry) {
    for item in registry.catalog().items() {
        println!("{:>2}  {:<24} {}", item.index, item.name, item.uri);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        MonitorConfig::load_from(args.config.as_deref())?
    };
    let registry = {
        let _stage = ui.stage("Build stream registry");
        StreamRegistry::new(&cfg)?
    };
    if args.list {
        print_catalog(&registry);
        return Ok(());
    }

    {
        let _stage = ui.stage("Start streams");
        for (slot, result) in registry.start_all(&args.start).into_iter().enumerate() {
            if let Err(e) = result {
                log::warn!("slot {}: {}", slot + 1, e);
            }
        }
        let first_free = args.start.len().min(registry.slot_count());
        for (offset, uri) in args.sources.iter().enumerate() {
            let slot = first_free + offset;
            if slot >= registry.slot_count() {
                log::warn!("no free slot for {}", uri);
                continue;
            }
            let started = SourceSpec::parse(uri, registry.video_dir())
                .and_then(|spec| registry.start(slot, spec));
            if let Err(e) = started {
                log::warn!("slot {}: {}", slot + 1, e);
            }
        }
    }

    let (tx, rx) = mpsc::channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Quit);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    spawn_stdin_reader(tx);

    let mut lines = ui.slot_lines(registry.slot_count());
    let mut last_history = Instant::now();
    loop {
        match rx.recv_timeout(TICK) {
            Ok(Command::Quit) => break,
            Ok(command) => handle_command(command, &registry, &lines),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if last_history.elapsed() >= HISTORY_INTERVAL {
            registry.record_history();
            last_history = Instant::now();
        }
        lines.update(&slot_line(&registry));

        let status = registry.status();
        let any_running = status.iter().any(|s| s.status.is_running());
        let any_done = status.iter().any(|s| {
            matches!(
                s.status,
                StreamStatus::Finished { .. } | StreamStatus::Failed { .. }
            )
        });
        if !any_running && any_done {
            lines.println("all streams finished");
            break;
        }
    }

    lines.finish();
    registry.stop_all();
    let history = registry.history();
    log::info!("recorded {} history samples", history.samples());
    Ok(())
}

fn handle_command(command: Command, registry: &StreamRegistry, lines: &ui::SlotLines) {
    let outcome = match command {
        Command::Start { slot, index } => registry
            .select(slot, index)
            .map(|status| status.message()),
        Command::Stop(slot) => registry
            .stop(slot)
            .map(|_| format!("stream {} stopped", slot + 1)),
        Command::Snapshot(slot) => registry
            .snapshot(slot)
            .map(|path| format!("snapshot saved to {}", path.display())),
        Command::Stats => {
            let stats = registry.stats();
            let totals: Vec<String> = stats
                .total
                .iter()
                .map(|(class, count)| format!("{}={}", class.display_name(), count))
                .collect();
            Ok(format!("{} ({})", stats.summary(), totals.join(", ")))
        }
        Command::List => {
            print_catalog(registry);
            return;
        }
        Command::Quit => return,
    };
    match outcome {
        Ok(message) => lines.println(&message),
        Err(e) => lines.println(&format!("error: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_commands() -> Result<()> {
        assert_eq!(
            parse_command("start 2 5")?,
            Some(Command::Start { slot: 1, index: 5 })
        );
        assert_eq!(parse_command("snap 1")?, Some(Command::Snapshot(0)));
        assert_eq!(parse_command("  ")?, None);
        assert_eq!(parse_command("quit")?, Some(Command::Quit));
        assert!(parse_command("stop 0").is_err());
        assert!(parse_command("fly 1").is_err());
        Ok(())
    }
}
