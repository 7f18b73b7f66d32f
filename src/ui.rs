use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

const PLAIN_REFRESH: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// One live status line per stream slot.
    pub fn slot_lines(&self, count: usize) -> SlotLines {
        if self.use_pretty() {
            let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template("{prefix:>9} {spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            let bars = (0..count)
                .map(|slot| {
                    let bar = multi.add(ProgressBar::new_spinner());
                    bar.set_style(style.clone());
                    bar.set_prefix(format!("stream {}", slot + 1));
                    bar.enable_steady_tick(Duration::from_millis(200));
                    bar
                })
                .collect();
            SlotLines {
                bars,
                _multi: Some(multi),
                last_plain: None,
            }
        } else {
            SlotLines {
                bars: Vec::new(),
                _multi: None,
                last_plain: None,
            }
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Live per-slot lines. Plain mode prints them every few seconds instead.
pub struct SlotLines {
    bars: Vec<ProgressBar>,
    _multi: Option<MultiProgress>,
    last_plain: Option<Instant>,
}

impl SlotLines {
    pub fn update(&mut self, lines: &[String]) {
        if !self.bars.is_empty() {
            for (bar, line) in self.bars.iter().zip(lines) {
                bar.set_message(line.clone());
            }
            return;
        }
        let due = self
            .last_plain
            .map_or(true, |last| last.elapsed() >= PLAIN_REFRESH);
        if due {
            for (slot, line) in lines.iter().enumerate() {
                eprintln!("[stream {}] {}", slot + 1, line);
            }
            self.last_plain = Some(Instant::now());
        }
    }

    /// Print a message without tearing the live lines.
    pub fn println(&self, message: &str) {
        match self.bars.first() {
            Some(bar) => bar.println(message),
            None => eprintln!("{message}"),
        }
    }

    pub fn finish(self) {
        for bar in &self.bars {
            bar.finish();
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
