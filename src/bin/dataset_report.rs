//! dataset_report - offline CSV analyses printed as JSON
//!
//! Examples:
//!   dataset_report vgsales.csv --group-sum Platform Global_Sales
//!   dataset_report housing.csv --fit area price
//!   dataset_report stock.csv --forecast Close 20

use anyhow::Result;
use clap::Parser;
use serde_json::{json, Map, Value};
use std::io::IsTerminal;
use std::path::PathBuf;

use traffic_monitor::dataset::Dataset;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// CSV file with a header row.
    path: PathBuf,
    /// Summary statistics for every numeric column.
    #[arg(long)]
    describe: bool,
    /// Total VALUE per distinct KEY, largest first.
    #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"])]
    group_sum: Option<Vec<String>>,
    /// Least-squares fit of TARGET against FEATURE.
    #[arg(long, num_args = 2, value_names = ["FEATURE", "TARGET"])]
    fit: Option<Vec<String>>,
    /// Moving average of COLUMN over WINDOW rows plus a one-step forecast.
    #[arg(long, num_args = 2, value_names = ["COLUMN", "WINDOW"])]
    forecast: Option<Vec<String>>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let dataset = {
        let _stage = ui.stage("Load dataset");
        Dataset::load_csv(&args.path)?
    };

    let mut report = Map::new();
    report.insert(
        "dataset".to_string(),
        json!({
            "path": dataset.path().display().to_string(),
            "rows": dataset.len(),
            "columns": dataset.headers(),
        }),
    );

    let nothing_requested = !args.describe
        && args.group_sum.is_none()
        && args.fit.is_none()
        && args.forecast.is_none();
    if args.describe || nothing_requested {
        let _stage = ui.stage("Describe columns");
        report.insert("describe".to_string(), serde_json::to_value(dataset.describe()?)?);
    }
    if let Some([key, value]) = args.group_sum.as_deref() {
        let _stage = ui.stage("Group totals");
        report.insert(
            "group_sum".to_string(),
            serde_json::to_value(dataset.group_sum(key, value)?)?,
        );
    }
    if let Some([feature, target]) = args.fit.as_deref() {
        let _stage = ui.stage("Linear fit");
        report.insert(
            "linear_fit".to_string(),
            serde_json::to_value(dataset.linear_fit(feature, target)?)?,
        );
    }
    if let Some([column, window]) = args.forecast.as_deref() {
        let _stage = ui.stage("Moving average forecast");
        let window: usize = window
            .parse()
            .map_err(|_| anyhow::anyhow!("forecast window must be a positive integer"))?;
        report.insert(
            "forecast".to_string(),
            serde_json::to_value(dataset.moving_average_forecast(column, window)?)?,
        );
    }

    println!("{}", serde_json::to_string_pretty(&Value::Object(report))?);
    Ok(())
}
