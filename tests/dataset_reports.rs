use std::io::Write;

use anyhow::Result;
use chrono::{Local, TimeZone};
use image::{Rgb, RgbImage};

use traffic_monitor::dataset::Dataset;
use traffic_monitor::stream::write_snapshot;
use traffic_monitor::MonitorError;

fn csv_file(contents: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

#[test]
fn sales_by_platform() -> Result<()> {
    let file = csv_file(
        "Name,Platform,Year,Global_Sales\n\
         Wii Sports,Wii,2006,82.74\n\
         Super Mario Bros.,NES,1985,40.24\n\
         Mario Kart Wii,Wii,2008,35.82\n\
         Duck Hunt,NES,1984,28.31\n\
         Tetris,GB,1989,30.26\n",
    )?;
    let dataset = Dataset::load_csv(file.path())?;
    assert_eq!(dataset.len(), 5);
    assert_eq!(dataset.numeric_columns(), vec!["Year", "Global_Sales"]);

    let totals = dataset.group_sum("Platform", "Global_Sales")?;
    let keys: Vec<&str> = totals.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["Wii", "NES", "GB"]);
    assert!((totals[0].total - 118.56).abs() < 1e-9);
    Ok(())
}

#[test]
fn malformed_csv_is_a_load_error() -> Result<()> {
    let ragged = csv_file("area,price\n100,250000\n120\n")?;
    match Dataset::load_csv(ragged.path()) {
        Err(MonitorError::DatasetLoad { path, .. }) => assert_eq!(path, ragged.path()),
        other => panic!("expected DatasetLoad, got {other:?}"),
    }

    let missing = Dataset::load_csv("/nonexistent/housing.csv");
    assert!(matches!(missing, Err(MonitorError::DatasetLoad { .. })));
    Ok(())
}

#[test]
fn each_snapshot_call_writes_one_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let image = RgbImage::from_pixel(32, 24, Rgb([10, 200, 30]));
    let at = Local
        .with_ymd_and_hms(2024, 5, 17, 8, 30, 5)
        .single()
        .ok_or_else(|| anyhow::anyhow!("ambiguous local time"))?;

    let first = write_snapshot(dir.path(), 2, &image, at)?;
    assert_eq!(
        first.file_name().and_then(|n| n.to_str()),
        Some("snapshot_3_20240517-083005.jpg")
    );
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);

    let second = write_snapshot(dir.path(), 2, &image, at)?;
    assert_ne!(first, second);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 2);

    let decoded = image::open(&first)?.to_rgb8();
    assert_eq!(decoded.dimensions(), (32, 24));
    Ok(())
}
