use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::BTreeMap;

use super::Dataset;

/// Summary statistics of one numeric column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub missing: usize,
    pub mean: f64,
    /// Sample standard deviation; absent with fewer than two values.
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupTotal {
    pub key: String,
    pub total: f64,
    pub rows: usize,
}

/// Ordinary least squares fit of `target = slope * feature + intercept`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinearFit {
    pub feature: String,
    pub target: String,
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub rmse: f64,
    pub samples: usize,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Forecast {
    pub column: String,
    pub window: usize,
    /// Trailing average at each point; `None` until the window fills.
    pub moving_average: Vec<Option<f64>>,
    /// One-step-ahead forecast: the average of the last `window` values.
    pub next: f64,
}

impl Dataset {
    pub fn describe(&self) -> Result<Vec<ColumnSummary>> {
        let mut summaries = Vec::new();
        for name in self.numeric_columns() {
            let column = self.numeric(name)?;
            let values: Vec<f64> = column.iter().flatten().copied().collect();
            let count = values.len();
            let mean = values.iter().sum::<f64>() / count as f64;
            let std = (count > 1).then(|| {
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / (count - 1) as f64;
                var.sqrt()
            });
            summaries.push(ColumnSummary {
                name: name.to_string(),
                count,
                missing: column.len() - count,
                mean,
                std,
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            });
        }
        Ok(summaries)
    }

    /// Sum `value` per distinct `key`, largest total first. Rows with a
    /// missing value are skipped.
    pub fn group_sum(&self, key: &str, value: &str) -> Result<Vec<GroupTotal>> {
        let keys = self.text(key)?;
        let values = self.numeric(value)?;
        let mut groups: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for (k, v) in keys.iter().zip(values) {
            let Some(v) = v else { continue };
            let entry = groups.entry(*k).or_insert((0.0, 0));
            entry.0 += v;
            entry.1 += 1;
        }
        let mut totals: Vec<GroupTotal> = groups
            .into_iter()
            .map(|(key, (total, rows))| GroupTotal {
                key: key.to_string(),
                total,
                rows,
            })
            .collect();
        totals.sort_by(|a, b| b.total.total_cmp(&a.total).then_with(|| a.key.cmp(&b.key)));
        Ok(totals)
    }

    /// Fit `target` against `feature` over rows where both are present.
    pub fn linear_fit(&self, feature: &str, target: &str) -> Result<LinearFit> {
        let pairs: Vec<(f64, f64)> = self
            .numeric(feature)?
            .into_iter()
            .zip(self.numeric(target)?)
            .filter_map(|(x, y)| Some((x?, y?)))
            .collect();
        let n = pairs.len();
        if n < 2 {
            return Err(anyhow!(
                "linear fit of '{}' on '{}' needs at least two complete rows, found {}",
                target,
                feature,
                n
            ));
        }
        let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n as f64;
        let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n as f64;
        let sxx: f64 = pairs.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
        let sxy: f64 = pairs
            .iter()
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();
        if sxx == 0.0 {
            return Err(anyhow!("feature '{}' has zero variance", feature));
        }
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        let ss_res: f64 = pairs
            .iter()
            .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
            .sum();
        let ss_tot: f64 = pairs.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
        let r2 = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };
        Ok(LinearFit {
            feature: feature.to_string(),
            target: target.to_string(),
            slope,
            intercept,
            r2,
            rmse: (ss_res / n as f64).sqrt(),
            samples: n,
        })
    }

    /// Trailing moving average over the non-missing values of `column`.
    pub fn moving_average_forecast(&self, column: &str, window: usize) -> Result<Forecast> {
        if window == 0 {
            return Err(anyhow!("moving average window must be at least 1"));
        }
        let series: Vec<f64> = self.numeric(column)?.into_iter().flatten().collect();
        if series.len() < window {
            return Err(anyhow!(
                "column '{}' has {} values, fewer than the window of {}",
                column,
                series.len(),
                window
            ));
        }
        let moving_average = (0..series.len())
            .map(|i| {
                (i + 1 >= window)
                    .then(|| series[i + 1 - window..=i].iter().sum::<f64>() / window as f64)
            })
            .collect();
        let next = series[series.len() - window..].iter().sum::<f64>() / window as f64;
        Ok(Forecast {
            column: column.to_string(),
            window,
            moving_average,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::write_csv;
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn describes_numeric_columns() -> Result<()> {
        let file = write_csv("genre,sales\nAction,2\nSports,4\nAction,\nPuzzle,6\n");
        let summary = Dataset::load_csv(file.path())?.describe()?;
        assert_eq!(summary.len(), 1);
        let sales = &summary[0];
        assert_eq!((sales.count, sales.missing), (3, 1));
        assert!(close(sales.mean, 4.0));
        assert!(close(sales.std.unwrap_or_default(), 2.0));
        assert_eq!((sales.min, sales.max), (2.0, 6.0));
        Ok(())
    }

    #[test]
    fn group_sum_sorts_descending() -> Result<()> {
        let file = write_csv("platform,sales\nPC,1\nPS4,3\nPC,1.5\nWii,3\n");
        let totals = Dataset::load_csv(file.path())?.group_sum("platform", "sales")?;
        let keys: Vec<&str> = totals.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["PS4", "Wii", "PC"]);
        assert!(close(totals[2].total, 2.5));
        assert_eq!(totals[2].rows, 2);
        Ok(())
    }

    #[test]
    fn linear_fit_recovers_a_line() -> Result<()> {
        let file = write_csv("area,price\n1,3\n2,5\n3,7\n4,9\n");
        let fit = Dataset::load_csv(file.path())?.linear_fit("area", "price")?;
        assert!(close(fit.slope, 2.0));
        assert!(close(fit.intercept, 1.0));
        assert!(close(fit.r2, 1.0));
        assert!(close(fit.rmse, 0.0));
        assert!(close(fit.predict(10.0), 21.0));
        Ok(())
    }

    #[test]
    fn linear_fit_rejects_degenerate_input() -> Result<()> {
        let constant = write_csv("area,price\n2,3\n2,5\n");
        assert!(Dataset::load_csv(constant.path())?
            .linear_fit("area", "price")
            .is_err());
        let single = write_csv("area,price\n1,3\n2,\n");
        assert!(Dataset::load_csv(single.path())?
            .linear_fit("area", "price")
            .is_err());
        Ok(())
    }

    #[test]
    fn moving_average_and_forecast() -> Result<()> {
        let file = write_csv("close\n1\n2\n3\n4\n");
        let dataset = Dataset::load_csv(file.path())?;
        let forecast = dataset.moving_average_forecast("close", 2)?;
        assert_eq!(
            forecast.moving_average,
            vec![None, Some(1.5), Some(2.5), Some(3.5)]
        );
        assert!(close(forecast.next, 3.5));
        assert!(dataset.moving_average_forecast("close", 0).is_err());
        assert!(dataset.moving_average_forecast("close", 5).is_err());
        Ok(())
    }
}
