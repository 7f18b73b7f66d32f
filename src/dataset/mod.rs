//! Tabular datasets for the offline analysis reports.
//!
//! A [`Dataset`] is a CSV file loaded wholesale and never modified. Loading
//! is strict: a file that cannot be read in full fails with
//! [`MonitorError::DatasetLoad`] instead of yielding partial statistics.

mod analysis;

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::MonitorError;

pub use analysis::{ColumnSummary, Forecast, GroupTotal, LinearFit};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Text,
}

#[derive(Clone, Debug)]
pub struct Dataset {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let path = path.as_ref();
        let fail = |reason: String| MonitorError::dataset(path, reason);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| fail(e.to_string()))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| fail(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(fail("missing header row".to_string()));
        }
        let mut seen = HashSet::new();
        for (idx, header) in headers.iter().enumerate() {
            if header.is_empty() {
                return Err(fail(format!("header column {} is blank", idx + 1)));
            }
            if !seen.insert(header.as_str()) {
                return Err(fail(format!("duplicate column '{}'", header)));
            }
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| fail(e.to_string()))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        if rows.is_empty() {
            return Err(fail("no data rows".to_string()));
        }
        log::debug!(
            "loaded dataset {}: {} rows x {} columns",
            path.display(),
            rows.len(),
            headers.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("no column named '{}' in {}", name, self.path.display()))
    }

    /// Raw cell values of one column, empty strings for missing cells.
    pub fn text(&self, name: &str) -> Result<Vec<&str>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// Numeric when every present value parses as `f64` and at least one does.
    pub fn kind(&self, name: &str) -> Result<ColumnKind> {
        let values = self.text(name)?;
        let mut present = values.iter().filter(|v| !is_missing(v)).peekable();
        if present.peek().is_none() {
            return Ok(ColumnKind::Text);
        }
        if present.all(|v| v.parse::<f64>().is_ok()) {
            Ok(ColumnKind::Numeric)
        } else {
            Ok(ColumnKind::Text)
        }
    }

    /// Numeric column values; `None` marks a missing cell (empty or an NA
    /// marker). Infinite values are rejected rather than averaged.
    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let idx = self.column_index(name)?;
        let bad_cell = |row: usize, cell: &str, what: &str| -> anyhow::Error {
            MonitorError::dataset(
                &self.path,
                format!("column '{}' row {}: '{}' {}", name, row + 1, cell, what),
            )
            .into()
        };
        self.rows
            .iter()
            .enumerate()
            .map(|(row, cells)| {
                let cell = cells[idx].as_str();
                if is_missing(cell) {
                    return Ok(None);
                }
                let value = cell
                    .parse::<f64>()
                    .map_err(|_| bad_cell(row, cell, "is not a number"))?;
                if !value.is_finite() {
                    return Err(bad_cell(row, cell, "is not a finite number"));
                }
                Ok(Some(value))
            })
            .collect()
    }

    pub fn numeric_columns(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| matches!(self.kind(h), Ok(ColumnKind::Numeric)))
            .map(String::as_str)
            .collect()
    }
}

/// Empty cells and the usual NA markers (`NA`, `N/A`, `NaN`, `null`).
fn is_missing(cell: &str) -> bool {
    cell.is_empty()
        || NA_MARKERS
            .iter()
            .any(|marker| cell.eq_ignore_ascii_case(marker))
}

const NA_MARKERS: &[&str] = &["na", "n/a", "nan", "null"];

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_headers_and_rows() -> Result<()> {
        let file = write_csv("name,platform,sales\nA,PS4,1.5\nB,PC,\n");
        let dataset = Dataset::load_csv(file.path())?;
        assert_eq!(dataset.headers(), &["name", "platform", "sales"]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.kind("sales")?, ColumnKind::Numeric);
        assert_eq!(dataset.kind("platform")?, ColumnKind::Text);
        assert_eq!(dataset.numeric("sales")?, vec![Some(1.5), None]);
        assert_eq!(dataset.numeric_columns(), vec!["sales"]);
        Ok(())
    }

    #[test]
    fn ragged_rows_fail_to_load() {
        let file = write_csv("a,b,c\n1,2,3\n4,5\n");
        match Dataset::load_csv(file.path()) {
            Err(MonitorError::DatasetLoad { path, reason }) => {
                assert_eq!(path, file.path());
                assert!(reason.contains("line"), "reason was: {reason}");
            }
            other => panic!("expected a load error, got {other:?}"),
        }
    }

    #[test]
    fn empty_and_missing_files_fail() {
        let empty = write_csv("");
        assert!(matches!(
            Dataset::load_csv(empty.path()),
            Err(MonitorError::DatasetLoad { .. })
        ));
        let header_only = write_csv("a,b\n");
        assert!(Dataset::load_csv(header_only.path()).is_err());
        assert!(Dataset::load_csv("/nonexistent/data.csv").is_err());
    }

    #[test]
    fn duplicate_headers_fail() {
        let file = write_csv("a,a\n1,2\n");
        let err = Dataset::load_csv(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate column 'a'"));
    }

    #[test]
    fn na_markers_count_as_missing() -> Result<()> {
        let file = write_csv("Name,Year,Global_Sales\nA,2006,82.74\nB,N/A,40.0\nC,1990,nan\nD,null,1\n");
        let dataset = Dataset::load_csv(file.path())?;
        assert_eq!(dataset.numeric_columns(), vec!["Year", "Global_Sales"]);
        assert_eq!(
            dataset.numeric("Year")?,
            vec![Some(2006.0), None, Some(1990.0), None]
        );
        assert_eq!(
            dataset.numeric("Global_Sales")?,
            vec![Some(82.74), Some(40.0), None, Some(1.0)]
        );
        Ok(())
    }

    #[test]
    fn infinite_values_are_rejected() -> Result<()> {
        let file = write_csv("x\n1\ninf\n");
        let dataset = Dataset::load_csv(file.path())?;
        let err = dataset.numeric("x").unwrap_err();
        match err.downcast_ref::<MonitorError>() {
            Some(MonitorError::DatasetLoad { reason, .. }) => {
                assert!(reason.contains("column 'x' row 2"), "reason was: {reason}");
            }
            other => panic!("expected a dataset error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn non_numeric_cells_are_reported() -> Result<()> {
        let file = write_csv("x\n1\nabc\n");
        let dataset = Dataset::load_csv(file.path())?;
        assert!(dataset.numeric("x").is_err());
        assert!(dataset.numeric("missing").is_err());
        Ok(())
    }
}
