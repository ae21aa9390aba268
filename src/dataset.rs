//! Sequence preparation for time-series anomaly detection
//!
//! Loads tabular data, min-max normalizes one column and slices it into
//! fixed-length overlapping windows ready for model training.

use std::fs;
use std::path::Path;

use crate::error::{DetectError, Result};

/// Epsilon added to the min-max denominator so a constant series
/// normalizes to zero instead of dividing by zero.
pub const NORM_EPSILON: f32 = 1e-8;

/// Min-max parameters computed once per series during normalization.
/// Immutable after `normalize`; needed to apply the identical transform
/// at inference time.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NormalizationParams {
    pub min: f32,
    pub max: f32,
}

impl NormalizationParams {
    /// Apply the training-time transform to a single value.
    pub fn apply(&self, value: f32) -> f32 {
        (value - self.min) / (self.max - self.min + NORM_EPSILON)
    }

    /// Apply the transform to a whole series.
    pub fn apply_all(&self, series: &[f32]) -> Vec<f32> {
        series.iter().map(|&v| self.apply(v)).collect()
    }
}

/// Simple in-memory table: ordered rows, named columns.
#[derive(Debug, Clone)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Load a CSV table from a file path.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_csv_str(&content)
    }

    /// Load a CSV table from an in-memory string.
    /// First line is the header; empty lines are skipped.
    pub fn from_csv_str(content: &str) -> Result<Self> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| DetectError::DataFormat("empty table".to_string()))?;
        let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();

        let mut rows = Vec::new();
        for (line_num, line) in lines.enumerate() {
            let cells: Vec<String> = line.split(',').map(|c| c.trim().to_string()).collect();
            if cells.len() != columns.len() {
                return Err(DetectError::DataFormat(format!(
                    "row {} has {} cells, expected {}",
                    line_num + 2,
                    cells.len(),
                    columns.len()
                )));
            }
            rows.push(cells);
        }

        Ok(Self { columns, rows })
    }

    /// Column names in table order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Extract one column coerced to numeric values, in row order.
    /// `None` selects the first column. Fails with a data-format error
    /// on an unknown column, an empty table or a non-numeric cell.
    pub fn column(&self, name: Option<&str>) -> Result<Vec<f32>> {
        if self.rows.is_empty() {
            return Err(DetectError::DataFormat("empty table".to_string()));
        }

        let idx = match name {
            None => 0,
            Some(n) => self
                .columns
                .iter()
                .position(|c| c == n)
                .ok_or_else(|| DetectError::DataFormat(format!("unknown column '{}'", n)))?,
        };

        let mut values = Vec::with_capacity(self.rows.len());
        for (row_num, row) in self.rows.iter().enumerate() {
            let cell = &row[idx];
            let value: f32 = cell.parse().map_err(|_| {
                DetectError::DataFormat(format!(
                    "non-numeric value '{}' in column '{}' at row {}",
                    cell,
                    self.columns[idx],
                    row_num + 2
                ))
            })?;
            values.push(value);
        }

        Ok(values)
    }
}

/// Min-max normalize a series into [0, 1].
/// Returns the normalized series together with the parameters that
/// produced it. A constant series yields all zeros.
pub fn normalize(series: &[f32]) -> (Vec<f32>, NormalizationParams) {
    let min = series.iter().copied().fold(f32::INFINITY, f32::min);
    let max = series.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let params = if series.is_empty() {
        NormalizationParams { min: 0.0, max: 0.0 }
    } else {
        NormalizationParams { min, max }
    };

    (params.apply_all(series), params)
}

/// Slice a series into overlapping windows of fixed `length`.
/// Produces `len - length + 1` windows in time order, or no windows when
/// the series is shorter than `length` — callers must treat an empty
/// result as insufficient data, not a silent success.
pub fn windows(series: &[f32], length: usize) -> Vec<Vec<f32>> {
    if length == 0 || series.len() < length {
        return Vec::new();
    }

    series.windows(length).map(|w| w.to_vec()).collect()
}

/// Output of the full preparation pipeline.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Normalized, fixed-length overlapping windows in time order.
    pub windows: Vec<Vec<f32>>,
    /// Parameters of the normalization applied before windowing.
    pub params: NormalizationParams,
}

/// Select a column (default: first), normalize it and window it.
pub fn prepare(table: &Table, length: usize, column: Option<&str>) -> Result<Prepared> {
    let series = table.column(column)?;
    let (normalized, params) = normalize(&series);
    let windows = windows(&normalized, length);

    Ok(Prepared { windows, params })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "value,label\n1.0,a\n2.0,b\n3.0,c\n4.0,d\n";

    #[test]
    fn test_csv_parsing() {
        let table = Table::from_csv_str(CSV).unwrap();
        assert_eq!(table.columns(), &["value", "label"]);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_column_selection() {
        let table = Table::from_csv_str(CSV).unwrap();

        let first = table.column(None).unwrap();
        assert_eq!(first, vec![1.0, 2.0, 3.0, 4.0]);

        let named = table.column(Some("value")).unwrap();
        assert_eq!(named, first);

        assert!(matches!(
            table.column(Some("missing")),
            Err(DetectError::DataFormat(_))
        ));
    }

    #[test]
    fn test_non_numeric_column_fails() {
        let table = Table::from_csv_str(CSV).unwrap();
        let err = table.column(Some("label")).unwrap_err();
        assert!(matches!(err, DetectError::DataFormat(_)));
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn test_empty_table_fails() {
        assert!(Table::from_csv_str("").is_err());

        let header_only = Table::from_csv_str("value\n").unwrap();
        assert!(matches!(
            header_only.column(None),
            Err(DetectError::DataFormat(_))
        ));
    }

    #[test]
    fn test_ragged_row_fails() {
        let err = Table::from_csv_str("a,b\n1,2\n3\n").unwrap_err();
        assert!(err.to_string().contains("row 3"));
    }

    #[test]
    fn test_normalize_range_and_inversion() {
        let series: Vec<f32> = (1..=100).map(|v| v as f32).collect();
        let (normalized, params) = normalize(&series);

        for &v in &normalized {
            assert!((0.0..=1.0).contains(&v), "normalized value {} out of range", v);
        }

        // Inverting the transform recovers the original within tolerance.
        for (orig, norm) in series.iter().zip(&normalized) {
            let recovered = norm * (params.max - params.min) + params.min;
            assert!((recovered - orig).abs() < 1e-3);
        }
    }

    #[test]
    fn test_normalize_constant_series() {
        let (normalized, params) = normalize(&[7.0, 7.0, 7.0]);
        assert_eq!(normalized, vec![0.0, 0.0, 0.0]);
        assert_eq!(params.min, params.max);
    }

    #[test]
    fn test_window_count_and_contents() {
        let series: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let wins = windows(&series, 4);

        assert_eq!(wins.len(), 7); // N - L + 1
        for (i, w) in wins.iter().enumerate() {
            assert_eq!(w.len(), 4);
            assert_eq!(w.as_slice(), &series[i..i + 4]);
        }
    }

    #[test]
    fn test_window_insufficient_data() {
        let series = vec![1.0, 2.0, 3.0];
        assert!(windows(&series, 5).is_empty());
        assert!(windows(&series, 0).is_empty());
    }

    #[test]
    fn test_prepare_pipeline() {
        let mut csv = String::from("reading\n");
        for i in 0..50 {
            csv.push_str(&format!("{}\n", i));
        }
        let table = Table::from_csv_str(&csv).unwrap();

        let prepared = prepare(&table, 30, None).unwrap();
        assert_eq!(prepared.windows.len(), 21);
        assert_eq!(prepared.params.min, 0.0);
        assert_eq!(prepared.params.max, 49.0);
    }
}
