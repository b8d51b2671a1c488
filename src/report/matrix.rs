// src/report/matrix.rs

use std::collections::BTreeMap;
use tracing::debug;

use super::types::{Row, RowSet, Scalar};

/// Column names recognised as the date of a row, checked case-insensitively.
pub const DATE_CANDIDATES: &[&str] = &["fecha", "mes", "date", "dia", "day"];

/// Key used for rows that carry no date.
pub const TOTAL_KEY: &str = "TOTAL";

/// Name of the synthetic first column.
pub const DATE_COLUMN: &str = "fecha";

/// Date-indexed table merging every report of one site.
///
/// Entries are kept in a `BTreeMap`, so iteration is in byte order of the
/// key: `"2024-10"` comes before `"2024-9"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricMatrix {
    entries: BTreeMap<String, BTreeMap<String, Scalar>>,
    metrics: Vec<String>,
}

impl MetricMatrix {
    /// Merge `sets` in order. Later sets overwrite earlier values for the same
    /// (date, metric) pair.
    pub fn build<'a, I>(sets: I) -> Self
    where
        I: IntoIterator<Item = &'a RowSet>,
    {
        let mut matrix = MetricMatrix::default();
        for set in sets {
            matrix.merge(set);
        }
        matrix
    }

    fn merge(&mut self, set: &RowSet) {
        let Some(first) = set.rows.first() else {
            debug!(title = %set.title, "empty row set, skipping");
            return;
        };
        let date_col = detect_date_column(first);
        debug!(title = %set.title, rows = set.rows.len(), date_col = ?date_col, "merging");

        for row in &set.rows {
            let key = date_col
                .and_then(|c| row.get(c))
                .and_then(Scalar::as_key)
                .unwrap_or_else(|| TOTAL_KEY.to_string());

            let entry = self.entries.entry(key.clone()).or_insert_with(|| {
                let mut e = BTreeMap::new();
                e.insert(DATE_COLUMN.to_string(), Scalar::Text(key));
                e
            });

            for (name, value) in row.iter() {
                if Some(name) == date_col {
                    continue;
                }
                entry.insert(name.to_string(), value.clone());
                if !self.metrics.iter().any(|m| m == name) {
                    self.metrics.push(name.to_string());
                }
            }
        }
    }

    /// Metric names in first-seen order, date column excluded.
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Date keys in output order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str, metric: &str) -> Option<&Scalar> {
        self.entries.get(key).and_then(|e| e.get(metric))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `fecha` followed by every metric.
    pub fn header(&self) -> Vec<Scalar> {
        std::iter::once(DATE_COLUMN)
            .chain(self.metrics.iter().map(String::as_str))
            .map(Scalar::from)
            .collect()
    }

    /// One row per date key; metrics a date lacks come out as `Null`.
    pub fn data_rows(&self) -> Vec<Vec<Scalar>> {
        self.entries
            .iter()
            .map(|(key, entry)| {
                let first = entry
                    .get(DATE_COLUMN)
                    .cloned()
                    .unwrap_or_else(|| Scalar::Text(key.clone()));
                std::iter::once(first)
                    .chain(
                        self.metrics
                            .iter()
                            .map(|m| entry.get(m).cloned().unwrap_or_default()),
                    )
                    .collect()
            })
            .collect()
    }

    /// Header plus data rows, ready to be written at the origin cell.
    pub fn to_values(&self) -> Vec<Vec<Scalar>> {
        let mut values = Vec::with_capacity(self.entries.len() + 1);
        values.push(self.header());
        values.extend(self.data_rows());
        values
    }
}

/// First column of `row` whose lower-cased name is a date candidate.
pub fn detect_date_column(row: &Row) -> Option<&str> {
    row.column_names()
        .find(|name| DATE_CANDIDATES.contains(&name.to_lowercase().as_str()))
}
