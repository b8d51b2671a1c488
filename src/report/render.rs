// src/report/render.rs

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use super::matrix::MetricMatrix;
use crate::Result;

/// MIME type of the rendered file, as uploaded to Drive.
pub const CSV_MIME: &str = "text/csv";

/// Render the matrix (header + rows) as CSV bytes. Nulls become empty fields.
pub fn render_csv(matrix: &MetricMatrix) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in matrix.to_values() {
        wtr.write_record(row.iter().map(|cell| cell.to_string()))?;
    }
    wtr.into_inner()
        .map_err(|e| crate::Error::Serialization(e.to_string()))
}

/// Render to `<dir>/<file_name>`, creating `dir` if needed. Returns the path
/// together with the bytes written so callers can upload without re-reading.
pub fn write_csv(matrix: &MetricMatrix, dir: &Path, file_name: &str) -> Result<(PathBuf, Vec<u8>)> {
    fs::create_dir_all(dir)?;
    let bytes = render_csv(matrix)?;
    let path = dir.join(file_name);
    let tmp = dir.join(format!("{}.tmp", file_name));
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, &path)?;
    info!(path = %path.display(), bytes = bytes.len(), "rendered report file");
    Ok((path, bytes))
}
