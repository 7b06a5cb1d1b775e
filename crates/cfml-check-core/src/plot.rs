//! Diagnostic chart export for powder-pattern scenarios.
//!
//! Charts are written as CSV tables rather than drawn; any plotting tool can
//! pick them up from the scenario's `actual/` directory.

use crate::domain::{CheckError, Pattern};
use crate::numerics::retained_len;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Keeps the difference trace below the two patterns.
pub const DIFFERENCE_SHIFT: f64 = 10.0;

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("failed to create chart directory '{}': {source}", path.display())]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write chart '{}': {source}", path.display())]
    Write { path: PathBuf, source: csv::Error },
}

impl From<PlotError> for CheckError {
    fn from(error: PlotError) -> Self {
        CheckError::io_system("IO.PLOT_WRITE", error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartRow {
    pub x: f64,
    pub desired: f64,
    pub actual: f64,
    pub difference: f64,
}

/// Desired, actual and shifted difference over the retained prefix. The x
/// axis is the desired one.
pub fn chart_rows(desired: &Pattern, actual: &Pattern, skip_last: usize) -> Vec<ChartRow> {
    let keep = retained_len(desired.len().min(actual.len()), skip_last);
    desired
        .x()
        .iter()
        .zip(desired.y())
        .zip(actual.y())
        .take(keep)
        .map(|((&x, &desired), &actual)| ChartRow {
            x,
            desired,
            actual,
            difference: actual - desired - DIFFERENCE_SHIFT,
        })
        .collect()
}

pub fn write_chart(path: &Path, rows: &[ChartRow]) -> Result<(), PlotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PlotError::Directory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let write_error = |source: csv::Error| PlotError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(write_error)?;
    for row in rows {
        writer.serialize(row).map_err(write_error)?;
    }
    writer
        .flush()
        .map_err(|source| write_error(csv::Error::from(source)))?;

    info!(path = %path.display(), points = rows.len(), "wrote diagnostic chart");
    Ok(())
}
