// src/export.rs

use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {source} ({context})")]
    Io {
        source: std::io::Error,
        context: String,
    },
}

fn io_context(context: &str) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        source,
        context: context.to_string(),
    }
}

pub fn report_file_name(report: &str, period_label: &str) -> String {
    format!("{}_{}.csv", report, period_label)
}

/// Serializes rows to a CSV file, creating the output directory on the way.
/// Headers come from the row type's field names.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_context(&parent.display().to_string()))?;
        }
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .flush()
        .map_err(io_context(&path.display().to_string()))?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}
