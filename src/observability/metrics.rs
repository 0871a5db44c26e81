//! Metrics for the census pipeline.
//!
//! Every metric name lives in [`MetricName`]; stages call the small
//! per-phase functions below instead of using string literals.

use std::fmt;
use std::fs;
use std::path::Path;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Pipeline
    StageRuns,
    StageSkipped,
    StageDuration,

    // Raw
    RawFilesDownloaded,
    RawBytesDownloaded,
    RawCsvExtracted,

    // Interim
    InterimRowsRead,
    InterimRowsUnmatched,
    InterimRowsWritten,

    // Processed
    ProcessedColumnsDroppedNa,
    ProcessedColumnsDroppedGlobal,
    ProcessedColumnsDroppedDuplicate,
    ProcessedCellsUndefined,
    ProcessedRowsWritten,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::StageRuns => "census_stage_runs_total",
            MetricName::StageSkipped => "census_stage_skipped_total",
            MetricName::StageDuration => "census_stage_duration_seconds",

            MetricName::RawFilesDownloaded => "census_raw_files_downloaded_total",
            MetricName::RawBytesDownloaded => "census_raw_bytes_downloaded_total",
            MetricName::RawCsvExtracted => "census_raw_csv_extracted_total",

            MetricName::InterimRowsRead => "census_interim_rows_read_total",
            MetricName::InterimRowsUnmatched => "census_interim_rows_unmatched_total",
            MetricName::InterimRowsWritten => "census_interim_rows_written_total",

            MetricName::ProcessedColumnsDroppedNa => "census_processed_columns_dropped_na_total",
            MetricName::ProcessedColumnsDroppedGlobal => {
                "census_processed_columns_dropped_global_total"
            }
            MetricName::ProcessedColumnsDroppedDuplicate => {
                "census_processed_columns_dropped_duplicate_total"
            }
            MetricName::ProcessedCellsUndefined => "census_processed_cells_undefined_total",
            MetricName::ProcessedRowsWritten => "census_processed_rows_written_total",
        }
    }
}

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Without it every call below is a no-op.
pub fn init() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => warn!("Failed to install metrics recorder: {}", e),
    }
}

/// Write the current metrics in Prometheus text format, for a textfile collector.
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    let Some(handle) = METRICS_HANDLE.get() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, handle.render())?;
    info!("Metrics written to {}", path.display());
    Ok(())
}

pub mod pipeline {
    use super::MetricName;

    pub fn stage_run(stage: &'static str, secs: f64) {
        ::metrics::counter!(MetricName::StageRuns.as_str(), "stage" => stage).increment(1);
        ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage).record(secs);
    }

    pub fn stage_skipped(stage: &'static str) {
        ::metrics::counter!(MetricName::StageSkipped.as_str(), "stage" => stage).increment(1);
    }
}

pub mod raw {
    use super::MetricName;

    pub fn file_downloaded(bytes: usize) {
        ::metrics::counter!(MetricName::RawFilesDownloaded.as_str()).increment(1);
        ::metrics::counter!(MetricName::RawBytesDownloaded.as_str()).increment(bytes as u64);
    }

    pub fn csv_extracted(count: usize) {
        ::metrics::counter!(MetricName::RawCsvExtracted.as_str()).increment(count as u64);
    }
}

pub mod interim {
    use super::MetricName;

    pub fn rows_read(count: usize) {
        ::metrics::counter!(MetricName::InterimRowsRead.as_str()).increment(count as u64);
    }

    pub fn rows_unmatched(count: usize) {
        ::metrics::counter!(MetricName::InterimRowsUnmatched.as_str()).increment(count as u64);
    }

    pub fn rows_written(count: usize) {
        ::metrics::counter!(MetricName::InterimRowsWritten.as_str()).increment(count as u64);
    }
}

pub mod processed {
    use super::MetricName;

    pub fn columns_dropped_na(count: usize) {
        ::metrics::counter!(MetricName::ProcessedColumnsDroppedNa.as_str())
            .increment(count as u64);
    }

    pub fn columns_dropped_global(count: usize) {
        ::metrics::counter!(MetricName::ProcessedColumnsDroppedGlobal.as_str())
            .increment(count as u64);
    }

    pub fn columns_dropped_duplicate(count: usize) {
        ::metrics::counter!(MetricName::ProcessedColumnsDroppedDuplicate.as_str())
            .increment(count as u64);
    }

    pub fn cells_undefined(count: usize) {
        ::metrics::counter!(MetricName::ProcessedCellsUndefined.as_str())
            .increment(count as u64);
    }

    pub fn rows_written(count: usize) {
        ::metrics::counter!(MetricName::ProcessedRowsWritten.as_str()).increment(count as u64);
    }
}
