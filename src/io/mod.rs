//! Recording ingestion, batch manifests and result export.

pub mod export;
pub mod manifest;
pub mod recording;

pub use export::{
    write_execution_times, write_failures, write_report_json, write_run, write_series,
    write_variant_series, BatchReport, ReportEntry,
};
pub use manifest::{session_path, BatchManifest, SubjectEntry};
pub use recording::Recording;
