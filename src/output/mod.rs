//! Persistence sink for harvested records
//!
//! This module handles:
//! - Writing records as CSV with a fixed column order per entity type
//! - Atomic replacement of every artifact (temp file, then rename)
//! - The `run-<id>/` and `final/` artifact layout
//! - Re-importing earlier run directories
//! - Printing store and extraction statistics

mod artifacts;
mod import;
mod sink;
pub mod stats;
mod traits;

pub use artifacts::{
    annotate_batches, export_final, run_id_from_dir, write_run_artifacts, ArtifactCounts,
    ArtifactLayout,
};
pub use import::{import_run, read_run_dir, read_table, ImportSummary, ImportedRun};
pub use sink::{CsvSink, SOURCE_RUN_COLUMN};
pub use stats::{load_statistics, print_extraction_stats, print_statistics, HarvestStatistics};
pub use traits::{OutputError, OutputResult, Tabular};
