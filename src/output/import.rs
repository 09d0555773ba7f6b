//! Re-import of earlier run directories into the canonical store

use crate::model::{AnnotatedOverlay, CommentRecord, ContentItem};
use crate::output::artifacts::run_id_from_dir;
use crate::output::sink::SOURCE_RUN_COLUMN;
use crate::output::traits::{OutputError, OutputResult, Tabular};
use crate::storage::{CanonicalSet, MergeSummary, OverlayBatch, Storage};
use crate::HarvestError;
use std::path::Path;

/// Reads one artifact written by `CsvSink`
///
/// A missing file reads as empty. The header must start with the declared
/// columns; a trailing `source_run` column is accepted and ignored.
pub fn read_table<T: Tabular>(path: &Path) -> OutputResult<Vec<T>> {
    if !path.exists() {
        tracing::debug!("{} not present, nothing to read", path.display());
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let found: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let declared_only = found.len() == T::COLUMNS.len();
    let with_provenance = found.len() == T::COLUMNS.len() + 1
        && found.last().map(String::as_str) == Some(SOURCE_RUN_COLUMN);
    if !(declared_only || with_provenance) || found.iter().zip(T::COLUMNS).any(|(f, c)| f.as_str() != *c) {
        return Err(OutputError::Schema {
            path: path.to_path_buf(),
            expected: T::COLUMNS.iter().map(|c| c.to_string()).collect(),
            found,
        });
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let cells: Vec<&str> = record.iter().collect();
        let row = T::from_row(&cells[..T::COLUMNS.len()]).map_err(|message| {
            OutputError::Format {
                path: path.to_path_buf(),
                row: index + 1,
                message,
            }
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Records read back from one run directory
#[derive(Debug, Clone, Default)]
pub struct ImportedRun {
    pub run_id: i64,
    pub items: Vec<ContentItem>,
    pub comments: Vec<CommentRecord>,
    pub overlays: Vec<OverlayBatch>,
}

/// Reads the artifacts of a `run-<id>` directory
pub fn read_run_dir(dir: &Path) -> OutputResult<ImportedRun> {
    let run_id = run_id_from_dir(dir).ok_or_else(|| OutputError::InvalidRunDir(dir.to_path_buf()))?;
    if !dir.is_dir() {
        return Err(OutputError::InvalidRunDir(dir.to_path_buf()));
    }

    let mut overlays: CanonicalSet<OverlayBatch> = CanonicalSet::new();
    let mut pending: Option<OverlayBatch> = None;
    for annotated in read_table::<AnnotatedOverlay>(&dir.join(AnnotatedOverlay::FILE_NAME))? {
        let message = annotated.message;
        match pending.as_mut() {
            Some(batch) if batch.content_id == message.content_id => batch.messages.push(message),
            _ => {
                if let Some(done) = pending.take() {
                    overlays.upsert(done);
                }
                pending = Some(OverlayBatch {
                    content_id: message.content_id.clone(),
                    messages: vec![message],
                });
            }
        }
    }
    if let Some(done) = pending {
        overlays.upsert(done);
    }

    Ok(ImportedRun {
        run_id,
        items: read_table(&dir.join(ContentItem::FILE_NAME))?,
        comments: read_table(&dir.join(CommentRecord::FILE_NAME))?,
        overlays: overlays.into_records(),
    })
}

/// What an import wrote into the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub run_id: i64,
    pub content_items: MergeSummary,
    pub comments: MergeSummary,
    pub overlays: MergeSummary,
}

/// Merges a run directory into the canonical store
///
/// Rows keep the directory's run id as their provenance.
pub fn import_run(storage: &mut dyn Storage, dir: &Path) -> Result<ImportSummary, HarvestError> {
    let imported = read_run_dir(dir)?;
    tracing::info!(
        "Importing run {} from {}: {} item(s), {} comment(s), {} overlay set(s)",
        imported.run_id,
        dir.display(),
        imported.items.len(),
        imported.comments.len(),
        imported.overlays.len()
    );

    Ok(ImportSummary {
        run_id: imported.run_id,
        content_items: storage.upsert_content_items(imported.run_id, &imported.items)?,
        comments: storage.upsert_comments(imported.run_id, &imported.comments)?,
        overlays: storage.replace_overlays(imported.run_id, &imported.overlays)?,
    })
}
