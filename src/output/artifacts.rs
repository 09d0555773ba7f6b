//! Run and final artifact layout
//!
//! ```text
//! {output-dir}/
//!   run-<id>/content_items.csv, comments.csv, overlays.csv
//!   final/content_items.csv, comments.csv, overlays.csv   (+ source_run)
//! ```

use crate::model::{annotate_overlays, AnnotatedOverlay, CommentRecord, ContentItem, OverlayMessage};
use crate::output::sink::CsvSink;
use crate::output::traits::{OutputResult, Tabular};
use crate::storage::{OverlayBatch, Storage, Stored};
use crate::HarvestError;
use std::path::{Path, PathBuf};

const RUN_DIR_PREFIX: &str = "run-";
const FINAL_DIR: &str = "final";

/// Locations of every artifact below the output directory
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: i64) -> PathBuf {
        self.root.join(format!("{}{}", RUN_DIR_PREFIX, run_id))
    }

    pub fn final_dir(&self) -> PathBuf {
        self.root.join(FINAL_DIR)
    }
}

/// Reads the run id out of a `run-<id>` directory name
pub fn run_id_from_dir(dir: &Path) -> Option<i64> {
    dir.file_name()?
        .to_str()?
        .strip_prefix(RUN_DIR_PREFIX)?
        .parse()
        .ok()
}

/// Row counts of one set of artifacts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArtifactCounts {
    pub content_items: usize,
    pub comments: usize,
    pub overlays: usize,
}

/// Annotates each batch separately; batches keep their order
pub fn annotate_batches(batches: &[OverlayBatch]) -> Vec<AnnotatedOverlay> {
    batches
        .iter()
        .flat_map(|batch| annotate_overlays(batch.messages.clone()))
        .collect()
}

/// Writes the three artifacts of one run
///
/// Called after every completed job, so an interrupted run still leaves
/// complete files describing what it collected so far.
///
/// # Arguments
///
/// * `sink` - The CSV writer
/// * `dir` - The run directory (see `ArtifactLayout::run_dir`)
/// * `items`, `comments`, `overlays` - The run's de-duplicated records
pub fn write_run_artifacts(
    sink: &CsvSink,
    dir: &Path,
    items: &[ContentItem],
    comments: &[CommentRecord],
    overlays: &[OverlayBatch],
) -> OutputResult<ArtifactCounts> {
    Ok(ArtifactCounts {
        content_items: sink.write(&dir.join(ContentItem::FILE_NAME), items)?,
        comments: sink.write(&dir.join(CommentRecord::FILE_NAME), comments)?,
        overlays: sink.write(
            &dir.join(AnnotatedOverlay::FILE_NAME),
            &annotate_batches(overlays),
        )?,
    })
}

/// Groups stored overlay messages per content item and annotates them
///
/// Overlays of one content item are always written by a single run, so
/// the group's first provenance applies to every message.
fn annotate_stored(stored: Vec<Stored<OverlayMessage>>) -> Vec<Stored<AnnotatedOverlay>> {
    let mut annotated = Vec::with_capacity(stored.len());
    let mut group: Vec<OverlayMessage> = Vec::new();
    let mut group_run = 0;

    let mut flush = |group: &mut Vec<OverlayMessage>, run: i64| {
        for record in annotate_overlays(std::mem::take(group)) {
            annotated.push(Stored {
                record,
                source_run: run,
            });
        }
    };

    for entry in stored {
        if group
            .first()
            .map(|m| m.content_id != entry.record.content_id)
            .unwrap_or(false)
        {
            flush(&mut group, group_run);
        }
        if group.is_empty() {
            group_run = entry.source_run;
        }
        group.push(entry.record);
    }
    flush(&mut group, group_run);

    annotated
}

/// Rewrites the final artifacts from the canonical store
///
/// # Returns
///
/// * `Ok(ArtifactCounts)` - Rows written per artifact
/// * `Err(HarvestError)` - The store could not be read or a file not written
pub fn export_final(
    storage: &dyn Storage,
    sink: &CsvSink,
    layout: &ArtifactLayout,
) -> Result<ArtifactCounts, HarvestError> {
    let dir = layout.final_dir();

    let items = storage.load_content_items()?;
    let comments = storage.load_comments()?;
    let overlays = annotate_stored(storage.load_overlays()?);

    let counts = ArtifactCounts {
        content_items: sink.write_with_provenance(&dir.join(ContentItem::FILE_NAME), &items)?,
        comments: sink.write_with_provenance(&dir.join(CommentRecord::FILE_NAME), &comments)?,
        overlays: sink
            .write_with_provenance(&dir.join(AnnotatedOverlay::FILE_NAME), &overlays)?,
    };

    tracing::info!(
        "Exported final artifacts to {}: {} item(s), {} comment(s), {} overlay message(s)",
        dir.display(),
        counts.content_items,
        counts.comments,
        counts.overlays
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_message(content_id: &str, offset: f64) -> OverlayMessage {
        OverlayMessage {
            content_id: content_id.to_string(),
            offset_secs: offset,
            text: format!("{}@{}", content_id, offset),
            sent_at: None,
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = ArtifactLayout::new("/out");
        assert_eq!(layout.run_dir(12), PathBuf::from("/out/run-12"));
        assert_eq!(layout.final_dir(), PathBuf::from("/out/final"));
    }

    #[test]
    fn test_run_id_from_dir() {
        assert_eq!(run_id_from_dir(Path::new("/out/run-12")), Some(12));
        assert_eq!(run_id_from_dir(Path::new("/out/run-12/")), Some(12));
        assert_eq!(run_id_from_dir(Path::new("/out/final")), None);
        assert_eq!(run_id_from_dir(Path::new("/out/run-x")), None);
    }

    #[test]
    fn test_annotate_batches_keeps_items_apart() {
        let batches = vec![
            OverlayBatch {
                content_id: "BV1xx411c7mD".to_string(),
                messages: vec![create_test_message("BV1xx411c7mD", 1.2)],
            },
            OverlayBatch {
                content_id: "BV1GJ411x7h7".to_string(),
                messages: vec![create_test_message("BV1GJ411x7h7", 1.5)],
            },
        ];
        let annotated = annotate_batches(&batches);
        assert_eq!(annotated.len(), 2);
        // same second, different items: both are first in their second
        assert!(annotated.iter().all(|a| a.first_in_second && a.second_count == 1));
    }

    #[test]
    fn test_annotate_stored_groups_by_item() {
        let stored = vec![
            Stored {
                record: create_test_message("BV1GJ411x7h7", 3.0),
                source_run: 2,
            },
            Stored {
                record: create_test_message("BV1GJ411x7h7", 3.4),
                source_run: 2,
            },
            Stored {
                record: create_test_message("BV1xx411c7mD", 3.1),
                source_run: 5,
            },
        ];
        let annotated = annotate_stored(stored);
        assert_eq!(annotated.len(), 3);
        assert_eq!(annotated[0].record.second_count, 2);
        assert_eq!(annotated[2].record.second_count, 1);
        assert_eq!(annotated[2].source_run, 5);
    }
}
