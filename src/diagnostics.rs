//! Raw-payload dumps for skipped items
//!
//! When an item is abandoned the last payload the provider sent is written
//! to a text file so the failure can be inspected after the run.

use crate::model::{format_local, local_from_epoch};
use crate::state::OperationKind;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Directory receiving diagnostic dumps
#[derive(Debug, Clone)]
pub struct DiagnosticSink {
    dir: PathBuf,
}

impl DiagnosticSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes one dump file
    ///
    /// The file is named `{operation}_{item}_{timestamp}.txt`. Failing to
    /// write a dump never fails the run; the error is logged instead.
    ///
    /// # Returns
    ///
    /// The path written, or `None` if the dump could not be written
    pub fn dump(
        &self,
        operation: OperationKind,
        item_id: &str,
        attempts: u32,
        error: &str,
        payload: &str,
    ) -> Option<PathBuf> {
        let now = Utc::now();
        let local = local_from_epoch(now.timestamp()).unwrap_or_else(|| now.naive_utc());
        let name = format!(
            "{}_{}_{}{:03}.txt",
            operation,
            sanitize(item_id),
            local.format("%Y%m%d-%H%M%S-"),
            now.timestamp_subsec_millis()
        );
        let path = self.dir.join(name);

        let body = format!(
            "operation: {}\nitem: {}\nattempts: {}\nerror: {}\nwritten: {}\n\n{}\n",
            operation,
            item_id,
            attempts,
            error,
            format_local(&local),
            payload
        );

        let result =
            std::fs::create_dir_all(&self.dir).and_then(|_| std::fs::write(&path, body));
        match result {
            Ok(()) => {
                tracing::info!("Wrote diagnostic dump {}", path.display());
                Some(path)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to write diagnostic dump {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }
}

/// Keeps item identifiers usable as file name segments
fn sanitize(item_id: &str) -> String {
    item_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
