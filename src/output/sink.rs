//! Atomic CSV writer
//!
//! Every artifact is written to a temporary file in its destination
//! directory and renamed into place, so a reader sees either the previous
//! file or the complete new one.

use crate::output::traits::{OutputError, OutputResult, Tabular};
use crate::storage::Stored;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Name of the provenance column appended to final artifacts
pub const SOURCE_RUN_COLUMN: &str = "source_run";

/// Writes tabular records as CSV files
#[derive(Debug, Clone, Copy)]
pub struct CsvSink {
    utf8_bom: bool,
}

impl CsvSink {
    /// Creates a sink
    ///
    /// # Arguments
    ///
    /// * `utf8_bom` - Prefix every file with a UTF-8 byte order mark
    pub fn new(utf8_bom: bool) -> Self {
        Self { utf8_bom }
    }

    /// Writes `rows` to `path`, replacing any previous file
    ///
    /// # Returns
    ///
    /// The number of data rows written
    pub fn write<T: Tabular>(&self, path: &Path, rows: &[T]) -> OutputResult<usize> {
        self.write_rows(path, T::COLUMNS, None, rows.iter().map(Tabular::row))
    }

    /// Writes `rows` with a trailing `source_run` column
    pub fn write_with_provenance<T: Tabular>(
        &self,
        path: &Path,
        rows: &[Stored<T>],
    ) -> OutputResult<usize> {
        self.write_rows(
            path,
            T::COLUMNS,
            Some(SOURCE_RUN_COLUMN),
            rows.iter().map(|stored| {
                let mut row = stored.record.row();
                row.push(stored.source_run.to_string());
                row
            }),
        )
    }

    fn write_rows(
        &self,
        path: &Path,
        columns: &[&str],
        extra: Option<&str>,
        rows: impl Iterator<Item = Vec<String>>,
    ) -> OutputResult<usize> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut header: Vec<&str> = columns.to_vec();
        header.extend(extra);

        let mut tmp = NamedTempFile::new_in(dir)?;
        if self.utf8_bom {
            tmp.write_all(UTF8_BOM)?;
        }

        let mut written = 0;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            writer.write_record(&header)?;
            for row in rows {
                if row.len() != header.len() {
                    // Dropping `tmp` removes the partial file
                    return Err(OutputError::Format {
                        path: path.to_path_buf(),
                        row: written + 1,
                        message: format!("{} cells for {} columns", row.len(), header.len()),
                    });
                }
                writer.write_record(&row)?;
                written += 1;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;

        tmp.persist(path).map_err(|e| OutputError::Write {
            path: path.to_path_buf(),
            message: e.error.to_string(),
        })?;

        tracing::debug!("Wrote {} row(s) to {}", written, path.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentItem;
    use tempfile::TempDir;

    fn create_test_items() -> Vec<ContentItem> {
        ["BV1xx411c7mD", "BV1GJ411x7h7"]
            .iter()
            .map(|bvid| {
                let mut item = ContentItem::new(bvid);
                item.title = Some(format!("title {}", bvid));
                item
            })
            .collect()
    }

    #[test]
    fn test_write_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(ContentItem::FILE_NAME);

        let written = CsvSink::new(false).write(&path, &create_test_items()).unwrap();
        assert_eq!(written, 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), ContentItem::COLUMNS.join(","));
        assert_eq!(lines.count(), 2);
    }

    #[test]
    fn test_every_row_has_every_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.csv");
        CsvSink::new(false).write(&path, &create_test_items()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        for record in reader.records() {
            assert_eq!(record.unwrap().len(), ContentItem::COLUMNS.len());
        }
    }

    #[test]
    fn test_bom_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.csv");
        CsvSink::new(true).write(&path, &create_test_items()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
    }

    #[test]
    fn test_provenance_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("final.csv");
        let rows: Vec<Stored<ContentItem>> = create_test_items()
            .into_iter()
            .map(|record| Stored {
                record,
                source_run: 7,
            })
            .collect();
        CsvSink::new(false).write_with_provenance(&path, &rows).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.get(headers.len() - 1), Some(SOURCE_RUN_COLUMN));
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(first.get(headers.len() - 1), Some("7"));
    }

    #[test]
    fn test_failed_write_leaves_destination_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.csv");
        std::fs::write(&path, "previous").unwrap();

        let ragged = vec![vec!["only one cell".to_string()]];
        let result = CsvSink::new(false).write_rows(
            &path,
            ContentItem::COLUMNS,
            None,
            ragged.into_iter(),
        );

        assert!(matches!(result, Err(OutputError::Format { row: 1, .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous");
        // no temporary files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
