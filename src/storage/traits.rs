//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::model::{CommentRecord, CommentTier, ContentItem, OverlayMessage};
use crate::storage::{MergeSummary, OverlayBatch, RunRecord, RunStatus, StoreCounts, Stored};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Writers take `&mut self`; a store has exactly one writer at a time.
/// Every write is last-write-wins per natural key and idempotent.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new harvest run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Lists every run, oldest first
    fn list_runs(&self) -> StorageResult<Vec<RunRecord>>;

    /// Updates the status of a run, stamping the finish time for terminal states
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Canonical Records =====

    /// Upserts content items, replacing whole rows on key collision
    ///
    /// # Arguments
    ///
    /// * `run_id` - Provenance recorded on every written row
    /// * `items` - The batch; later duplicates within it win
    fn upsert_content_items(
        &mut self,
        run_id: i64,
        items: &[ContentItem],
    ) -> StorageResult<MergeSummary>;

    /// Upserts comments keyed by `(content_id, comment_id)`
    fn upsert_comments(
        &mut self,
        run_id: i64,
        comments: &[CommentRecord],
    ) -> StorageResult<MergeSummary>;

    /// Replaces every overlay message of each batch's content item
    fn replace_overlays(
        &mut self,
        run_id: i64,
        batches: &[OverlayBatch],
    ) -> StorageResult<MergeSummary>;

    /// Gets one content item by id
    fn get_content_item(&self, bvid: &str) -> StorageResult<Option<Stored<ContentItem>>>;

    fn load_content_items(&self) -> StorageResult<Vec<Stored<ContentItem>>>;

    fn load_comments(&self) -> StorageResult<Vec<Stored<CommentRecord>>>;

    fn load_overlays(&self) -> StorageResult<Vec<Stored<OverlayMessage>>>;

    // ===== Statistics =====

    /// Counts canonical rows per table
    fn counts(&self) -> StorageResult<StoreCounts>;

    /// Counts canonical rows last written by `run_id`
    fn counts_for_run(&self, run_id: i64) -> StorageResult<StoreCounts>;

    /// Counts comments per tier
    fn count_comments_by_tier(&self) -> StorageResult<HashMap<CommentTier, u64>>;

    /// Content items with the most comments stored, descending
    fn top_commented(&self, limit: usize) -> StorageResult<Vec<(String, u64)>>;
}
