//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::model::{
    format_local, CommentRecord, CommentTier, ContentItem, Counters, OverlayMessage, PublishTime,
    TIMESTAMP_FORMAT,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    CanonicalSet, MergeSummary, OverlayBatch, RunRecord, RunStatus, StoreCounts, Stored,
};
use crate::HarvestError;
use chrono::{NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;

const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, status";

const CONTENT_COLUMNS: &str = "bvid, aid, cid, title, author, published_at, url, keyword, \
     views, overlays, likes, coins, bookmarks, shares, comments, source_run";

const COMMENT_COLUMNS: &str =
    "content_id, comment_id, parent_id, tier, author, body, likes, reply_count, created_at, source_run";

const UPSERT_CONTENT_SQL: &str = "
    INSERT INTO content_items (bvid, aid, cid, title, author, published_at, url, keyword,
        views, overlays, likes, coins, bookmarks, shares, comments, source_run, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
    ON CONFLICT(bvid) DO UPDATE SET
        aid = excluded.aid, cid = COALESCE(excluded.cid, content_items.cid),
        title = excluded.title,
        author = excluded.author, published_at = excluded.published_at,
        url = excluded.url, keyword = excluded.keyword, views = excluded.views,
        overlays = excluded.overlays, likes = excluded.likes, coins = excluded.coins,
        bookmarks = excluded.bookmarks, shares = excluded.shares,
        comments = excluded.comments, source_run = excluded.source_run,
        updated_at = excluded.updated_at";

const UPSERT_COMMENT_SQL: &str = "
    INSERT INTO comments (content_id, comment_id, parent_id, tier, author, body, likes,
        reply_count, created_at, source_run, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(content_id, comment_id) DO UPDATE SET
        parent_id = excluded.parent_id, tier = excluded.tier, author = excluded.author,
        body = excluded.body, likes = excluded.likes, reply_count = excluded.reply_count,
        created_at = excluded.created_at, source_run = excluded.source_run,
        updated_at = excluded.updated_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        // Writers from other processes wait for the lock instead of failing
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 10000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn count(&self, sql: &str, run_id: Option<i64>) -> StorageResult<u64> {
        let count: i64 = match run_id {
            Some(run_id) => self.conn.query_row(sql, params![run_id], |row| row.get(0))?,
            None => self.conn.query_row(sql, [], |row| row.get(0))?,
        };
        Ok(count.max(0) as u64)
    }
}

fn parse_local(text: Option<String>) -> Option<NaiveDateTime> {
    text.and_then(|t| NaiveDateTime::parse_from_str(&t, TIMESTAMP_FORMAT).ok())
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Running),
    })
}

fn content_from_row(row: &Row<'_>) -> rusqlite::Result<Stored<ContentItem>> {
    Ok(Stored {
        record: ContentItem {
            bvid: row.get(0)?,
            aid: row.get(1)?,
            cid: row.get(2)?,
            title: row.get(3)?,
            author: row.get(4)?,
            published_at: row
                .get::<_, Option<String>>(5)?
                .as_deref()
                .and_then(PublishTime::parse),
            url: row.get(6)?,
            keyword: row.get(7)?,
            counters: Counters {
                views: row.get(8)?,
                overlays: row.get(9)?,
                likes: row.get(10)?,
                coins: row.get(11)?,
                bookmarks: row.get(12)?,
                shares: row.get(13)?,
                comments: row.get(14)?,
            },
        },
        source_run: row.get(15)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Stored<CommentRecord>> {
    let tier: String = row.get(3)?;
    let tier = CommentTier::from_db_string(&tier).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, format!("unknown tier '{}'", tier).into())
    })?;
    Ok(Stored {
        record: CommentRecord {
            content_id: row.get(0)?,
            comment_id: row.get(1)?,
            parent_id: row.get(2)?,
            tier,
            author: row.get(4)?,
            body: row.get(5)?,
            likes: row.get(6)?,
            reply_count: row.get(7)?,
            created_at: parse_local(row.get(8)?),
        },
        source_run: row.get(9)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM runs ORDER BY id", RUN_COLUMNS))?;
        let runs = stmt
            .query_map([], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let finished_at = (status != RunStatus::Running).then(|| Utc::now().to_rfc3339());
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = COALESCE(?2, finished_at) WHERE id = ?3",
            params![status.to_db_string(), finished_at, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Canonical Records =====

    fn upsert_content_items(
        &mut self,
        run_id: i64,
        items: &[ContentItem],
    ) -> StorageResult<MergeSummary> {
        let batch: CanonicalSet<ContentItem> = items.iter().cloned().collect();
        let now = Utc::now().to_rfc3339();
        let mut summary = MergeSummary::default();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut exists = tx.prepare("SELECT 1 FROM content_items WHERE bvid = ?1")?;
            let mut upsert = tx.prepare(UPSERT_CONTENT_SQL)?;
            for item in batch.iter() {
                if exists.exists(params![item.bvid])? {
                    summary.replaced += 1;
                } else {
                    summary.inserted += 1;
                }
                let c = &item.counters;
                upsert.execute(params![
                    item.bvid,
                    item.aid,
                    item.cid,
                    item.title,
                    item.author,
                    item.published_at.map(|p| p.to_display_string()),
                    item.url,
                    item.keyword,
                    c.views,
                    c.overlays,
                    c.likes,
                    c.coins,
                    c.bookmarks,
                    c.shares,
                    c.comments,
                    run_id,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(
            "Run {}: {} content item(s) inserted, {} replaced",
            run_id,
            summary.inserted,
            summary.replaced
        );
        Ok(summary)
    }

    fn upsert_comments(
        &mut self,
        run_id: i64,
        comments: &[CommentRecord],
    ) -> StorageResult<MergeSummary> {
        let batch: CanonicalSet<CommentRecord> = comments.iter().cloned().collect();
        let now = Utc::now().to_rfc3339();
        let mut summary = MergeSummary::default();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut exists =
                tx.prepare("SELECT 1 FROM comments WHERE content_id = ?1 AND comment_id = ?2")?;
            let mut upsert = tx.prepare(UPSERT_COMMENT_SQL)?;
            for comment in batch.iter() {
                if exists.exists(params![comment.content_id, comment.comment_id])? {
                    summary.replaced += 1;
                } else {
                    summary.inserted += 1;
                }
                upsert.execute(params![
                    comment.content_id,
                    comment.comment_id,
                    comment.parent_id,
                    comment.tier.to_db_string(),
                    comment.author,
                    comment.body,
                    comment.likes,
                    comment.reply_count,
                    comment.created_at.as_ref().map(format_local),
                    run_id,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(summary)
    }

    fn replace_overlays(
        &mut self,
        run_id: i64,
        batches: &[OverlayBatch],
    ) -> StorageResult<MergeSummary> {
        let batch: CanonicalSet<OverlayBatch> = batches.iter().cloned().collect();
        let mut summary = MergeSummary::default();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut delete = tx.prepare("DELETE FROM overlays WHERE content_id = ?1")?;
            let mut insert = tx.prepare(
                "INSERT INTO overlays (content_id, offset_secs, text, sent_at, source_run)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for group in batch.iter() {
                if delete.execute(params![group.content_id])? > 0 {
                    summary.replaced += 1;
                } else {
                    summary.inserted += 1;
                }
                for message in &group.messages {
                    insert.execute(params![
                        group.content_id,
                        message.offset_secs,
                        message.text,
                        message.sent_at.as_ref().map(format_local),
                        run_id,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(summary)
    }

    fn get_content_item(&self, bvid: &str) -> StorageResult<Option<Stored<ContentItem>>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM content_items WHERE bvid = ?1", CONTENT_COLUMNS),
                params![bvid],
                content_from_row,
            )
            .optional()?)
    }

    fn load_content_items(&self) -> StorageResult<Vec<Stored<ContentItem>>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM content_items ORDER BY rowid",
            CONTENT_COLUMNS
        ))?;
        let items = stmt
            .query_map([], content_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn load_comments(&self) -> StorageResult<Vec<Stored<CommentRecord>>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM comments ORDER BY content_id, rowid",
            COMMENT_COLUMNS
        ))?;
        let comments = stmt
            .query_map([], comment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn load_overlays(&self) -> StorageResult<Vec<Stored<OverlayMessage>>> {
        let mut stmt = self.conn.prepare(
            "SELECT content_id, offset_secs, text, sent_at, source_run
             FROM overlays ORDER BY content_id, offset_secs, id",
        )?;
        let overlays = stmt
            .query_map([], |row| {
                Ok(Stored {
                    record: OverlayMessage {
                        content_id: row.get(0)?,
                        offset_secs: row.get(1)?,
                        text: row.get(2)?,
                        sent_at: parse_local(row.get(3)?),
                    },
                    source_run: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(overlays)
    }

    // ===== Statistics =====

    fn counts(&self) -> StorageResult<StoreCounts> {
        Ok(StoreCounts {
            content_items: self.count("SELECT COUNT(*) FROM content_items", None)?,
            comments: self.count("SELECT COUNT(*) FROM comments", None)?,
            overlays: self.count("SELECT COUNT(*) FROM overlays", None)?,
        })
    }

    fn counts_for_run(&self, run_id: i64) -> StorageResult<StoreCounts> {
        Ok(StoreCounts {
            content_items: self.count(
                "SELECT COUNT(*) FROM content_items WHERE source_run = ?1",
                Some(run_id),
            )?,
            comments: self.count(
                "SELECT COUNT(*) FROM comments WHERE source_run = ?1",
                Some(run_id),
            )?,
            overlays: self.count(
                "SELECT COUNT(*) FROM overlays WHERE source_run = ?1",
                Some(run_id),
            )?,
        })
    }

    fn count_comments_by_tier(&self) -> StorageResult<HashMap<CommentTier, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tier, COUNT(*) FROM comments GROUP BY tier")?;
        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (tier, count) = row?;
            let tier = CommentTier::from_db_string(&tier).ok_or_else(|| StorageError::CorruptRow {
                table: "comments",
                message: format!("unknown tier '{}'", tier),
            })?;
            counts.insert(tier, count.max(0) as u64);
        }
        Ok(counts)
    }

    fn top_commented(&self, limit: usize) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT content_id, COUNT(*) AS n FROM comments
             GROUP BY content_id ORDER BY n DESC, content_id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?.max(0) as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
