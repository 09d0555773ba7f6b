//! Output traits and error types
//!
//! `Tabular` declares, once per entity type, the file name and the fixed
//! column order of its artifact, plus the conversion to and from one row.

use crate::model::{
    format_local, AnnotatedOverlay, CommentRecord, CommentTier, ContentItem, Counters,
    OverlayMessage, PublishTime, TIMESTAMP_FORMAT,
};
use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Row {row} of {path} is malformed: {message}")]
    Format {
        path: PathBuf,
        row: usize,
        message: String,
    },

    #[error("Unexpected columns in {path}: expected {expected:?}, found {found:?}")]
    Schema {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Not a run directory: {0}")]
    InvalidRunDir(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// A record with a fixed tabular rendering
pub trait Tabular: Sized {
    /// Artifact file name, e.g. `content_items.csv`
    const FILE_NAME: &'static str;

    /// Column names in their fixed order
    const COLUMNS: &'static [&'static str];

    /// Renders one row; always exactly `COLUMNS.len()` cells
    fn row(&self) -> Vec<String>;

    /// Parses one row previously produced by `row`
    fn from_row(cells: &[&str]) -> Result<Self, String>;
}

fn opt_to_cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn cell_to_opt<T: FromStr>(cell: &str, column: &str) -> Result<Option<T>, String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse()
        .map(Some)
        .map_err(|_| format!("{}: cannot parse '{}'", column, cell))
}

fn cell_to<T: FromStr>(cell: &str, column: &str) -> Result<T, String> {
    cell_to_opt(cell, column)?.ok_or_else(|| format!("{}: value required", column))
}

fn cell_to_text(cell: &str) -> Option<String> {
    (!cell.is_empty()).then(|| cell.to_string())
}

fn cell_to_local(cell: &str, column: &str) -> Result<Option<NaiveDateTime>, String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(cell, TIMESTAMP_FORMAT)
        .map(Some)
        .map_err(|e| format!("{}: {}", column, e))
}

impl Tabular for ContentItem {
    const FILE_NAME: &'static str = "content_items.csv";

    const COLUMNS: &'static [&'static str] = &[
        "bvid",
        "aid",
        "title",
        "author",
        "published_at",
        "url",
        "keyword",
        "views",
        "overlays",
        "likes",
        "coins",
        "bookmarks",
        "shares",
        "comments",
    ];

    fn row(&self) -> Vec<String> {
        let c = &self.counters;
        vec![
            self.bvid.clone(),
            opt_to_cell(self.aid),
            self.title.clone().unwrap_or_default(),
            self.author.clone().unwrap_or_default(),
            opt_to_cell(self.published_at.map(|p| p.to_display_string())),
            self.url.clone(),
            self.keyword.clone(),
            opt_to_cell(c.views),
            opt_to_cell(c.overlays),
            opt_to_cell(c.likes),
            opt_to_cell(c.coins),
            opt_to_cell(c.bookmarks),
            opt_to_cell(c.shares),
            opt_to_cell(c.comments),
        ]
    }

    fn from_row(cells: &[&str]) -> Result<Self, String> {
        let mut item = ContentItem::new(cells[0]);
        item.aid = cell_to_opt(cells[1], "aid")?;
        item.title = cell_to_text(cells[2]);
        item.author = cell_to_text(cells[3]);
        item.published_at = match cells[4].trim() {
            "" => None,
            text => Some(
                PublishTime::parse(text).ok_or_else(|| format!("published_at: '{}'", text))?,
            ),
        };
        if !cells[5].is_empty() {
            item.url = cells[5].to_string();
        }
        item.keyword = cells[6].to_string();
        item.counters = Counters {
            views: cell_to_opt(cells[7], "views")?,
            overlays: cell_to_opt(cells[8], "overlays")?,
            likes: cell_to_opt(cells[9], "likes")?,
            coins: cell_to_opt(cells[10], "coins")?,
            bookmarks: cell_to_opt(cells[11], "bookmarks")?,
            shares: cell_to_opt(cells[12], "shares")?,
            comments: cell_to_opt(cells[13], "comments")?,
        };
        Ok(item)
    }
}

impl Tabular for CommentRecord {
    const FILE_NAME: &'static str = "comments.csv";

    const COLUMNS: &'static [&'static str] = &[
        "content_id",
        "comment_id",
        "parent_id",
        "tier",
        "author",
        "body",
        "likes",
        "reply_count",
        "created_at",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.content_id.clone(),
            self.comment_id.to_string(),
            opt_to_cell(self.parent_id),
            self.tier.to_db_string().to_string(),
            self.author.clone(),
            self.body.clone(),
            self.likes.to_string(),
            self.reply_count.to_string(),
            opt_to_cell(self.created_at.as_ref().map(format_local)),
        ]
    }

    fn from_row(cells: &[&str]) -> Result<Self, String> {
        let tier = CommentTier::from_db_string(cells[3].trim())
            .ok_or_else(|| format!("tier: unknown '{}'", cells[3]))?;
        let record = CommentRecord {
            content_id: cells[0].to_string(),
            comment_id: cell_to(cells[1], "comment_id")?,
            parent_id: cell_to_opt(cells[2], "parent_id")?,
            tier,
            author: cells[4].to_string(),
            body: cells[5].to_string(),
            likes: cell_to_opt(cells[6], "likes")?.unwrap_or(0),
            reply_count: cell_to_opt(cells[7], "reply_count")?.unwrap_or(0),
            created_at: cell_to_local(cells[8], "created_at")?,
        };
        if !record.is_well_formed() {
            return Err(format!(
                "comment {} has tier {} but parent {:?}",
                record.comment_id, record.tier, record.parent_id
            ));
        }
        Ok(record)
    }
}

impl Tabular for AnnotatedOverlay {
    const FILE_NAME: &'static str = "overlays.csv";

    const COLUMNS: &'static [&'static str] = &[
        "content_id",
        "offset_secs",
        "offset_hms",
        "second_count",
        "first_in_second",
        "text",
        "sent_at",
    ];

    fn row(&self) -> Vec<String> {
        vec![
            self.message.content_id.clone(),
            self.message.offset_secs.to_string(),
            crate::model::format_hms(self.second),
            self.second_count.to_string(),
            self.first_in_second.to_string(),
            self.message.text.clone(),
            opt_to_cell(self.message.sent_at.as_ref().map(format_local)),
        ]
    }

    fn from_row(cells: &[&str]) -> Result<Self, String> {
        let message = OverlayMessage {
            content_id: cells[0].to_string(),
            offset_secs: cell_to(cells[1], "offset_secs")?,
            text: cells[5].to_string(),
            sent_at: cell_to_local(cells[6], "sent_at")?,
        };
        Ok(AnnotatedOverlay {
            second: message.offset_secs.max(0.0).floor() as u64,
            second_count: cell_to(cells[3], "second_count")?,
            first_in_second: cell_to(cells[4], "first_in_second")?,
            message,
        })
    }
}
