//! Database schema definitions
//!
//! Canonical tables hold one row per natural key. Every row records the run
//! that last wrote it in `source_run`; imported runs keep the id of the run
//! directory they came from, which need not exist in `runs`.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Canonical content items, keyed by provider id
CREATE TABLE IF NOT EXISTS content_items (
    bvid TEXT PRIMARY KEY,
    aid INTEGER,
    cid INTEGER,
    title TEXT,
    author TEXT,
    published_at TEXT,
    url TEXT NOT NULL,
    keyword TEXT NOT NULL DEFAULT '',
    views INTEGER,
    overlays INTEGER,
    likes INTEGER,
    coins INTEGER,
    bookmarks INTEGER,
    shares INTEGER,
    comments INTEGER,
    source_run INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_content_items_run ON content_items(source_run);

-- Canonical comments, keyed by (content item, comment)
CREATE TABLE IF NOT EXISTS comments (
    content_id TEXT NOT NULL,
    comment_id INTEGER NOT NULL,
    parent_id INTEGER,
    tier TEXT NOT NULL,
    author TEXT NOT NULL,
    body TEXT NOT NULL,
    likes INTEGER NOT NULL,
    reply_count INTEGER NOT NULL,
    created_at TEXT,
    source_run INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (content_id, comment_id)
);

CREATE INDEX IF NOT EXISTS idx_comments_run ON comments(source_run);

-- Overlay messages, replaced wholesale per content item
CREATE TABLE IF NOT EXISTS overlays (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_id TEXT NOT NULL,
    offset_secs REAL NOT NULL,
    text TEXT NOT NULL,
    sent_at TEXT,
    source_run INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_overlays_content ON overlays(content_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
