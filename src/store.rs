//! SQLite schema and the per-page writer.
//!
//! Pages are written inside a batch transaction opened with [`begin_batch`].
//! Each page gets its own savepoint, so a page that cannot be stored rolls
//! back alone and leaves the rest of the batch intact. [`commit_batch`] writes
//! the checkpoint inside the same transaction before committing.

use crate::checkpoint;
use crate::error::IngestResult;
use crate::models::{ArticleId, ExtractedPage, PageId, PageOutcome, SkipReason};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS articles (
    article_id      INTEGER PRIMARY KEY,
    title           TEXT NOT NULL,
    is_redirect     INTEGER NOT NULL,
    type            TEXT NOT NULL,
    redirect_target TEXT
);

CREATE TABLE IF NOT EXISTS categories (
    category_id INTEGER PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS article_categories (
    article_id  INTEGER NOT NULL REFERENCES articles(article_id),
    category_id INTEGER NOT NULL REFERENCES categories(category_id),
    PRIMARY KEY (article_id, category_id)
);

CREATE TABLE IF NOT EXISTS article_sections (
    id                      INTEGER PRIMARY KEY,
    article_id              INTEGER NOT NULL REFERENCES articles(article_id),
    section_order           INTEGER NOT NULL,
    section_title           TEXT NOT NULL,
    section_content         TEXT NOT NULL,
    structured_side_channel TEXT NOT NULL,
    UNIQUE (article_id, section_order)
);

CREATE TABLE IF NOT EXISTS checkpoints (
    id           INTEGER PRIMARY KEY CHECK (id = 1),
    last_page_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS shard_meta (
    id      INTEGER PRIMARY KEY CHECK (id = 1),
    ordinal INTEGER NOT NULL,
    sealed  INTEGER NOT NULL DEFAULT 0
);
";

/// Opens a writable shard with the pragmas every active shard runs under.
pub fn open_connection(path: &Path) -> IngestResult<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

pub fn configure(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = FULL;
        PRAGMA temp_store = MEMORY;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub fn begin_batch(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    Ok(())
}

pub fn in_batch(conn: &Connection) -> bool {
    !conn.is_autocommit()
}

/// Commits the open batch, recording `checkpoint` in the same transaction.
pub fn commit_batch(conn: &Connection, checkpoint: Option<PageId>) -> IngestResult<()> {
    if let Some(id) = checkpoint {
        checkpoint::save(conn, id)?;
    }
    conn.execute_batch("COMMIT")?;
    Ok(())
}

pub fn rollback_batch(conn: &Connection) -> IngestResult<()> {
    if in_batch(conn) {
        conn.execute_batch("ROLLBACK")?;
    }
    Ok(())
}

/// Writes one page's article, sections, and category links as a unit.
///
/// A page whose id is already stored, or whose content SQLite refuses as too
/// large, comes back as [`PageOutcome::Skipped`] with nothing written.
pub fn commit_page(conn: &Connection, page: &ExtractedPage) -> IngestResult<PageOutcome> {
    if article_exists(conn, page.article.id)? {
        return Ok(PageOutcome::Skipped(SkipReason::DuplicateId));
    }

    conn.execute_batch("SAVEPOINT page")?;
    match write_page(conn, page) {
        Ok(id) => {
            conn.execute_batch("RELEASE page")?;
            Ok(PageOutcome::Committed(id))
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK TO page; RELEASE page")?;
            match encoding_failure(&e) {
                Some(reason) => Ok(PageOutcome::Skipped(SkipReason::Encoding(reason))),
                None => Err(e.into()),
            }
        }
    }
}

fn write_page(conn: &Connection, page: &ExtractedPage) -> rusqlite::Result<ArticleId> {
    let article = &page.article;
    conn.prepare_cached(
        "INSERT INTO articles (article_id, title, is_redirect, type, redirect_target)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?
    .execute(params![
        article.id,
        article.title,
        article.is_redirect,
        article.article_type.as_str(),
        article.redirect_target,
    ])?;

    let mut insert_section = conn.prepare_cached(
        "INSERT INTO article_sections
            (article_id, section_order, section_title, section_content, structured_side_channel)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for section in &page.sections {
        let side_channel = serde_json::to_string(&section.side_channel)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        insert_section.execute(params![
            article.id,
            section.order,
            section.title,
            section.content,
            side_channel,
        ])?;
    }

    let mut link = conn.prepare_cached(
        "INSERT OR IGNORE INTO article_categories (article_id, category_id) VALUES (?1, ?2)",
    )?;
    for name in &page.categories {
        let category_id = upsert_category(conn, name)?;
        link.execute(params![article.id, category_id])?;
    }

    Ok(article.id)
}

fn upsert_category(conn: &Connection, name: &str) -> rusqlite::Result<i64> {
    conn.prepare_cached("INSERT INTO categories (name) VALUES (?1) ON CONFLICT(name) DO NOTHING")?
        .execute(params![name])?;
    conn.prepare_cached("SELECT category_id FROM categories WHERE name = ?1")?
        .query_row(params![name], |row| row.get(0))
}

fn encoding_failure(e: &rusqlite::Error) -> Option<String> {
    match e {
        rusqlite::Error::SqliteFailure(err, msg) if err.code == ErrorCode::TooBig => {
            Some(msg.clone().unwrap_or_else(|| err.to_string()))
        }
        rusqlite::Error::ToSqlConversionFailure(inner) => Some(inner.to_string()),
        _ => None,
    }
}

pub fn article_exists(conn: &Connection, id: ArticleId) -> IngestResult<bool> {
    Ok(conn
        .prepare_cached("SELECT 1 FROM articles WHERE article_id = ?1")?
        .query_row(params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

pub fn article_count(conn: &Connection) -> IngestResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
    Ok(count as u64)
}

pub fn last_article_id(conn: &Connection) -> IngestResult<Option<ArticleId>> {
    Ok(conn.query_row("SELECT MAX(article_id) FROM articles", [], |row| row.get(0))?)
}

/// Logical database size, including pages still held in the WAL or in the
/// open transaction.
pub fn database_size(conn: &Connection) -> IngestResult<u64> {
    let page_count: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
    let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
    Ok((page_count * page_size) as u64)
}
