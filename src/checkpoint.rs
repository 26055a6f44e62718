use crate::error::{IngestError, IngestResult};
use crate::models::PageId;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

/// Last page id consumed by the lineage, from the singleton checkpoint row.
pub fn load(conn: &Connection) -> IngestResult<Option<PageId>> {
    Ok(conn
        .query_row(
            "SELECT last_page_id FROM checkpoints WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?)
}

/// Overwrites the checkpoint row. Durable once the enclosing transaction commits.
pub fn save(conn: &Connection, last_page_id: PageId) -> IngestResult<()> {
    conn.prepare_cached(
        "INSERT INTO checkpoints (id, last_page_id) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET last_page_id = excluded.last_page_id",
    )?
    .execute(params![last_page_id])?;
    debug!(last_page_id, "Checkpoint written");
    Ok(())
}

/// Tracks consumed pages and reports when a checkpoint batch is due.
pub struct CheckpointManager {
    interval: u32,
    pending: u32,
    last_consumed: Option<PageId>,
}

impl CheckpointManager {
    pub fn new(interval: u32, resumed_from: Option<PageId>) -> IngestResult<Self> {
        if interval == 0 {
            return Err(IngestError::Config(
                "checkpoint interval must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            interval,
            pending: 0,
            last_consumed: resumed_from,
        })
    }

    /// Records a consumed page (committed or skipped). Returns `true` when
    /// `interval` pages have accumulated since the last checkpoint.
    pub fn record(&mut self, id: PageId) -> bool {
        self.last_consumed = Some(id);
        self.pending += 1;
        self.pending >= self.interval
    }

    /// Called once the checkpoint has been committed.
    pub fn mark_saved(&mut self) {
        self.pending = 0;
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn last_consumed(&self) -> Option<PageId> {
        self.last_consumed
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }
}

/// Checks the store against the checkpoint before any page is read.
///
/// `last_article` is the highest article id physically present in the
/// lineage. Articles past the checkpoint, or articles with no checkpoint at
/// all, mean rows were committed that the checkpoint never recorded.
pub fn validate_resume(checkpoint: Option<PageId>, last_article: Option<PageId>) -> IngestResult<()> {
    match (checkpoint, last_article) {
        (None, Some(article)) => Err(IngestError::ResumeInconsistency(format!(
            "store holds articles up to {} but has no checkpoint",
            article
        ))),
        (Some(cp), Some(article)) if article > cp => Err(IngestError::ResumeInconsistency(
            format!(
                "last stored article {} is past checkpoint {}",
                article, cp
            ),
        )),
        (Some(cp), _) => {
            info!(checkpoint = cp, last_article = ?last_article, "Resuming from checkpoint");
            Ok(())
        }
        (None, None) => Ok(()),
    }
}

/// The first page read after skip-ahead must lie strictly past the checkpoint.
pub fn validate_next_page(checkpoint: Option<PageId>, next: PageId) -> IngestResult<()> {
    match checkpoint {
        Some(cp) if next <= cp => Err(IngestError::ResumeInconsistency(format!(
            "next page {} is not past checkpoint {}",
            next, cp
        ))),
        _ => Ok(()),
    }
}
