//! The ingestion driver: read, extract, write, checkpoint, roll over.
//!
//! All mutable state for a run lives in a [`Session`] that is threaded
//! through explicitly. Pages are processed one at a time in dump order.

use crate::checkpoint::{self, CheckpointManager};
use crate::config::{
    CHECKPOINT_INTERVAL, DEFAULT_SHARD_THRESHOLD_MB, MEMORY_TRIM_INTERVAL, PREVIEW_CHARS,
    PROGRESS_INTERVAL, PROGRESS_LOG_FILE, SAMPLE_LOG_INTERVAL,
};
use crate::error::{IngestError, IngestResult};
use crate::extract::extract;
use crate::models::{Page, PageId, PageOutcome, SkipReason};
use crate::parser::DumpReader;
use crate::progress::{self, ProgressLog};
use crate::shard::{self, ShardManager};
use crate::stats::IngestStats;
use crate::store;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolved settings for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub shard_threshold_bytes: u64,
    pub checkpoint_interval: u32,
    pub progress_interval: u32,
    pub memory_trim_interval: u32,
    /// Compact the active shard every this many committed pages
    pub vacuum_interval: Option<u64>,
    /// Stop after this many pages have been consumed in this run
    pub limit: Option<u64>,
    pub total_pages: Option<u64>,
    pub show_progress: bool,
}

impl IngestOptions {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            shard_threshold_bytes: DEFAULT_SHARD_THRESHOLD_MB * 1024 * 1024,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            progress_interval: PROGRESS_INTERVAL,
            memory_trim_interval: MEMORY_TRIM_INTERVAL,
            vacuum_interval: None,
            limit: None,
            total_pages: None,
            show_progress: false,
        }
    }

    pub fn validate(&self) -> IngestResult<()> {
        let intervals = [
            ("checkpoint interval", self.checkpoint_interval as u64),
            ("progress interval", self.progress_interval as u64),
            ("memory trim interval", self.memory_trim_interval as u64),
            ("vacuum interval", self.vacuum_interval.unwrap_or(1)),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(IngestError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.shard_threshold_bytes == 0 {
            return Err(IngestError::Config(
                "shard threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything a run mutates: the active shard, the checkpoint cadence, the
/// progress log, and the counters.
pub struct Session {
    shards: ShardManager,
    checkpoints: CheckpointManager,
    resumed_from: Option<PageId>,
    progress: ProgressLog,
    stats: IngestStats,
    committed_since_vacuum: u64,
}

impl Session {
    /// Opens the shard lineage and checks it against its checkpoint.
    pub fn open(opts: &IngestOptions) -> IngestResult<Self> {
        opts.validate()?;
        let shards = ShardManager::open(&opts.output_dir, opts.shard_threshold_bytes)?;
        let resumed_from = shards.checkpoint()?;
        checkpoint::validate_resume(resumed_from, shards.last_article_id()?)?;

        let progress = ProgressLog::open(
            &opts.output_dir.join(PROGRESS_LOG_FILE),
            opts.total_pages,
        )?;

        Ok(Self {
            checkpoints: CheckpointManager::new(opts.checkpoint_interval, resumed_from)?,
            shards,
            resumed_from,
            progress,
            stats: IngestStats::new(),
            committed_since_vacuum: 0,
        })
    }

    pub fn resumed_from(&self) -> Option<PageId> {
        self.resumed_from
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    fn run(&mut self, mut reader: DumpReader, opts: &IngestOptions) -> IngestResult<()> {
        let pb = if opts.show_progress {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(200));
            pb
        } else {
            ProgressBar::hidden()
        };

        store::begin_batch(self.shards.connection())?;
        let mut first_page = true;

        while let Some(item) = reader.next() {
            if opts.limit.is_some_and(|limit| self.stats.consumed() >= limit) {
                info!(limit = ?opts.limit, "Page limit reached");
                break;
            }

            let (page_id, outcome) = match item {
                Ok(page) => {
                    self.check_resume_point(&mut first_page, page.id, &reader)?;
                    (page.id, self.process_page(page)?)
                }
                Err(IngestError::PageEncoding {
                    page_id,
                    title,
                    reason,
                }) => {
                    self.check_resume_point(&mut first_page, page_id, &reader)?;
                    warn!(page_id, title = %title, reason = %reason, "Skipping page");
                    let outcome = PageOutcome::Skipped(SkipReason::Encoding(reason));
                    self.stats.record(&outcome, None);
                    (page_id, outcome)
                }
                Err(e) => return Err(e),
            };

            self.after_page(page_id, &outcome, reader.skipped_ahead(), opts)?;
            if self.stats.consumed() % opts.progress_interval as u64 == 0 {
                pb.set_message(format!(
                    "{} committed, {} skipped, shard {}",
                    self.stats.pages_committed,
                    self.stats.skipped(),
                    self.shards.active_ordinal()
                ));
            }
        }

        if first_page {
            self.stats.resumed_over = reader.skipped_ahead();
        }
        self.commit_batch()?;
        self.stats.rollovers += self.shards.rollover_if_needed()?;
        pb.finish_and_clear();
        Ok(())
    }

    /// The first page after skip-ahead must lie past the checkpoint.
    fn check_resume_point(
        &mut self,
        first_page: &mut bool,
        page_id: PageId,
        reader: &DumpReader,
    ) -> IngestResult<()> {
        if *first_page {
            checkpoint::validate_next_page(self.resumed_from, page_id)?;
            self.stats.resumed_over = reader.skipped_ahead();
            *first_page = false;
        }
        Ok(())
    }

    fn process_page(&mut self, page: Page) -> IngestResult<PageOutcome> {
        // Ids are non-decreasing, so a repeat always equals the previous id.
        // The store's own check only sees the active shard.
        if self.checkpoints.last_consumed() == Some(page.id) {
            warn!(page_id = page.id, title = %page.title, "Skipping page with repeated id");
            let outcome = PageOutcome::Skipped(SkipReason::DuplicateId);
            self.stats.record(&outcome, None);
            return Ok(outcome);
        }

        if page.text.is_empty() {
            debug!(page_id = page.id, title = %page.title, "Skipping page with no text");
            let outcome = PageOutcome::Skipped(SkipReason::EmptyText);
            self.stats.record(&outcome, None);
            return Ok(outcome);
        }

        let extracted = extract(&page);
        let outcome = store::commit_page(self.shards.connection(), &extracted)?;
        self.stats.record(&outcome, Some(&extracted));

        match &outcome {
            PageOutcome::Committed(_) => {
                self.committed_since_vacuum += 1;
                if self.stats.pages_committed % SAMPLE_LOG_INTERVAL == 0 {
                    let preview: String = page.text.chars().take(PREVIEW_CHARS).collect();
                    debug!(page_id = page.id, title = %page.title, preview = %preview, "Sample page");
                }
            }
            PageOutcome::Skipped(reason) => {
                warn!(
                    page_id = page.id,
                    title = %page.title,
                    reason = reason.label(),
                    "Skipping page"
                );
            }
        }
        Ok(outcome)
    }

    /// Checkpoint, rollover, progress, and memory cadences after one page.
    fn after_page(
        &mut self,
        page_id: PageId,
        outcome: &PageOutcome,
        skipped_ahead: u64,
        opts: &IngestOptions,
    ) -> IngestResult<()> {
        let checkpoint_due = self.checkpoints.record(page_id);
        self.stats.last_page_id = Some(page_id);

        let committed = matches!(outcome, PageOutcome::Committed(_));
        if committed && self.shards.over_threshold()? {
            self.commit_batch()?;
            self.stats.rollovers += self.shards.rollover_if_needed()?;
            store::begin_batch(self.shards.connection())?;
        } else if checkpoint_due {
            self.commit_batch()?;
            if opts
                .vacuum_interval
                .is_some_and(|every| self.committed_since_vacuum >= every)
            {
                self.shards.compact()?;
                self.committed_since_vacuum = 0;
            }
            store::begin_batch(self.shards.connection())?;
        }

        let consumed = self.stats.consumed();
        if consumed % opts.progress_interval as u64 == 0 {
            let record = self
                .progress
                .record(self.stats.pages_committed, skipped_ahead + consumed)?;
            info!(
                count = record.count,
                pages_per_second = record.pages_per_second,
                percent_complete = ?record.percent_complete,
                memory_rss_bytes = ?record.memory_rss_bytes,
                "Progress"
            );
        }
        if consumed % opts.memory_trim_interval as u64 == 0 {
            progress::memory_hint();
        }
        Ok(())
    }

    fn commit_batch(&mut self) -> IngestResult<()> {
        store::commit_batch(self.shards.connection(), self.checkpoints.last_consumed())?;
        self.checkpoints.mark_saved();
        Ok(())
    }

    fn close(self) -> IngestResult<IngestStats> {
        self.shards.close()?;
        Ok(self.stats)
    }
}

/// Runs one ingestion pass over `opts.input`, resuming from the lineage
/// checkpoint in `opts.output_dir` if there is one.
pub fn run_ingest(opts: &IngestOptions) -> IngestResult<IngestStats> {
    let mut session = Session::open(opts)?;
    let reader = DumpReader::open(&opts.input)?.skip_through(session.resumed_from());

    info!(
        input = ?opts.input,
        output = ?opts.output_dir,
        resume_after = ?session.resumed_from(),
        shard = ?session.shards.active_path(),
        "Starting ingestion"
    );

    if let Err(e) = session.run(reader, opts) {
        // The open batch is discarded; the checkpoint still names the last
        // committed batch.
        if let Err(rollback) = store::rollback_batch(session.shards.connection()) {
            warn!(error = %rollback, "Failed to roll back open batch");
        }
        return Err(e);
    }

    let stats = session.close()?;
    info!(
        committed = stats.pages_committed,
        skipped = stats.skipped(),
        resumed_over = stats.resumed_over,
        rollovers = stats.rollovers,
        "Ingestion complete"
    );
    Ok(stats)
}

/// The lineage checkpoint and the first page a resumed run would process.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPage {
    pub checkpoint: Option<PageId>,
    pub next: Option<Page>,
}

/// Looks up where a resumed run would start, without opening any shard for
/// writing.
pub fn next_pending_page(input: &Path, output_dir: &Path) -> IngestResult<PendingPage> {
    let checkpoint = shard::list_shards(output_dir)?
        .last()
        .and_then(|s| s.checkpoint);

    let mut next = None;
    for item in DumpReader::open(input)?.skip_through(checkpoint) {
        match item {
            Ok(page) => {
                next = Some(page);
                break;
            }
            Err(e) if e.is_page_local() => {
                warn!(error = %e, "Unreadable page after checkpoint");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(PendingPage { checkpoint, next })
}
