/// Pages per checkpoint batch (one transaction, one checkpoint write)
pub const CHECKPOINT_INTERVAL: u32 = 100;

/// Progress log cadence in pages
pub const PROGRESS_INTERVAL: u32 = 100;

/// Allocator collection hint cadence in pages
pub const MEMORY_TRIM_INTERVAL: u32 = 1000;

/// Default shard size threshold in megabytes
pub const DEFAULT_SHARD_THRESHOLD_MB: u64 = 4096;

/// Spinner tick interval while counting pages
pub const COUNT_TICK_INTERVAL: u64 = 25_000;

pub const SHARD_PREFIX: &str = "articles_";
pub const SHARD_EXTENSION: &str = "db";

pub const PROGRESS_LOG_FILE: &str = "progress.csv";
pub const PAGE_COUNT_CACHE_FILE: &str = "page_count.cache";
pub const PAGE_COUNT_CACHE_VERSION: u32 = 1;

/// Marker that opens a redirect page, compared case-insensitively
pub const REDIRECT_MARKER: &str = "#redirect";

pub const CATEGORY_PREFIX: &str = "Category:";

pub const INTRODUCTION_TITLE: &str = "Introduction";
pub const REDIRECT_SECTION_TITLE: &str = "redirect";

/// Cadence, in committed pages, of the debug sample of a page's title and text
pub const SAMPLE_LOG_INTERVAL: u64 = 1000;

/// Characters of page text included in debug samples and `validate` output
pub const PREVIEW_CHARS: usize = 500;
