//! Ariadne: resumable Wikipedia dump ingestion into sharded SQLite stores
//!
//! This crate streams a MediaWiki XML dump one page at a time, extracts
//! structured records from each page's wikitext, and writes them into a
//! sequence of size-bounded SQLite files:
//!
//! 1. **Read** -- Stream pages (id, title, latest revision text) from a plain
//!    or bzip2-compressed dump, discarding everything up to the checkpoint
//! 2. **Extract** -- Classify the page (text, categories, redirect), split it
//!    into sections at headings, strip markup noise, and pull wikitables and
//!    infoboxes into a JSON side channel
//! 3. **Write** -- Insert the article, its sections, and its category links
//!    as one unit inside a checkpoint batch
//! 4. **Roll over** -- Seal and compact the active shard once it passes the
//!    size threshold, then continue in the next ordinal
//!
//! # Resumability
//!
//! The checkpoint row is written in the same transaction that commits each
//! batch of pages, and is carried into every new shard. On restart the
//! store is checked against the checkpoint before any page is read; a
//! mismatch stops the run instead of risking duplicate or missing articles.
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming XML reader with BZ2 decompression and skip-ahead
//! - [`markup`] -- Wikitext tokenizer producing [`markup::Node`]s
//! - [`extract`] -- Redirect and category detection, section segmentation
//! - [`content`] -- Noise stripping applied to each section
//! - [`table`] / [`infobox`] -- Side-channel extraction
//! - [`store`] -- Schema and the per-page writer
//! - [`checkpoint`] -- Checkpoint row and resume validation
//! - [`shard`] -- Shard discovery, size tracking, rollover, sealing
//! - [`pipeline`] -- The driver and its [`pipeline::Session`]
//! - [`progress`] -- `progress.csv`, memory telemetry, allocator hint
//! - [`cache`] -- Cached page totals for percent-complete reporting
//!
//! # Example Usage
//!
//! ```bash
//! # Count pages once so progress can report a percentage
//! ariadne count -i enwiki-latest-pages-articles.xml.bz2 -o shards/
//!
//! # Ingest with 2 GB shards; rerun the same command to resume
//! ariadne ingest -i enwiki-latest-pages-articles.xml.bz2 -o shards/ --shard-threshold-mb 2048
//!
//! # Inspect shards and the resume point
//! ariadne status -o shards/
//! ariadne validate -i enwiki-latest-pages-articles.xml.bz2 -o shards/
//! ```

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod content;
pub mod error;
pub mod extract;
pub mod infobox;
pub mod markup;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod shard;
pub mod stats;
pub mod store;
pub mod table;
