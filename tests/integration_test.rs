//! Integration tests for the Ariadne ingestion pipeline.
//!
//! These tests drive [`pipeline::run_ingest`] end to end, from a BZ2-compressed
//! XML dump to shard files on disk, and then inspect the shards with plain SQL:
//!
//! - **Extraction** -- article rows, sections, categories, side channel, redirects
//! - **Resumability** -- checkpoints, skip-ahead, idempotent reruns
//! - **Rollover** -- contiguous ordinals, sealing, checkpoint carry-over
//! - **Validation** -- inconsistent stores refuse to resume
//!
//! ## Key Patterns
//!
//! - **Fixture creation**: `create_bz2_xml(xml)` writes a temp `.xml.bz2` file
//! - **Isolation**: each test gets its own `TempDir` as the output directory
//! - **Inspection**: shards are opened read-only through `rusqlite` after the run

use ariadne::checkpoint;
use ariadne::error::IngestError;
use ariadne::pipeline::{self, IngestOptions};
use ariadne::shard;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use rusqlite::{params, Connection, OpenFlags};
use std::io::Write;
use std::path::Path;
use tempfile::{NamedTempFile, TempDir};

/// Helper: create a BZ2-compressed XML file from a string. The `.xml.bz2`
/// suffix is what routes the reader through the decompressor.
fn create_bz2_xml(xml: &str) -> NamedTempFile {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(xml.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut tmp = tempfile::Builder::new()
        .suffix(".xml.bz2")
        .tempfile()
        .unwrap();
    tmp.write_all(&compressed).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn page_xml(id: u32, title: &str, text: &str) -> String {
    format!(
        "  <page>\n    <title>{}</title>\n    <ns>0</ns>\n    <id>{}</id>\n    <revision>\n      \
         <id>{}</id>\n      <contributor><username>Editor</username><id>7</id></contributor>\n      \
         <text xml:space=\"preserve\">{}</text>\n    </revision>\n  </page>\n",
        title,
        id,
        id + 100_000,
        text
    )
}

fn dump(pages: &[String]) -> String {
    let mut xml = String::from(
        "<mediawiki xmlns=\"http://www.mediawiki.org/xml/export-0.10/\">\n  <siteinfo>\n    \
         <sitename>Wikipedia</sitename>\n  </siteinfo>\n",
    );
    for page in pages {
        xml.push_str(page);
    }
    xml.push_str("</mediawiki>\n");
    xml
}

/// Pages `1..=n`, each a short article with one category.
fn numbered_dump(n: u32) -> String {
    let pages: Vec<String> = (1..=n)
        .map(|id| {
            page_xml(
                id,
                &format!("Page {}", id),
                &format!("Body of page {}.\n[[Category:Numbered]]", id),
            )
        })
        .collect();
    dump(&pages)
}

/// A small dump with an article, a redirect, and an empty page.
fn sample_xml() -> String {
    let rust = "{{Infobox programming language\n| name = Rust\n| paradigm = Multi-paradigm\n}}\n\
                '''Rust''' is a [[programming language]].&lt;ref&gt;Citation&lt;/ref&gt;\n\
                == History ==\nStarted at [[Mozilla]].\n\
                {| class=&quot;wikitable&quot;\n! Version !! Year\n|-\n| 1.0 || 2015\n|}\n\
                == See also ==\n* [[Python (programming language)]]\n\
                [[File:Rust logo.svg|thumb|The [[logo]]]]\n\
                [[Category:Programming languages]]\n[[Category:Mozilla]]";
    dump(&[
        page_xml(10, "Rust (programming language)", rust),
        page_xml(12, "Rust", "#REDIRECT [[Rust (programming language)]]"),
        page_xml(15, "Empty", ""),
        page_xml(
            20,
            "Python (programming language)",
            "Python is a language.\n[[Category:Programming languages]]",
        ),
    ])
}

fn options(input: &NamedTempFile, output: &TempDir) -> IngestOptions {
    IngestOptions::new(input.path(), output.path())
}

fn open_shard(dir: &Path, ordinal: u32) -> Connection {
    Connection::open_with_flags(
        shard::shard_path(dir, ordinal),
        OpenFlags::SQLITE_OPEN_READ_ONLY,
    )
    .unwrap()
}

fn count(conn: &Connection, sql: &str) -> u64 {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0)).unwrap() as u64
}

fn total_articles(dir: &Path) -> u64 {
    shard::list_shards(dir)
        .unwrap()
        .iter()
        .map(|s| s.article_count)
        .sum()
}

fn lineage_checkpoint(dir: &Path) -> Option<u32> {
    shard::list_shards(dir).unwrap().last().and_then(|s| s.checkpoint)
}

// ============================================================================
// Extraction
// ============================================================================

#[test]
fn test_ingest_writes_articles() {
    let input = create_bz2_xml(&sample_xml());
    let output = TempDir::new().unwrap();

    let stats = pipeline::run_ingest(&options(&input, &output)).unwrap();
    assert_eq!(stats.pages_committed, 3);
    assert_eq!(stats.skipped_empty, 1);
    assert_eq!(stats.redirects, 1);
    assert_eq!(stats.last_page_id, Some(20));

    let conn = open_shard(output.path(), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM articles"), 3);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM articles WHERE article_id = 15"),
        0
    );

    let (title, kind, is_redirect): (String, String, bool) = conn
        .query_row(
            "SELECT title, type, is_redirect FROM articles WHERE article_id = 10",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(title, "Rust (programming language)");
    assert_eq!(kind, "categories");
    assert!(!is_redirect);
}

#[test]
fn test_sections_and_side_channel() {
    let input = create_bz2_xml(&sample_xml());
    let output = TempDir::new().unwrap();
    pipeline::run_ingest(&options(&input, &output)).unwrap();

    let conn = open_shard(output.path(), 0);
    let mut stmt = conn
        .prepare(
            "SELECT section_order, section_title, section_content, structured_side_channel
             FROM article_sections WHERE article_id = 10 ORDER BY section_order",
        )
        .unwrap();
    let sections: Vec<(u32, String, String, String)> = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .unwrap()
        .map(|r| r.unwrap())
        .collect();

    let titles: Vec<&str> = sections.iter().map(|s| s.1.as_str()).collect();
    assert_eq!(titles, vec!["Introduction", "History", "See also"]);
    let orders: Vec<u32> = sections.iter().map(|s| s.0).collect();
    assert_eq!(orders, vec![0, 1, 2]);

    let intro = &sections[0];
    assert!(intro.2.contains("'''Rust''' is a"));
    assert!(!intro.2.contains("Infobox"));
    assert!(!intro.2.contains("Citation"));
    let intro_side: serde_json::Value = serde_json::from_str(&intro.3).unwrap();
    assert_eq!(intro_side["infoboxes"][0]["fields"]["name"], "Rust");

    let history = &sections[1];
    assert!(history.2.contains("Mozilla"));
    assert!(!history.2.contains("wikitable"));
    let history_side: serde_json::Value = serde_json::from_str(&history.3).unwrap();
    assert_eq!(history_side["wikitables"][0]["headers"][0], "Version");
    assert_eq!(history_side["wikitables"][0]["rows"][0]["Year"], "2015");

    let see_also = &sections[2];
    assert!(see_also.2.contains("Python (programming language)"));
    assert!(!see_also.2.contains("Rust logo"));
}

#[test]
fn test_categories_shared_across_articles() {
    let input = create_bz2_xml(&sample_xml());
    let output = TempDir::new().unwrap();
    let stats = pipeline::run_ingest(&options(&input, &output)).unwrap();
    assert_eq!(stats.category_links, 3);

    let conn = open_shard(output.path(), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM categories"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM article_categories"), 3);

    let linked: u64 = conn
        .query_row(
            "SELECT COUNT(*) FROM article_categories ac
             JOIN categories c ON c.category_id = ac.category_id
             WHERE c.name = ?1",
            params!["Category:Programming languages"],
            |row| row.get::<_, i64>(0),
        )
        .unwrap() as u64;
    assert_eq!(linked, 2);
}

#[test]
fn test_redirect_stores_target() {
    let input = create_bz2_xml(&sample_xml());
    let output = TempDir::new().unwrap();
    pipeline::run_ingest(&options(&input, &output)).unwrap();

    let conn = open_shard(output.path(), 0);
    let (kind, is_redirect, target): (String, bool, Option<String>) = conn
        .query_row(
            "SELECT type, is_redirect, redirect_target FROM articles WHERE article_id = 12",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(kind, "redirect");
    assert!(is_redirect);
    assert_eq!(target.as_deref(), Some("Rust (programming language)"));

    let (title, content): (String, String) = conn
        .query_row(
            "SELECT section_title, section_content FROM article_sections WHERE article_id = 12",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(title, "redirect");
    assert_eq!(content, "Rust (programming language)");
}

#[test]
fn test_progress_log_written() {
    let input = create_bz2_xml(&numbered_dump(250));
    let output = TempDir::new().unwrap();
    pipeline::run_ingest(&options(&input, &output)).unwrap();

    let log = std::fs::read_to_string(output.path().join("progress.csv")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert!(lines[0].starts_with("count,pages_per_second,percent_complete"));
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("100,"));
    assert!(lines[2].starts_with("200,"));
}

// ============================================================================
// Resumability
// ============================================================================

#[test]
fn test_resume_from_checkpoint() {
    let input = create_bz2_xml(&numbered_dump(1000));
    let output = TempDir::new().unwrap();

    let mut first = options(&input, &output);
    first.limit = Some(500);
    let stats = pipeline::run_ingest(&first).unwrap();
    assert_eq!(stats.pages_committed, 500);
    assert_eq!(lineage_checkpoint(output.path()), Some(500));
    assert_eq!(total_articles(output.path()), 500);

    let stats = pipeline::run_ingest(&options(&input, &output)).unwrap();
    assert_eq!(stats.pages_committed, 500);
    assert_eq!(stats.resumed_over, 500);
    assert_eq!(stats.skipped_duplicate, 0);
    assert_eq!(lineage_checkpoint(output.path()), Some(1000));
    assert_eq!(total_articles(output.path()), 1000);

    let conn = open_shard(output.path(), 0);
    assert_eq!(checkpoint::load(&conn).unwrap(), Some(1000));
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM articles WHERE article_id BETWEEN 501 AND 1000"
        ),
        500
    );
}

#[test]
fn test_rerun_is_idempotent() {
    let input = create_bz2_xml(&numbered_dump(120));
    let output = TempDir::new().unwrap();

    pipeline::run_ingest(&options(&input, &output)).unwrap();
    let before = total_articles(output.path());

    let stats = pipeline::run_ingest(&options(&input, &output)).unwrap();
    assert_eq!(stats.pages_committed, 0);
    assert_eq!(stats.skipped(), 0);
    assert_eq!(stats.resumed_over, 120);
    assert_eq!(total_articles(output.path()), before);
    assert_eq!(before, 120);
}

#[test]
fn test_checkpoint_advances_past_skipped_pages() {
    let pages = vec![
        page_xml(1, "One", "First."),
        page_xml(2, "Two", ""),
        page_xml(3, "Three", ""),
    ];
    let input = create_bz2_xml(&dump(&pages));
    let output = TempDir::new().unwrap();

    let stats = pipeline::run_ingest(&options(&input, &output)).unwrap();
    assert_eq!(stats.pages_committed, 1);
    assert_eq!(stats.skipped_empty, 2);
    assert_eq!(lineage_checkpoint(output.path()), Some(3));
}

#[test]
fn test_unreadable_page_skipped_and_run_continues() {
    let pages = vec![
        page_xml(1, "One", "First."),
        page_xml(2, "Two", "Bad &bogus; entity"),
        page_xml(3, "Three", "Third."),
    ];
    let input = create_bz2_xml(&dump(&pages));
    let output = TempDir::new().unwrap();

    let stats = pipeline::run_ingest(&options(&input, &output)).unwrap();
    assert_eq!(stats.skipped_encoding, 1);
    assert_eq!(stats.pages_committed, 2);
    assert_eq!(stats.last_page_id, Some(3));
    assert_eq!(lineage_checkpoint(output.path()), Some(3));

    let conn = open_shard(output.path(), 0);
    let ids: Vec<u32> = conn
        .prepare("SELECT article_id FROM articles ORDER BY article_id")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM article_sections WHERE article_id = 2"),
        0
    );
}

#[test]
fn test_truncated_dump_fails_and_keeps_checkpoint() {
    let mut xml = dump(&[page_xml(1, "One", "First.")]);
    xml.truncate(xml.rfind("</mediawiki>").unwrap());
    xml.push_str("  <page>\n    <title>Cut</title>\n    <id>2</id>\n    <revision><text>partial");
    let input = create_bz2_xml(&xml);
    let output = TempDir::new().unwrap();

    let result = pipeline::run_ingest(&options(&input, &output));
    assert!(matches!(result, Err(IngestError::SourceFormat(_))));
    assert_eq!(lineage_checkpoint(output.path()), None);
    assert_eq!(total_articles(output.path()), 0);
}

#[test]
fn test_limit_stops_early() {
    let input = create_bz2_xml(&numbered_dump(50));
    let output = TempDir::new().unwrap();

    let mut opts = options(&input, &output);
    opts.limit = Some(7);
    let stats = pipeline::run_ingest(&opts).unwrap();
    assert_eq!(stats.pages_committed, 7);
    assert_eq!(stats.last_page_id, Some(7));
    assert_eq!(lineage_checkpoint(output.path()), Some(7));
}

#[test]
fn test_next_pending_page() {
    let input = create_bz2_xml(&numbered_dump(30));
    let output = TempDir::new().unwrap();

    let pending = pipeline::next_pending_page(input.path(), output.path()).unwrap();
    assert_eq!(pending.checkpoint, None);
    assert_eq!(pending.next.unwrap().id, 1);

    let mut opts = options(&input, &output);
    opts.limit = Some(12);
    pipeline::run_ingest(&opts).unwrap();

    let pending = pipeline::next_pending_page(input.path(), output.path()).unwrap();
    assert_eq!(pending.checkpoint, Some(12));
    let next = pending.next.unwrap();
    assert_eq!(next.id, 13);
    assert_eq!(next.title, "Page 13");

    pipeline::run_ingest(&options(&input, &output)).unwrap();
    let pending = pipeline::next_pending_page(input.path(), output.path()).unwrap();
    assert_eq!(pending.checkpoint, Some(30));
    assert!(pending.next.is_none());
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_article_past_checkpoint_refuses_resume() {
    let input = create_bz2_xml(&numbered_dump(20));
    let output = TempDir::new().unwrap();

    let mut opts = options(&input, &output);
    opts.limit = Some(10);
    pipeline::run_ingest(&opts).unwrap();

    {
        let conn = Connection::open(shard::shard_path(output.path(), 0)).unwrap();
        conn.execute(
            "INSERT INTO articles (article_id, title, is_redirect, type) VALUES (?1, ?2, 0, 'text')",
            params![15, "Stray"],
        )
        .unwrap();
    }

    let result = pipeline::run_ingest(&options(&input, &output));
    assert!(matches!(result, Err(IngestError::ResumeInconsistency(_))));
    assert_eq!(lineage_checkpoint(output.path()), Some(10));
}

#[test]
fn test_articles_without_checkpoint_refuse_resume() {
    let input = create_bz2_xml(&numbered_dump(5));
    let output = TempDir::new().unwrap();

    let mut opts = options(&input, &output);
    opts.limit = Some(3);
    pipeline::run_ingest(&opts).unwrap();

    {
        let conn = Connection::open(shard::shard_path(output.path(), 0)).unwrap();
        conn.execute("DELETE FROM checkpoints", []).unwrap();
    }

    let result = pipeline::run_ingest(&options(&input, &output));
    assert!(matches!(result, Err(IngestError::ResumeInconsistency(_))));
}

#[test]
fn test_zero_checkpoint_interval_rejected() {
    let input = create_bz2_xml(&numbered_dump(1));
    let output = TempDir::new().unwrap();

    let mut opts = options(&input, &output);
    opts.checkpoint_interval = 0;
    let result = pipeline::run_ingest(&opts);
    assert!(matches!(result, Err(IngestError::Config(_))));
}

// ============================================================================
// Rollover
// ============================================================================

#[test]
fn test_rollover_with_tiny_threshold() {
    let input = create_bz2_xml(&numbered_dump(5));
    let output = TempDir::new().unwrap();

    let mut opts = options(&input, &output);
    opts.shard_threshold_bytes = 1;
    let stats = pipeline::run_ingest(&opts).unwrap();
    assert_eq!(stats.pages_committed, 5);
    assert!(stats.rollovers >= 5);

    let shards = shard::list_shards(output.path()).unwrap();
    let ordinals: Vec<u32> = shards.iter().map(|s| s.ordinal).collect();
    let expected: Vec<u32> = (0..shards.len() as u32).collect();
    assert_eq!(ordinals, expected);

    let (active, sealed) = shards.split_last().unwrap();
    assert!(!active.sealed);
    for info in sealed {
        assert!(info.sealed);
        assert!(info.article_count >= 1);
    }
    assert_eq!(total_articles(output.path()), 5);
    assert_eq!(active.checkpoint, Some(5));
}

#[test]
fn test_resume_after_rollover() {
    let input = create_bz2_xml(&numbered_dump(8));
    let output = TempDir::new().unwrap();

    let mut opts = options(&input, &output);
    opts.shard_threshold_bytes = 1;
    opts.limit = Some(4);
    pipeline::run_ingest(&opts).unwrap();
    assert_eq!(lineage_checkpoint(output.path()), Some(4));

    opts.limit = None;
    let stats = pipeline::run_ingest(&opts).unwrap();
    assert_eq!(stats.pages_committed, 4);
    assert_eq!(stats.resumed_over, 4);
    assert_eq!(total_articles(output.path()), 8);
    assert_eq!(lineage_checkpoint(output.path()), Some(8));

    let ordinals: Vec<u32> = shard::list_shards(output.path())
        .unwrap()
        .iter()
        .map(|s| s.ordinal)
        .collect();
    let expected: Vec<u32> = (0..ordinals.len() as u32).collect();
    assert_eq!(ordinals, expected);
}

#[test]
fn test_repeated_id_across_rollover_committed_once() {
    let pages = vec![
        page_xml(1, "First copy", "Original."),
        page_xml(1, "Second copy", "Repeat."),
        page_xml(2, "Two", "Second."),
    ];
    let input = create_bz2_xml(&dump(&pages));
    let output = TempDir::new().unwrap();

    let mut opts = options(&input, &output);
    opts.shard_threshold_bytes = 1;
    let stats = pipeline::run_ingest(&opts).unwrap();
    assert_eq!(stats.pages_committed, 2);
    assert_eq!(stats.skipped_duplicate, 1);

    let shards = shard::list_shards(output.path()).unwrap();
    let copies: u64 = shards
        .iter()
        .map(|info| {
            count(
                &open_shard(output.path(), info.ordinal),
                "SELECT COUNT(*) FROM articles WHERE article_id = 1",
            )
        })
        .sum();
    assert_eq!(copies, 1);
    assert_eq!(total_articles(output.path()), 2);

    let title: String = open_shard(output.path(), 0)
        .query_row("SELECT title FROM articles WHERE article_id = 1", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(title, "First copy");
}

#[test]
fn test_repeated_id_in_one_shard_committed_once() {
    let pages = vec![page_xml(4, "A", "a."), page_xml(4, "B", "b.")];
    let input = create_bz2_xml(&dump(&pages));
    let output = TempDir::new().unwrap();

    let stats = pipeline::run_ingest(&options(&input, &output)).unwrap();
    assert_eq!(stats.pages_committed, 1);
    assert_eq!(stats.skipped_duplicate, 1);
    assert_eq!(lineage_checkpoint(output.path()), Some(4));
}

#[test]
fn test_large_threshold_keeps_one_shard() {
    let input = create_bz2_xml(&numbered_dump(40));
    let output = TempDir::new().unwrap();

    let stats = pipeline::run_ingest(&options(&input, &output)).unwrap();
    assert_eq!(stats.rollovers, 0);

    let shards = shard::list_shards(output.path()).unwrap();
    assert_eq!(shards.len(), 1);
    assert_eq!(shards[0].ordinal, 0);
    assert!(!shards[0].sealed);
    assert_eq!(shards[0].article_count, 40);
}

#[test]
fn test_vacuum_interval_compacts_during_run() {
    let input = create_bz2_xml(&numbered_dump(300));
    let output = TempDir::new().unwrap();

    let mut opts = options(&input, &output);
    opts.vacuum_interval = Some(100);
    let stats = pipeline::run_ingest(&opts).unwrap();
    assert_eq!(stats.pages_committed, 300);
    assert_eq!(total_articles(output.path()), 300);

    let compacted = shard::compact_active(output.path()).unwrap();
    assert_eq!(compacted.map(|(ordinal, _, _)| ordinal), Some(0));
}
