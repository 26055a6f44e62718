//! Size-bounded shard files.
//!
//! Exactly one shard is active. Once it grows past the threshold it is
//! sealed (marked, compacted, switched out of WAL) and never written again;
//! the next ordinal is created under a temporary name with the lineage
//! checkpoint carried over, then renamed into place.

use crate::checkpoint;
use crate::config::{SHARD_EXTENSION, SHARD_PREFIX};
use crate::error::{IngestError, IngestResult};
use crate::models::{ArticleId, PageId};
use crate::store;
use rusqlite::{params, Connection, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TMP_SUFFIX: &str = "tmp";

pub struct Shard {
    pub ordinal: u32,
    pub path: PathBuf,
    conn: Connection,
}

impl Shard {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardInfo {
    pub ordinal: u32,
    pub path: PathBuf,
    pub file_bytes: u64,
    pub sealed: bool,
    pub article_count: u64,
    pub checkpoint: Option<PageId>,
}

pub struct ShardManager {
    dir: PathBuf,
    threshold_bytes: u64,
    active: Shard,
    rollovers: u32,
}

pub fn shard_path(dir: &Path, ordinal: u32) -> PathBuf {
    dir.join(format!("{}{:03}.{}", SHARD_PREFIX, ordinal, SHARD_EXTENSION))
}

fn tmp_path(dir: &Path, ordinal: u32) -> PathBuf {
    dir.join(format!(
        "{}{:03}.{}.{}",
        SHARD_PREFIX, ordinal, SHARD_EXTENSION, TMP_SUFFIX
    ))
}

fn parse_ordinal(file_name: &str) -> Option<u32> {
    let digits = file_name
        .strip_prefix(SHARD_PREFIX)?
        .strip_suffix(SHARD_EXTENSION)?
        .strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Ordinals of the complete shard files in `dir`, ascending.
pub fn shard_ordinals(dir: &Path) -> IngestResult<Vec<u32>> {
    let mut ordinals = Vec::new();
    if !dir.exists() {
        return Ok(ordinals);
    }
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        if let Some(ordinal) = name.to_str().and_then(parse_ordinal) {
            ordinals.push(ordinal);
        }
    }
    ordinals.sort_unstable();
    Ok(ordinals)
}

/// Removes half-created shards left behind by a crash during rollover.
fn remove_stale_tmp(dir: &Path) -> IngestResult<()> {
    let marker = format!(".{}.{}", SHARD_EXTENSION, TMP_SUFFIX);
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(SHARD_PREFIX) && name.contains(&marker) {
            warn!(file = name, "Removing stale temporary shard");
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn open_read_only(path: &Path) -> IngestResult<Connection> {
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

fn is_sealed(conn: &Connection) -> IngestResult<bool> {
    let sealed: i64 = conn.query_row("SELECT sealed FROM shard_meta WHERE id = 1", [], |row| {
        row.get(0)
    })?;
    Ok(sealed != 0)
}

/// Creates shard `ordinal` under a temporary name and renames it into place,
/// so a complete shard file always has its schema, meta row, and checkpoint.
fn create_shard(dir: &Path, ordinal: u32, checkpoint: Option<PageId>) -> IngestResult<Shard> {
    let tmp = tmp_path(dir, ordinal);
    let path = shard_path(dir, ordinal);
    {
        let conn = Connection::open(&tmp)?;
        store::init_schema(&conn)?;
        conn.execute(
            "INSERT INTO shard_meta (id, ordinal, sealed) VALUES (1, ?1, 0)",
            params![ordinal],
        )?;
        if let Some(id) = checkpoint {
            checkpoint::save(&conn, id)?;
        }
        conn.close().map_err(|(_, e)| e)?;
    }
    fs::rename(&tmp, &path)?;
    info!(ordinal, path = ?path, "Created shard");

    Ok(Shard {
        ordinal,
        conn: store::open_connection(&path)?,
        path,
    })
}

fn open_shard(path: &Path, ordinal: u32) -> IngestResult<Shard> {
    let conn = store::open_connection(path)?;
    store::init_schema(&conn)?;
    Ok(Shard {
        ordinal,
        path: path.to_path_buf(),
        conn,
    })
}

/// Checkpoints the WAL into the main file and rebuilds it compactly.
fn compact_connection(conn: &Connection) -> IngestResult<()> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    conn.execute_batch("VACUUM")?;
    Ok(())
}

impl ShardManager {
    /// Opens the highest existing shard in `dir` for writing, creating the
    /// directory and shard 0 on first use. A sealed highest shard means the
    /// last run stopped mid-rollover, so the next ordinal is created.
    pub fn open(dir: impl AsRef<Path>, threshold_bytes: u64) -> IngestResult<Self> {
        if threshold_bytes == 0 {
            return Err(IngestError::Config(
                "shard threshold must be greater than zero".to_string(),
            ));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        remove_stale_tmp(&dir)?;

        let active = match shard_ordinals(&dir)?.last().copied() {
            None => create_shard(&dir, 0, None)?,
            Some(ordinal) => {
                let path = shard_path(&dir, ordinal);
                let (sealed, carried) = {
                    let conn = open_read_only(&path)?;
                    (is_sealed(&conn)?, checkpoint::load(&conn)?)
                };
                if sealed {
                    info!(ordinal, "Highest shard is sealed, starting the next one");
                    create_shard(&dir, ordinal + 1, carried)?
                } else {
                    open_shard(&path, ordinal)?
                }
            }
        };

        info!(
            ordinal = active.ordinal,
            threshold_bytes, "Active shard ready"
        );

        Ok(Self {
            dir,
            threshold_bytes,
            active,
            rollovers: 0,
        })
    }

    pub fn connection(&self) -> &Connection {
        self.active.connection()
    }

    pub fn active_ordinal(&self) -> u32 {
        self.active.ordinal
    }

    pub fn active_path(&self) -> &Path {
        &self.active.path
    }

    pub fn rollovers(&self) -> u32 {
        self.rollovers
    }

    pub fn size_bytes(&self) -> IngestResult<u64> {
        store::database_size(self.connection())
    }

    pub fn over_threshold(&self) -> IngestResult<bool> {
        Ok(self.size_bytes()? > self.threshold_bytes)
    }

    pub fn checkpoint(&self) -> IngestResult<Option<PageId>> {
        checkpoint::load(self.connection())
    }

    /// Seals the active shard and opens the next ordinal while the active
    /// shard is over threshold. An empty shard is never sealed, so a
    /// threshold below one page's footprint still advances one ordinal at a
    /// time. Must be called outside a batch. Returns the number of rollovers.
    pub fn rollover_if_needed(&mut self) -> IngestResult<u32> {
        let mut count = 0;
        while self.over_threshold()? && store::article_count(self.connection())? > 0 {
            self.rollover()?;
            count += 1;
        }
        Ok(count)
    }

    fn rollover(&mut self) -> IngestResult<()> {
        let sealed_ordinal = self.active.ordinal;
        let carried = self.checkpoint()?;
        let size_before = self.size_bytes()?;

        seal(self.connection(), sealed_ordinal)?;
        let next_shard = create_shard(&self.dir, sealed_ordinal + 1, carried)?;
        let sealed = std::mem::replace(&mut self.active, next_shard);
        sealed.conn.close().map_err(|(_, e)| e)?;
        self.rollovers += 1;

        info!(
            sealed = sealed_ordinal,
            active = self.active.ordinal,
            size_before,
            checkpoint = ?carried,
            "Shard rolled over"
        );
        Ok(())
    }

    /// Compacts the active shard in place. Must be called outside a batch.
    pub fn compact(&self) -> IngestResult<()> {
        let before = self.size_bytes()?;
        compact_connection(self.connection())?;
        debug!(
            ordinal = self.active.ordinal,
            before,
            after = self.size_bytes()?,
            "Compacted active shard"
        );
        Ok(())
    }

    /// Highest article id in the lineage: the active shard if it has any
    /// articles, otherwise the newest sealed shard that does.
    pub fn last_article_id(&self) -> IngestResult<Option<ArticleId>> {
        if let Some(id) = store::last_article_id(self.connection())? {
            return Ok(Some(id));
        }
        for ordinal in shard_ordinals(&self.dir)?.into_iter().rev() {
            if ordinal >= self.active.ordinal {
                continue;
            }
            let conn = open_read_only(&shard_path(&self.dir, ordinal))?;
            if let Some(id) = store::last_article_id(&conn)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Closes the active shard, committing nothing further.
    pub fn close(self) -> IngestResult<()> {
        store::rollback_batch(self.active.connection())?;
        self.active.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

/// Marks a shard sealed, folds its WAL in, compacts it, and leaves it in
/// rollback-journal mode so it is a single self-contained file.
fn seal(conn: &Connection, ordinal: u32) -> IngestResult<()> {
    conn.execute("UPDATE shard_meta SET sealed = 1 WHERE id = 1", [])?;
    compact_connection(conn)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "DELETE", |row| row.get(0))?;
    debug!(ordinal, journal_mode = mode, "Shard sealed");
    Ok(())
}

/// Describes every shard in `dir` without opening any of them for writing.
pub fn list_shards(dir: &Path) -> IngestResult<Vec<ShardInfo>> {
    let mut shards = Vec::new();
    for ordinal in shard_ordinals(dir)? {
        let path = shard_path(dir, ordinal);
        let conn = open_read_only(&path)?;
        shards.push(ShardInfo {
            ordinal,
            file_bytes: fs::metadata(&path)?.len(),
            sealed: is_sealed(&conn)?,
            article_count: store::article_count(&conn)?,
            checkpoint: checkpoint::load(&conn)?,
            path,
        });
    }
    Ok(shards)
}

/// Compacts the highest shard in `dir` in place if it is still active.
/// Returns its ordinal with file sizes before and after, or `None` when
/// there is no unsealed shard.
pub fn compact_active(dir: &Path) -> IngestResult<Option<(u32, u64, u64)>> {
    let Some(ordinal) = shard_ordinals(dir)?.last().copied() else {
        return Ok(None);
    };
    let path = shard_path(dir, ordinal);
    if is_sealed(&open_read_only(&path)?)? {
        return Ok(None);
    }

    let before = fs::metadata(&path)?.len();
    let conn = store::open_connection(&path)?;
    compact_connection(&conn)?;
    conn.close().map_err(|(_, e)| e)?;
    let after = fs::metadata(&path)?.len();
    info!(ordinal, before, after, "Compacted shard");
    Ok(Some((ordinal, before, after)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Article, ArticleType, ExtractedPage, PageOutcome, Section, SideChannel};
    use tempfile::TempDir;

    fn page(id: u32) -> ExtractedPage {
        ExtractedPage {
            article: Article {
                id,
                title: format!("Page {}", id),
                is_redirect: false,
                article_type: ArticleType::Text,
                redirect_target: None,
            },
            sections: vec![Section {
                order: 0,
                title: "Introduction".to_string(),
                content: "x".repeat(2000),
                side_channel: SideChannel::default(),
            }],
            categories: vec![],
        }
    }

    fn write_one(mgr: &ShardManager, id: u32) {
        let conn = mgr.connection();
        store::begin_batch(conn).unwrap();
        assert_eq!(
            store::commit_page(conn, &page(id)).unwrap(),
            PageOutcome::Committed(id)
        );
        store::commit_batch(conn, Some(id)).unwrap();
    }

    #[test]
    fn shard_file_names() {
        let dir = Path::new("/data");
        assert_eq!(shard_path(dir, 7), PathBuf::from("/data/articles_007.db"));
        assert_eq!(parse_ordinal("articles_012.db"), Some(12));
        assert_eq!(parse_ordinal("articles_1234.db"), Some(1234));
        assert_eq!(parse_ordinal("articles_012.db.tmp"), None);
        assert_eq!(parse_ordinal("articles_012.db-wal"), None);
        assert_eq!(parse_ordinal("articles_.db"), None);
        assert_eq!(parse_ordinal("progress.csv"), None);
    }

    #[test]
    fn first_open_creates_shard_zero() {
        let tmp = TempDir::new().unwrap();
        let mgr = ShardManager::open(tmp.path(), 1 << 30).unwrap();
        assert_eq!(mgr.active_ordinal(), 0);
        assert!(shard_path(tmp.path(), 0).exists());
        assert_eq!(mgr.checkpoint().unwrap(), None);
    }

    #[test]
    fn zero_threshold_rejected() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            ShardManager::open(tmp.path(), 0),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn tiny_threshold_advances_one_ordinal_per_page() {
        let tmp = TempDir::new().unwrap();
        let mut mgr = ShardManager::open(tmp.path(), 1).unwrap();
        for id in 1..=4 {
            write_one(&mgr, id);
            assert_eq!(mgr.rollover_if_needed().unwrap(), 1);
            assert_eq!(mgr.active_ordinal(), id);
        }
        assert_eq!(mgr.rollovers(), 4);
        assert_eq!(mgr.checkpoint().unwrap(), Some(4));
        mgr.close().unwrap();

        let shards = list_shards(tmp.path()).unwrap();
        let ordinals: Vec<u32> = shards.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);
        assert!(shards[..4].iter().all(|s| s.sealed && s.article_count == 1));
        assert!(!shards[4].sealed);
        assert_eq!(shards[4].article_count, 0);
        assert_eq!(shards[4].checkpoint, Some(4));
    }

    #[test]
    fn large_threshold_never_rolls_over() {
        let tmp = TempDir::new().unwrap();
        let mut mgr = ShardManager::open(tmp.path(), 1 << 30).unwrap();
        for id in 1..=10 {
            write_one(&mgr, id);
            assert_eq!(mgr.rollover_if_needed().unwrap(), 0);
        }
        assert_eq!(mgr.active_ordinal(), 0);
    }

    #[test]
    fn rollover_happens_each_time_threshold_is_crossed() {
        let tmp = TempDir::new().unwrap();
        let threshold = 64 * 1024;
        let mut mgr = ShardManager::open(tmp.path(), threshold).unwrap();
        let mut seen = vec![mgr.active_ordinal()];
        for id in 1..=200 {
            write_one(&mgr, id);
            mgr.rollover_if_needed().unwrap();
            if *seen.last().unwrap() != mgr.active_ordinal() {
                seen.push(mgr.active_ordinal());
            }
            assert!(mgr.size_bytes().unwrap() <= threshold);
        }
        assert!(seen.len() > 2);
        for pair in seen.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
    }

    #[test]
    fn reopen_resumes_highest_ordinal() {
        let tmp = TempDir::new().unwrap();
        {
            let mut mgr = ShardManager::open(tmp.path(), 1).unwrap();
            write_one(&mgr, 1);
            mgr.rollover_if_needed().unwrap();
            write_one(&mgr, 2);
            mgr.close().unwrap();
        }
        let mgr = ShardManager::open(tmp.path(), 1 << 30).unwrap();
        assert_eq!(mgr.active_ordinal(), 1);
        assert_eq!(mgr.checkpoint().unwrap(), Some(2));
        assert_eq!(mgr.last_article_id().unwrap(), Some(2));
    }

    #[test]
    fn sealed_highest_shard_starts_next_ordinal() {
        let tmp = TempDir::new().unwrap();
        {
            let mgr = ShardManager::open(tmp.path(), 1 << 30).unwrap();
            write_one(&mgr, 1);
            mgr.connection()
                .execute("UPDATE shard_meta SET sealed = 1", [])
                .unwrap();
            mgr.close().unwrap();
        }
        let mgr = ShardManager::open(tmp.path(), 1 << 30).unwrap();
        assert_eq!(mgr.active_ordinal(), 1);
        assert_eq!(mgr.checkpoint().unwrap(), Some(1));
        assert_eq!(mgr.last_article_id().unwrap(), Some(1));
    }

    #[test]
    fn stale_tmp_files_removed_on_open() {
        let tmp = TempDir::new().unwrap();
        let stale = tmp_path(tmp.path(), 3);
        fs::write(&stale, b"partial").unwrap();
        let mgr = ShardManager::open(tmp.path(), 1 << 30).unwrap();
        assert!(!stale.exists());
        assert_eq!(mgr.active_ordinal(), 0);
    }

    #[test]
    fn compact_active_skips_sealed_and_missing() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(compact_active(tmp.path()).unwrap(), None);
        {
            let mut mgr = ShardManager::open(tmp.path(), 1).unwrap();
            write_one(&mgr, 1);
            mgr.rollover_if_needed().unwrap();
            write_one(&mgr, 2);
            mgr.close().unwrap();
        }
        let (ordinal, _, _) = compact_active(tmp.path()).unwrap().unwrap();
        assert_eq!(ordinal, 1);
    }

    #[test]
    fn compact_keeps_data() {
        let tmp = TempDir::new().unwrap();
        let mgr = ShardManager::open(tmp.path(), 1 << 30).unwrap();
        for id in 1..=5 {
            write_one(&mgr, id);
        }
        mgr.compact().unwrap();
        assert_eq!(store::article_count(mgr.connection()).unwrap(), 5);
    }
}
