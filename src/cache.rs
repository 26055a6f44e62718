use crate::config::{PAGE_COUNT_CACHE_FILE, PAGE_COUNT_CACHE_VERSION};
use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Total page count of one dump file, keyed by the file's path, mtime, and size.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PageCountCache {
    pub version: u32,
    pub input_path: String,
    pub input_mtime: u64,
    pub input_size: u64,
    pub total_pages: u64,
}

pub fn cache_path(output_dir: &Path) -> PathBuf {
    output_dir.join(PAGE_COUNT_CACHE_FILE)
}

fn input_metadata(input_path: &str) -> Result<(u64, u64)> {
    let metadata = fs::metadata(input_path)
        .with_context(|| format!("Failed to get metadata for: {}", input_path))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    Ok((mtime, metadata.len()))
}

/// Returns the cached total if the cache exists and still matches the input.
/// Missing, stale, or corrupt caches all come back as `Ok(None)`.
pub fn try_load_page_count(output_dir: &Path, input_path: &str) -> Result<Option<u64>> {
    let path = cache_path(output_dir);
    if !path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(&path).context("Failed to open page count cache")?;
    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let cache: PageCountCache = match options.deserialize_from(BufReader::new(file)) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Page count cache is corrupt or unreadable");
            return Ok(None);
        }
    };

    if cache.version != PAGE_COUNT_CACHE_VERSION {
        info!(
            cached = cache.version,
            current = PAGE_COUNT_CACHE_VERSION,
            "Page count cache version mismatch"
        );
        return Ok(None);
    }

    if cache.input_path != input_path {
        info!(
            cached = cache.input_path,
            current = input_path,
            "Page count cache input path mismatch"
        );
        return Ok(None);
    }

    let (mtime, size) = input_metadata(input_path)?;
    if cache.input_mtime != mtime || cache.input_size != size {
        info!(
            cached_mtime = cache.input_mtime,
            current_mtime = mtime,
            cached_size = cache.input_size,
            current_size = size,
            "Input file has changed since pages were counted"
        );
        return Ok(None);
    }

    Ok(Some(cache.total_pages))
}

/// Writes the cache atomically via rename.
pub fn save_page_count(output_dir: &Path, input_path: &str, total_pages: u64) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {:?}", output_dir))?;

    let path = cache_path(output_dir);
    let (input_mtime, input_size) = input_metadata(input_path)?;
    let cache = PageCountCache {
        version: PAGE_COUNT_CACHE_VERSION,
        input_path: input_path.to_string(),
        input_mtime,
        input_size,
        total_pages,
    };

    let tmp_path = path.with_extension("cache.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp cache file: {:?}", tmp_path))?;
    bincode::options()
        .serialize_into(BufWriter::new(file), &cache)
        .context("Failed to serialize page count cache")?;

    fs::rename(&tmp_path, &path)
        .with_context(|| format!("Failed to rename temp cache file to: {:?}", path))?;

    info!(total_pages, path = ?path, "Page count cached");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_input(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("dump.xml");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "<mediawiki></mediawiki>").unwrap();
        path
    }

    #[test]
    fn cache_path_is_in_output_dir() {
        assert_eq!(
            cache_path(Path::new("/out")),
            PathBuf::from("/out/page_count.cache")
        );
    }

    #[test]
    fn missing_cache_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(try_load_page_count(dir.path(), "/some/input").unwrap(), None);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let input = input.to_str().unwrap();

        save_page_count(dir.path(), input, 6_789_012).unwrap();
        assert_eq!(
            try_load_page_count(dir.path(), input).unwrap(),
            Some(6_789_012)
        );
        assert!(!dir.path().join("page_count.cache.tmp").exists());
    }

    #[test]
    fn modified_input_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let input_path = create_test_input(&dir);
        let input = input_path.to_str().unwrap();
        save_page_count(dir.path(), input, 10).unwrap();

        let mut file = File::create(&input_path).unwrap();
        writeln!(file, "<mediawiki><page></page></mediawiki>").unwrap();

        assert_eq!(try_load_page_count(dir.path(), input).unwrap(), None);
    }

    #[test]
    fn different_input_path_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        save_page_count(dir.path(), input.to_str().unwrap(), 10).unwrap();
        assert_eq!(
            try_load_page_count(dir.path(), "/different/dump.xml").unwrap(),
            None
        );
    }

    #[test]
    fn corrupt_cache_is_none() {
        let dir = TempDir::new().unwrap();
        let mut file = File::create(cache_path(dir.path())).unwrap();
        file.write_all(b"not valid bincode data").unwrap();
        assert_eq!(try_load_page_count(dir.path(), "/some/input").unwrap(), None);
    }
}
