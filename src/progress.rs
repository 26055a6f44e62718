use crate::error::IngestResult;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::Instant;

/// One row of `progress.csv`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressRecord {
    pub count: u64,
    pub pages_per_second: f64,
    pub percent_complete: Option<f64>,
    pub memory_rss_bytes: Option<u64>,
    pub memory_utilization: Option<f64>,
}

/// Append-only CSV progress log. The header is written only when the file
/// is new, so resumed runs keep extending the same log.
pub struct ProgressLog {
    writer: csv::Writer<File>,
    started: Instant,
    total_pages: Option<u64>,
}

impl ProgressLog {
    pub fn open(path: &Path, total_pages: Option<u64>) -> IngestResult<Self> {
        let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        Ok(Self {
            writer,
            started: Instant::now(),
            total_pages,
        })
    }

    /// Appends a row. `count` is pages committed this run; `position` is how
    /// far into the dump the reader is, skip-ahead included.
    pub fn record(&mut self, count: u64, position: u64) -> IngestResult<ProgressRecord> {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rss = memory_rss_bytes();
        let record = ProgressRecord {
            count,
            pages_per_second: if elapsed > 0.0 {
                count as f64 / elapsed
            } else {
                0.0
            },
            percent_complete: percent_complete(position, self.total_pages),
            memory_rss_bytes: rss,
            memory_utilization: rss.zip(total_memory_bytes()).map(|(used, total)| {
                used as f64 / total as f64
            }),
        };
        self.writer.serialize(&record).map_err(io::Error::from)?;
        self.writer.flush()?;
        Ok(record)
    }
}

pub fn percent_complete(position: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(total) if total > 0 => Some((position as f64 / total as f64 * 100.0).min(100.0)),
        _ => None,
    }
}

/// Resident set size of this process. `VmRSS` is reported in kB, so the
/// kernel page size does not matter.
pub fn memory_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/self/status") {
            return parse_kb_field(&content, "VmRSS:");
        }
    }

    None
}

pub fn total_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/meminfo") {
            return parse_mem_total(&content);
        }
    }

    None
}

fn parse_mem_total(meminfo: &str) -> Option<u64> {
    parse_kb_field(meminfo, "MemTotal:")
}

/// Reads a `Key:   1234 kB` line from a `/proc` file, in bytes.
fn parse_kb_field(content: &str, key: &str) -> Option<u64> {
    let line = content.lines().find(|l| l.starts_with(key))?;
    let kb: u64 = line[key.len()..].split_whitespace().next()?.parse().ok()?;
    Some(kb * 1024)
}

/// Asks the allocator to return freed pages to the OS.
pub fn memory_hint() {
    // SAFETY: mi_collect takes no pointers and may be called from any thread.
    unsafe { libmimalloc_sys::mi_collect(true) }
}
