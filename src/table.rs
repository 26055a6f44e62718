//! Line-oriented wikitable parsing.
//!
//! Only the first header line (`!`) names columns. `|-` closes the current row
//! and `|` lines append cells to it. Cells beyond the named headers are keyed
//! `Column_N`, with `N` the 1-based cell position.

use crate::models::FieldMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TABLE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{\|.*?\|\}").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WikiTable {
    pub headers: Vec<String>,
    pub rows: Vec<FieldMap>,
}

/// Pulls every `{| ... |}` block out of `text`, returning the parsed tables and
/// the text with those spans removed.
pub fn extract_tables(text: &str) -> (Vec<WikiTable>, String) {
    let tables = TABLE_REGEX
        .find_iter(text)
        .map(|m| parse_table(m.as_str()))
        .collect();
    let remaining = TABLE_REGEX.replace_all(text, "").into_owned();
    (tables, remaining)
}

pub fn parse_table(block: &str) -> WikiTable {
    let mut headers: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in block.trim().lines() {
        let line = line.trim();
        if line.starts_with("{|") || line.starts_with("|}") || line.starts_with("|+") {
            continue;
        } else if let Some(rest) = line.strip_prefix('!') {
            if headers.is_empty() {
                headers = split_cells(rest, true);
            }
        } else if line.starts_with("|-") {
            if !current.is_empty() {
                rows.push(std::mem::take(&mut current));
            }
        } else if let Some(rest) = line.strip_prefix('|') {
            current.extend(split_cells(rest, false));
        }
    }

    if !current.is_empty() {
        rows.push(current);
    }

    let rows = rows
        .into_iter()
        .map(|cells| {
            let mut row = FieldMap::default();
            for (i, cell) in cells.into_iter().enumerate() {
                let key = headers
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("Column_{}", i + 1));
                row.insert(key, cell);
            }
            row
        })
        .collect();

    WikiTable { headers, rows }
}

fn split_cells(line: &str, header: bool) -> Vec<String> {
    let normalized;
    let line = if header {
        normalized = line.replace("!!", "||");
        normalized.as_str()
    } else {
        line
    };
    line.split("||").map(|c| c.trim().to_string()).collect()
}
