use crate::markup::find_matching_close;
use crate::models::FieldMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Infobox {
    pub infobox_type: String,
    pub fields: FieldMap,
}

/// Pulls every `{{Infobox ...}}` span out of `text`, returning the parsed
/// infoboxes and the text with those spans removed.
pub fn extract_infoboxes(text: &str) -> (Vec<Infobox>, String) {
    let mut results = Vec::new();
    let mut remaining = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut search_from = 0;
    let mut copied_to = 0;

    while let Some(pos) = find_infobox_start(&bytes[search_from..]) {
        let abs_pos = search_from + pos;
        if let Some(close_pos) = find_matching_close(bytes, abs_pos, b'{', b'}') {
            remaining.push_str(&text[copied_to..abs_pos]);
            results.push(parse_infobox_inner(&text[abs_pos + 2..close_pos]));
            search_from = close_pos + 2;
            copied_to = search_from;
        } else {
            search_from = abs_pos + 2;
        }
    }

    remaining.push_str(&text[copied_to..]);
    (results, remaining)
}

/// Case-insensitive search on raw bytes to preserve byte offsets with non-ASCII text.
fn find_infobox_start(bytes: &[u8]) -> Option<usize> {
    let needle = b"{{infobox";
    if bytes.len() < needle.len() {
        return None;
    }
    for i in 0..=bytes.len() - needle.len() {
        if bytes[i..i + needle.len()]
            .iter()
            .zip(needle.iter())
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
        {
            let next_idx = i + needle.len();
            if next_idx >= bytes.len() {
                return Some(i);
            }
            if matches!(bytes[next_idx], b' ' | b'_' | b'\n' | b'\r' | b'|' | b'}') {
                return Some(i);
            }
        }
    }
    None
}

/// One `key = value` pair per line; the first line names the infobox and may
/// carry a pair after a `|`.
fn parse_infobox_inner(inner: &str) -> Infobox {
    let mut lines = inner.lines();
    let header = lines.next().unwrap_or("");
    let (infobox_type, header_rest) = match header.find('|') {
        Some(p) => (&header[..p], Some(&header[p..])),
        None => (header, None),
    };

    let mut fields = FieldMap::default();
    for line in header_rest.into_iter().chain(lines) {
        let line = line.trim().trim_start_matches('|').trim();
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                fields.insert(key.to_string(), value.trim().to_string());
            }
        }
    }

    Infobox {
        infobox_type: infobox_type.trim().to_string(),
        fields,
    }
}
