use crate::infobox::extract_infoboxes;
use crate::markup::find_matching_close;
use crate::models::SideChannel;
use crate::table::extract_tables;
use once_cell::sync::Lazy;
use regex::Regex;

/// Single-line, shortest-match template invocations. Multi-line templates
/// (infoboxes, mostly) survive this pass and are handled by the side channel.
static TEMPLATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{.*?\}\}").unwrap());

static COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static REF_SELF_CLOSING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<ref\b[^>]*/>").unwrap());

static REF_PAIRED_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<ref\b[^>]*>.*?</ref\s*>").unwrap());

const MEDIA_PREFIXES: [&[u8]; 2] = [b"file:", b"image:"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedSection {
    pub content: String,
    pub side_channel: SideChannel,
}

/// Strips markup noise from one section's raw text and moves its tables and
/// infoboxes into the side channel.
pub fn clean_section(raw: &str) -> CleanedSection {
    let text = strip_templates(raw);
    let text = strip_comments(&text);
    let text = strip_media_links(&text);
    let text = strip_references(&text);
    let (side_channel, text) = extract_side_channel(&text);

    CleanedSection {
        content: text.trim().to_string(),
        side_channel,
    }
}

pub fn strip_templates(text: &str) -> String {
    TEMPLATE_REGEX.replace_all(text, "").into_owned()
}

pub fn strip_comments(text: &str) -> String {
    COMMENT_REGEX.replace_all(text, "").into_owned()
}

/// Removes `[[File:...]]` and `[[Image:...]]` links, tracking bracket depth so
/// captions containing their own links go with them. An unclosed link takes
/// the rest of the text.
pub fn strip_media_links(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut result = String::with_capacity(text.len());
    let mut copied_to = 0;
    let mut search_from = 0;

    while let Some(start) = find_media_start(bytes, search_from) {
        result.push_str(&text[copied_to..start]);
        match find_matching_close(bytes, start, b'[', b']') {
            Some(close) => {
                copied_to = close + 2;
                search_from = copied_to;
            }
            None => {
                copied_to = bytes.len();
                break;
            }
        }
    }

    result.push_str(&text[copied_to..]);
    result
}

fn find_media_start(bytes: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(offset) = memchr::memmem::find(&bytes[pos..], b"[[") {
        let start = pos + offset;
        let rest = &bytes[start + 2..];
        let is_media = MEDIA_PREFIXES.iter().any(|prefix| {
            rest.len() >= prefix.len() && rest[..prefix.len()].eq_ignore_ascii_case(prefix)
        });
        if is_media {
            return Some(start);
        }
        pos = start + 2;
    }
    None
}

pub fn strip_references(text: &str) -> String {
    let text = REF_SELF_CLOSING_REGEX.replace_all(text, "");
    REF_PAIRED_REGEX.replace_all(&text, "").into_owned()
}

pub fn extract_side_channel(text: &str) -> (SideChannel, String) {
    let (wikitables, text) = extract_tables(text);
    let (infoboxes, text) = extract_infoboxes(&text);
    (
        SideChannel {
            wikitables,
            infoboxes,
        },
        text,
    )
}
