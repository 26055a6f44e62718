//! Wikitext tokenizer.
//!
//! Splits raw markup into a flat sequence of [`Node`]s. Templates and links are
//! matched with bracket-depth tracking so nested constructs stay in one node;
//! headings are only recognised at the start of a line. Every node keeps its
//! raw source slice, so concatenating `raw()` over the output reproduces the
//! input exactly.

use crate::config::CATEGORY_PREFIX;
use memchr::memmem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<'a> {
    Heading {
        level: u8,
        title: &'a str,
        raw: &'a str,
    },
    Text(&'a str),
    Template(&'a str),
    Link {
        target: &'a str,
        raw: &'a str,
    },
    Tag(&'a str),
}

impl<'a> Node<'a> {
    pub fn raw(&self) -> &'a str {
        match *self {
            Node::Heading { raw, .. } => raw,
            Node::Text(raw) => raw,
            Node::Template(raw) => raw,
            Node::Link { raw, .. } => raw,
            Node::Tag(raw) => raw,
        }
    }
}

pub fn parse(text: &str) -> Vec<Node<'_>> {
    let bytes = text.as_bytes();
    let mut nodes = Vec::new();
    let mut i = 0;
    let mut run_start = 0;

    while i < bytes.len() {
        let at_line_start = i == 0 || bytes[i - 1] == b'\n';
        let token = match bytes[i] {
            b'=' if at_line_start => heading_at(text, i),
            b'{' if bytes[i..].starts_with(b"{{") => find_matching_close(bytes, i, b'{', b'}')
                .map(|close| (Node::Template(&text[i..close + 2]), close + 2)),
            b'[' if bytes[i..].starts_with(b"[[") => link_at(text, i),
            b'<' => tag_at(text, i),
            _ => None,
        };

        match token {
            Some((node, end)) => {
                if run_start < i {
                    nodes.push(Node::Text(&text[run_start..i]));
                }
                nodes.push(node);
                i = end;
                run_start = end;
            }
            None => i += 1,
        }
    }

    if run_start < bytes.len() {
        nodes.push(Node::Text(&text[run_start..]));
    }

    nodes
}

/// Returns the index of the closing pair that balances the opening pair at `start`.
pub fn find_matching_close(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut i = start;
    while i + 1 < bytes.len() {
        if bytes[i] == open && bytes[i + 1] == open {
            depth += 1;
            i += 2;
        } else if bytes[i] == close && bytes[i + 1] == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}

fn heading_at(text: &str, start: usize) -> Option<(Node<'_>, usize)> {
    let bytes = text.as_bytes();
    let line_end = memchr::memchr(b'\n', &bytes[start..])
        .map(|p| start + p)
        .unwrap_or(bytes.len());
    let line = &text[start..line_end];
    let trimmed = line.trim_end();

    let lead = trimmed.bytes().take_while(|&b| b == b'=').count();
    let trail = trimmed.bytes().rev().take_while(|&b| b == b'=').count();
    if lead + trail >= trimmed.len() {
        return None;
    }

    let level = lead.min(trail).min(6);
    let title = trimmed[level..trimmed.len() - level].trim();
    if title.is_empty() {
        return None;
    }

    Some((
        Node::Heading {
            level: level as u8,
            title,
            raw: line,
        },
        line_end,
    ))
}

fn link_at(text: &str, start: usize) -> Option<(Node<'_>, usize)> {
    let close = find_matching_close(text.as_bytes(), start, b'[', b']')?;
    let inner = &text[start + 2..close];
    let target = inner.split('|').next().unwrap_or("").trim();
    if target.is_empty() || target.contains('\n') {
        return None;
    }
    Some((
        Node::Link {
            target,
            raw: &text[start..close + 2],
        },
        close + 2,
    ))
}

fn tag_at(text: &str, start: usize) -> Option<(Node<'_>, usize)> {
    let bytes = text.as_bytes();
    if bytes[start..].starts_with(b"<!--") {
        // Unterminated comments run to the end of the text.
        let end = memmem::find(&bytes[start + 4..], b"-->")
            .map(|p| start + 4 + p + 3)
            .unwrap_or(bytes.len());
        return Some((Node::Tag(&text[start..end]), end));
    }

    let next = *bytes.get(start + 1)?;
    if !(next.is_ascii_alphabetic() || next == b'/') {
        return None;
    }
    let close = memchr::memchr(b'>', &bytes[start + 1..])? + start + 1;
    if bytes[start + 1..close].contains(&b'<') {
        return None;
    }
    Some((Node::Tag(&text[start..close + 1]), close + 1))
}

/// The body of a link after its target, if any (`[[a|b]]` gives `b`).
fn link_label<'a>(raw: &'a str) -> Option<&'a str> {
    let inner = &raw[2..raw.len() - 2];
    inner.find('|').map(|p| &inner[p + 1..])
}

pub fn is_category_target(target: &str) -> bool {
    target.starts_with(CATEGORY_PREFIX)
}

pub fn is_media_target(target: &str) -> bool {
    let lower = target.trim_start().to_ascii_lowercase();
    lower.starts_with("file:") || lower.starts_with("image:")
}

/// Calls `f` with the target of every link, including links nested in
/// templates and link labels.
pub fn visit_link_targets<'a>(nodes: &[Node<'a>], f: &mut impl FnMut(&'a str)) {
    for node in nodes {
        match *node {
            Node::Link { target, raw } => {
                f(target);
                if let Some(label) = link_label(raw) {
                    visit_link_targets(&parse(label), f);
                }
            }
            Node::Template(raw) => {
                visit_link_targets(&parse(&raw[2..raw.len() - 2]), f);
            }
            Node::Heading { title, .. } => visit_link_targets(&parse(title), f),
            Node::Text(_) | Node::Tag(_) => {}
        }
    }
}

/// Renders nodes as readable text: templates, tags, and category/media links
/// are dropped, other links collapse to their label.
pub fn plain_text(nodes: &[Node<'_>]) -> String {
    let mut out = String::new();
    for node in nodes {
        match *node {
            Node::Text(text) => out.push_str(text),
            Node::Heading { title, .. } => out.push_str(&plain_text(&parse(title))),
            Node::Link { target, raw } => {
                if is_category_target(target) || is_media_target(target) {
                    continue;
                }
                match link_label(raw) {
                    Some(label) => out.push_str(&plain_text(&parse(label))),
                    None => out.push_str(target),
                }
            }
            Node::Template(_) | Node::Tag(_) => {}
        }
    }
    out
}
