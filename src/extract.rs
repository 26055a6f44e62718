use crate::config::{INTRODUCTION_TITLE, REDIRECT_MARKER, REDIRECT_SECTION_TITLE};
use crate::content::clean_section;
use crate::markup::{self, is_category_target, plain_text, visit_link_targets, Node};
use crate::models::{Article, ArticleType, ExtractedPage, Page, Section};
use rustc_hash::FxHashSet;

/// Turns one page's markup into an article row, its ordered sections, and the
/// categories it references.
pub fn extract(page: &Page) -> ExtractedPage {
    let nodes = markup::parse(&page.text);
    let categories = collect_categories(&nodes);

    let redirect_body = redirect_body(&page.text);
    let is_redirect = redirect_body.is_some();
    let (sections, redirect_target) = match redirect_body {
        Some(body) => (vec![redirect_section(body)], redirect_target(body)),
        None => (segment(&nodes), None),
    };

    ExtractedPage {
        article: Article {
            id: page.id,
            title: page.title.clone(),
            is_redirect,
            article_type: ArticleType::classify(is_redirect, !categories.is_empty()),
            redirect_target,
        },
        sections,
        categories,
    }
}

pub fn is_redirect(text: &str) -> bool {
    redirect_body(text).is_some()
}

/// Text following the redirect marker, if the page opens with one.
fn redirect_body(text: &str) -> Option<&str> {
    let trimmed = text.trim_start();
    let marker = trimmed.get(..REDIRECT_MARKER.len())?;
    if marker.eq_ignore_ascii_case(REDIRECT_MARKER) {
        Some(&trimmed[REDIRECT_MARKER.len()..])
    } else {
        None
    }
}

/// Full `Category:` link targets in document order, first occurrence wins.
pub fn collect_categories(nodes: &[Node<'_>]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    let mut categories = Vec::new();
    visit_link_targets(nodes, &mut |target| {
        if is_category_target(target) && seen.insert(target) {
            categories.push(target.to_string());
        }
    });
    categories
}

/// The first non-category link after the marker. Later candidates are ignored.
fn redirect_target(body: &str) -> Option<String> {
    let mut target = None;
    visit_link_targets(&markup::parse(body), &mut |t| {
        if target.is_none() && !is_category_target(t) {
            target = Some(t.to_string());
        }
    });
    target
}

fn redirect_section(body: &str) -> Section {
    let cleaned = clean_section(body);
    let content = plain_text(&markup::parse(&cleaned.content)).trim().to_string();
    Section {
        order: 0,
        title: REDIRECT_SECTION_TITLE.to_string(),
        content,
        side_channel: cleaned.side_channel,
    }
}

/// Splits the node sequence at headings. A section is only emitted once it has
/// accumulated content, so a page opening with a heading has no introduction.
pub fn segment(nodes: &[Node<'_>]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title = INTRODUCTION_TITLE.to_string();
    let mut buffer = String::new();
    let mut has_content = false;

    for node in nodes {
        match *node {
            Node::Heading { title: heading, .. } => {
                if has_content {
                    push_section(&mut sections, &title, &buffer);
                    buffer.clear();
                    has_content = false;
                }
                title = plain_text(&markup::parse(heading)).trim().to_string();
            }
            _ => {
                buffer.push_str(node.raw());
                has_content = true;
            }
        }
    }

    if has_content {
        push_section(&mut sections, &title, &buffer);
    }

    sections
}

fn push_section(sections: &mut Vec<Section>, title: &str, raw: &str) {
    let cleaned = clean_section(raw);
    sections.push(Section {
        order: sections.len() as u32,
        title: title.to_string(),
        content: cleaned.content,
        side_channel: cleaned.side_channel,
    });
}
