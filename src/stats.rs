use crate::models::{ExtractedPage, PageOutcome, SkipReason};

/// Counters for one ingestion run, aggregated from per-page outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub pages_committed: u64,
    pub skipped_empty: u64,
    pub skipped_encoding: u64,
    pub skipped_duplicate: u64,
    /// Pages passed over by the resume skip-ahead
    pub resumed_over: u64,
    pub sections_written: u64,
    pub category_links: u64,
    pub tables_extracted: u64,
    pub infoboxes_extracted: u64,
    pub redirects: u64,
    pub rollovers: u32,
    pub last_page_id: Option<u32>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_commit(&mut self, page: &ExtractedPage) {
        self.pages_committed += 1;
        self.sections_written += page.sections.len() as u64;
        self.category_links += page.categories.len() as u64;
        if page.article.is_redirect {
            self.redirects += 1;
        }
        for section in &page.sections {
            self.tables_extracted += section.side_channel.wikitables.len() as u64;
            self.infoboxes_extracted += section.side_channel.infoboxes.len() as u64;
        }
    }

    pub fn record_skip(&mut self, reason: &SkipReason) {
        match reason {
            SkipReason::EmptyText => self.skipped_empty += 1,
            SkipReason::Encoding(_) => self.skipped_encoding += 1,
            SkipReason::DuplicateId => self.skipped_duplicate += 1,
        }
    }

    /// Folds one outcome in. `page` is the extracted form, when extraction ran.
    pub fn record(&mut self, outcome: &PageOutcome, page: Option<&ExtractedPage>) {
        match outcome {
            PageOutcome::Committed(_) => {
                if let Some(page) = page {
                    self.record_commit(page);
                }
            }
            PageOutcome::Skipped(reason) => self.record_skip(reason),
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped_empty + self.skipped_encoding + self.skipped_duplicate
    }

    /// Pages handled this run, committed or skipped.
    pub fn consumed(&self) -> u64 {
        self.pages_committed + self.skipped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infobox::Infobox;
    use crate::models::{Article, ArticleType, FieldMap, Section, SideChannel};
    use crate::table::WikiTable;

    fn page_with_side_channel() -> ExtractedPage {
        ExtractedPage {
            article: Article {
                id: 1,
                title: "T".to_string(),
                is_redirect: false,
                article_type: ArticleType::Categories,
                redirect_target: None,
            },
            sections: vec![
                Section {
                    order: 0,
                    title: "Introduction".to_string(),
                    content: String::new(),
                    side_channel: SideChannel {
                        wikitables: vec![WikiTable::default(), WikiTable::default()],
                        infoboxes: vec![Infobox {
                            infobox_type: "Infobox x".to_string(),
                            fields: FieldMap::default(),
                        }],
                    },
                },
                Section {
                    order: 1,
                    title: "More".to_string(),
                    content: String::new(),
                    side_channel: SideChannel::default(),
                },
            ],
            categories: vec!["Category:A".to_string()],
        }
    }

    #[test]
    fn new_stats_are_zero() {
        let stats = IngestStats::new();
        assert_eq!(stats.pages_committed, 0);
        assert_eq!(stats.skipped(), 0);
        assert_eq!(stats.consumed(), 0);
    }

    #[test]
    fn commit_counts_side_channel_entries() {
        let mut stats = IngestStats::new();
        let page = page_with_side_channel();
        stats.record(&PageOutcome::Committed(1), Some(&page));
        assert_eq!(stats.pages_committed, 1);
        assert_eq!(stats.sections_written, 2);
        assert_eq!(stats.category_links, 1);
        assert_eq!(stats.tables_extracted, 2);
        assert_eq!(stats.infoboxes_extracted, 1);
        assert_eq!(stats.redirects, 0);
    }

    #[test]
    fn skips_counted_by_reason() {
        let mut stats = IngestStats::new();
        stats.record(&PageOutcome::Skipped(SkipReason::EmptyText), None);
        stats.record(&PageOutcome::Skipped(SkipReason::EmptyText), None);
        stats.record(
            &PageOutcome::Skipped(SkipReason::Encoding("bad".to_string())),
            None,
        );
        stats.record(&PageOutcome::Skipped(SkipReason::DuplicateId), None);
        assert_eq!(stats.skipped_empty, 2);
        assert_eq!(stats.skipped_encoding, 1);
        assert_eq!(stats.skipped_duplicate, 1);
        assert_eq!(stats.skipped(), 4);
        assert_eq!(stats.consumed(), 4);
    }
}
