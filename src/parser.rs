//! Streaming reader over MediaWiki XML dumps, plain or bzip2-compressed.

use crate::error::{IngestError, IngestResult};
use crate::models::{Page, PageId};
use bzip2::read::BzDecoder;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

enum XmlSource {
    Bzip2(Reader<BufReader<BzDecoder<File>>>),
    Plain(Reader<BufReader<File>>),
}

impl XmlSource {
    fn open(path: &Path) -> IngestResult<Self> {
        let file = File::open(path)?;
        let is_bz2 = path.extension().map(|e| e == "bz2").unwrap_or(false);

        Ok(if is_bz2 {
            let decoder = BzDecoder::new(file);
            XmlSource::Bzip2(Reader::from_reader(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                decoder,
            )))
        } else {
            XmlSource::Plain(Reader::from_reader(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                file,
            )))
        })
    }

    fn read_event<'a>(&mut self, buf: &'a mut Vec<u8>) -> Result<Event<'a>, quick_xml::Error> {
        buf.clear();
        match self {
            XmlSource::Bzip2(reader) => reader.read_event_into(buf),
            XmlSource::Plain(reader) => reader.read_event_into(buf),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Id,
    Text,
}

#[derive(Debug, Default)]
struct PartialPage {
    title: String,
    id: Option<PageId>,
    text: String,
    in_revision: bool,
    /// Set once the id shows the page is at or before the resume point.
    discard: bool,
    encoding_error: Option<String>,
}

/// Yields pages in dump order. Each item is either a page or a page-local
/// [`IngestError::PageEncoding`]; a [`IngestError::SourceFormat`] item ends
/// the stream.
pub struct DumpReader {
    source: XmlSource,
    resume_after: Option<PageId>,
    last_id: Option<PageId>,
    skipped_ahead: u64,
    /// A `<mediawiki>` or `<page>` start tag has been read.
    seen_root: bool,
    finished: bool,
}

impl DumpReader {
    pub fn open(path: impl AsRef<Path>) -> IngestResult<Self> {
        Ok(Self {
            source: XmlSource::open(path.as_ref())?,
            resume_after: None,
            last_id: None,
            skipped_ahead: 0,
            seen_root: false,
            finished: false,
        })
    }

    /// Discards every page with id `<= resume` without collecting its text.
    pub fn skip_through(mut self, resume: Option<PageId>) -> Self {
        self.resume_after = resume;
        self
    }

    /// Pages passed over by the skip-ahead so far.
    pub fn skipped_ahead(&self) -> u64 {
        self.skipped_ahead
    }

    fn read_page(&mut self) -> IngestResult<Option<Page>> {
        let mut buf = Vec::with_capacity(8192);
        let mut page: Option<PartialPage> = None;
        let mut field: Option<Field> = None;
        let mut field_buf = String::new();

        loop {
            match self.source.read_event(&mut buf)? {
                Event::Start(ref e) => match e.name().as_ref() {
                    b"mediawiki" => self.seen_root = true,
                    b"page" => {
                        self.seen_root = true;
                        page = Some(PartialPage::default());
                    }
                    b"revision" => {
                        if let Some(p) = page.as_mut() {
                            p.in_revision = true;
                        }
                    }
                    b"title" => {
                        field = Some(Field::Title);
                        field_buf.clear();
                    }
                    b"id" => {
                        if let Some(p) = page.as_ref() {
                            if p.id.is_none() && !p.in_revision {
                                field = Some(Field::Id);
                                field_buf.clear();
                            }
                        }
                    }
                    b"text" => {
                        if let Some(p) = page.as_ref() {
                            if p.in_revision && !p.discard {
                                field = Some(Field::Text);
                                field_buf.clear();
                            }
                        }
                    }
                    _ => {}
                },
                Event::Empty(ref e) => {
                    // `<text/>` in a later revision replaces earlier text.
                    if e.name().as_ref() == b"text" {
                        if let Some(p) = page.as_mut() {
                            p.text.clear();
                        }
                    }
                }
                Event::Text(ref e) => {
                    if field.is_some() {
                        match e.unescape() {
                            Ok(text) => field_buf.push_str(&text),
                            Err(err) => {
                                if let Some(p) = page.as_mut() {
                                    p.encoding_error.get_or_insert(err.to_string());
                                }
                            }
                        }
                    }
                }
                Event::CData(ref e) => {
                    if field.is_some() {
                        match std::str::from_utf8(e) {
                            Ok(text) => field_buf.push_str(text),
                            Err(err) => {
                                if let Some(p) = page.as_mut() {
                                    p.encoding_error.get_or_insert(err.to_string());
                                }
                            }
                        }
                    }
                }
                Event::End(ref e) => {
                    let Some(p) = page.as_mut() else {
                        continue;
                    };
                    match e.name().as_ref() {
                        b"title" if field == Some(Field::Title) => {
                            p.title = std::mem::take(&mut field_buf);
                            field = None;
                        }
                        b"id" if field == Some(Field::Id) => {
                            let id = parse_page_id(&field_buf)?;
                            p.discard = self.resume_after.is_some_and(|r| id <= r);
                            p.id = Some(id);
                            field = None;
                        }
                        b"text" if field == Some(Field::Text) => {
                            p.text = std::mem::take(&mut field_buf);
                            field = None;
                        }
                        b"revision" => p.in_revision = false,
                        b"page" => {
                            if let Some(done) = page.take() {
                                match self.finish_page(done)? {
                                    Some(result) => return result.map(Some),
                                    None => continue,
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Event::Eof => {
                    if let Some(p) = page {
                        return Err(IngestError::SourceFormat(format!(
                            "dump ends inside page {:?} (id {:?})",
                            p.title, p.id
                        )));
                    }
                    if !self.seen_root {
                        return Err(IngestError::SourceFormat(
                            "no <mediawiki> or <page> element found".to_string(),
                        ));
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Applies ordering and skip-ahead to a completed page. `None` means the
    /// page was discarded.
    fn finish_page(&mut self, page: PartialPage) -> IngestResult<Option<IngestResult<Page>>> {
        let id = page.id.ok_or_else(|| {
            IngestError::SourceFormat(format!("page {:?} has no id", page.title))
        })?;

        if let Some(last) = self.last_id {
            if id < last {
                return Err(IngestError::SourceFormat(format!(
                    "page id {} follows {}; ids must be non-decreasing",
                    id, last
                )));
            }
        }
        self.last_id = Some(id);

        if page.discard {
            self.skipped_ahead += 1;
            if self.skipped_ahead % 100_000 == 0 {
                debug!(page_id = id, skipped = self.skipped_ahead, "Skipping ahead");
            }
            return Ok(None);
        }

        if let Some(reason) = page.encoding_error {
            return Ok(Some(Err(IngestError::PageEncoding {
                page_id: id,
                title: page.title,
                reason,
            })));
        }

        Ok(Some(Ok(Page {
            id,
            title: page.title,
            text: page.text,
        })))
    }
}

impl Iterator for DumpReader {
    type Item = IngestResult<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_page() {
            Ok(Some(page)) => Some(Ok(page)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) if e.is_page_local() => Some(Err(e)),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn parse_page_id(raw: &str) -> IngestResult<PageId> {
    raw.trim()
        .parse()
        .map_err(|_| IngestError::SourceFormat(format!("invalid page id {:?}", raw)))
}

/// Counts `<page>` elements without collecting any text. `on_tick` is called
/// with the running total every `tick_every` pages.
pub fn count_pages(
    path: impl AsRef<Path>,
    tick_every: u64,
    mut on_tick: impl FnMut(u64),
) -> IngestResult<u64> {
    let mut source = XmlSource::open(path.as_ref())?;
    let mut buf = Vec::with_capacity(8192);
    let mut count = 0u64;

    loop {
        match source.read_event(&mut buf)? {
            Event::End(ref e) if e.name().as_ref() == b"page" => {
                count += 1;
                if tick_every > 0 && count % tick_every == 0 {
                    on_tick(count);
                }
            }
            Event::Eof => return Ok(count),
            _ => {}
        }
    }
}
