use crate::models::PageId;
use thiserror::Error;

/// Errors raised by the ingestion pipeline.
///
/// Only [`IngestError::PageEncoding`] is recoverable: the driver skips the
/// offending page and moves on. Everything else stops the run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Source format error: {0}")]
    SourceFormat(String),

    #[error("Page {page_id} ({title}) cannot be stored: {reason}")]
    PageEncoding {
        page_id: PageId,
        title: String,
        reason: String,
    },

    #[error("Resume inconsistency: {0}")]
    ResumeInconsistency(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl IngestError {
    pub fn is_page_local(&self) -> bool {
        matches!(self, IngestError::PageEncoding { .. })
    }
}

impl From<quick_xml::Error> for IngestError {
    fn from(e: quick_xml::Error) -> Self {
        IngestError::SourceFormat(e.to_string())
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
