//! Paginated crawl state machines
//!
//! This module implements the per-source crawl:
//! - Content kinds and their platforms
//! - List sources that build URLs and parse list pages per kind
//! - The shared pagination walk with its stop conditions
//! - Item normalization, idempotent persistence and media storage
//! - History backfill with its finished flag

mod backfill;
mod context;
mod kind;
mod machine;
mod media;
mod parser;
mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use backfill::BackfillOutcome;
pub use context::CrawlContext;
pub use kind::{ContentKind, Platform};
pub use machine::{Crawler, PassOptions, PassReport, StopReason};
pub use media::{media_key, persist_media, MediaOutcome, MediaSink};
pub use parser::{
    needs_update, persist_item, persist_unreachable, render_text, HtmlItemParser, ItemParser,
    ParseError, ParsedItem, Persisted,
};
pub use source::{ArticleList, Cursor, Excerpt, ListPage, ListSource, NoteList, PostList};

use crate::fetch::FetchError;
use crate::objects::ObjectError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that end a crawl pass
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to parse list page {url}: {source}")]
    ParsePage { url: String, source: ParseError },

    #[error("Failed to parse item {id}: {source}")]
    ParseItem { id: String, source: ParseError },

    /// The collection size changed between pages of one pass
    #[error("found new items (expected {expected} in total, found {found})")]
    FoundNewItems { expected: u64, found: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Object store error: {0}")]
    Object(#[from] ObjectError),
}

impl CrawlError {
    /// The fetch failure behind this error, if any
    pub fn as_fetch(&self) -> Option<&FetchError> {
        match self {
            CrawlError::Fetch(e) => Some(e),
            _ => None,
        }
    }
}
