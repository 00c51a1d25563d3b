//! Item normalization and idempotent persistence
//!
//! This module turns an item's HTML body into plain text plus the list of images
//! it references, and saves the result. Saving is idempotent: an item already
//! stored with the same or a newer update time is left untouched and its stored
//! text is returned.

use crate::crawl::media::{persist_media, MediaSink};
use crate::crawl::source::Excerpt;
use crate::crawl::{ContentKind, CrawlContext, CrawlError};
use crate::storage::{ContentItem, ItemStatus, ItemStore, StorageResult};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Errors raised while parsing platform payloads
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid time '{0}'")]
    InvalidTime(String),
}

/// Normalized body of one item
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub text: String,
    /// Image sources in document order, without duplicates
    pub images: Vec<String>,
}

pub trait ItemParser: Send + Sync {
    fn parse_item(&self, html: &str) -> Result<ParsedItem, ParseError>;
}

/// Block-level HTML to text normalizer
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlItemParser;

const BLOCKS: &str = "p, h1, h2, h3, h4, h5, h6, li, blockquote, pre";
const IMAGE_ATTRS: [&str; 3] = ["data-original", "data-actualsrc", "src"];

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl ItemParser for HtmlItemParser {
    fn parse_item(&self, html: &str) -> Result<ParsedItem, ParseError> {
        let fragment = Html::parse_fragment(html);

        let mut blocks = Vec::new();
        if let Ok(selector) = Selector::parse(BLOCKS) {
            for element in fragment.select(&selector) {
                let text = element_text(element);
                if !text.is_empty() {
                    blocks.push(text);
                }
            }
        }

        // Plain text bodies have no block elements; keep their line structure
        if blocks.is_empty() {
            let raw: String = fragment.root_element().text().collect();
            blocks = raw
                .lines()
                .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|l| !l.is_empty())
                .collect();
        }

        let mut images: Vec<String> = Vec::new();
        if let Ok(selector) = Selector::parse("img") {
            for img in fragment.select(&selector) {
                let src = IMAGE_ATTRS
                    .iter()
                    .filter_map(|attr| img.value().attr(attr))
                    .find(|s| s.starts_with("http://") || s.starts_with("https://"));
                if let Some(src) = src {
                    if !images.iter().any(|i| i == src) {
                        images.push(src.to_string());
                    }
                }
            }
        }

        Ok(ParsedItem {
            text: blocks.join("\n\n"),
            images,
        })
    }
}

/// Joins normalized text and image links into the stored text
pub fn render_text(text: &str, links: &[String]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(links.len() + 1);
    if !text.is_empty() {
        parts.push(text.to_string());
    }
    parts.extend(links.iter().map(|l| format!("![image]({})", l)));
    parts.join("\n\n")
}

/// Result of `persist_item`
#[derive(Debug, Clone, PartialEq)]
pub struct Persisted {
    pub text: String,
    /// False when the stored copy was already up to date
    pub saved: bool,
}

/// Whether an excerpt carries something the store does not have yet
pub fn needs_update(
    store: &dyn ItemStore,
    kind: ContentKind,
    excerpt: &Excerpt,
) -> StorageResult<bool> {
    Ok(match store.get_item(kind, &excerpt.id)? {
        Some(existing) => {
            existing.updated_at < excerpt.updated_at || existing.status == ItemStatus::Uncompleted
        }
        None => true,
    })
}

/// Parses and saves one complete item
///
/// Images are persisted through `media` when given; a failed download keeps the
/// remote link and stores the item as `Uncompleted`.
pub async fn persist_item(
    store: &dyn ItemStore,
    parser: &dyn ItemParser,
    media: Option<&MediaSink>,
    kind: ContentKind,
    excerpt: &Excerpt,
    ctx: &CrawlContext,
) -> Result<Persisted, CrawlError> {
    if let Some(existing) = store.get_item(kind, &excerpt.id)? {
        if existing.updated_at >= excerpt.updated_at && existing.status != ItemStatus::Uncompleted
        {
            tracing::debug!("{} {} unchanged, keeping stored text", kind, excerpt.id);
            return Ok(Persisted {
                text: existing.text,
                saved: false,
            });
        }
    }

    let parsed = parser
        .parse_item(&excerpt.content)
        .map_err(|source| CrawlError::ParseItem {
            id: excerpt.id.clone(),
            source,
        })?;

    let (links, complete) = match media {
        Some(sink) if !parsed.images.is_empty() => {
            let outcome = persist_media(sink, kind, &excerpt.id, &parsed.images, ctx).await;
            (outcome.links, outcome.complete)
        }
        _ => (parsed.images, true),
    };

    let text = render_text(&parsed.text, &links);
    let status = if complete {
        ItemStatus::Completed
    } else {
        ItemStatus::Uncompleted
    };

    store.save_item(&ContentItem {
        id: excerpt.id.clone(),
        kind,
        author_id: excerpt.author_id.clone(),
        created_at: excerpt.created_at,
        updated_at: excerpt.updated_at,
        text: text.clone(),
        raw: excerpt.raw.clone(),
        status,
    })?;

    tracing::info!("Saved {} {} ({:?})", kind, excerpt.id, status);
    Ok(Persisted { text, saved: true })
}

/// Stores the excerpt of an item whose detail is gone, so it is not fetched again
pub fn persist_unreachable(
    store: &dyn ItemStore,
    parser: &dyn ItemParser,
    kind: ContentKind,
    excerpt: &Excerpt,
) -> Result<(), CrawlError> {
    let parsed = parser
        .parse_item(&excerpt.content)
        .map_err(|source| CrawlError::ParseItem {
            id: excerpt.id.clone(),
            source,
        })?;

    store.save_item(&ContentItem {
        id: excerpt.id.clone(),
        kind,
        author_id: excerpt.author_id.clone(),
        created_at: excerpt.created_at,
        updated_at: excerpt.updated_at,
        text: render_text(&parsed.text, &parsed.images),
        raw: excerpt.raw.clone(),
        status: ItemStatus::Unreachable,
    })?;

    tracing::warn!("{} {} is unreachable, stored excerpt only", kind, excerpt.id);
    Ok(())
}
