//! Paginated crawl state machine
//!
//! One generic walk shared by every content kind. A pass fetches list pages in
//! order and persists items until one of the stop conditions holds:
//!
//! | Condition | Stop reason |
//! |-----------|-------------|
//! | item created at or before the target time | `TargetReached` |
//! | page shorter than the page size | `ShortPage` |
//! | cursor reports the end of the list | `EndOfList` |
//! | one-time pass after its first page | `OneTime` |
//!
//! When the platform reports a collection size, every page after the first must
//! report the same size as the first. A change means items were inserted ahead of
//! the cursor while the pass ran, so offsets no longer line up; the pass aborts
//! before touching that page's items.

use crate::crawl::media::MediaSink;
use crate::crawl::parser::{needs_update, persist_item, persist_unreachable, ItemParser};
use crate::crawl::source::ListSource;
use crate::crawl::{CrawlContext, CrawlError};
use crate::fetch::{FetchError, Requester};
use crate::storage::ItemStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Why a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    ShortPage,
    EndOfList,
    OneTime,
}

/// Counters of one finished pass
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub pages: u32,
    pub saved: u32,
    pub skipped: u32,
    pub unreachable: u32,
    pub stop: StopReason,
}

/// Where a pass starts and when it stops
#[derive(Debug, Clone)]
pub struct PassOptions {
    pub start_url: String,
    pub start_offset: u64,
    /// Items created at or before this time end the pass
    pub target: Option<DateTime<Utc>>,
    /// Stop after the first page
    pub one_time: bool,
}

impl PassOptions {
    /// Catch-up pass from the newest item down to `latest`
    ///
    /// Without a stored item there is nothing to bound the walk, so the pass is
    /// limited to one page.
    pub fn forward(source: &dyn ListSource, author: &str, latest: Option<DateTime<Utc>>) -> Self {
        Self {
            start_url: source.list_url(author, 0),
            start_offset: 0,
            target: latest,
            one_time: latest.is_none(),
        }
    }

    /// History pass starting below the oldest stored item
    pub fn backfill(
        source: &dyn ListSource,
        author: &str,
        stored: u64,
        earliest: DateTime<Utc>,
    ) -> Self {
        Self {
            start_url: source.backfill_url(author, stored, earliest),
            start_offset: stored,
            target: None,
            one_time: false,
        }
    }
}

/// Collaborators shared by every pass of one platform
#[derive(Clone)]
pub struct Crawler {
    pub(crate) requester: Arc<dyn Requester>,
    pub(crate) store: Arc<dyn ItemStore>,
    pub(crate) parser: Arc<dyn ItemParser>,
    pub(crate) media: Option<MediaSink>,
}

impl Crawler {
    pub fn new(
        requester: Arc<dyn Requester>,
        store: Arc<dyn ItemStore>,
        parser: Arc<dyn ItemParser>,
    ) -> Self {
        Self {
            requester,
            store,
            parser,
            media: None,
        }
    }

    /// Persists item images through `sink`
    pub fn with_media(mut self, sink: MediaSink) -> Self {
        self.media = Some(sink);
        self
    }

    /// Walks one list from `opts.start_url`
    ///
    /// # Arguments
    ///
    /// * `source` - The kind-specific list capability
    /// * `author` - Author or group the list belongs to
    /// * `opts` - Start point and stop conditions
    /// * `ctx` - Identifiers for logging
    ///
    /// # Returns
    ///
    /// * `Ok(PassReport)` - The pass reached a stop condition
    /// * `Err(CrawlError::FoundNewItems)` - The collection size changed mid-walk
    /// * `Err(CrawlError)` - A fetch, parse or storage error, unchanged
    pub async fn run_pass(
        &self,
        source: &dyn ListSource,
        author: &str,
        opts: PassOptions,
        ctx: &CrawlContext,
    ) -> Result<PassReport, CrawlError> {
        let kind = source.kind();
        let page_size = source.page_size() as usize;
        let mut url = opts.start_url;
        let mut offset = opts.start_offset;
        let mut first_total: Option<u64> = None;

        let mut report = PassReport {
            pages: 0,
            saved: 0,
            skipped: 0,
            unreachable: 0,
            stop: StopReason::EndOfList,
        };

        tracing::info!("Starting {} pass for {} at {}", kind, author, url);

        loop {
            let raw = self.requester.limit_raw(&url, ctx).await?;
            let page = source
                .parse_list_page(&raw, author, offset)
                .map_err(|e| CrawlError::ParsePage {
                    url: url.clone(),
                    source: e,
                })?;

            if report.pages == 0 {
                first_total = page.cursor.total_count;
            } else if let (Some(expected), Some(found)) = (first_total, page.cursor.total_count) {
                if expected != found {
                    return Err(CrawlError::FoundNewItems { expected, found });
                }
            }
            report.pages += 1;

            tracing::debug!(
                "Page {} at offset {}: {} items, end={}",
                report.pages,
                offset,
                page.items.len(),
                page.cursor.is_end
            );

            for excerpt in &page.items {
                if let Some(target) = opts.target {
                    if excerpt.created_at <= target {
                        tracing::info!(
                            "Reached stored item time at {} {}, pass done",
                            kind,
                            excerpt.id
                        );
                        report.stop = StopReason::TargetReached;
                        return Ok(report);
                    }
                }

                if !needs_update(self.store.as_ref(), kind, excerpt)? {
                    report.skipped += 1;
                    continue;
                }

                let full = match source
                    .fetch_detail(self.requester.as_ref(), excerpt.clone(), ctx)
                    .await
                {
                    Ok(full) => full,
                    Err(CrawlError::Fetch(FetchError::Unreachable(_))) => {
                        persist_unreachable(
                            self.store.as_ref(),
                            self.parser.as_ref(),
                            kind,
                            excerpt,
                        )?;
                        report.unreachable += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let persisted = persist_item(
                    self.store.as_ref(),
                    self.parser.as_ref(),
                    self.media.as_ref(),
                    kind,
                    &full,
                    ctx,
                )
                .await?;

                if persisted.saved {
                    report.saved += 1;
                } else {
                    report.skipped += 1;
                }
            }

            offset += page.items.len() as u64;

            let stop = if page.items.len() < page_size {
                Some(StopReason::ShortPage)
            } else if page.cursor.is_end {
                Some(StopReason::EndOfList)
            } else if opts.one_time {
                Some(StopReason::OneTime)
            } else {
                None
            };

            match (stop, page.cursor.next_url) {
                (Some(reason), _) => {
                    report.stop = reason;
                    break;
                }
                (None, Some(next)) => url = next,
                (None, None) => {
                    report.stop = StopReason::EndOfList;
                    break;
                }
            }
        }

        tracing::info!(
            "{} pass for {} done: {} pages, {} saved, {} skipped ({:?})",
            kind,
            author,
            report.pages,
            report.saved,
            report.skipped,
            report.stop
        );
        Ok(report)
    }
}
