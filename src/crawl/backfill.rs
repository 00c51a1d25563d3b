//! History backfill
//!
//! A forward pass only reaches back to the newest stored item. Backfill walks the
//! rest of an author's history, starting just below the oldest stored item, and
//! flags the subscription finished once the platform reports the list exhausted.
//! The walk resumes from stored state, so an interrupted backfill picks up where
//! it stopped on the next run.

use crate::crawl::machine::{Crawler, PassOptions, PassReport, StopReason};
use crate::crawl::source::ListSource;
use crate::crawl::{CrawlContext, CrawlError};
use crate::storage::{StorageError, Subscription, SubscriptionStore};

#[derive(Debug, Clone, PartialEq)]
pub enum BackfillOutcome {
    /// The subscription was already flagged finished
    AlreadyFinished,
    /// No item stored yet, so there is no lower bound to start from
    NothingStored,
    Walked { report: PassReport, finished: bool },
}

impl Crawler {
    /// Runs one backfill pass for a subscription
    ///
    /// # Arguments
    ///
    /// * `source` - The list capability for the subscription's kind
    /// * `subs` - Where the finished flag is read and written
    /// * `sub` - The subscription to backfill
    /// * `ctx` - Identifiers for logging
    ///
    /// # Returns
    ///
    /// * `Ok(BackfillOutcome)` - What the pass did
    /// * `Err(CrawlError)` - The pass failed; the finished flag is left unchanged
    pub async fn run_backfill(
        &self,
        source: &dyn ListSource,
        subs: &dyn SubscriptionStore,
        sub: &Subscription,
        ctx: &CrawlContext,
    ) -> Result<BackfillOutcome, CrawlError> {
        let current = subs
            .get_subscription(&sub.key)?
            .ok_or_else(|| StorageError::SubscriptionNotFound(sub.key.clone()))?;
        if current.finished {
            tracing::debug!("Backfill of {} already finished", sub.key);
            return Ok(BackfillOutcome::AlreadyFinished);
        }

        let kind = source.kind();
        let Some(earliest) = self.store.earliest_item_time(kind, &sub.author_id)? else {
            tracing::debug!("Nothing stored for {}, skipping backfill", sub.key);
            return Ok(BackfillOutcome::NothingStored);
        };
        let stored = self.store.count_items(kind, &sub.author_id)?;

        tracing::info!(
            "Backfilling {} below {} ({} items stored)",
            sub.key,
            earliest,
            stored
        );

        let opts = PassOptions::backfill(source, &sub.author_id, stored, earliest);
        let report = self.run_pass(source, &sub.author_id, opts, ctx).await?;

        let finished = matches!(report.stop, StopReason::ShortPage | StopReason::EndOfList);
        if finished {
            subs.set_finished(&sub.key, true)?;
            tracing::info!("Backfill of {} finished", sub.key);
        }

        Ok(BackfillOutcome::Walked { report, finished })
    }
}
