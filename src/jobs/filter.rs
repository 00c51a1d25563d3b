//! Source list selection for a run

use crate::storage::Subscription;

const ALL: &str = "*";

/// Keeps the subscriptions selected by `include` and not named in `exclude`
///
/// An empty `include`, or one containing `*`, selects every subscription.
pub fn filter_sources(
    subs: Vec<Subscription>,
    include: &[String],
    exclude: &[String],
) -> Vec<Subscription> {
    let include_all = include.is_empty() || include.iter().any(|k| k == ALL);

    subs.into_iter()
        .filter(|s| include_all || include.contains(&s.key))
        .filter(|s| !exclude.contains(&s.key))
        .collect()
}

/// Drops every subscription up to and including `last_crawled`
///
/// An unknown key leaves the list untouched, so a stale resume point never skips
/// the whole run.
pub fn cut_sources(subs: Vec<Subscription>, last_crawled: Option<&str>) -> Vec<Subscription> {
    let Some(last) = last_crawled else {
        return subs;
    };

    match subs.iter().position(|s| s.key == last) {
        Some(index) => subs.into_iter().skip(index + 1).collect(),
        None => {
            tracing::warn!("Resume point {} is not a known source, crawling all", last);
            subs
        }
    }
}
