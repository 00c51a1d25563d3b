//! Credential expiry check
//!
//! Runs once a day from `watch` and on demand from `cookie check`, so an operator
//! hears about a credential before a crawl fails on it.

use crate::notify::{notice_with_log, Notifier};
use crate::signing::CredentialKind;
use crate::storage::{CredentialStore, StorageResult};
use chrono::Utc;
use std::time::Duration;

/// Credentials expiring sooner than this are reported
pub const EXPIRY_WARNING: Duration = Duration::from_secs(48 * 3600);

/// Notifies once per stored credential that expires within `within`
///
/// # Returns
///
/// * `Ok(kinds)` - The kinds that were reported, soonest first
/// * `Err(StorageError)` - The credential table could not be read
pub async fn check_credentials(
    store: &dyn CredentialStore,
    notifier: &dyn Notifier,
    within: Duration,
) -> StorageResult<Vec<CredentialKind>> {
    let expiring = store.expiring(within)?;
    let now = Utc::now();

    for (kind, expires_at) in &expiring {
        let state = if *expires_at <= now { "expired" } else { "expires" };
        tracing::warn!("Credential {} {} at {}", kind, state, expires_at);
        notice_with_log(
            notifier,
            "Need to update cookies",
            &format!(
                "Cookie type: {} {} at {}",
                kind,
                state,
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
        )
        .await;
    }

    if expiring.is_empty() {
        tracing::debug!("No credential expires within {}h", within.as_secs() / 3600);
    }
    Ok(expiring.into_iter().map(|(kind, _)| kind).collect())
}
