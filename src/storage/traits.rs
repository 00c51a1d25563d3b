//! Storage traits and error types
//!
//! This module defines the trait interfaces the crawl state machines, the signing
//! pool and the job orchestrator depend on. All methods take `&self`; backends are
//! shared across tasks behind an `Arc` and must be `Send + Sync`.

use crate::crawl::ContentKind;
use crate::signing::CredentialKind;
use crate::storage::{ContentItem, JobRecord, JobStatus, SignerRecord, Subscription};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Signing service not found: {0}")]
    SignerNotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Per-kind content item persistence
pub trait ItemStore: Send + Sync {
    /// Creation time of the newest stored item for an author, `None` when empty
    fn latest_item_time(
        &self,
        kind: ContentKind,
        author_id: &str,
    ) -> StorageResult<Option<DateTime<Utc>>>;

    /// Creation time of the oldest stored item for an author, `None` when empty
    fn earliest_item_time(
        &self,
        kind: ContentKind,
        author_id: &str,
    ) -> StorageResult<Option<DateTime<Utc>>>;

    /// Inserts an item, or replaces the stored copy when `updated_at` is newer
    fn save_item(&self, item: &ContentItem) -> StorageResult<()>;

    fn get_item(&self, kind: ContentKind, id: &str) -> StorageResult<Option<ContentItem>>;

    fn count_items(&self, kind: ContentKind, author_id: &str) -> StorageResult<u64>;
}

/// Subscription bookkeeping
pub trait SubscriptionStore: Send + Sync {
    /// Adds a subscription, returning the existing one if already present
    fn add_subscription(&self, kind: ContentKind, author_id: &str)
        -> StorageResult<Subscription>;

    fn get_subscription(&self, key: &str) -> StorageResult<Option<Subscription>>;

    /// Lists subscriptions of the given kinds ordered by key
    fn list_subscriptions(&self, kinds: &[ContentKind]) -> StorageResult<Vec<Subscription>>;

    /// Flips the backfill-complete flag
    fn set_finished(&self, key: &str, finished: bool) -> StorageResult<()>;
}

/// Job rows and the append-only job detail log
pub trait JobStore: Send + Sync {
    /// Persists a new job in `Running` state
    fn create_job(&self, id: &str, task_type: &str, config_hash: &str)
        -> StorageResult<JobRecord>;

    fn get_job(&self, id: &str) -> StorageResult<Option<JobRecord>>;

    /// The job of this task type currently in `Running` state, if any
    fn find_running_job(&self, task_type: &str) -> StorageResult<Option<JobRecord>>;

    fn list_jobs(&self, status: Option<JobStatus>) -> StorageResult<Vec<JobRecord>>;

    fn update_job_status(&self, id: &str, status: JobStatus) -> StorageResult<()>;

    /// Appends a processed source key to a job
    fn record_job_detail(&self, job_id: &str, source_key: &str) -> StorageResult<()>;

    /// Source keys already processed by a job, in recording order
    fn job_details(&self, job_id: &str) -> StorageResult<Vec<String>>;
}

/// Signing service registry
pub trait SignerStore: Send + Sync {
    fn register_signer(&self, slug: &str, url: &str) -> StorageResult<SignerRecord>;

    fn load_signers(&self) -> StorageResult<Vec<SignerRecord>>;

    fn increment_signer_used(&self, id: &str) -> StorageResult<()>;

    fn increment_signer_failed(&self, id: &str) -> StorageResult<()>;

    fn set_signer_available(&self, id: &str, available: bool) -> StorageResult<()>;
}

/// Expiring credential values keyed by kind
pub trait CredentialStore: Send + Sync {
    /// The unexpired value for a kind, `None` when missing or expired
    fn get_credential(&self, kind: CredentialKind) -> StorageResult<Option<String>>;

    fn set_credential(&self, kind: CredentialKind, value: &str, ttl: Duration)
        -> StorageResult<()>;

    fn del_credential(&self, kind: CredentialKind) -> StorageResult<()>;

    /// Stored credentials expiring within `within` from now, already expired ones
    /// included, soonest first
    fn expiring(&self, within: Duration) -> StorageResult<Vec<(CredentialKind, DateTime<Utc>)>>;
}

/// Everything the orchestrator needs from one backend
pub trait Storage:
    ItemStore + SubscriptionStore + JobStore + SignerStore + CredentialStore
{
}

impl<T> Storage for T where
    T: ItemStore + SubscriptionStore + JobStore + SignerStore + CredentialStore
{
}
