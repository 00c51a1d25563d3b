//! Storage module for persisting harvest data
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Content items and their freshness (the signal crawl passes stop on)
//! - Subscriptions and their backfill-complete flag
//! - Job and job detail rows for auditable, resumable runs
//! - Signing service records and platform credentials

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{
    CredentialStore, ItemStore, JobStore, SignerStore, Storage, StorageError, StorageResult,
    SubscriptionStore,
};

use crate::crawl::ContentKind;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Processing status of a stored content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    /// Fully fetched, normalized and all media persisted
    Completed,
    /// Stored, but at least one embedded media download failed
    Uncompleted,
    /// The detail endpoint reported the item gone; only the excerpt is stored
    Unreachable,
}

impl ItemStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Uncompleted => "uncompleted",
            Self::Unreachable => "unreachable",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "uncompleted" => Some(Self::Uncompleted),
            "unreachable" => Some(Self::Unreachable),
            _ => None,
        }
    }
}

/// A post, article or note as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    /// Remote identifier, unique per content kind
    pub id: String,
    pub kind: ContentKind,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Normalized text
    pub text: String,
    /// Raw API payload, kept so the text can be re-derived later
    pub raw: Vec<u8>,
    pub status: ItemStatus,
}

/// One (author, content kind) pair to crawl
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Stable source key, `<kind>:<author>`
    pub key: String,
    pub author_id: String,
    pub kind: ContentKind,
    /// Set once backfill has reached the oldest item of the source
    pub finished: bool,
    pub created_at: String,
}

impl Subscription {
    pub fn key_for(kind: ContentKind, author_id: &str) -> String {
        format!("{}:{}", kind.as_str(), author_id)
    }
}

/// A registered signing helper service
#[derive(Debug, Clone, PartialEq)]
pub struct SignerRecord {
    pub id: String,
    pub slug: String,
    pub url: String,
    pub is_available: bool,
    pub used_count: u64,
    pub failed_count: u64,
}

/// A scheduled run of one task type
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub task_type: String,
    pub status: JobStatus,
    pub config_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Finished,
    Error,
}

impl JobStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}
