//! Scheduler-facing job orchestration
//!
//! A job is one run of a task type over its subscriptions. This module keeps
//! recurring runs from overlapping, records which sources a run has completed so a
//! killed run can be resumed, and decides which crawl errors end a run early.

mod expiry;
mod filter;
mod orchestrator;

pub use expiry::{check_credentials, EXPIRY_WARNING};
pub use filter::{cut_sources, filter_sources};
pub use orchestrator::{JobOrchestrator, RunOutcome};

use crate::crawl::{ContentKind, CrawlError};
use crate::fetch::FetchError;
use crate::storage::StorageError;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unit of scheduled work, one per platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    CrawlQa,
    CrawlCommunity,
}

impl TaskType {
    pub const ALL: [TaskType; 2] = [TaskType::CrawlQa, TaskType::CrawlCommunity];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CrawlQa => "crawl-qa",
            TaskType::CrawlCommunity => "crawl-community",
        }
    }

    /// Subscription kinds a run of this task walks
    pub fn kinds(&self) -> &'static [ContentKind] {
        match self {
            TaskType::CrawlQa => &[ContentKind::Post, ContentKind::Article],
            TaskType::CrawlCommunity => &[ContentKind::Note],
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JobError::UnknownTask(s.to_string()))
    }
}

/// Options of one run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Continue the running job of this task type instead of refusing to start
    pub resume: bool,
    /// Source keys to crawl; empty or `*` means all
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Only crawl sources ordered after this key
    pub last_crawled: Option<String>,
}

/// Errors that prevent a run from starting or recording its state
#[derive(Debug, Error)]
pub enum JobError {
    #[error("A {task_type} job is already running ({job_id})")]
    AlreadyRunning { task_type: TaskType, job_id: String },

    #[error("Unknown task type '{0}'")]
    UnknownTask(String),

    #[error("No list source registered for kind {0}")]
    NoSourceForKind(ContentKind),

    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl JobError {
    /// The fetch failure behind a crawl error, if any
    pub fn as_fetch(&self) -> Option<&FetchError> {
        match self {
            JobError::Crawl(e) => e.as_fetch(),
            _ => None,
        }
    }
}
