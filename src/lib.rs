//! RSS-Harvester: an unattended content harvester
//!
//! This crate continuously harvests content from a signed Q&A/article platform and a
//! cookie-authenticated paid-community platform, normalizes it into text and stores it
//! for downstream feed serving. The interesting parts are the rate-limited, retrying
//! fetch layer, the paginated crawl state machines and the job orchestrator that makes
//! recurring runs idempotent and resumable.

pub mod config;
pub mod crawl;
pub mod fetch;
pub mod jobs;
pub mod notify;
pub mod objects;
pub mod signing;
pub mod storage;

use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] crawl::CrawlError),

    #[error("Job error: {0}")]
    Job(#[from] jobs::JobError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawl::{ContentKind, CrawlContext};
pub use jobs::{JobOrchestrator, RunRequest, TaskType};
pub use storage::{SqliteStorage, Storage};
