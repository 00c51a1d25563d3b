//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use rss_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvester.toml")).unwrap();
//! println!("Community retries: {}", config.community.max_retry);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CommunityPlatformConfig, Config, CrawlConfig, NotifyConfig, ObjectsConfig, QaPlatformConfig,
    StorageConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
