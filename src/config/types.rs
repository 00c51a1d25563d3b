use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub qa: QaPlatformConfig,
    pub community: CommunityPlatformConfig,
    pub objects: ObjectsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Browser identity sent to both platforms
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    pub browser: String,
}

/// Q&A platform: signed requests, offset pagination
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QaPlatformConfig {
    /// Base URL of the platform API (e.g. "https://www.zhihu.com")
    pub api_base: String,

    /// Items requested per list page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Base interval between two permits (milliseconds)
    pub interval_ms: u64,

    /// Upper bound of the random jitter added to each interval (milliseconds)
    #[serde(default)]
    pub jitter_ms: u64,

    /// Attempts per logical request
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Consecutive failures after which a signing service is marked unavailable
    #[serde(default = "default_failure_streak")]
    pub signer_failure_streak: u32,

    /// Bound on one API or signing request, body included (milliseconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Paid-community platform: cookie auth, time-cursor pagination
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommunityPlatformConfig {
    pub api_base: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    pub interval_ms: u64,

    #[serde(default)]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Pause before retrying when the platform reports it is busy (milliseconds)
    #[serde(default = "default_busy_backoff")]
    pub busy_backoff_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Object storage for images referenced by item text
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ObjectsConfig {
    /// Local directory objects are written into
    pub root: String,

    /// Public prefix under which stored objects are served
    pub assets_domain: String,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

/// Operator notifications
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    /// Bark push endpoint; notifications are only logged when absent
    #[serde(rename = "bark-url")]
    pub bark_url: Option<String>,
}

/// Crawl behaviour switches
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Walk older history after each forward pass until the source is finished
    #[serde(default = "default_true")]
    pub backfill: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self { backfill: true }
    }
}

impl QaPlatformConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl CommunityPlatformConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ObjectsConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn default_page_size() -> u32 {
    20
}

fn default_max_retry() -> u32 {
    5
}

fn default_failure_streak() -> u32 {
    3
}

fn default_busy_backoff() -> u64 {
    10_000
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_download_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}
