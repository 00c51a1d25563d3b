//! Per-pass crawl context
//!
//! A `CrawlContext` names the job, source and pass a piece of work belongs to. It is
//! passed by reference down the call chain and turned into a tracing span, so every
//! log line emitted below the orchestrator carries the same identifiers.

use tracing::Span;
use uuid::Uuid;

/// Identifiers attached to every log line of one crawl pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlContext {
    pub job_id: String,
    pub source_key: String,
    pub pass_id: String,
}

impl CrawlContext {
    /// Creates a context with a fresh pass id
    pub fn new(job_id: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            source_key: source_key.into(),
            pass_id: short_id(),
        }
    }

    /// Same job and source, new pass id (used when a backfill follows a forward pass)
    pub fn next_pass(&self) -> Self {
        Self {
            job_id: self.job_id.clone(),
            source_key: self.source_key.clone(),
            pass_id: short_id(),
        }
    }

    /// Context for work that runs outside a job, such as CLI one-offs
    pub fn detached(source_key: impl Into<String>) -> Self {
        Self::new("-", source_key)
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "crawl",
            job = %self.job_id,
            source = %self.source_key,
            pass = %self.pass_id
        )
    }

    /// Request id logged for one attempt of one logical request
    pub fn request_id(task_id: &str, attempt: u32) -> String {
        format!("{}_{}", task_id, attempt)
    }

    /// Fresh id for one logical request, shared by all of its attempts
    pub fn new_task_id() -> String {
        short_id()
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}
