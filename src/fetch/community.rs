//! Requester for the cookie-authenticated paid community
//!
//! The platform answers `200` even on failure and reports the outcome in the
//! envelope: `{"succeeded": bool, "code": int, ...}`. Code `1059` means the
//! platform is busy and the request is retried after a pause; code `401` means the
//! cookie is no longer accepted.

use crate::config::CommunityPlatformConfig;
use crate::crawl::CrawlContext;
use crate::fetch::client::{plain_stream, read_body};
use crate::fetch::{Attempt, FetchError, MediaStream, RateLimiter, Requester, RetryEnvelope};
use crate::signing::CredentialKind;
use crate::storage::CredentialStore;
use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const CODE_BUSY: i64 = 1059;
const CODE_INVALID_COOKIE: i64 = 401;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    succeeded: bool,
    #[serde(default)]
    code: i64,
}

/// Cookie-authenticated, rate-limited requester for the community platform
pub struct CommunityRequester {
    client: Client,
    envelope: RetryEnvelope,
    stream_envelope: RetryEnvelope,
    credentials: Arc<dyn CredentialStore>,
    busy_backoff: Duration,
    request_timeout: Duration,
}

impl CommunityRequester {
    /// Creates a requester and starts its permit generator
    pub fn new(
        client: Client,
        config: &CommunityPlatformConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let limiter = RateLimiter::spawn(config.interval(), config.jitter());

        Self {
            client,
            envelope: RetryEnvelope::new(Some(limiter), config.max_retry),
            stream_envelope: RetryEnvelope::new(None, config.max_retry),
            credentials,
            busy_backoff: config.busy_backoff(),
            request_timeout: config.request_timeout(),
        }
    }

    async fn attempt(&self, url: &str, cookie: &str, request_id: &str) -> Attempt<Vec<u8>> {
        let request = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .header(COOKIE, cookie);
        let response = match request.send().await {
            Ok(response) => response,
            Err(source) => {
                return Attempt::Retry(FetchError::Transport {
                    url: url.to_string(),
                    source,
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Attempt::Retry(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = match read_body(url, response).await {
            Attempt::Done(body) => body,
            other => return other,
        };

        let envelope: Envelope = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                return Attempt::Retry(FetchError::BadResponse {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        if envelope.succeeded {
            return Attempt::Done(body);
        }

        match envelope.code {
            CODE_BUSY => {
                tracing::info!(
                    "[{}] platform busy, backing off for {:?}",
                    request_id,
                    self.busy_backoff
                );
                tokio::time::sleep(self.busy_backoff).await;
                Attempt::Retry(FetchError::Busy {
                    url: url.to_string(),
                })
            }
            CODE_INVALID_COOKIE => Attempt::Fail(FetchError::InvalidCookie),
            code => Attempt::Retry(FetchError::BadResponse {
                url: url.to_string(),
                reason: format!("request not succeeded, code {}", code),
            }),
        }
    }
}

#[async_trait]
impl Requester for CommunityRequester {
    async fn limit_raw(&self, url: &str, ctx: &CrawlContext) -> Result<Vec<u8>, FetchError> {
        let cookie = self
            .credentials
            .get_credential(CredentialKind::CommunityCookie)?
            .ok_or(FetchError::MissingCredential(CredentialKind::CommunityCookie))?;
        let task_id = CrawlContext::new_task_id();

        let cookie = cookie.as_str();
        let task_id = task_id.as_str();

        self.envelope
            .execute(url, |attempt| async move {
                let request_id = CrawlContext::request_id(task_id, attempt);
                tracing::debug!("[{}] GET {} ({})", request_id, url, ctx.source_key);
                self.attempt(url, cookie, &request_id).await
            })
            .await
    }

    async fn stream(&self, url: &str, ctx: &CrawlContext) -> Result<MediaStream, FetchError> {
        plain_stream(&self.client, &self.stream_envelope, url, ctx).await
    }
}
