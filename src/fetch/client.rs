//! The `Requester` capability and shared HTTP plumbing

use crate::config::UserAgentConfig;
use crate::crawl::CrawlContext;
use crate::fetch::{Attempt, FetchError, RetryEnvelope};
use crate::objects::ChunkSource;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// A streamed response body with its declared length
pub struct MediaStream {
    pub body: Box<dyn ChunkSource>,
    pub size: Option<u64>,
}

/// What crawl state machines use to talk to a platform
///
/// Implementations wrap the rate limiter, the retry envelope and the platform's
/// authentication, and classify failures into `FetchError`s.
#[async_trait]
pub trait Requester: Send + Sync {
    /// Rate-limited, retried GET returning the full body
    async fn limit_raw(&self, url: &str, ctx: &CrawlContext) -> Result<Vec<u8>, FetchError>;

    /// Retried GET returning the body as a stream, without waiting for a permit
    async fn stream(&self, url: &str, ctx: &CrawlContext) -> Result<MediaStream, FetchError>;
}

/// Builds an HTTP client with the configured browser identity
///
/// The client carries no total timeout: API calls bound themselves per request
/// and media streams are bounded by the download timeout of the media sink.
///
/// # Arguments
///
/// * `config` - The user agent configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.browser.clone())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Unauthenticated streaming GET used for media downloads
pub(crate) async fn plain_stream(
    client: &Client,
    envelope: &RetryEnvelope,
    url: &str,
    ctx: &CrawlContext,
) -> Result<MediaStream, FetchError> {
    let task_id = CrawlContext::new_task_id();
    let task_id = task_id.as_str();

    envelope
        .execute(url, |attempt| {
            async move {
                tracing::debug!(
                    "[{}] streaming {} ({})",
                    CrawlContext::request_id(task_id, attempt),
                    url,
                    ctx.source_key
                );

                let response = match client.get(url).send().await {
                    Ok(r) => r,
                    Err(source) => {
                        return Attempt::Retry(FetchError::Transport {
                            url: url.to_string(),
                            source,
                        })
                    }
                };

                match response.status() {
                    s if s.is_success() => {
                        let size = response.content_length();
                        Attempt::Done(MediaStream {
                            body: Box::new(response),
                            size,
                        })
                    }
                    StatusCode::NOT_FOUND => Attempt::Fail(FetchError::Unreachable(url.to_string())),
                    s => Attempt::Retry(FetchError::Status {
                        url: url.to_string(),
                        status: s.as_u16(),
                    }),
                }
            }
        })
        .await
}

/// Reads a full body, treating a broken read as retryable
pub(crate) async fn read_body(url: &str, response: reqwest::Response) -> Attempt<Vec<u8>> {
    match response.bytes().await {
        Ok(bytes) => Attempt::Done(bytes.to_vec()),
        Err(source) => Attempt::Retry(FetchError::Transport {
            url: url.to_string(),
            source,
        }),
    }
}
