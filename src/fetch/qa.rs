//! Requester for the signed Q&A platform
//!
//! Every API request is signed by a service picked from the signing pool. The
//! session cookies are read from the credential store once per logical call.
//!
//! # Status routing
//!
//! | Response | Outcome |
//! |----------|---------|
//! | 2xx | body |
//! | 401 | `NeedLogin` |
//! | 403 with `error.need_login` | `NeedLogin` |
//! | 403 with `error.code == 40362` | `InvalidSignatureCookie` |
//! | other 403 | signer failure, retry |
//! | 404 | `Unreachable` |
//! | anything else | retry |

use crate::config::QaPlatformConfig;
use crate::crawl::CrawlContext;
use crate::fetch::client::{plain_stream, read_body};
use crate::fetch::{Attempt, FetchError, MediaStream, RateLimiter, Requester, RetryEnvelope};
use crate::signing::{CredentialKind, SignRequest, SignerEntry, SigningClient, SigningPool};
use crate::storage::CredentialStore;
use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const ZSE_93: &str = "101_3_3.0";
const SIGNATURE_COOKIE_REJECTED: i64 = 40362;

#[derive(Debug, Deserialize)]
struct ForbiddenBody {
    #[serde(default)]
    error: ForbiddenDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ForbiddenDetail {
    #[serde(default)]
    need_login: bool,
    #[serde(default)]
    code: i64,
}

enum Forbidden {
    NeedLogin,
    SignatureCookie,
    Signature,
}

fn classify_forbidden(body: &[u8]) -> Forbidden {
    match serde_json::from_slice::<ForbiddenBody>(body) {
        Ok(b) if b.error.need_login => Forbidden::NeedLogin,
        Ok(b) if b.error.code == SIGNATURE_COOKIE_REJECTED => Forbidden::SignatureCookie,
        _ => Forbidden::Signature,
    }
}

struct QaCookies {
    device: Option<String>,
    session: String,
    signature: Option<String>,
}

impl QaCookies {
    fn load(store: &dyn CredentialStore) -> Result<Self, FetchError> {
        let session = store
            .get_credential(CredentialKind::QaSession)?
            .ok_or(FetchError::MissingCredential(CredentialKind::QaSession))?;

        Ok(Self {
            device: store.get_credential(CredentialKind::QaDevice)?,
            session,
            signature: store.get_credential(CredentialKind::QaSignatureCookie)?,
        })
    }

    fn header(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(device) = &self.device {
            parts.push(format!("d_c0={}", device));
        }
        parts.push(format!("z_c0={}", self.session));
        if let Some(signature) = &self.signature {
            parts.push(format!("__zse_ck={}", signature));
        }
        parts.join("; ")
    }
}

/// Path and query as the signing service expects them
fn signing_path(url: &str) -> Result<String, FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    Ok(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}

/// Signed, rate-limited requester for the Q&A platform
pub struct QaRequester {
    client: Client,
    envelope: RetryEnvelope,
    stream_envelope: RetryEnvelope,
    pool: Arc<SigningPool>,
    signer: SigningClient,
    credentials: Arc<dyn CredentialStore>,
    failure_streak: u32,
    request_timeout: Duration,
}

impl QaRequester {
    /// Creates a requester and starts its permit generator
    pub fn new(
        client: Client,
        config: &QaPlatformConfig,
        pool: Arc<SigningPool>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let limiter = RateLimiter::spawn(config.interval(), config.jitter());

        Self {
            signer: SigningClient::new(client.clone(), config.request_timeout()),
            client,
            envelope: RetryEnvelope::new(Some(limiter), config.max_retry),
            stream_envelope: RetryEnvelope::new(None, config.max_retry),
            pool,
            credentials,
            failure_streak: config.signer_failure_streak.max(1),
            request_timeout: config.request_timeout(),
        }
    }

    fn signer_failed(&self, signer: &SignerEntry, streaks: &Mutex<HashMap<String, u32>>) {
        self.pool.record_failed(signer);

        let streak = match streaks.lock() {
            Ok(mut map) => {
                let count = map.entry(signer.id.clone()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => self.failure_streak,
        };

        if streak >= self.failure_streak {
            tracing::warn!(
                "Signing service {} failed {} times in a row, marking unavailable",
                signer.slug,
                streak
            );
            self.pool.mark_unavailable(signer);
        }
    }

    fn signer_succeeded(&self, signer: &SignerEntry, streaks: &Mutex<HashMap<String, u32>>) {
        if let Ok(mut map) = streaks.lock() {
            map.remove(&signer.id);
        }
    }

    async fn attempt(
        &self,
        url: &str,
        path: &str,
        cookies: &QaCookies,
        request_id: &str,
        streaks: &Mutex<HashMap<String, u32>>,
    ) -> Attempt<reqwest::Response> {
        let signer = match self.pool.select() {
            Ok(signer) => signer,
            Err(e) if e.is_exhausted() => {
                tracing::error!("[{}] cannot sign {}: {}", request_id, url, e);
                return Attempt::Fail(FetchError::NoAvailableSigner);
            }
            Err(e) => return Attempt::Retry(e.into()),
        };
        self.pool.record_used(&signer);

        let sign_request = SignRequest {
            request_id,
            path,
            d_c0: cookies.device.as_deref(),
            z_c0: &cookies.session,
            zse_ck: cookies.signature.as_deref(),
        };
        let signature = match self.signer.sign(&signer.url, &sign_request).await {
            Ok(signature) => signature,
            Err(e) => {
                self.signer_failed(&signer, streaks);
                return Attempt::Retry(e.into());
            }
        };

        let response = match self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .header("x-zse-93", ZSE_93)
            .header("x-zse-96", format!("2.0_{}", signature))
            .header(COOKIE, cookies.header())
            .send()
            .await
        {
            Ok(response) => response,
            Err(source) => {
                return Attempt::Retry(FetchError::Transport {
                    url: url.to_string(),
                    source,
                })
            }
        };

        match response.status() {
            s if s.is_success() => {
                self.signer_succeeded(&signer, streaks);
                Attempt::Done(response)
            }
            StatusCode::UNAUTHORIZED => Attempt::Fail(FetchError::NeedLogin),
            StatusCode::FORBIDDEN => {
                let body = response.bytes().await.unwrap_or_default();
                match classify_forbidden(&body) {
                    Forbidden::NeedLogin => Attempt::Fail(FetchError::NeedLogin),
                    Forbidden::SignatureCookie => Attempt::Fail(FetchError::InvalidSignatureCookie),
                    Forbidden::Signature => {
                        tracing::warn!(
                            "[{}] signature from {} rejected",
                            request_id,
                            signer.slug
                        );
                        self.signer_failed(&signer, streaks);
                        Attempt::Retry(FetchError::Status {
                            url: url.to_string(),
                            status: 403,
                        })
                    }
                }
            }
            StatusCode::NOT_FOUND => Attempt::Fail(FetchError::Unreachable(url.to_string())),
            s => Attempt::Retry(FetchError::Status {
                url: url.to_string(),
                status: s.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl Requester for QaRequester {
    async fn limit_raw(&self, url: &str, ctx: &CrawlContext) -> Result<Vec<u8>, FetchError> {
        let cookies = QaCookies::load(self.credentials.as_ref())?;
        let path = signing_path(url)?;
        let task_id = CrawlContext::new_task_id();
        let streaks = Mutex::new(HashMap::new());

        let cookies = &cookies;
        let path = path.as_str();
        let task_id = task_id.as_str();
        let streaks = &streaks;

        self.envelope
            .execute(url, |attempt| async move {
                let request_id = CrawlContext::request_id(task_id, attempt);
                tracing::debug!("[{}] GET {} ({})", request_id, url, ctx.source_key);

                match self.attempt(url, path, cookies, &request_id, streaks).await {
                    Attempt::Done(response) => read_body(url, response).await,
                    Attempt::Retry(e) => Attempt::Retry(e),
                    Attempt::Fail(e) => Attempt::Fail(e),
                }
            })
            .await
    }

    async fn stream(&self, url: &str, ctx: &CrawlContext) -> Result<MediaStream, FetchError> {
        plain_stream(&self.client, &self.stream_envelope, url, ctx).await
    }
}
