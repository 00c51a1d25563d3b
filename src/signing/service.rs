//! Client for the external signing helper
//!
//! A signing helper computes the `x-zse-96` signature the Q&A platform expects on
//! every API request. The helper is reached over HTTP: `POST {base}/sign` with the
//! request path and the cookies that take part in the signature.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from the signing layer
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("no signing service is available")]
    NoneAvailable,

    #[error("no signing service has a usable success rate")]
    AllWeightsZero,

    #[error("signing request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("signing service {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("signing service {url} returned a bad payload: {reason}")]
    BadPayload { url: String, reason: String },
}

impl SignerError {
    /// Whether the pool itself could not produce a signer
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::NoneAvailable | Self::AllWeightsZero)
    }
}

/// Body sent to the signing helper
#[derive(Debug, Serialize)]
pub struct SignRequest<'a> {
    pub request_id: &'a str,
    pub path: &'a str,
    pub d_c0: Option<&'a str>,
    pub z_c0: &'a str,
    pub zse_ck: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: String,
}

/// Thin HTTP client for signing helpers
#[derive(Clone)]
pub struct SigningClient {
    client: Client,
    timeout: Duration,
}

impl SigningClient {
    /// `timeout` bounds each signing request
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Asks the helper at `base_url` to sign one request
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the chosen signing service
    /// * `request` - Path and cookies to sign
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The signature, without the `2.0_` prefix
    /// * `Err(SignerError)` - Transport failure, non-200 status or malformed body
    pub async fn sign(
        &self,
        base_url: &str,
        request: &SignRequest<'_>,
    ) -> Result<String, SignerError> {
        let url = format!("{}/sign", base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|source| SignerError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignerError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body: SignResponse = response.json().await.map_err(|e| SignerError::BadPayload {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        if body.signature.is_empty() {
            return Err(SignerError::BadPayload {
                url,
                reason: "empty signature".to_string(),
            });
        }

        Ok(body.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> SignRequest<'static> {
        SignRequest {
            request_id: "abc_0",
            path: "/api/v4/members/alice/answers?offset=0",
            d_c0: Some("device"),
            z_c0: "session",
            zse_ck: None,
        }
    }

    #[tokio::test]
    async fn test_sign_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .and(body_partial_json(serde_json::json!({"z_c0": "session"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"signature": "xyz"})),
            )
            .mount(&server)
            .await;

        let client = SigningClient::new(Client::new(), Duration::from_secs(5));
        let signature = client.sign(&server.uri(), &request()).await.unwrap();

        assert_eq!(signature, "xyz");
    }

    #[tokio::test]
    async fn test_sign_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = SigningClient::new(Client::new(), Duration::from_secs(5));
        let err = client.sign(&server.uri(), &request()).await.unwrap_err();

        assert!(matches!(err, SignerError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_sign_empty_signature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"signature": ""})),
            )
            .mount(&server)
            .await;

        let client = SigningClient::new(Client::new(), Duration::from_secs(5));
        let err = client.sign(&server.uri(), &request()).await.unwrap_err();

        assert!(matches!(err, SignerError::BadPayload { .. }));
    }
    #[test]
    fn test_exhausted_only_for_pool_errors() {
        assert!(SignerError::NoneAvailable.is_exhausted());
        assert!(SignerError::AllWeightsZero.is_exhausted());
        assert!(!SignerError::Status {
            url: "http://s.local/sign".into(),
            status: 502
        }
        .is_exhausted());
    }
}
