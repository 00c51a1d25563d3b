//! Operator notifications
//!
//! Notifications are best effort: `notice_with_log` logs a failed delivery and
//! moves on, so a broken notifier never stops a crawl.

use crate::config::NotifyConfig;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use thiserror::Error;

/// Errors from a notifier
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("notification endpoint returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}

/// Pushes notifications to a Bark endpoint: `GET {base}/{title}/{body}`
pub struct BarkNotifier {
    client: Client,
    base_url: String,
}

impl BarkNotifier {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

fn encode_segment(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[async_trait]
impl Notifier for BarkNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            encode_segment(title),
            encode_segment(body)
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Notifier used when no push endpoint is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        tracing::warn!("[notice] {}: {}", title, body);
        Ok(())
    }
}

/// Bark when an endpoint is configured, the log otherwise
pub fn build_notifier(client: Client, config: &NotifyConfig) -> Arc<dyn Notifier> {
    match &config.bark_url {
        Some(url) => Arc::new(BarkNotifier::new(client, url.clone())),
        None => Arc::new(LogNotifier),
    }
}

/// Sends a notification, logging instead of returning delivery failures
pub async fn notice_with_log(notifier: &dyn Notifier, title: &str, body: &str) {
    tracing::info!("Sending notification: {}", title);
    if let Err(e) = notifier.notify(title, body).await {
        tracing::error!("Failed to send notification '{}': {}", title, e);
    }
}

/// Keeps every notification for assertions
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub(crate) fn titles(&self) -> Vec<String> {
        self.sent().into_iter().map(|(t, _)| t).collect()
    }

    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}
