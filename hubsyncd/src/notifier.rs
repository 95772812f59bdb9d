use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use url::Url;

use crate::config::DaemonConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook answered {0}")]
    Status(StatusCode),
    #[error("timestamp formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

/// Fire-and-forget delivery of operator notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title, body, "notification");
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    body: &'a str,
    sent_at: String,
}

/// Posts `{title, body, sent_at}` as JSON to a webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            http: Client::new(),
            url: Url::parse(url)?,
        })
    }

    pub async fn deliver(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            title,
            body,
            sent_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
        };
        let response = self
            .http
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status()));
        }
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title, "sending notification");
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(title, "no runtime available, notification dropped");
            return;
        };
        let notifier = self.clone();
        let title = title.to_string();
        let body = body.to_string();
        runtime.spawn(async move {
            if let Err(err) = notifier.deliver(&title, &body).await {
                warn!(title = %title, error = %err, "notification delivery failed");
            }
        });
    }
}

pub fn from_config(config: &DaemonConfig) -> Arc<dyn Notifier> {
    match config.webhook_url.as_deref() {
        Some(url) => match WebhookNotifier::new(url) {
            Ok(notifier) => Arc::new(notifier),
            Err(err) => {
                warn!(url, error = %err, "invalid webhook url, notifications go to the log");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub(crate) fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(title, _)| title.clone())
            .collect()
    }

    pub(crate) fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, body: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}
