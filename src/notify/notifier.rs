//! The `Notifier` contract and its two implementations (spec §3 "Notifier",
//! §4.6 step 6 "Send").

use crate::alert::Alert;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Worth retrying under the Retry stage's backoff (e.g. HTTP 5xx, 429,
    /// connection refused/timeout).
    Retriable(String),
    /// Not worth retrying (e.g. HTTP 4xx other than 429, template error,
    /// misconfigured receiver).
    Fatal(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Retriable(msg) => write!(f, "retriable: {msg}"),
            NotifyError::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// A receiver-side delivery mechanism (spec §3 "Notifier"). Implementations
/// classify their own failures as [`NotifyError::Retriable`] or
/// [`NotifyError::Fatal`] so the Retry stage doesn't have to special-case
/// every transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, alerts: &[Alert]) -> Result<(), NotifyError>;
}

/// Discards every notification; used in tests and as a safe default for
/// receivers not yet wired to a real transport.
pub struct NullNotifier {
    name: String,
    pub sent: Mutex<Vec<Vec<Alert>>>,
}

impl NullNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), sent: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl Notifier for NullNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, alerts: &[Alert]) -> Result<(), NotifyError> {
        self.sent.lock().expect("lock poisoned").push(alerts.to_vec());
        Ok(())
    }
}

/// Delivers via an HTTP webhook, the default receiver kind (spec §4.8).
pub struct HttpNotifier {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self { name: name.into(), url: url.into(), client }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, alerts: &[Alert]) -> Result<(), NotifyError> {
        let payload = super::webhook::WebhookPayload::from_alerts(&self.name, alerts);
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Retriable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(NotifyError::Retriable(format!("http {status}")));
        }
        Err(NotifyError::Fatal(format!("http {status}")))
    }
}
