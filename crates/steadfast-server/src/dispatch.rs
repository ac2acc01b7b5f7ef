//! [`NotificationDispatcher`] implementations selected by configuration.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use steadfast_core::notify::{Notification, NotificationDispatcher};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
  #[error("webhook request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("webhook responded with {0}")]
  Status(reqwest::StatusCode),
}

// ─── Webhook ──────────────────────────────────────────────────────────────────

/// Body of each webhook request.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
  recipient:    Uuid,
  notification: &'a Notification,
}

/// POSTs every notification as JSON to a single URL. Any non-2xx response is
/// a failed delivery.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
  client: Client,
  url:    String,
}

impl WebhookDispatcher {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, url: url.into() })
  }

  pub fn url(&self) -> &str { &self.url }
}

impl NotificationDispatcher for WebhookDispatcher {
  type Error = DispatchError;

  async fn send(&self, recipient: Uuid, notification: Notification) -> Result<(), DispatchError> {
    let resp = self
      .client
      .post(&self.url)
      .json(&Envelope { recipient, notification: &notification })
      .send()
      .await?;

    let status = resp.status();
    if !status.is_success() {
      return Err(DispatchError::Status(status));
    }
    info!(%recipient, kind = notification.kind(), "notification delivered");
    Ok(())
  }
}

// ─── Log only ─────────────────────────────────────────────────────────────────

/// Writes each notification to the log and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
  type Error = DispatchError;

  async fn send(&self, recipient: Uuid, notification: Notification) -> Result<(), DispatchError> {
    let payload = serde_json::to_string(&notification).unwrap_or_default();
    info!(%recipient, kind = notification.kind(), %payload, "notification (log only)");
    Ok(())
  }
}

// ─── Selection ────────────────────────────────────────────────────────────────

/// The dispatcher chosen at startup.
#[derive(Debug, Clone)]
pub enum ConfiguredDispatcher {
  Webhook(WebhookDispatcher),
  Log(LogDispatcher),
}

impl ConfiguredDispatcher {
  /// A webhook dispatcher when `webhook_url` is set, the log dispatcher
  /// otherwise.
  pub fn from_config(webhook_url: Option<&str>, timeout: Duration) -> Result<Self, DispatchError> {
    match webhook_url {
      Some(url) => Ok(Self::Webhook(WebhookDispatcher::new(url, timeout)?)),
      None => Ok(Self::Log(LogDispatcher)),
    }
  }
}

impl NotificationDispatcher for ConfiguredDispatcher {
  type Error = DispatchError;

  async fn send(&self, recipient: Uuid, notification: Notification) -> Result<(), DispatchError> {
    match self {
      Self::Webhook(d) => d.send(recipient, notification).await,
      Self::Log(d) => d.send(recipient, notification).await,
    }
  }
}
