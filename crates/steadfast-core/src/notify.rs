//! Outbound notifications and the collaborators that deliver them.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the engine asks a dispatcher to deliver.
///
/// Relapse notes are private and are never part of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
  /// A check-in is owed by the recipient.
  CheckInDue {
    instance_id: Uuid,
    schedule_id: Uuid,
    due_at:      DateTime<Utc>,
    questions:   Vec<String>,
  },
  /// The recipient's sponsee has missed several check-ins in a row.
  SponsorEscalation {
    sponsee_id:         Uuid,
    schedule_id:        Uuid,
    consecutive_misses: u32,
  },
  /// The recipient's sponsee recorded a relapse and asked for them to know.
  RelapseAlert {
    sponsee_id:       Uuid,
    sobriety_date_id: Uuid,
    relapse_date:     DateTime<Utc>,
  },
}

impl Notification {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::CheckInDue { .. } => "check_in_due",
      Self::SponsorEscalation { .. } => "sponsor_escalation",
      Self::RelapseAlert { .. } => "relapse_alert",
    }
  }
}

/// Delivery channel for notifications (push, webhook, e-mail, ...).
///
/// The engine calls `send` at most once per intent and treats any error as
/// retryable. Delivery retries and acknowledgement are the implementor's
/// concern; idempotency is the engine's.
pub trait NotificationDispatcher: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn send(
    &self,
    recipient: Uuid,
    notification: Notification,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

/// Lookup of sponsor links, consumed by the escalation and relapse paths.
pub trait SponsorDirectory: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The sponsee's active sponsor, if any. At most one exists.
  fn active_sponsor(
    &self,
    sponsee_id: Uuid,
  ) -> impl Future<Output = Result<Option<Uuid>, Self::Error>> + Send + '_;

  /// Make `sponsor_id` the sponsee's active sponsor, ending any previous link.
  fn link_sponsor(
    &self,
    sponsor_id: Uuid,
    sponsee_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// End the sponsee's active link. Returns `false` if there was none.
  fn unlink_sponsor(
    &self,
    sponsee_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
