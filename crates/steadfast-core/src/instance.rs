//! Check-in instances, one per firing of a schedule.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, MAX_TEXT_CHARS, Result, schedule::CheckInSchedule};

/// Answers keyed by the zero-based index into the question snapshot.
pub type Responses = BTreeMap<usize, String>;

// ─── Status ──────────────────────────────────────────────────────────────────

/// Lifecycle of a check-in instance.
///
/// ```text
/// Pending ──▶ Sent ──▶ Completed
///    │          └────▶ Missed
///    └───────────────▶ Missed   (never dispatched before the retry ceiling)
/// ```
///
/// `Completed` and `Missed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInStatus {
  Pending,
  Sent,
  Completed,
  Missed,
}

impl CheckInStatus {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Completed | Self::Missed) }

  /// Whether the state machine permits `self → to`.
  pub fn can_transition_to(self, to: Self) -> bool {
    matches!(
      (self, to),
      (Self::Pending, Self::Sent)
        | (Self::Pending, Self::Missed)
        | (Self::Sent, Self::Completed)
        | (Self::Sent, Self::Missed)
    )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Sent => "sent",
      Self::Completed => "completed",
      Self::Missed => "missed",
    }
  }
}

impl fmt::Display for CheckInStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// ─── Instance ────────────────────────────────────────────────────────────────

/// A single owed check-in. Exactly one exists per `(schedule_id, due_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInInstance {
  pub instance_id:        Uuid,
  pub schedule_id:        Uuid,
  pub due_at:             DateTime<Utc>,
  /// `None` until the dispatcher has accepted the notification.
  pub sent_at:            Option<DateTime<Utc>>,
  pub responded_at:       Option<DateTime<Utc>>,
  /// The schedule's questions, frozen when the instance was created.
  pub questions_snapshot: Vec<String>,
  pub responses:          Responses,
  pub status:             CheckInStatus,
}

impl CheckInInstance {
  /// A fresh `Pending` instance for the schedule's current cursor.
  pub fn pending_for(schedule: &CheckInSchedule) -> Self {
    Self {
      instance_id:        Uuid::new_v4(),
      schedule_id:        schedule.schedule_id,
      due_at:             schedule.next_scheduled_at,
      sent_at:            None,
      responded_at:       None,
      questions_snapshot: schedule.questions.clone(),
      responses:          Responses::new(),
      status:             CheckInStatus::Pending,
    }
  }
}

/// Check submitted answers against the question snapshot: every key must
/// index a question and every answer is capped at [`MAX_TEXT_CHARS`].
pub fn validate_responses(questions: &[String], responses: &Responses) -> Result<()> {
  if responses.is_empty() {
    return Err(Error::InvalidInput("at least one answer is required".into()));
  }
  for (index, answer) in responses {
    if *index >= questions.len() {
      return Err(Error::InvalidInput(format!(
        "answer for question {index}, but only {} questions were asked",
        questions.len()
      )));
    }
    if answer.chars().count() > MAX_TEXT_CHARS {
      return Err(Error::InvalidInput(format!(
        "answer {index} exceeds {MAX_TEXT_CHARS} characters"
      )));
    }
  }
  Ok(())
}
