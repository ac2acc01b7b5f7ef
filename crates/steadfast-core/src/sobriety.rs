//! Sobriety records and the append-only relapse log.
//!
//! Streak figures are never stored on these records; they are derived on read
//! by [`crate::streak::compute_stats`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, MAX_TEXT_CHARS, Result};

/// Tracks sobriety from one substance for one user. At most one active record
/// exists per `(user_id, substance_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SobrietyDate {
  pub sobriety_date_id: Uuid,
  pub user_id:          Uuid,
  pub substance_type:   String,
  pub start_date:       DateTime<Utc>,
  pub is_active:        bool,
  pub created_at:       DateTime<Utc>,
}

/// Input to sobriety-record creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSobrietyDate {
  pub user_id:        Uuid,
  pub substance_type: String,
  pub start_date:     DateTime<Utc>,
}

impl NewSobrietyDate {
  pub fn into_record(self, now: DateTime<Utc>) -> Result<SobrietyDate> {
    let substance_type = self.substance_type.trim().to_lowercase();
    if substance_type.is_empty() {
      return Err(Error::InvalidInput("substance_type must not be blank".into()));
    }
    if self.start_date > now {
      return Err(Error::InvalidInput("start_date cannot be in the future".into()));
    }
    Ok(SobrietyDate {
      sobriety_date_id: Uuid::new_v4(),
      user_id: self.user_id,
      substance_type,
      start_date: self.start_date,
      is_active: true,
      created_at: now,
    })
  }
}

/// A recorded relapse. Never updated except to flag that the sponsor was told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relapse {
  pub relapse_id:       Uuid,
  pub sobriety_date_id: Uuid,
  pub relapse_date:     DateTime<Utc>,
  /// Private to the user; never included in sponsor notifications.
  pub note:             Option<String>,
  /// Optional free-form tag describing what preceded the relapse.
  pub trigger_context:  Option<String>,
  pub sponsor_notified: bool,
  pub recorded_at:      DateTime<Utc>,
}

/// Input to relapse recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelapse {
  pub relapse_date:    DateTime<Utc>,
  #[serde(default)]
  pub note:            Option<String>,
  #[serde(default)]
  pub trigger_context: Option<String>,
  /// Ask the engine to alert the user's sponsor.
  #[serde(default)]
  pub notify_sponsor:  bool,
}

impl NewRelapse {
  /// Validate against the parent record and build the log entry.
  ///
  /// A relapse dated before the record's start violates the log's ordering
  /// and fails with [`Error::InvalidState`].
  pub fn into_relapse(self, parent: &SobrietyDate, now: DateTime<Utc>) -> Result<Relapse> {
    if self.relapse_date < parent.start_date {
      return Err(Error::InvalidState(format!(
        "relapse date {} precedes start date {}",
        self.relapse_date, parent.start_date
      )));
    }
    if self.relapse_date > now {
      return Err(Error::InvalidInput("relapse_date cannot be in the future".into()));
    }
    let note = non_blank(self.note);
    if note.as_ref().is_some_and(|n| n.chars().count() > MAX_TEXT_CHARS) {
      return Err(Error::InvalidInput(format!(
        "note exceeds {MAX_TEXT_CHARS} characters"
      )));
    }
    Ok(Relapse {
      relapse_id: Uuid::new_v4(),
      sobriety_date_id: parent.sobriety_date_id,
      relapse_date: self.relapse_date,
      note,
      trigger_context: non_blank(self.trigger_context),
      sponsor_notified: false,
      recorded_at: now,
    })
  }
}

fn non_blank(s: Option<String>) -> Option<String> {
  s.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}
