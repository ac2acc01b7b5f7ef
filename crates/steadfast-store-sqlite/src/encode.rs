//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 UTC strings. Question
//! lists and responses are stored as compact JSON. UUIDs are stored as
//! hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use steadfast_core::{
  instance::{CheckInInstance, CheckInStatus, Responses},
  schedule::{CheckInSchedule, Recurrence, RecurrenceKind},
  sobriety::{Relapse, SobrietyDate},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Recurrence ──────────────────────────────────────────────────────────────

pub fn encode_recurrence_kind(k: RecurrenceKind) -> &'static str {
  match k {
    RecurrenceKind::Daily => "daily",
    RecurrenceKind::Weekly => "weekly",
    RecurrenceKind::Custom => "custom",
  }
}

pub fn decode_recurrence(kind: &str, custom_interval_days: Option<u32>) -> Result<Recurrence> {
  let kind = match kind {
    "daily" => RecurrenceKind::Daily,
    "weekly" => RecurrenceKind::Weekly,
    "custom" => RecurrenceKind::Custom,
    other => {
      return Err(Error::Decode { column: "recurrence", value: other.to_owned() });
    }
  };
  Ok(Recurrence::from_parts(kind, custom_interval_days)?)
}

// ─── CheckInStatus ───────────────────────────────────────────────────────────

pub fn encode_status(s: CheckInStatus) -> &'static str { s.as_str() }

pub fn decode_status(s: &str) -> Result<CheckInStatus> {
  match s {
    "pending" => Ok(CheckInStatus::Pending),
    "sent" => Ok(CheckInStatus::Sent),
    "completed" => Ok(CheckInStatus::Completed),
    "missed" => Ok(CheckInStatus::Missed),
    other => Err(Error::Decode { column: "status", value: other.to_owned() }),
  }
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_questions(q: &[String]) -> Result<String> { Ok(serde_json::to_string(q)?) }

pub fn encode_responses(r: &Responses) -> Result<String> { Ok(serde_json::to_string(r)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawSchedule::from_row`].
pub const SCHEDULE_COLUMNS: &str = "schedule_id, owner_id, recurrence, custom_interval_days,
  time_of_day, timezone, questions, next_scheduled_at, last_sent_at,
  consecutive_misses, escalation_raised, is_active, created_at";

/// Raw values read directly from a `schedules` row.
pub struct RawSchedule {
  pub schedule_id:          String,
  pub owner_id:             String,
  pub recurrence:           String,
  pub custom_interval_days: Option<u32>,
  pub time_of_day:          String,
  pub timezone:             String,
  pub questions:            String,
  pub next_scheduled_at:    String,
  pub last_sent_at:         Option<String>,
  pub consecutive_misses:   u32,
  pub escalation_raised:    bool,
  pub is_active:            bool,
  pub created_at:           String,
}

impl RawSchedule {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      schedule_id:          row.get(0)?,
      owner_id:             row.get(1)?,
      recurrence:           row.get(2)?,
      custom_interval_days: row.get(3)?,
      time_of_day:          row.get(4)?,
      timezone:             row.get(5)?,
      questions:            row.get(6)?,
      next_scheduled_at:    row.get(7)?,
      last_sent_at:         row.get(8)?,
      consecutive_misses:   row.get(9)?,
      escalation_raised:    row.get(10)?,
      is_active:            row.get(11)?,
      created_at:           row.get(12)?,
    })
  }

  pub fn into_schedule(self) -> Result<CheckInSchedule> {
    let timezone: Tz = self
      .timezone
      .parse()
      .map_err(|_| Error::Decode { column: "timezone", value: self.timezone.clone() })?;

    Ok(CheckInSchedule {
      schedule_id:        decode_uuid(&self.schedule_id)?,
      owner_id:           decode_uuid(&self.owner_id)?,
      recurrence:         decode_recurrence(&self.recurrence, self.custom_interval_days)?,
      time_of_day:        self.time_of_day.parse()?,
      timezone,
      questions:          serde_json::from_str(&self.questions)?,
      next_scheduled_at:  decode_dt(&self.next_scheduled_at)?,
      last_sent_at:       decode_opt_dt(self.last_sent_at)?,
      consecutive_misses: self.consecutive_misses,
      escalation_raised:  self.escalation_raised,
      is_active:          self.is_active,
      created_at:         decode_dt(&self.created_at)?,
    })
  }
}

/// Column list matching [`RawInstance::from_row`].
pub const INSTANCE_COLUMNS: &str =
  "instance_id, schedule_id, due_at, sent_at, responded_at, questions, responses, status";

/// Raw values read directly from a `check_in_instances` row.
pub struct RawInstance {
  pub instance_id:  String,
  pub schedule_id:  String,
  pub due_at:       String,
  pub sent_at:      Option<String>,
  pub responded_at: Option<String>,
  pub questions:    String,
  pub responses:    String,
  pub status:       String,
}

impl RawInstance {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      instance_id:  row.get(0)?,
      schedule_id:  row.get(1)?,
      due_at:       row.get(2)?,
      sent_at:      row.get(3)?,
      responded_at: row.get(4)?,
      questions:    row.get(5)?,
      responses:    row.get(6)?,
      status:       row.get(7)?,
    })
  }

  pub fn into_instance(self) -> Result<CheckInInstance> {
    Ok(CheckInInstance {
      instance_id:        decode_uuid(&self.instance_id)?,
      schedule_id:        decode_uuid(&self.schedule_id)?,
      due_at:             decode_dt(&self.due_at)?,
      sent_at:            decode_opt_dt(self.sent_at)?,
      responded_at:       decode_opt_dt(self.responded_at)?,
      questions_snapshot: serde_json::from_str(&self.questions)?,
      responses:          serde_json::from_str(&self.responses)?,
      status:             decode_status(&self.status)?,
    })
  }
}

/// Column list matching [`RawSobrietyDate::from_row`].
pub const SOBRIETY_COLUMNS: &str =
  "sobriety_date_id, user_id, substance_type, start_date, is_active, created_at";

pub struct RawSobrietyDate {
  pub sobriety_date_id: String,
  pub user_id:          String,
  pub substance_type:   String,
  pub start_date:       String,
  pub is_active:        bool,
  pub created_at:       String,
}

impl RawSobrietyDate {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      sobriety_date_id: row.get(0)?,
      user_id:          row.get(1)?,
      substance_type:   row.get(2)?,
      start_date:       row.get(3)?,
      is_active:        row.get(4)?,
      created_at:       row.get(5)?,
    })
  }

  pub fn into_record(self) -> Result<SobrietyDate> {
    Ok(SobrietyDate {
      sobriety_date_id: decode_uuid(&self.sobriety_date_id)?,
      user_id:          decode_uuid(&self.user_id)?,
      substance_type:   self.substance_type,
      start_date:       decode_dt(&self.start_date)?,
      is_active:        self.is_active,
      created_at:       decode_dt(&self.created_at)?,
    })
  }
}

/// Column list matching [`RawRelapse::from_row`].
pub const RELAPSE_COLUMNS: &str = "relapse_id, sobriety_date_id, relapse_date, note,
  trigger_context, sponsor_notified, recorded_at";

pub struct RawRelapse {
  pub relapse_id:       String,
  pub sobriety_date_id: String,
  pub relapse_date:     String,
  pub note:             Option<String>,
  pub trigger_context:  Option<String>,
  pub sponsor_notified: bool,
  pub recorded_at:      String,
}

impl RawRelapse {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      relapse_id:       row.get(0)?,
      sobriety_date_id: row.get(1)?,
      relapse_date:     row.get(2)?,
      note:             row.get(3)?,
      trigger_context:  row.get(4)?,
      sponsor_notified: row.get(5)?,
      recorded_at:      row.get(6)?,
    })
  }

  pub fn into_relapse(self) -> Result<Relapse> {
    Ok(Relapse {
      relapse_id:       decode_uuid(&self.relapse_id)?,
      sobriety_date_id: decode_uuid(&self.sobriety_date_id)?,
      relapse_date:     decode_dt(&self.relapse_date)?,
      note:             self.note,
      trigger_context:  self.trigger_context,
      sponsor_notified: self.sponsor_notified,
      recorded_at:      decode_dt(&self.recorded_at)?,
    })
  }
}
