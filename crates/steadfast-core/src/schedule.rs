//! Check-in schedules: a user's recurrence configuration plus the scheduling
//! cursor the due-scan advances.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, MAX_TEXT_CHARS, Result, recurrence};

/// Allowed range for a custom recurrence interval, in days.
pub const CUSTOM_INTERVAL_DAYS: std::ops::RangeInclusive<u32> = 1..=365;

/// Maximum number of questions asked per check-in.
pub const MAX_QUESTIONS: usize = 5;

// ─── Recurrence ──────────────────────────────────────────────────────────────

/// The discriminant of a [`Recurrence`], as accepted from callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceKind {
  Daily,
  Weekly,
  Custom,
}

/// How often a check-in falls due.
///
/// The custom interval only exists on the `Custom` variant, so a daily or
/// weekly schedule can never carry a stray interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Recurrence {
  Daily,
  Weekly,
  Custom { interval_days: u32 },
}

impl Recurrence {
  /// Build a recurrence from the loose form shape (kind + optional interval).
  ///
  /// An interval supplied alongside `daily`/`weekly` is ignored. A missing or
  /// out-of-range interval for `custom` is rejected, never clamped.
  pub fn from_parts(kind: RecurrenceKind, custom_interval_days: Option<u32>) -> Result<Self> {
    let recurrence = match kind {
      RecurrenceKind::Daily => Self::Daily,
      RecurrenceKind::Weekly => Self::Weekly,
      RecurrenceKind::Custom => {
        let interval_days = custom_interval_days.ok_or_else(|| {
          Error::InvalidConfiguration("custom recurrence requires custom_interval_days".into())
        })?;
        Self::Custom { interval_days }
      }
    };
    recurrence.validate()?;
    Ok(recurrence)
  }

  pub fn kind(&self) -> RecurrenceKind {
    match self {
      Self::Daily => RecurrenceKind::Daily,
      Self::Weekly => RecurrenceKind::Weekly,
      Self::Custom { .. } => RecurrenceKind::Custom,
    }
  }

  pub fn custom_interval_days(&self) -> Option<u32> {
    match self {
      Self::Custom { interval_days } => Some(*interval_days),
      _ => None,
    }
  }

  /// Number of calendar days between consecutive occurrences.
  pub fn period_days(&self) -> Result<u32> {
    self.validate()?;
    Ok(match self {
      Self::Daily => 1,
      Self::Weekly => 7,
      Self::Custom { interval_days } => *interval_days,
    })
  }

  pub fn validate(&self) -> Result<()> {
    if let Self::Custom { interval_days } = self
      && !CUSTOM_INTERVAL_DAYS.contains(interval_days)
    {
      return Err(Error::InvalidConfiguration(format!(
        "custom_interval_days must be within 1..=365, got {interval_days}"
      )));
    }
    Ok(())
  }
}

// ─── Time of day ─────────────────────────────────────────────────────────────

/// A local wall-clock time at minute resolution, written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
  hour:   u8,
  minute: u8,
}

impl TimeOfDay {
  pub fn new(hour: u8, minute: u8) -> Result<Self> {
    if hour > 23 || minute > 59 {
      return Err(Error::InvalidConfiguration(format!(
        "time of day out of range: {hour:02}:{minute:02}"
      )));
    }
    Ok(Self { hour, minute })
  }

  pub fn hour(&self) -> u8 { self.hour }

  pub fn minute(&self) -> u8 { self.minute }

  pub fn to_naive_time(self) -> NaiveTime {
    NaiveTime::from_hms_opt(self.hour.into(), self.minute.into(), 0)
      .unwrap_or(NaiveTime::MIN)
  }
}

impl fmt::Display for TimeOfDay {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:02}:{:02}", self.hour, self.minute)
  }
}

impl FromStr for TimeOfDay {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let bad = || Error::InvalidConfiguration(format!("time of day must be HH:MM, got {s:?}"));
    let (h, m) = s.split_once(':').ok_or_else(bad)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
      return Err(bad());
    }
    let hour = h.parse().map_err(|_| bad())?;
    let minute = m.parse().map_err(|_| bad())?;
    Self::new(hour, minute)
  }
}

impl TryFrom<String> for TimeOfDay {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<TimeOfDay> for String {
  fn from(t: TimeOfDay) -> Self { t.to_string() }
}

/// Parse an IANA timezone identifier such as `America/New_York`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
  name
    .parse::<Tz>()
    .map_err(|_| Error::InvalidConfiguration(format!("unknown IANA timezone: {name:?}")))
}

// ─── Miss state ──────────────────────────────────────────────────────────────

/// The escalation-relevant counters on a schedule. Both fields are updated
/// together and only through conditional writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MissState {
  pub consecutive_misses: u32,
  /// Set once a sponsor escalation has been raised for the current run of
  /// misses; cleared when the run is broken by a completed check-in.
  pub escalation_raised:  bool,
}

// ─── Schedule ────────────────────────────────────────────────────────────────

/// A user's recurring check-in configuration and its scheduling cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInSchedule {
  pub schedule_id:       Uuid,
  pub owner_id:          Uuid,
  pub recurrence:        Recurrence,
  pub time_of_day:       TimeOfDay,
  pub timezone:          Tz,
  /// The questions asked at each firing; snapshotted onto every instance.
  pub questions:         Vec<String>,
  /// The next unfired occurrence. Strictly increases across firings.
  pub next_scheduled_at: DateTime<Utc>,
  pub last_sent_at:      Option<DateTime<Utc>>,
  pub consecutive_misses: u32,
  pub escalation_raised: bool,
  pub is_active:         bool,
  pub created_at:        DateTime<Utc>,
}

impl CheckInSchedule {
  pub fn miss_state(&self) -> MissState {
    MissState {
      consecutive_misses: self.consecutive_misses,
      escalation_raised:  self.escalation_raised,
    }
  }

  /// The occurrence that follows `from` under this schedule's rule.
  pub fn occurrence_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
    recurrence::next_occurrence(self.recurrence, self.time_of_day, self.timezone, from)
  }
}

/// Input to schedule creation, in the loose shape a form submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
  pub owner_id:             Uuid,
  pub recurrence:           RecurrenceKind,
  #[serde(default)]
  pub custom_interval_days: Option<u32>,
  pub time_of_day:          String,
  pub timezone:             String,
  pub questions:            Vec<String>,
}

impl NewSchedule {
  /// Validate the input and build the schedule, anchored at the first local
  /// `time_of_day` strictly after `now`.
  pub fn into_schedule(self, now: DateTime<Utc>) -> Result<CheckInSchedule> {
    let recurrence = Recurrence::from_parts(self.recurrence, self.custom_interval_days)?;
    let time_of_day: TimeOfDay = self.time_of_day.parse()?;
    let timezone = parse_timezone(&self.timezone)?;
    let questions = validate_questions(self.questions)?;

    Ok(CheckInSchedule {
      schedule_id: Uuid::new_v4(),
      owner_id: self.owner_id,
      recurrence,
      time_of_day,
      timezone,
      questions,
      next_scheduled_at: recurrence::first_occurrence(time_of_day, timezone, now),
      last_sent_at: None,
      consecutive_misses: 0,
      escalation_raised: false,
      is_active: true,
      created_at: now,
    })
  }
}

/// Trim and check a question list: 1 to [`MAX_QUESTIONS`] non-empty entries,
/// each at most [`MAX_TEXT_CHARS`] characters.
pub fn validate_questions(questions: Vec<String>) -> Result<Vec<String>> {
  if questions.is_empty() || questions.len() > MAX_QUESTIONS {
    return Err(Error::InvalidConfiguration(format!(
      "a schedule needs between 1 and {MAX_QUESTIONS} questions, got {}",
      questions.len()
    )));
  }
  questions
    .into_iter()
    .map(|q| {
      let q = q.trim().to_owned();
      if q.is_empty() {
        Err(Error::InvalidConfiguration("questions must not be blank".into()))
      } else if q.chars().count() > MAX_TEXT_CHARS {
        Err(Error::InvalidConfiguration(format!(
          "questions are limited to {MAX_TEXT_CHARS} characters"
        )))
      } else {
        Ok(q)
      }
    })
    .collect()
}
