//! Streak calculator.
//!
//! A streak is measured from the *effective start*: the later of the record's
//! start date and its most recent relapse. Stats are recomputed on every read,
//! so appending a relapse lowers the reported streak immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  sobriety::{Relapse, SobrietyDate},
};

// ─── Milestones ──────────────────────────────────────────────────────────────

/// Fixed streak-length thresholds, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Milestone {
  #[serde(rename = "30_days")]
  Days30,
  #[serde(rename = "60_days")]
  Days60,
  #[serde(rename = "90_days")]
  Days90,
  #[serde(rename = "180_days")]
  Days180,
  #[serde(rename = "365_days")]
  Days365,
}

impl Milestone {
  pub const ALL: [Self; 5] = [Self::Days30, Self::Days60, Self::Days90, Self::Days180, Self::Days365];

  pub fn days(self) -> u32 {
    match self {
      Self::Days30 => 30,
      Self::Days60 => 60,
      Self::Days90 => 90,
      Self::Days180 => 180,
      Self::Days365 => 365,
    }
  }
}

// ─── Stats ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakStats {
  pub effective_start:     DateTime<Utc>,
  pub current_streak_days: u32,
  pub milestones_achieved: Vec<Milestone>,
  /// `None` once every milestone has been reached.
  pub next_milestone_days: Option<u32>,
}

/// A sobriety record together with its derived streak figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SobrietyStats {
  #[serde(flatten)]
  pub record: SobrietyDate,
  #[serde(flatten)]
  pub stats:  StreakStats,
}

/// Derive streak length and milestones as of `now`.
///
/// The relapse log need not be sorted. Fails with [`Error::InvalidState`] if
/// `now` precedes the effective start.
pub fn compute_stats(
  start_date: DateTime<Utc>,
  relapses:   &[Relapse],
  now:        DateTime<Utc>,
) -> Result<StreakStats> {
  let effective_start = relapses
    .iter()
    .map(|r| r.relapse_date)
    .max()
    .map_or(start_date, |latest| latest.max(start_date));

  if now < effective_start {
    return Err(Error::InvalidState(format!(
      "cannot compute a streak at {now}, before its effective start {effective_start}"
    )));
  }

  let days = (now - effective_start).num_days();
  let current_streak_days = u32::try_from(days).unwrap_or(u32::MAX);

  let milestones_achieved = Milestone::ALL
    .into_iter()
    .filter(|m| m.days() <= current_streak_days)
    .collect();
  let next_milestone_days = Milestone::ALL
    .into_iter()
    .map(Milestone::days)
    .find(|&d| d > current_streak_days);

  Ok(StreakStats {
    effective_start,
    current_streak_days,
    milestones_achieved,
    next_milestone_days,
  })
}
