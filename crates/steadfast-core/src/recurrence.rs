//! Time & recurrence calculator.
//!
//! Every computation here is "same wall-clock time, N calendar days later" in
//! the schedule's own timezone. Nothing adds a fixed absolute duration, so an
//! occurrence at 09:00 stays at 09:00 local across daylight-saving changes.

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone as _, Utc};
use chrono_tz::Tz;

use crate::{
  Error, Result,
  schedule::{Recurrence, TimeOfDay},
};

/// Step used to walk forward out of a daylight-saving gap.
const GAP_STEP_MINUTES: i64 = 15;

/// Longest gap we walk through. Covers whole skipped days (e.g. Samoa, 2011).
const MAX_GAP_STEPS: usize = (26 * 60 / GAP_STEP_MINUTES) as usize;

/// The next occurrence of `recurrence` strictly after `from`.
///
/// The occurrence lands on the local calendar date of `from` plus the
/// recurrence period, at `time_of_day` in `tz`. Fails with
/// [`Error::InvalidConfiguration`] for a custom interval outside 1..=365.
pub fn next_occurrence(
  recurrence:  Recurrence,
  time_of_day: TimeOfDay,
  tz:          Tz,
  from:        DateTime<Utc>,
) -> Result<DateTime<Utc>> {
  let period = recurrence.period_days()?;
  let mut date = from.with_timezone(&tz).date_naive();

  // One step always suffices for well-formed zones; the loop only guards the
  // "strictly after" contract against pathological offset changes.
  loop {
    date = date
      .checked_add_days(Days::new(period.into()))
      .ok_or_else(|| Error::InvalidState(format!("date overflow after {from}")))?;
    let candidate = resolve_local(tz, date, time_of_day);
    if candidate > from {
      return Ok(candidate);
    }
  }
}

/// The earliest instant at `time_of_day` local that is strictly after `now`:
/// today if that time is still ahead, otherwise tomorrow.
pub fn first_occurrence(time_of_day: TimeOfDay, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
  let today = now.with_timezone(&tz).date_naive();
  let candidate = resolve_local(tz, today, time_of_day);
  if candidate > now {
    return candidate;
  }
  match today.succ_opt() {
    Some(tomorrow) => resolve_local(tz, tomorrow, time_of_day),
    None => candidate,
  }
}

/// Map a local date and wall-clock time to an instant.
///
/// - Ambiguous times (fall-back overlap) resolve to the earlier instant, so an
///   occurrence fires at the first pass through that wall-clock time.
/// - Non-existent times (spring-forward gap) move forward to the first valid
///   local time after the gap.
pub fn resolve_local(tz: Tz, date: NaiveDate, time_of_day: TimeOfDay) -> DateTime<Utc> {
  let wanted = date.and_time(time_of_day.to_naive_time());
  let mut naive = wanted;
  for _ in 0..=MAX_GAP_STEPS {
    match tz.from_local_datetime(&naive) {
      LocalResult::Single(dt) => return dt.with_timezone(&Utc),
      LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
      LocalResult::None => naive += TimeDelta::minutes(GAP_STEP_MINUTES),
    }
  }
  utc_fallback(wanted)
}

// Only reachable for a zone that skips more than a day; treat the wall-clock
// value as UTC so the result is still deterministic.
fn utc_fallback(naive: NaiveDateTime) -> DateTime<Utc> { naive.and_utc() }
