//! Tunables for the scan and miss-detection passes.

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use steadfast_core::{Error, Result};

/// Engine settings, usually loaded as the `[engine]` table of the server
/// config. Every field has a default, so an empty table is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// How long after sending a check-in still counts as on time.
  pub grace_period_secs:     u64,
  /// Consecutive misses that trigger a sponsor escalation.
  pub escalation_threshold:  u32,
  /// Pending instances older than this are marked missed without a send.
  pub max_retry_age_secs:    u64,
  /// A single dispatcher call is abandoned after this long.
  pub dispatch_timeout_secs: u64,
  /// Overall budget for one pass; leftover work waits for the next tick.
  pub pass_deadline_secs:    u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      grace_period_secs:     86_400,
      escalation_threshold:  3,
      max_retry_age_secs:    86_400,
      dispatch_timeout_secs: 10,
      pass_deadline_secs:    240,
    }
  }
}

impl EngineConfig {
  pub fn validate(&self) -> Result<()> {
    if self.escalation_threshold == 0 {
      return Err(Error::InvalidConfiguration(
        "escalation_threshold must be at least 1".into(),
      ));
    }
    if self.grace_period_secs == 0 {
      return Err(Error::InvalidConfiguration(
        "grace_period_secs must be positive".into(),
      ));
    }
    Ok(())
  }

  pub fn grace_period(&self) -> TimeDelta { delta(self.grace_period_secs) }

  pub fn max_retry_age(&self) -> TimeDelta { delta(self.max_retry_age_secs) }

  pub fn dispatch_timeout(&self) -> Duration { Duration::from_secs(self.dispatch_timeout_secs) }

  pub fn pass_deadline(&self) -> Duration { Duration::from_secs(self.pass_deadline_secs) }

  /// How long a pass holds the exclusive right to send one check-in. Twice
  /// the dispatch timeout, so a lease cannot lapse while its send is still
  /// in flight.
  pub fn dispatch_lease(&self) -> TimeDelta {
    delta(self.dispatch_timeout_secs.saturating_mul(2))
  }
}

fn delta(secs: u64) -> TimeDelta {
  i64::try_from(secs)
    .ok()
    .and_then(TimeDelta::try_seconds)
    .unwrap_or(TimeDelta::MAX)
}
