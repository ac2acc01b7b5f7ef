//! Summaries returned by the trigger entry points.

use chrono::{DateTime, Utc};
use serde::Serialize;
use steadfast_core::instance::CheckInInstance;
use uuid::Uuid;

/// Outcome of one [`scan`](crate::Engine::scan) pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
  /// Instances this pass created, in their state after dispatch.
  pub created:      Vec<CheckInInstance>,
  /// Newly created instances handed to the dispatcher.
  pub sent:         usize,
  /// Older pending instances whose retry succeeded.
  pub retried:      usize,
  /// Pending instances past the retry ceiling, forced to missed.
  pub expired:      usize,
  pub orphans:      usize,
  /// Units of work that failed and will be retried next tick.
  pub failed:       usize,
  pub deadline_hit: bool,
}

/// Outcome of one [`detect_misses`](crate::Engine::detect_misses) pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MissReport {
  pub missed:       usize,
  pub escalations:  Vec<Escalation>,
  pub orphans:      usize,
  pub failed:       usize,
  pub deadline_hit: bool,
}

/// A raised escalation. `sponsor_id` is `None` when the sponsee had no
/// active sponsor; the run is still marked as escalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Escalation {
  pub schedule_id:        Uuid,
  pub sponsee_id:         Uuid,
  pub sponsor_id:         Option<Uuid>,
  pub consecutive_misses: u32,
  pub raised_at:          DateTime<Utc>,
}
