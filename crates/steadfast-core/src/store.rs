//! The `AccountabilityStore` trait.
//!
//! The trait is implemented by storage backends (e.g.
//! `steadfast-store-sqlite`). The engine depends on this abstraction, not on
//! any concrete backend.
//!
//! Every write that touches shared schedule state is conditional: it names
//! the value the caller last saw and reports whether it won. This is what
//! makes overlapping ticks safe without cross-schedule locking.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  instance::{CheckInInstance, CheckInStatus, Responses},
  schedule::CheckInSchedule,
  sobriety::{Relapse, SobrietyDate},
};

/// Result of a conditional instance transition that also updates the parent
/// schedule in the same transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
  /// The instance moved; carries the parent schedule after its update.
  Applied(CheckInSchedule),
  /// The instance was no longer in the expected status; nothing changed.
  Stale,
  /// The instance moved but its parent schedule is gone.
  Orphaned,
}

/// Abstraction over the durable tables owned by this engine.
pub trait AccountabilityStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Schedules ─────────────────────────────────────────────────────────

  fn insert_schedule(
    &self,
    schedule: CheckInSchedule,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_schedule(
    &self,
    schedule_id: Uuid,
  ) -> impl Future<Output = Result<Option<CheckInSchedule>, Self::Error>> + Send + '_;

  fn schedules_for_owner(
    &self,
    owner_id: Uuid,
  ) -> impl Future<Output = Result<Vec<CheckInSchedule>, Self::Error>> + Send + '_;

  /// Active schedules whose `next_scheduled_at <= now`, oldest first.
  fn due_schedules(
    &self,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<CheckInSchedule>, Self::Error>> + Send + '_;

  /// Move the cursor from `expected_next` to `new_next` and stamp
  /// `last_sent_at`. Returns `false` if another pass already moved it.
  fn advance_schedule(
    &self,
    schedule_id: Uuid,
    expected_next: DateTime<Utc>,
    new_next: DateTime<Utc>,
    last_sent_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Soft-disable. Returns `false` if the schedule was already inactive.
  fn deactivate_schedule(
    &self,
    schedule_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Re-enable with a fresh cursor, clearing the miss counter and the
  /// escalation marker. Returns `false` if the schedule was already active.
  fn reactivate_schedule(
    &self,
    schedule_id: Uuid,
    next_scheduled_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Active schedules at or above `threshold` misses with no escalation
  /// raised for the current run.
  fn schedules_awaiting_escalation(
    &self,
    threshold: u32,
  ) -> impl Future<Output = Result<Vec<CheckInSchedule>, Self::Error>> + Send + '_;

  /// Set the escalation marker if it is clear and the schedule is still at or
  /// above `threshold`. Returns `true` only for the caller that set it.
  fn claim_escalation(
    &self,
    schedule_id: Uuid,
    threshold: u32,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Clear a claimed marker after a failed send so the next pass retries.
  fn release_escalation(
    &self,
    schedule_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Instances ─────────────────────────────────────────────────────────

  /// Insert unless an instance already exists for the same
  /// `(schedule_id, due_at)`. Returns the stored instance and whether this
  /// call created it.
  fn insert_instance_if_absent(
    &self,
    instance: CheckInInstance,
  ) -> impl Future<Output = Result<(CheckInInstance, bool), Self::Error>> + Send + '_;

  fn get_instance(
    &self,
    instance_id: Uuid,
  ) -> impl Future<Output = Result<Option<CheckInInstance>, Self::Error>> + Send + '_;

  fn instances_for_schedule(
    &self,
    schedule_id: Uuid,
  ) -> impl Future<Output = Result<Vec<CheckInInstance>, Self::Error>> + Send + '_;

  /// All instances still `Pending`, oldest `due_at` first.
  fn pending_instances(
    &self,
  ) -> impl Future<Output = Result<Vec<CheckInInstance>, Self::Error>> + Send + '_;

  /// `Sent` instances with `sent_at <= cutoff` and no response.
  fn overdue_sent_instances(
    &self,
    cutoff: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<CheckInInstance>, Self::Error>> + Send + '_;

  /// Take the right to dispatch a pending instance until `lease_until`.
  ///
  /// Succeeds only if the instance is still `Pending` and no other caller
  /// holds an unexpired lease at `now`. Only the winner may call the
  /// dispatcher.
  fn claim_dispatch(
    &self,
    instance_id: Uuid,
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Drop a dispatch lease after a failed send so the next pass may retry.
  fn release_dispatch(
    &self,
    instance_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// `Pending → Sent`, clearing any dispatch lease. Returns `false` if the
  /// instance was no longer pending.
  fn mark_sent(
    &self,
    instance_id: Uuid,
    sent_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// `from → Missed`, incrementing the parent's miss counter if it is active.
  fn record_miss(
    &self,
    instance_id: Uuid,
    from: CheckInStatus,
  ) -> impl Future<Output = Result<TransitionOutcome, Self::Error>> + Send + '_;

  /// `Sent → Completed` with the given answers, resetting the parent's miss
  /// counter and escalation marker.
  fn record_completion(
    &self,
    instance_id: Uuid,
    responses: Responses,
    responded_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<TransitionOutcome, Self::Error>> + Send + '_;

  // ── Sobriety ──────────────────────────────────────────────────────────

  fn insert_sobriety_date(
    &self,
    record: SobrietyDate,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_sobriety_date(
    &self,
    sobriety_date_id: Uuid,
  ) -> impl Future<Output = Result<Option<SobrietyDate>, Self::Error>> + Send + '_;

  /// The active record for `(user_id, substance_type)`, if any.
  fn active_sobriety_date(
    &self,
    user_id: Uuid,
    substance_type: String,
  ) -> impl Future<Output = Result<Option<SobrietyDate>, Self::Error>> + Send + '_;

  fn insert_relapse(
    &self,
    relapse: Relapse,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The relapse log for a record, ordered by `relapse_date`.
  fn relapses_for(
    &self,
    sobriety_date_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Relapse>, Self::Error>> + Send + '_;

  fn mark_relapse_sponsor_notified(
    &self,
    relapse_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
