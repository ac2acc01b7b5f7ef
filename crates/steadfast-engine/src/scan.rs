//! The due-scan pass.
//!
//! For every active schedule whose cursor is due:
//!
//! 1. create the instance for `(schedule_id, next_scheduled_at)` unless it
//!    already exists;
//! 2. advance the cursor by compare-and-swap, only after step 1 is durable;
//! 3. dispatch the instance if this pass created it, marking it `Sent`.
//!
//! Then pending instances left behind by earlier failures are retried, or
//! forced to `Missed` once they exceed the retry ceiling.
//!
//! Every send, first attempt or retry, is preceded by a dispatch lease taken
//! through the store. A pass that loses the lease leaves the instance alone,
//! so overlapping passes never hand the same check-in to the dispatcher
//! twice.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use steadfast_core::{
  Error, Result,
  instance::{CheckInInstance, CheckInStatus},
  notify::{Notification, NotificationDispatcher, SponsorDirectory},
  schedule::CheckInSchedule,
  store::{AccountabilityStore, TransitionOutcome},
};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Engine, ScanReport};

struct Fired {
  instance: CheckInInstance,
  created:  bool,
  delivery: Delivery,
}

enum Delivery {
  Sent,
  Failed,
  NotAttempted,
}

/// Result of one guarded send attempt.
enum Attempt {
  Delivered,
  /// Another pass holds the lease; the dispatcher was not called.
  Claimed,
  /// The dispatcher accepted it but another pass settled the instance first.
  Superseded,
}

enum Retry {
  Sent,
  Expired,
  Orphaned,
  Skipped,
}

impl<S, D> Engine<S, D>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  /// Run one due-scan pass at `now`.
  ///
  /// Idempotent: a second call with the same `now` creates and sends
  /// nothing. Fails only if the initial selection of due schedules fails;
  /// per-schedule errors are counted in the report and left for the next
  /// tick.
  pub async fn scan(&self, now: DateTime<Utc>) -> Result<ScanReport> {
    let deadline = Instant::now() + self.config.pass_deadline();
    let mut report = ScanReport::default();
    let mut attempted = HashSet::new();

    let due = self.store.due_schedules(now).await.map_err(Error::transient)?;
    for schedule in due {
      if Instant::now() >= deadline {
        report.deadline_hit = true;
        break;
      }
      let schedule_id = schedule.schedule_id;
      match self.fire(schedule, now).await {
        Ok(fired) => {
          match fired.delivery {
            Delivery::Sent => report.sent += 1,
            Delivery::Failed => report.failed += 1,
            Delivery::NotAttempted => {}
          }
          if !matches!(fired.delivery, Delivery::NotAttempted) {
            attempted.insert(fired.instance.instance_id);
          }
          if fired.created {
            report.created.push(fired.instance);
          }
        }
        Err(e) => {
          report.failed += 1;
          warn!(%schedule_id, error = %e, "failed to fire schedule");
        }
      }
    }

    if !report.deadline_hit {
      self.retry_pending(now, deadline, &attempted, &mut report).await?;
    }

    info!(
      created = report.created.len(),
      sent = report.sent,
      retried = report.retried,
      expired = report.expired,
      failed = report.failed,
      deadline_hit = report.deadline_hit,
      "scan pass finished"
    );
    Ok(report)
  }

  async fn fire(&self, schedule: CheckInSchedule, now: DateTime<Utc>) -> Result<Fired> {
    let fired_at = schedule.next_scheduled_at;
    let (mut instance, created) = self
      .store
      .insert_instance_if_absent(CheckInInstance::pending_for(&schedule))
      .await
      .map_err(Error::transient)?;

    let next = catch_up(&schedule, now)?;
    let advanced = self
      .store
      .advance_schedule(schedule.schedule_id, fired_at, next, now)
      .await
      .map_err(Error::transient)?;
    if !advanced {
      debug!(schedule_id = %schedule.schedule_id, "cursor already advanced by another pass");
    }

    if !created || instance.status != CheckInStatus::Pending {
      return Ok(Fired { instance, created, delivery: Delivery::NotAttempted });
    }

    let delivery = match self.send_check_in(schedule.owner_id, &instance, now).await {
      Ok(Attempt::Delivered) => {
        instance.status = CheckInStatus::Sent;
        instance.sent_at = Some(now);
        Delivery::Sent
      }
      Ok(Attempt::Claimed | Attempt::Superseded) => Delivery::NotAttempted,
      Err(e) => {
        warn!(
          instance_id = %instance.instance_id,
          error = %e,
          "check-in dispatch failed; left pending for retry"
        );
        Delivery::Failed
      }
    };
    Ok(Fired { instance, created, delivery })
  }

  /// Take the dispatch lease, send, then mark `Sent`. A failed send
  /// releases the lease so a later pass can retry.
  async fn send_check_in(
    &self,
    owner_id: Uuid,
    instance: &CheckInInstance,
    now:      DateTime<Utc>,
  ) -> Result<Attempt> {
    let instance_id = instance.instance_id;
    if !self.claim_dispatch(instance_id, now).await? {
      debug!(%instance_id, "check-in is being sent by another pass");
      return Ok(Attempt::Claimed);
    }

    let notification = Notification::CheckInDue {
      instance_id,
      schedule_id: instance.schedule_id,
      due_at:      instance.due_at,
      questions:   instance.questions_snapshot.clone(),
    };
    if let Err(e) = self.dispatch(owner_id, notification).await {
      if let Err(release) = self.store.release_dispatch(instance_id).await {
        warn!(%instance_id, error = %release, "failed to release dispatch lease");
      }
      return Err(e);
    }

    let marked = self
      .store
      .mark_sent(instance_id, now)
      .await
      .map_err(Error::transient)?;
    if marked {
      Ok(Attempt::Delivered)
    } else {
      // The lease ran out mid-send and the instance moved on without us.
      warn!(%instance_id, "check-in sent after its lease lapsed");
      Ok(Attempt::Superseded)
    }
  }

  async fn claim_dispatch(&self, instance_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
    let lease_until = now
      .checked_add_signed(self.config.dispatch_lease())
      .unwrap_or(DateTime::<Utc>::MAX_UTC);
    self
      .store
      .claim_dispatch(instance_id, now, lease_until)
      .await
      .map_err(Error::transient)
  }

  async fn retry_pending(
    &self,
    now:       DateTime<Utc>,
    deadline:  Instant,
    attempted: &HashSet<Uuid>,
    report:    &mut ScanReport,
  ) -> Result<()> {
    let pending = self.store.pending_instances().await.map_err(Error::transient)?;
    for instance in pending {
      if attempted.contains(&instance.instance_id) {
        continue;
      }
      if Instant::now() >= deadline {
        report.deadline_hit = true;
        break;
      }
      let instance_id = instance.instance_id;
      match self.retry_one(instance, now).await {
        Ok(Retry::Sent) => report.retried += 1,
        Ok(Retry::Expired) => report.expired += 1,
        Ok(Retry::Orphaned) => report.orphans += 1,
        Ok(Retry::Skipped) => {}
        Err(e) => {
          report.failed += 1;
          warn!(%instance_id, error = %e, "pending check-in retry failed");
        }
      }
    }
    Ok(())
  }

  async fn retry_one(&self, instance: CheckInInstance, now: DateTime<Utc>) -> Result<Retry> {
    let instance_id = instance.instance_id;

    if now - instance.due_at >= self.config.max_retry_age() {
      // Expiring races a send in flight; the lease decides who wins.
      if !self.claim_dispatch(instance_id, now).await? {
        return Ok(Retry::Skipped);
      }
      let outcome = self
        .store
        .record_miss(instance_id, CheckInStatus::Pending)
        .await
        .map_err(Error::transient)?;
      return Ok(match outcome {
        TransitionOutcome::Applied(schedule) => {
          info!(
            %instance_id,
            schedule_id = %schedule.schedule_id,
            consecutive_misses = schedule.consecutive_misses,
            "undeliverable check-in expired as missed"
          );
          Retry::Expired
        }
        TransitionOutcome::Orphaned => {
          let orphan = Error::OrphanReference { kind: "check-in", id: instance_id };
          warn!(error = %orphan, "expired check-in has no schedule");
          Retry::Expired
        }
        TransitionOutcome::Stale => Retry::Skipped,
      });
    }

    let Some(schedule) = self
      .store
      .get_schedule(instance.schedule_id)
      .await
      .map_err(Error::transient)?
    else {
      let orphan = Error::OrphanReference { kind: "check-in", id: instance_id };
      warn!(error = %orphan, "skipping pending check-in");
      return Ok(Retry::Orphaned);
    };
    if !schedule.is_active {
      return Ok(Retry::Skipped);
    }

    Ok(match self.send_check_in(schedule.owner_id, &instance, now).await? {
      Attempt::Delivered => Retry::Sent,
      Attempt::Claimed | Attempt::Superseded => Retry::Skipped,
    })
  }
}

/// The first occurrence after the fired one that is still in the future.
/// After downtime, intermediate occurrences are skipped rather than
/// back-filled.
fn catch_up(schedule: &CheckInSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
  let mut next = schedule.occurrence_after(schedule.next_scheduled_at)?;
  while next <= now {
    next = schedule.occurrence_after(next)?;
  }
  Ok(next)
}
