//! The miss-detection pass and the escalation state machine.
//!
//! A schedule escalates at most once per run of misses. The run's marker
//! (`escalation_raised`) is claimed by compare-and-swap before the sponsor is
//! notified, and cleared again only by a completion or a re-enable.

use chrono::{DateTime, Utc};
use steadfast_core::{
  Error, Result,
  instance::CheckInStatus,
  notify::{Notification, NotificationDispatcher, SponsorDirectory},
  schedule::CheckInSchedule,
  store::{AccountabilityStore, TransitionOutcome},
};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Engine, Escalation, MissReport};

impl<S, D> Engine<S, D>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  /// Run one miss-detection pass at `now`.
  ///
  /// Every `Sent` instance whose grace period has elapsed becomes `Missed`.
  /// Then every active schedule at or above the escalation threshold that has
  /// not yet escalated for its current run notifies its sponsor. Safe to
  /// repeat: a second call with the same `now` changes nothing.
  pub async fn detect_misses(&self, now: DateTime<Utc>) -> Result<MissReport> {
    let deadline = Instant::now() + self.config.pass_deadline();
    let mut report = MissReport::default();

    let cutoff = now - self.config.grace_period();
    let overdue = self
      .store
      .overdue_sent_instances(cutoff)
      .await
      .map_err(Error::transient)?;

    for instance in overdue {
      if Instant::now() >= deadline {
        report.deadline_hit = true;
        break;
      }
      let instance_id = instance.instance_id;
      match self.store.record_miss(instance_id, CheckInStatus::Sent).await {
        Ok(TransitionOutcome::Applied(schedule)) => {
          report.missed += 1;
          info!(
            %instance_id,
            schedule_id = %schedule.schedule_id,
            consecutive_misses = schedule.consecutive_misses,
            "check-in missed"
          );
        }
        Ok(TransitionOutcome::Orphaned) => {
          report.missed += 1;
          report.orphans += 1;
          let orphan = Error::OrphanReference { kind: "check-in", id: instance_id };
          warn!(error = %orphan, "missed check-in has no schedule");
        }
        // Completed or missed by someone else since we read it.
        Ok(TransitionOutcome::Stale) => {}
        Err(e) => {
          report.failed += 1;
          warn!(%instance_id, error = %e, "failed to record miss");
        }
      }
    }

    if !report.deadline_hit {
      self.sweep_escalations(now, deadline, &mut report).await?;
    }

    info!(
      missed = report.missed,
      escalations = report.escalations.len(),
      orphans = report.orphans,
      failed = report.failed,
      deadline_hit = report.deadline_hit,
      "miss detection pass finished"
    );
    Ok(report)
  }

  async fn sweep_escalations(
    &self,
    now:      DateTime<Utc>,
    deadline: Instant,
    report:   &mut MissReport,
  ) -> Result<()> {
    let threshold = self.config.escalation_threshold;
    let waiting = self
      .store
      .schedules_awaiting_escalation(threshold)
      .await
      .map_err(Error::transient)?;

    for schedule in waiting {
      if Instant::now() >= deadline {
        report.deadline_hit = true;
        break;
      }
      let schedule_id = schedule.schedule_id;
      match self.escalate(&schedule, now).await {
        Ok(Some(escalation)) => report.escalations.push(escalation),
        Ok(None) => {}
        Err(e) => {
          report.failed += 1;
          warn!(%schedule_id, error = %e, "escalation failed; will retry next pass");
        }
      }
    }
    Ok(())
  }

  /// Claim the schedule's escalation marker and notify the sponsor. Returns
  /// `None` if another pass claimed it first. A failed send releases the
  /// claim.
  async fn escalate(&self, schedule: &CheckInSchedule, now: DateTime<Utc>) -> Result<Option<Escalation>> {
    let schedule_id = schedule.schedule_id;
    let claimed = self
      .store
      .claim_escalation(schedule_id, self.config.escalation_threshold)
      .await
      .map_err(Error::transient)?;
    if !claimed {
      return Ok(None);
    }

    let escalation = Escalation {
      schedule_id,
      sponsee_id: schedule.owner_id,
      sponsor_id: None,
      consecutive_misses: schedule.consecutive_misses,
      raised_at: now,
    };

    let sponsor = match self.store.active_sponsor(schedule.owner_id).await {
      Ok(sponsor) => sponsor,
      Err(e) => {
        self.release(schedule_id).await;
        return Err(Error::transient(e));
      }
    };
    let Some(sponsor_id) = sponsor else {
      warn!(%schedule_id, sponsee_id = %schedule.owner_id, "escalation raised but no active sponsor");
      return Ok(Some(escalation));
    };

    let notification = Notification::SponsorEscalation {
      sponsee_id:         schedule.owner_id,
      schedule_id,
      consecutive_misses: schedule.consecutive_misses,
    };
    if let Err(e) = self.dispatch(sponsor_id, notification).await {
      self.release(schedule_id).await;
      return Err(e);
    }

    info!(
      %schedule_id,
      %sponsor_id,
      consecutive_misses = schedule.consecutive_misses,
      "sponsor escalation sent"
    );
    Ok(Some(Escalation { sponsor_id: Some(sponsor_id), ..escalation }))
  }

  async fn release(&self, schedule_id: Uuid) {
    if let Err(e) = self.store.release_escalation(schedule_id).await {
      warn!(%schedule_id, error = %e, "failed to release escalation claim");
    }
  }
}
