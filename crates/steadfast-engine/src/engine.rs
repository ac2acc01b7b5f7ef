//! [`Engine`] and its user-input operations.
//!
//! The trigger passes live in `scan.rs` and `misses.rs`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use steadfast_core::{
  Error, Result,
  instance::{CheckInInstance, CheckInStatus, Responses, validate_responses},
  notify::{Notification, NotificationDispatcher, SponsorDirectory},
  recurrence::first_occurrence,
  schedule::{CheckInSchedule, NewSchedule},
  sobriety::{NewRelapse, NewSobrietyDate, Relapse, SobrietyDate},
  store::{AccountabilityStore, TransitionOutcome},
  streak::{SobrietyStats, compute_stats},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::EngineConfig;

/// The check-in and streak engine over a store `S` and a dispatcher `D`.
pub struct Engine<S, D> {
  pub(crate) store:      Arc<S>,
  pub(crate) dispatcher: Arc<D>,
  pub(crate) config:     EngineConfig,
}

impl<S, D> Clone for Engine<S, D> {
  fn clone(&self) -> Self {
    Self {
      store:      Arc::clone(&self.store),
      dispatcher: Arc::clone(&self.dispatcher),
      config:     self.config.clone(),
    }
  }
}

impl<S, D> Engine<S, D>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  pub fn new(store: Arc<S>, dispatcher: Arc<D>, config: EngineConfig) -> Self {
    Self { store, dispatcher, config }
  }

  pub fn config(&self) -> &EngineConfig { &self.config }

  /// Send one notification, bounded by the dispatch timeout. Any failure,
  /// including a timeout, is reported as [`Error::TransientIo`].
  pub(crate) async fn dispatch(&self, recipient: Uuid, notification: Notification) -> Result<()> {
    let kind = notification.kind();
    match tokio::time::timeout(
      self.config.dispatch_timeout(),
      self.dispatcher.send(recipient, notification),
    )
    .await
    {
      Ok(Ok(())) => {
        debug!(%recipient, kind, "notification dispatched");
        Ok(())
      }
      Ok(Err(e)) => Err(Error::transient(e)),
      Err(elapsed) => Err(Error::transient(elapsed)),
    }
  }

  // ─── Schedules ─────────────────────────────────────────────────────────────

  /// Validate and persist a new schedule. Nothing is written if validation
  /// fails.
  pub async fn create_schedule(&self, new: NewSchedule, now: DateTime<Utc>) -> Result<CheckInSchedule> {
    let schedule = new.into_schedule(now)?;
    self
      .store
      .insert_schedule(schedule.clone())
      .await
      .map_err(Error::transient)?;
    info!(
      schedule_id = %schedule.schedule_id,
      owner_id = %schedule.owner_id,
      next = %schedule.next_scheduled_at,
      "schedule created"
    );
    Ok(schedule)
  }

  pub async fn get_schedule(&self, schedule_id: Uuid) -> Result<CheckInSchedule> {
    self
      .store
      .get_schedule(schedule_id)
      .await
      .map_err(Error::transient)?
      .ok_or(Error::NotFound { kind: "schedule", id: schedule_id })
  }

  pub async fn schedules_for_owner(&self, owner_id: Uuid) -> Result<Vec<CheckInSchedule>> {
    self
      .store
      .schedules_for_owner(owner_id)
      .await
      .map_err(Error::transient)
  }

  /// Every instance a schedule has produced, oldest first.
  pub async fn list_instances(&self, schedule_id: Uuid) -> Result<Vec<CheckInInstance>> {
    self.get_schedule(schedule_id).await?;
    self
      .store
      .instances_for_schedule(schedule_id)
      .await
      .map_err(Error::transient)
  }

  /// Soft-disable or re-enable a schedule.
  ///
  /// Re-enabling clears the miss counter and escalation marker and anchors
  /// the cursor at the next local `time_of_day` after `now`. Setting the
  /// current state again is a no-op.
  pub async fn set_schedule_active(
    &self,
    schedule_id: Uuid,
    active:      bool,
    now:         DateTime<Utc>,
  ) -> Result<CheckInSchedule> {
    let schedule = self.get_schedule(schedule_id).await?;
    if schedule.is_active == active {
      return Ok(schedule);
    }

    let changed = if active {
      let next = first_occurrence(schedule.time_of_day, schedule.timezone, now);
      self
        .store
        .reactivate_schedule(schedule_id, next)
        .await
        .map_err(Error::transient)?
    } else {
      self
        .store
        .deactivate_schedule(schedule_id)
        .await
        .map_err(Error::transient)?
    };
    if changed {
      info!(%schedule_id, active, "schedule active flag changed");
    }

    self.get_schedule(schedule_id).await
  }

  // ─── Check-ins ─────────────────────────────────────────────────────────────

  /// Record the user's answers for a sent check-in.
  ///
  /// Allowed only while the instance is `Sent` and within the grace period.
  /// On success the parent's miss counter resets and escalation re-arms.
  pub async fn complete_check_in(
    &self,
    instance_id: Uuid,
    responses:   Responses,
    now:         DateTime<Utc>,
  ) -> Result<CheckInInstance> {
    let instance = self.get_instance(instance_id).await?;
    if instance.status != CheckInStatus::Sent {
      return Err(Error::InvalidTransition {
        id:   instance_id,
        from: instance.status,
        to:   CheckInStatus::Completed,
      });
    }
    validate_responses(&instance.questions_snapshot, &responses)?;

    let sent_at = instance.sent_at.ok_or_else(|| {
      Error::InvalidState(format!("check-in {instance_id} is sent but has no sent_at"))
    })?;
    if now - sent_at >= self.config.grace_period() {
      return Err(Error::GracePeriodElapsed(instance_id));
    }

    let outcome = self
      .store
      .record_completion(instance_id, responses, now)
      .await
      .map_err(Error::transient)?;
    match outcome {
      TransitionOutcome::Applied(schedule) => {
        info!(%instance_id, schedule_id = %schedule.schedule_id, "check-in completed");
      }
      TransitionOutcome::Orphaned => {
        warn!(%instance_id, schedule_id = %instance.schedule_id, "check-in completed for a missing schedule");
      }
      TransitionOutcome::Stale => {
        // Lost a race with the miss detector.
        let current = self.get_instance(instance_id).await?;
        return Err(Error::InvalidTransition {
          id:   instance_id,
          from: current.status,
          to:   CheckInStatus::Completed,
        });
      }
    }

    self.get_instance(instance_id).await
  }

  pub async fn get_instance(&self, instance_id: Uuid) -> Result<CheckInInstance> {
    self
      .store
      .get_instance(instance_id)
      .await
      .map_err(Error::transient)?
      .ok_or(Error::NotFound { kind: "check-in", id: instance_id })
  }

  // ─── Sobriety ──────────────────────────────────────────────────────────────

  /// Start tracking a substance for a user. Only one active record may exist
  /// per `(user, substance)`.
  pub async fn create_sobriety_date(
    &self,
    new: NewSobrietyDate,
    now: DateTime<Utc>,
  ) -> Result<SobrietyDate> {
    let record = new.into_record(now)?;
    let existing = self
      .store
      .active_sobriety_date(record.user_id, record.substance_type.clone())
      .await
      .map_err(Error::transient)?;
    if existing.is_some() {
      return Err(Error::Conflict(format!(
        "user {} already has an active {} sobriety date",
        record.user_id, record.substance_type
      )));
    }

    self
      .store
      .insert_sobriety_date(record.clone())
      .await
      .map_err(Error::transient)?;
    info!(sobriety_date_id = %record.sobriety_date_id, user_id = %record.user_id, "sobriety date created");
    Ok(record)
  }

  pub async fn get_sobriety_date(&self, sobriety_date_id: Uuid) -> Result<SobrietyDate> {
    self
      .store
      .get_sobriety_date(sobriety_date_id)
      .await
      .map_err(Error::transient)?
      .ok_or(Error::NotFound { kind: "sobriety date", id: sobriety_date_id })
  }

  /// Append a relapse to a record's log, optionally alerting the sponsor.
  ///
  /// The relapse is stored even if the alert cannot be delivered; in that
  /// case `sponsor_notified` stays `false`.
  pub async fn record_relapse(
    &self,
    sobriety_date_id: Uuid,
    new:              NewRelapse,
    now:              DateTime<Utc>,
  ) -> Result<Relapse> {
    let parent = self.get_sobriety_date(sobriety_date_id).await?;
    let notify_sponsor = new.notify_sponsor;
    let mut relapse = new.into_relapse(&parent, now)?;

    self
      .store
      .insert_relapse(relapse.clone())
      .await
      .map_err(Error::transient)?;
    info!(%sobriety_date_id, relapse_id = %relapse.relapse_id, "relapse recorded");

    if notify_sponsor && self.alert_sponsor(&parent, &relapse).await {
      relapse.sponsor_notified = true;
    }
    Ok(relapse)
  }

  async fn alert_sponsor(&self, parent: &SobrietyDate, relapse: &Relapse) -> bool {
    let sponsor = match self.store.active_sponsor(parent.user_id).await {
      Ok(Some(sponsor)) => sponsor,
      Ok(None) => {
        debug!(user_id = %parent.user_id, "no active sponsor to alert");
        return false;
      }
      Err(e) => {
        warn!(user_id = %parent.user_id, error = %e, "sponsor lookup failed");
        return false;
      }
    };

    let alert = Notification::RelapseAlert {
      sponsee_id:       parent.user_id,
      sobriety_date_id: parent.sobriety_date_id,
      relapse_date:     relapse.relapse_date,
    };
    if let Err(e) = self.dispatch(sponsor, alert).await {
      warn!(relapse_id = %relapse.relapse_id, error = %e, "relapse alert not delivered");
      return false;
    }
    if let Err(e) = self.store.mark_relapse_sponsor_notified(relapse.relapse_id).await {
      warn!(relapse_id = %relapse.relapse_id, error = %e, "failed to record relapse alert");
      return false;
    }
    true
  }

  /// Current streak and milestones, derived from the record and its full
  /// relapse log.
  pub async fn sobriety_stats(&self, sobriety_date_id: Uuid, now: DateTime<Utc>) -> Result<SobrietyStats> {
    let record = self.get_sobriety_date(sobriety_date_id).await?;
    let relapses = self
      .store
      .relapses_for(sobriety_date_id)
      .await
      .map_err(Error::transient)?;
    let stats = compute_stats(record.start_date, &relapses, now)?;
    Ok(SobrietyStats { record, stats })
  }

  // ─── Sponsorships ──────────────────────────────────────────────────────────

  pub async fn link_sponsor(&self, sponsor_id: Uuid, sponsee_id: Uuid) -> Result<()> {
    if sponsor_id == sponsee_id {
      return Err(Error::InvalidInput("a user cannot sponsor themselves".into()));
    }
    self
      .store
      .link_sponsor(sponsor_id, sponsee_id)
      .await
      .map_err(Error::transient)?;
    info!(%sponsor_id, %sponsee_id, "sponsor linked");
    Ok(())
  }

  /// End a sponsee's active link. Fails with [`Error::NotFound`] if there is
  /// none.
  pub async fn unlink_sponsor(&self, sponsee_id: Uuid) -> Result<()> {
    let removed = self
      .store
      .unlink_sponsor(sponsee_id)
      .await
      .map_err(Error::transient)?;
    if !removed {
      return Err(Error::NotFound { kind: "sponsorship", id: sponsee_id });
    }
    info!(%sponsee_id, "sponsor unlinked");
    Ok(())
  }
}
