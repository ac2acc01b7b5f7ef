//! [`SqliteStore`], the SQLite implementation of [`AccountabilityStore`] and
//! [`SponsorDirectory`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, types::Value};
use uuid::Uuid;

use steadfast_core::{
  instance::{CheckInInstance, CheckInStatus, Responses},
  notify::SponsorDirectory,
  schedule::CheckInSchedule,
  sobriety::{Relapse, SobrietyDate},
  store::{AccountabilityStore, TransitionOutcome},
};

use crate::{
  Result,
  encode::{
    INSTANCE_COLUMNS, RELAPSE_COLUMNS, RawInstance, RawRelapse, RawSchedule, RawSobrietyDate,
    SCHEDULE_COLUMNS, SOBRIETY_COLUMNS, decode_uuid, encode_dt, encode_questions,
    encode_recurrence_kind, encode_responses, encode_status, encode_uuid,
  },
  error::Error,
  schema::SCHEMA,
};

/// Transition result as read inside the database thread, before decoding.
enum RawOutcome {
  Applied(RawSchedule),
  Stale,
  Orphaned,
}

impl RawOutcome {
  fn decode(self) -> Result<TransitionOutcome> {
    Ok(match self {
      Self::Applied(raw) => TransitionOutcome::Applied(raw.into_schedule()?),
      Self::Stale => TransitionOutcome::Stale,
      Self::Orphaned => TransitionOutcome::Orphaned,
    })
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Steadfast store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `UPDATE`/`DELETE` SQL and report how many rows changed.
  async fn execute(&self, sql: &'static str, params: Vec<Value>) -> Result<usize> {
    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(sql, rusqlite::params_from_iter(params))?))
      .await?;
    Ok(changed)
  }

  async fn select_schedules(
    &self,
    filter: &'static str,
    params: Vec<Value>,
  ) -> Result<Vec<CheckInSchedule>> {
    let raws: Vec<RawSchedule> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules {filter}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawSchedule::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSchedule::into_schedule).collect()
  }

  async fn select_instances(
    &self,
    filter: &'static str,
    params: Vec<Value>,
  ) -> Result<Vec<CheckInInstance>> {
    let raws: Vec<RawInstance> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM check_in_instances {filter}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawInstance::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawInstance::into_instance).collect()
  }

  async fn select_sobriety_dates(
    &self,
    filter: &'static str,
    params: Vec<Value>,
  ) -> Result<Vec<SobrietyDate>> {
    let raws: Vec<RawSobrietyDate> = self
      .conn
      .call(move |conn| {
        let sql = format!("SELECT {SOBRIETY_COLUMNS} FROM sobriety_dates {filter}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawSobrietyDate::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSobrietyDate::into_record).collect()
  }
}

fn text(s: String) -> Value { Value::Text(s) }

fn uuid_value(id: Uuid) -> Value { Value::Text(encode_uuid(id)) }

fn dt_value(dt: DateTime<Utc>) -> Value { Value::Text(encode_dt(dt)) }

// ─── AccountabilityStore impl ────────────────────────────────────────────────

impl AccountabilityStore for SqliteStore {
  type Error = Error;

  // ── Schedules ─────────────────────────────────────────────────────────────

  async fn insert_schedule(&self, schedule: CheckInSchedule) -> Result<()> {
    let id_str        = encode_uuid(schedule.schedule_id);
    let owner_str     = encode_uuid(schedule.owner_id);
    let kind_str      = encode_recurrence_kind(schedule.recurrence.kind());
    let interval      = schedule.recurrence.custom_interval_days();
    let tod_str       = schedule.time_of_day.to_string();
    let tz_str        = schedule.timezone.name().to_owned();
    let questions_str = encode_questions(&schedule.questions)?;
    let next_str      = encode_dt(schedule.next_scheduled_at);
    let last_sent_str = schedule.last_sent_at.map(encode_dt);
    let created_str   = encode_dt(schedule.created_at);
    let misses        = schedule.consecutive_misses;
    let escalated     = schedule.escalation_raised;
    let active        = schedule.is_active;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO schedules (
             schedule_id, owner_id, recurrence, custom_interval_days,
             time_of_day, timezone, questions, next_scheduled_at, last_sent_at,
             consecutive_misses, escalation_raised, is_active, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
          rusqlite::params![
            id_str,
            owner_str,
            kind_str,
            interval,
            tod_str,
            tz_str,
            questions_str,
            next_str,
            last_sent_str,
            misses,
            escalated,
            active,
            created_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_schedule(&self, schedule_id: Uuid) -> Result<Option<CheckInSchedule>> {
    let mut found = self
      .select_schedules("WHERE schedule_id = ?1", vec![uuid_value(schedule_id)])
      .await?;
    Ok(found.pop())
  }

  async fn schedules_for_owner(&self, owner_id: Uuid) -> Result<Vec<CheckInSchedule>> {
    self
      .select_schedules("WHERE owner_id = ?1 ORDER BY created_at", vec![uuid_value(owner_id)])
      .await
  }

  async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<CheckInSchedule>> {
    self
      .select_schedules(
        "WHERE is_active = 1 AND next_scheduled_at <= ?1 ORDER BY next_scheduled_at",
        vec![dt_value(now)],
      )
      .await
  }

  async fn advance_schedule(
    &self,
    schedule_id:   Uuid,
    expected_next: DateTime<Utc>,
    new_next:      DateTime<Utc>,
    last_sent_at:  DateTime<Utc>,
  ) -> Result<bool> {
    let changed = self
      .execute(
        "UPDATE schedules SET next_scheduled_at = ?1, last_sent_at = ?2
         WHERE schedule_id = ?3 AND next_scheduled_at = ?4",
        vec![
          dt_value(new_next),
          dt_value(last_sent_at),
          uuid_value(schedule_id),
          dt_value(expected_next),
        ],
      )
      .await?;
    Ok(changed == 1)
  }

  async fn deactivate_schedule(&self, schedule_id: Uuid) -> Result<bool> {
    let changed = self
      .execute(
        "UPDATE schedules SET is_active = 0 WHERE schedule_id = ?1 AND is_active = 1",
        vec![uuid_value(schedule_id)],
      )
      .await?;
    Ok(changed == 1)
  }

  async fn reactivate_schedule(
    &self,
    schedule_id:       Uuid,
    next_scheduled_at: DateTime<Utc>,
  ) -> Result<bool> {
    let changed = self
      .execute(
        "UPDATE schedules
         SET is_active = 1, next_scheduled_at = ?1,
             consecutive_misses = 0, escalation_raised = 0
         WHERE schedule_id = ?2 AND is_active = 0",
        vec![dt_value(next_scheduled_at), uuid_value(schedule_id)],
      )
      .await?;
    Ok(changed == 1)
  }

  async fn schedules_awaiting_escalation(&self, threshold: u32) -> Result<Vec<CheckInSchedule>> {
    self
      .select_schedules(
        "WHERE is_active = 1 AND escalation_raised = 0 AND consecutive_misses >= ?1
         ORDER BY next_scheduled_at",
        vec![Value::Integer(threshold.into())],
      )
      .await
  }

  async fn claim_escalation(&self, schedule_id: Uuid, threshold: u32) -> Result<bool> {
    let changed = self
      .execute(
        "UPDATE schedules SET escalation_raised = 1
         WHERE schedule_id = ?1 AND escalation_raised = 0 AND consecutive_misses >= ?2",
        vec![uuid_value(schedule_id), Value::Integer(threshold.into())],
      )
      .await?;
    Ok(changed == 1)
  }

  async fn release_escalation(&self, schedule_id: Uuid) -> Result<()> {
    self
      .execute(
        "UPDATE schedules SET escalation_raised = 0 WHERE schedule_id = ?1",
        vec![uuid_value(schedule_id)],
      )
      .await?;
    Ok(())
  }

  // ── Instances ─────────────────────────────────────────────────────────────

  async fn insert_instance_if_absent(
    &self,
    instance: CheckInInstance,
  ) -> Result<(CheckInInstance, bool)> {
    let id_str        = encode_uuid(instance.instance_id);
    let schedule_str  = encode_uuid(instance.schedule_id);
    let due_str       = encode_dt(instance.due_at);
    let sent_str      = instance.sent_at.map(encode_dt);
    let responded_str = instance.responded_at.map(encode_dt);
    let questions_str = encode_questions(&instance.questions_snapshot)?;
    let responses_str = encode_responses(&instance.responses)?;
    let status_str    = encode_status(instance.status);

    let (raw, created): (RawInstance, bool) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let inserted = tx.execute(
          "INSERT INTO check_in_instances (
             instance_id, schedule_id, due_at, sent_at, responded_at,
             questions, responses, status
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
           ON CONFLICT (schedule_id, due_at) DO NOTHING",
          rusqlite::params![
            id_str,
            schedule_str,
            due_str,
            sent_str,
            responded_str,
            questions_str,
            responses_str,
            status_str,
          ],
        )?;
        let sql = format!(
          "SELECT {INSTANCE_COLUMNS} FROM check_in_instances
           WHERE schedule_id = ?1 AND due_at = ?2"
        );
        let raw = tx.query_row(
          &sql,
          rusqlite::params![schedule_str, due_str],
          RawInstance::from_row,
        )?;
        tx.commit()?;
        Ok((raw, inserted == 1))
      })
      .await?;

    Ok((raw.into_instance()?, created))
  }

  async fn get_instance(&self, instance_id: Uuid) -> Result<Option<CheckInInstance>> {
    let mut found = self
      .select_instances("WHERE instance_id = ?1", vec![uuid_value(instance_id)])
      .await?;
    Ok(found.pop())
  }

  async fn instances_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<CheckInInstance>> {
    self
      .select_instances("WHERE schedule_id = ?1 ORDER BY due_at", vec![uuid_value(schedule_id)])
      .await
  }

  async fn pending_instances(&self) -> Result<Vec<CheckInInstance>> {
    self
      .select_instances("WHERE status = 'pending' ORDER BY due_at", vec![])
      .await
  }

  async fn overdue_sent_instances(&self, cutoff: DateTime<Utc>) -> Result<Vec<CheckInInstance>> {
    self
      .select_instances(
        "WHERE status = 'sent' AND responded_at IS NULL AND sent_at <= ?1 ORDER BY sent_at",
        vec![dt_value(cutoff)],
      )
      .await
  }

  async fn claim_dispatch(
    &self,
    instance_id: Uuid,
    now:         DateTime<Utc>,
    lease_until: DateTime<Utc>,
  ) -> Result<bool> {
    let changed = self
      .execute(
        "UPDATE check_in_instances SET dispatch_claimed_until = ?1
         WHERE instance_id = ?2 AND status = 'pending'
           AND (dispatch_claimed_until IS NULL OR dispatch_claimed_until <= ?3)",
        vec![dt_value(lease_until), uuid_value(instance_id), dt_value(now)],
      )
      .await?;
    Ok(changed == 1)
  }

  async fn release_dispatch(&self, instance_id: Uuid) -> Result<()> {
    self
      .execute(
        "UPDATE check_in_instances SET dispatch_claimed_until = NULL
         WHERE instance_id = ?1 AND status = 'pending'",
        vec![uuid_value(instance_id)],
      )
      .await?;
    Ok(())
  }

  async fn mark_sent(&self, instance_id: Uuid, sent_at: DateTime<Utc>) -> Result<bool> {
    let changed = self
      .execute(
        "UPDATE check_in_instances
         SET status = 'sent', sent_at = ?1, dispatch_claimed_until = NULL
         WHERE instance_id = ?2 AND status = 'pending'",
        vec![dt_value(sent_at), uuid_value(instance_id)],
      )
      .await?;
    Ok(changed == 1)
  }

  async fn record_miss(&self, instance_id: Uuid, from: CheckInStatus) -> Result<TransitionOutcome> {
    let id_str   = encode_uuid(instance_id);
    let from_str = encode_status(from);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE check_in_instances SET status = 'missed'
           WHERE instance_id = ?1 AND status = ?2",
          rusqlite::params![id_str, from_str],
        )?;
        if changed == 0 {
          return Ok(RawOutcome::Stale);
        }

        let schedule_id: String = tx.query_row(
          "SELECT schedule_id FROM check_in_instances WHERE instance_id = ?1",
          rusqlite::params![id_str],
          |r| r.get(0),
        )?;
        // Misses on a disabled schedule don't count; re-enabling resets anyway.
        tx.execute(
          "UPDATE schedules SET consecutive_misses = consecutive_misses + 1
           WHERE schedule_id = ?1 AND is_active = 1",
          rusqlite::params![schedule_id],
        )?;
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE schedule_id = ?1");
        let raw = tx
          .query_row(&sql, rusqlite::params![schedule_id], RawSchedule::from_row)
          .optional()?;
        tx.commit()?;

        Ok(raw.map_or(RawOutcome::Orphaned, RawOutcome::Applied))
      })
      .await?;

    outcome.decode()
  }

  async fn record_completion(
    &self,
    instance_id:  Uuid,
    responses:    Responses,
    responded_at: DateTime<Utc>,
  ) -> Result<TransitionOutcome> {
    let id_str        = encode_uuid(instance_id);
    let responses_str = encode_responses(&responses)?;
    let at_str        = encode_dt(responded_at);

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let changed = tx.execute(
          "UPDATE check_in_instances
           SET status = 'completed', responses = ?1, responded_at = ?2
           WHERE instance_id = ?3 AND status = 'sent'",
          rusqlite::params![responses_str, at_str, id_str],
        )?;
        if changed == 0 {
          return Ok(RawOutcome::Stale);
        }

        let schedule_id: String = tx.query_row(
          "SELECT schedule_id FROM check_in_instances WHERE instance_id = ?1",
          rusqlite::params![id_str],
          |r| r.get(0),
        )?;
        tx.execute(
          "UPDATE schedules SET consecutive_misses = 0, escalation_raised = 0
           WHERE schedule_id = ?1",
          rusqlite::params![schedule_id],
        )?;
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE schedule_id = ?1");
        let raw = tx
          .query_row(&sql, rusqlite::params![schedule_id], RawSchedule::from_row)
          .optional()?;
        tx.commit()?;

        Ok(raw.map_or(RawOutcome::Orphaned, RawOutcome::Applied))
      })
      .await?;

    outcome.decode()
  }

  // ── Sobriety ──────────────────────────────────────────────────────────────

  async fn insert_sobriety_date(&self, record: SobrietyDate) -> Result<()> {
    self
      .execute(
        "INSERT INTO sobriety_dates (
           sobriety_date_id, user_id, substance_type, start_date, is_active, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        vec![
          uuid_value(record.sobriety_date_id),
          uuid_value(record.user_id),
          text(record.substance_type),
          dt_value(record.start_date),
          Value::Integer(record.is_active.into()),
          dt_value(record.created_at),
        ],
      )
      .await?;
    Ok(())
  }

  async fn get_sobriety_date(&self, sobriety_date_id: Uuid) -> Result<Option<SobrietyDate>> {
    let mut found = self
      .select_sobriety_dates("WHERE sobriety_date_id = ?1", vec![uuid_value(sobriety_date_id)])
      .await?;
    Ok(found.pop())
  }

  async fn active_sobriety_date(
    &self,
    user_id:        Uuid,
    substance_type: String,
  ) -> Result<Option<SobrietyDate>> {
    let mut found = self
      .select_sobriety_dates(
        "WHERE user_id = ?1 AND substance_type = ?2 AND is_active = 1",
        vec![uuid_value(user_id), text(substance_type)],
      )
      .await?;
    Ok(found.pop())
  }

  async fn insert_relapse(&self, relapse: Relapse) -> Result<()> {
    self
      .execute(
        "INSERT INTO relapses (
           relapse_id, sobriety_date_id, relapse_date, note,
           trigger_context, sponsor_notified, recorded_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        vec![
          uuid_value(relapse.relapse_id),
          uuid_value(relapse.sobriety_date_id),
          dt_value(relapse.relapse_date),
          relapse.note.map_or(Value::Null, text),
          relapse.trigger_context.map_or(Value::Null, text),
          Value::Integer(relapse.sponsor_notified.into()),
          dt_value(relapse.recorded_at),
        ],
      )
      .await?;
    Ok(())
  }

  async fn relapses_for(&self, sobriety_date_id: Uuid) -> Result<Vec<Relapse>> {
    let id_str = encode_uuid(sobriety_date_id);

    let raws: Vec<RawRelapse> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {RELAPSE_COLUMNS} FROM relapses
           WHERE sobriety_date_id = ?1
           ORDER BY relapse_date, recorded_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawRelapse::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRelapse::into_relapse).collect()
  }

  async fn mark_relapse_sponsor_notified(&self, relapse_id: Uuid) -> Result<()> {
    self
      .execute(
        "UPDATE relapses SET sponsor_notified = 1 WHERE relapse_id = ?1",
        vec![uuid_value(relapse_id)],
      )
      .await?;
    Ok(())
  }
}

// ─── SponsorDirectory impl ───────────────────────────────────────────────────

impl SponsorDirectory for SqliteStore {
  type Error = Error;

  async fn active_sponsor(&self, sponsee_id: Uuid) -> Result<Option<Uuid>> {
    let sponsee_str = encode_uuid(sponsee_id);

    let sponsor: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT sponsor_id FROM sponsorships WHERE sponsee_id = ?1 AND is_active = 1",
              rusqlite::params![sponsee_str],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    sponsor.as_deref().map(decode_uuid).transpose()
  }

  async fn link_sponsor(&self, sponsor_id: Uuid, sponsee_id: Uuid) -> Result<()> {
    let link_str    = encode_uuid(Uuid::new_v4());
    let sponsor_str = encode_uuid(sponsor_id);
    let sponsee_str = encode_uuid(sponsee_id);
    let at_str      = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
          .query_row(
            "SELECT sponsor_id FROM sponsorships WHERE sponsee_id = ?1 AND is_active = 1",
            rusqlite::params![sponsee_str],
            |r| r.get(0),
          )
          .optional()?;
        if current.as_deref() == Some(sponsor_str.as_str()) {
          return Ok(());
        }

        tx.execute(
          "UPDATE sponsorships SET is_active = 0 WHERE sponsee_id = ?1 AND is_active = 1",
          rusqlite::params![sponsee_str],
        )?;
        tx.execute(
          "INSERT INTO sponsorships (sponsorship_id, sponsor_id, sponsee_id, is_active, created_at)
           VALUES (?1, ?2, ?3, 1, ?4)",
          rusqlite::params![link_str, sponsor_str, sponsee_str, at_str],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn unlink_sponsor(&self, sponsee_id: Uuid) -> Result<bool> {
    let changed = self
      .execute(
        "UPDATE sponsorships SET is_active = 0 WHERE sponsee_id = ?1 AND is_active = 1",
        vec![uuid_value(sponsee_id)],
      )
      .await?;
    Ok(changed == 1)
  }
}
