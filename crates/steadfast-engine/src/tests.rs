//! Engine tests against an in-memory `SqliteStore` and a recording
//! dispatcher.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, TimeDelta, TimeZone as _, Utc};
use steadfast_core::{
  Error,
  instance::{CheckInInstance, CheckInStatus, Responses},
  notify::{Notification, NotificationDispatcher},
  schedule::{NewSchedule, RecurrenceKind},
  sobriety::{NewRelapse, NewSobrietyDate},
  store::AccountabilityStore,
  streak::Milestone,
};
use steadfast_store_sqlite::SqliteStore;
use uuid::Uuid;

use crate::{Engine, EngineConfig, MissReport, ScanReport};

// ─── Harness ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("dispatcher offline")]
struct Offline;

#[derive(Default)]
struct RecordingDispatcher {
  sent:     Mutex<Vec<(Uuid, Notification)>>,
  failing:  AtomicBool,
  /// Never completes a send while set.
  hanging:  AtomicBool,
  delay_ms: AtomicU64,
}

impl RecordingDispatcher {
  fn set_failing(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }

  fn set_hanging(&self, hanging: bool) { self.hanging.store(hanging, Ordering::SeqCst); }

  /// Sleep this long inside every send before recording it.
  fn set_delay(&self, delay: Duration) {
    let ms = u64::try_from(delay.as_millis()).unwrap();
    self.delay_ms.store(ms, Ordering::SeqCst);
  }

  /// How many times each check-in instance was handed over.
  fn check_in_sends(&self) -> HashMap<Uuid, usize> {
    let mut counts = HashMap::new();
    for (_, n) in self.sent() {
      if let Notification::CheckInDue { instance_id, .. } = n {
        *counts.entry(instance_id).or_default() += 1;
      }
    }
    counts
  }

  fn sent(&self) -> Vec<(Uuid, Notification)> { self.sent.lock().unwrap().clone() }

  fn escalations(&self) -> Vec<(Uuid, Notification)> {
    self
      .sent()
      .into_iter()
      .filter(|(_, n)| matches!(n, Notification::SponsorEscalation { .. }))
      .collect()
  }
}

impl NotificationDispatcher for RecordingDispatcher {
  type Error = Offline;

  async fn send(&self, recipient: Uuid, notification: Notification) -> Result<(), Offline> {
    if self.hanging.load(Ordering::SeqCst) {
      std::future::pending::<()>().await;
    }
    let delay = self.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
      tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if self.failing.load(Ordering::SeqCst) {
      return Err(Offline);
    }
    self.sent.lock().unwrap().push((recipient, notification));
    Ok(())
  }
}

type TestEngine = Engine<SqliteStore, RecordingDispatcher>;

struct Harness {
  engine:     TestEngine,
  store:      Arc<SqliteStore>,
  dispatcher: Arc<RecordingDispatcher>,
}

async fn harness_with(config: EngineConfig) -> Harness {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  let dispatcher = Arc::new(RecordingDispatcher::default());
  let engine = Engine::new(Arc::clone(&store), Arc::clone(&dispatcher), config);
  Harness { engine, store, dispatcher }
}

async fn harness() -> Harness { harness_with(EngineConfig::default()).await }

/// 2024-05-01 08:00 UTC, an hour before the first firing.
fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() }

/// 09:00 UTC on day `d`.
fn nine(d: i64) -> DateTime<Utc> { t0() + TimeDelta::hours(1) + TimeDelta::days(d) }

/// A tick one minute after day `d`'s firing.
fn at(d: i64) -> DateTime<Utc> { nine(d) + TimeDelta::minutes(1) }

fn daily_utc(owner_id: Uuid) -> NewSchedule {
  NewSchedule {
    owner_id,
    recurrence: RecurrenceKind::Daily,
    custom_interval_days: None,
    time_of_day: "09:00".into(),
    timezone: "UTC".into(),
    questions: vec!["How are you today?".into(), "Did you call your sponsor?".into()],
  }
}

/// What the trigger does each tick: detect misses, then scan.
async fn tick(engine: &TestEngine, now: DateTime<Utc>) -> (MissReport, ScanReport) {
  let misses = engine.detect_misses(now).await.unwrap();
  let scan = engine.scan(now).await.unwrap();
  (misses, scan)
}

fn answers() -> Responses { Responses::from([(0, "doing okay".to_string())]) }

// ─── Scheduling ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn scan_is_idempotent() {
  let h = harness().await;
  let sched = h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();
  assert_eq!(sched.next_scheduled_at, nine(0));

  let first = h.engine.scan(at(0)).await.unwrap();
  assert_eq!(first.created.len(), 1);
  assert_eq!(first.sent, 1);
  assert_eq!(first.created[0].status, CheckInStatus::Sent);
  assert_eq!(first.created[0].due_at, nine(0));

  let second = h.engine.scan(at(0)).await.unwrap();
  assert!(second.created.is_empty());
  assert_eq!(second.sent, 0);
  assert_eq!(second.retried, 0);

  let instances = h.engine.list_instances(sched.schedule_id).await.unwrap();
  assert_eq!(instances.len(), 1);
  assert_eq!(h.dispatcher.sent().len(), 1);

  let sched = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched.next_scheduled_at, nine(1));
  assert_eq!(sched.last_sent_at, Some(at(0)));
}

#[tokio::test]
async fn scan_before_due_does_nothing() {
  let h = harness().await;
  h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  let report = h.engine.scan(nine(0) - TimeDelta::seconds(1)).await.unwrap();
  assert!(report.created.is_empty());
  assert!(h.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn check_in_payload_carries_question_snapshot() {
  let h = harness().await;
  let owner = Uuid::new_v4();
  let sched = h.engine.create_schedule(daily_utc(owner), t0()).await.unwrap();
  h.engine.scan(at(0)).await.unwrap();

  let sent = h.dispatcher.sent();
  let (recipient, Notification::CheckInDue { schedule_id, due_at, questions, .. }) = &sent[0]
  else {
    panic!("expected a check-in notification");
  };
  assert_eq!(*recipient, owner);
  assert_eq!(*schedule_id, sched.schedule_id);
  assert_eq!(*due_at, nine(0));
  assert_eq!(questions, &sched.questions);
}

#[tokio::test]
async fn downtime_skips_to_next_future_occurrence() {
  let h = harness().await;
  let sched = h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  // Scheduler was down for several days.
  let report = h.engine.scan(at(4)).await.unwrap();
  assert_eq!(report.created.len(), 1);
  assert_eq!(report.created[0].due_at, nine(0));

  let sched = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched.next_scheduled_at, nine(5));
}

#[tokio::test]
async fn daily_cursor_keeps_local_time_across_fall_back() {
  let h = harness().await;
  let created_at = Utc.with_ymd_and_hms(2024, 11, 2, 12, 0, 0).unwrap();
  let new = NewSchedule {
    timezone: "America/New_York".into(),
    ..daily_utc(Uuid::new_v4())
  };
  let sched = h.engine.create_schedule(new, created_at).await.unwrap();
  // 09:00 EDT
  assert_eq!(sched.next_scheduled_at, Utc.with_ymd_and_hms(2024, 11, 2, 13, 0, 0).unwrap());

  h.engine.scan(sched.next_scheduled_at).await.unwrap();
  let sched = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  // 09:00 EST, 25 hours later.
  assert_eq!(sched.next_scheduled_at, Utc.with_ymd_and_hms(2024, 11, 3, 14, 0, 0).unwrap());
}

#[tokio::test]
async fn invalid_custom_interval_persists_nothing() {
  let h = harness().await;
  let owner = Uuid::new_v4();
  let new = NewSchedule {
    recurrence: RecurrenceKind::Custom,
    custom_interval_days: Some(400),
    ..daily_utc(owner)
  };

  let err = h.engine.create_schedule(new, t0()).await.unwrap_err();
  assert!(matches!(err, Error::InvalidConfiguration(_)));
  assert!(h.engine.schedules_for_owner(owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn deadline_leaves_work_for_next_tick() {
  let h = harness_with(EngineConfig { pass_deadline_secs: 0, ..EngineConfig::default() }).await;
  h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  let report = h.engine.scan(at(0)).await.unwrap();
  assert!(report.deadline_hit);
  assert!(report.created.is_empty());
}

// ─── Dispatch failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn failed_dispatch_stays_pending_and_is_retried() {
  let h = harness().await;
  let sched = h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  h.dispatcher.set_failing(true);
  let report = h.engine.scan(at(0)).await.unwrap();
  assert_eq!(report.created.len(), 1);
  assert_eq!(report.sent, 0);
  assert_eq!(report.failed, 1);
  let instance_id = report.created[0].instance_id;
  let instance = h.engine.get_instance(instance_id).await.unwrap();
  assert_eq!(instance.status, CheckInStatus::Pending);
  // The cursor still advanced.
  let sched = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched.next_scheduled_at, nine(1));

  h.dispatcher.set_failing(false);
  let retry_at = at(0) + TimeDelta::minutes(5);
  let report = h.engine.scan(retry_at).await.unwrap();
  assert!(report.created.is_empty());
  assert_eq!(report.retried, 1);

  let instance = h.engine.get_instance(instance_id).await.unwrap();
  assert_eq!(instance.status, CheckInStatus::Sent);
  assert_eq!(instance.sent_at, Some(retry_at));
  assert_eq!(h.dispatcher.sent().len(), 1);
}

#[tokio::test]
async fn undeliverable_check_in_expires_as_missed() {
  let h = harness().await;
  let sched = h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  h.dispatcher.set_failing(true);
  let first = h.engine.scan(at(0)).await.unwrap();
  let stuck = first.created[0].instance_id;

  let report = h.engine.scan(at(1)).await.unwrap();
  assert_eq!(report.expired, 1);
  assert_eq!(report.created.len(), 1);

  let instance = h.engine.get_instance(stuck).await.unwrap();
  assert_eq!(instance.status, CheckInStatus::Missed);
  assert!(instance.sent_at.is_none());
  let sched = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched.consecutive_misses, 1);
  assert!(h.dispatcher.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_dispatch_times_out_and_is_retried() {
  let h = harness_with(EngineConfig { dispatch_timeout_secs: 1, ..EngineConfig::default() }).await;
  h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  h.dispatcher.set_hanging(true);
  let report = h.engine.scan(at(0)).await.unwrap();
  assert_eq!(report.created.len(), 1);
  assert_eq!(report.sent, 0);
  assert_eq!(report.failed, 1);
  let instance_id = report.created[0].instance_id;
  assert_eq!(
    h.engine.get_instance(instance_id).await.unwrap().status,
    CheckInStatus::Pending
  );

  h.dispatcher.set_hanging(false);
  let retry_at = at(0) + TimeDelta::minutes(5);
  let report = h.engine.scan(retry_at).await.unwrap();
  assert_eq!(report.retried, 1);
  assert_eq!(report.failed, 0);

  let instance = h.engine.get_instance(instance_id).await.unwrap();
  assert_eq!(instance.status, CheckInStatus::Sent);
  assert_eq!(instance.sent_at, Some(retry_at));
  assert_eq!(h.dispatcher.check_in_sends().get(&instance_id), Some(&1));
}

#[tokio::test]
async fn leftover_pending_instance_is_sent_in_the_same_pass() {
  let h = harness().await;
  let sched = h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  // A previous pass stored the instance and then died before advancing the
  // cursor or sending.
  let (leftover, _) = h
    .store
    .insert_instance_if_absent(CheckInInstance::pending_for(&sched))
    .await
    .unwrap();

  let report = h.engine.scan(at(0)).await.unwrap();
  assert!(report.created.is_empty());
  assert_eq!(report.retried, 1);

  let instance = h.engine.get_instance(leftover.instance_id).await.unwrap();
  assert_eq!(instance.status, CheckInStatus::Sent);
  assert_eq!(h.dispatcher.check_in_sends().get(&leftover.instance_id), Some(&1));
  let sched = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched.next_scheduled_at, nine(1));
}

// ─── Overlapping passes ──────────────────────────────────────────────────────

#[tokio::test]
async fn overlapping_scans_send_each_check_in_once() {
  let h = harness().await;
  let mut schedules = Vec::new();
  for _ in 0..3 {
    schedules.push(h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap());
  }
  h.dispatcher.set_delay(Duration::from_millis(200));

  let (a, b) = tokio::join!(h.engine.scan(at(0)), async {
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.engine.scan(at(0)).await
  });
  let (a, b) = (a.unwrap(), b.unwrap());

  assert_eq!(a.created.len() + b.created.len(), 3);
  assert_eq!(a.sent + a.retried + b.sent + b.retried, 3);
  assert_eq!(a.failed + b.failed, 0);

  let sends = h.dispatcher.check_in_sends();
  for sched in &schedules {
    let instances = h.engine.list_instances(sched.schedule_id).await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].status, CheckInStatus::Sent);
    assert_eq!(sends.get(&instances[0].instance_id), Some(&1));
  }
  assert_eq!(h.dispatcher.sent().len(), 3);
}

#[tokio::test]
async fn overlapping_miss_passes_escalate_once() {
  let h = harness().await;
  let owner = Uuid::new_v4();
  let sponsor = Uuid::new_v4();
  h.engine.link_sponsor(sponsor, owner).await.unwrap();
  let sched = h.engine.create_schedule(daily_utc(owner), t0()).await.unwrap();
  for d in 0..3 {
    tick(&h.engine, at(d)).await;
  }
  assert_eq!(h.engine.get_schedule(sched.schedule_id).await.unwrap().consecutive_misses, 2);

  h.dispatcher.set_delay(Duration::from_millis(200));
  let (m1, m2, scan) = tokio::join!(
    h.engine.detect_misses(at(3)),
    async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      h.engine.detect_misses(at(3)).await
    },
    h.engine.scan(at(3)),
  );
  let (m1, m2, scan) = (m1.unwrap(), m2.unwrap(), scan.unwrap());

  assert_eq!(m1.missed + m2.missed, 1);
  assert_eq!(m1.escalations.len() + m2.escalations.len(), 1);
  assert_eq!(h.dispatcher.escalations().len(), 1);
  assert_eq!(h.dispatcher.escalations()[0].0, sponsor);

  assert_eq!(scan.created.len(), 1);
  let day3 = scan.created[0].instance_id;
  assert_eq!(h.dispatcher.check_in_sends().get(&day3), Some(&1));

  let sched = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched.consecutive_misses, 3);
  assert!(sched.escalation_raised);
}

// ─── Orphans ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn orphaned_instances_do_not_abort_the_pass() {
  let h = harness().await;
  let real = h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  // An instance whose schedule is not in the store.
  let ghost = daily_utc(Uuid::new_v4()).into_schedule(t0()).unwrap();
  let (pending_ghost, _) = h
    .store
    .insert_instance_if_absent(CheckInInstance::pending_for(&ghost))
    .await
    .unwrap();

  let scan = h.engine.scan(at(0)).await.unwrap();
  assert_eq!(scan.orphans, 1);
  assert_eq!(scan.sent, 1);
  assert_eq!(scan.failed, 0);

  // Force the ghost to Sent so the miss detector meets it too.
  h.store.mark_sent(pending_ghost.instance_id, at(0)).await.unwrap();
  let misses = h.engine.detect_misses(at(1)).await.unwrap();
  assert_eq!(misses.missed, 2);
  assert_eq!(misses.orphans, 1);
  assert_eq!(misses.failed, 0);

  let real = h.engine.get_schedule(real.schedule_id).await.unwrap();
  assert_eq!(real.consecutive_misses, 1);
}

// ─── Misses and escalation ───────────────────────────────────────────────────

#[tokio::test]
async fn third_miss_escalates_exactly_once() {
  let h = harness().await;
  let owner = Uuid::new_v4();
  let sponsor = Uuid::new_v4();
  h.engine.link_sponsor(sponsor, owner).await.unwrap();
  let sched = h.engine.create_schedule(daily_utc(owner), t0()).await.unwrap();

  for d in 0..3 {
    let (misses, _) = tick(&h.engine, at(d)).await;
    assert!(misses.escalations.is_empty());
  }
  let sched_now = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched_now.consecutive_misses, 2);

  // Day 2's check-in was sent at T = at(2); nothing by T + 24h01m.
  let late = at(2) + TimeDelta::hours(24) + TimeDelta::minutes(1);
  let (misses, _) = tick(&h.engine, late).await;
  assert_eq!(misses.missed, 1);
  assert_eq!(misses.escalations.len(), 1);
  assert_eq!(misses.escalations[0].sponsor_id, Some(sponsor));
  assert_eq!(misses.escalations[0].consecutive_misses, 3);

  let sched_now = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched_now.consecutive_misses, 3);
  assert!(sched_now.escalation_raised);

  // Re-running the pass while still at three misses does not re-fire.
  let again = h.engine.detect_misses(late + TimeDelta::minutes(1)).await.unwrap();
  assert!(again.escalations.is_empty());

  let escalations = h.dispatcher.escalations();
  assert_eq!(escalations.len(), 1);
  let (recipient, Notification::SponsorEscalation { sponsee_id, consecutive_misses, .. }) =
    &escalations[0]
  else {
    panic!("expected a sponsor escalation");
  };
  assert_eq!(*recipient, sponsor);
  assert_eq!(*sponsee_id, owner);
  assert_eq!(*consecutive_misses, 3);
}

#[tokio::test]
async fn completion_resets_and_rearms_escalation() {
  let h = harness().await;
  let owner = Uuid::new_v4();
  h.engine.link_sponsor(Uuid::new_v4(), owner).await.unwrap();
  let sched = h.engine.create_schedule(daily_utc(owner), t0()).await.unwrap();

  for d in 0..=3 {
    tick(&h.engine, at(d)).await;
  }
  assert_eq!(h.dispatcher.escalations().len(), 1);

  // Day 3's check-in is answered in time.
  let open = h
    .engine
    .list_instances(sched.schedule_id)
    .await
    .unwrap()
    .into_iter()
    .find(|i| i.due_at == nine(3))
    .unwrap();
  h.engine
    .complete_check_in(open.instance_id, answers(), at(3) + TimeDelta::hours(2))
    .await
    .unwrap();
  let sched_now = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched_now.consecutive_misses, 0);
  assert!(!sched_now.escalation_raised);

  // A fresh run of three misses escalates again.
  for d in 4..=7 {
    tick(&h.engine, at(d)).await;
  }
  let sched_now = h.engine.get_schedule(sched.schedule_id).await.unwrap();
  assert_eq!(sched_now.consecutive_misses, 3);
  assert_eq!(h.dispatcher.escalations().len(), 2);
}

#[tokio::test]
async fn escalation_without_sponsor_is_recorded_once() {
  let h = harness().await;
  let sched = h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  let mut raised = Vec::new();
  for d in 0..=4 {
    let (misses, _) = tick(&h.engine, at(d)).await;
    raised.extend(misses.escalations);
  }
  assert_eq!(raised.len(), 1);
  assert_eq!(raised[0].sponsor_id, None);
  assert!(h.dispatcher.escalations().is_empty());
  assert!(h.engine.get_schedule(sched.schedule_id).await.unwrap().escalation_raised);
}

#[tokio::test]
async fn failed_escalation_is_retried_next_pass() {
  let h = harness().await;
  let owner = Uuid::new_v4();
  h.engine.link_sponsor(Uuid::new_v4(), owner).await.unwrap();
  let sched = h.engine.create_schedule(daily_utc(owner), t0()).await.unwrap();
  for d in 0..3 {
    tick(&h.engine, at(d)).await;
  }

  h.dispatcher.set_failing(true);
  let misses = h.engine.detect_misses(at(3)).await.unwrap();
  assert!(misses.escalations.is_empty());
  assert_eq!(misses.failed, 1);
  assert!(!h.engine.get_schedule(sched.schedule_id).await.unwrap().escalation_raised);

  h.dispatcher.set_failing(false);
  let misses = h.engine.detect_misses(at(3)).await.unwrap();
  assert_eq!(misses.escalations.len(), 1);
  assert_eq!(h.dispatcher.escalations().len(), 1);
}

// ─── Completion ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn completion_enforces_state_and_grace_period() {
  let h = harness().await;
  let sched = h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();

  // Pending (dispatch failed): cannot be completed yet.
  h.dispatcher.set_failing(true);
  let pending = h.engine.scan(at(0)).await.unwrap().created[0].instance_id;
  let err = h.engine.complete_check_in(pending, answers(), at(0)).await.unwrap_err();
  assert!(matches!(
    err,
    Error::InvalidTransition { from: CheckInStatus::Pending, to: CheckInStatus::Completed, .. }
  ));

  h.dispatcher.set_failing(false);
  h.engine.scan(at(0)).await.unwrap();
  let sent = h.engine.get_instance(pending).await.unwrap();
  assert_eq!(sent.status, CheckInStatus::Sent);

  let bad = Responses::from([(7, "no such question".to_string())]);
  let err = h.engine.complete_check_in(pending, bad, at(0)).await.unwrap_err();
  assert!(matches!(err, Error::InvalidInput(_)));

  let too_late = at(0) + TimeDelta::hours(24);
  let err = h.engine.complete_check_in(pending, answers(), too_late).await.unwrap_err();
  assert!(matches!(err, Error::GracePeriodElapsed(id) if id == pending));

  let done = h
    .engine
    .complete_check_in(pending, answers(), at(0) + TimeDelta::hours(3))
    .await
    .unwrap();
  assert_eq!(done.status, CheckInStatus::Completed);
  assert_eq!(done.responses, answers());

  let err = h.engine.complete_check_in(pending, answers(), at(0)).await.unwrap_err();
  assert!(matches!(err, Error::InvalidTransition { from: CheckInStatus::Completed, .. }));

  // A completed check-in is never turned into a miss.
  let misses = h.engine.detect_misses(at(2)).await.unwrap();
  assert_eq!(misses.missed, 0);
  assert_eq!(h.engine.get_schedule(sched.schedule_id).await.unwrap().consecutive_misses, 0);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
  let h = harness().await;
  let id = Uuid::new_v4();
  assert!(matches!(h.engine.get_schedule(id).await, Err(Error::NotFound { .. })));
  assert!(matches!(h.engine.list_instances(id).await, Err(Error::NotFound { .. })));
  assert!(matches!(
    h.engine.complete_check_in(id, answers(), t0()).await,
    Err(Error::NotFound { .. })
  ));
  assert!(matches!(h.engine.sobriety_stats(id, t0()).await, Err(Error::NotFound { .. })));
}

// ─── Schedule lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn disabled_schedule_is_skipped_and_reenable_resets_misses() {
  let h = harness().await;
  let sched = h.engine.create_schedule(daily_utc(Uuid::new_v4()), t0()).await.unwrap();
  tick(&h.engine, at(0)).await;
  h.engine.detect_misses(at(1)).await.unwrap();
  assert_eq!(h.engine.get_schedule(sched.schedule_id).await.unwrap().consecutive_misses, 1);

  let off = h.engine.set_schedule_active(sched.schedule_id, false, at(1)).await.unwrap();
  assert!(!off.is_active);
  let report = h.engine.scan(at(2)).await.unwrap();
  assert!(report.created.is_empty());

  let on = h.engine.set_schedule_active(sched.schedule_id, true, at(3)).await.unwrap();
  assert!(on.is_active);
  assert_eq!(on.consecutive_misses, 0);
  assert!(!on.escalation_raised);
  assert_eq!(on.next_scheduled_at, nine(4));

  // Setting the same state again changes nothing.
  let same = h.engine.set_schedule_active(sched.schedule_id, true, at(5)).await.unwrap();
  assert_eq!(same.next_scheduled_at, nine(4));
}

// ─── Sobriety ────────────────────────────────────────────────────────────────

fn sobriety(user_id: Uuid, days_ago: i64) -> NewSobrietyDate {
  NewSobrietyDate {
    user_id,
    substance_type: "alcohol".into(),
    start_date: t0() - TimeDelta::days(days_ago),
  }
}

#[tokio::test]
async fn relapse_lowers_streak_and_alerts_sponsor() {
  let h = harness().await;
  let user = Uuid::new_v4();
  let sponsor = Uuid::new_v4();
  h.engine.link_sponsor(sponsor, user).await.unwrap();

  let record = h.engine.create_sobriety_date(sobriety(user, 100), t0()).await.unwrap();
  let before = h.engine.sobriety_stats(record.sobriety_date_id, t0()).await.unwrap();
  assert_eq!(before.stats.current_streak_days, 100);
  assert_eq!(
    before.stats.milestones_achieved,
    vec![Milestone::Days30, Milestone::Days60, Milestone::Days90]
  );

  let relapse = NewRelapse {
    relapse_date:    t0() - TimeDelta::days(10),
    note:            Some("private reflection".into()),
    trigger_context: Some("stress".into()),
    notify_sponsor:  true,
  };
  let relapse = h
    .engine
    .record_relapse(record.sobriety_date_id, relapse, t0())
    .await
    .unwrap();
  assert!(relapse.sponsor_notified);

  let after = h.engine.sobriety_stats(record.sobriety_date_id, t0()).await.unwrap();
  assert_eq!(after.stats.current_streak_days, 10);
  assert!(after.stats.milestones_achieved.is_empty());
  assert_eq!(after.stats.next_milestone_days, Some(30));

  let sent = h.dispatcher.sent();
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].0, sponsor);
  assert!(matches!(sent[0].1, Notification::RelapseAlert { .. }));
  let payload = serde_json::to_string(&sent[0].1).unwrap();
  assert!(!payload.contains("private reflection"));

  let log = h.store.relapses_for(record.sobriety_date_id).await.unwrap();
  assert!(log[0].sponsor_notified);
}

#[tokio::test]
async fn relapse_alert_failure_still_records_relapse() {
  let h = harness().await;
  let user = Uuid::new_v4();
  h.engine.link_sponsor(Uuid::new_v4(), user).await.unwrap();
  let record = h.engine.create_sobriety_date(sobriety(user, 40), t0()).await.unwrap();

  h.dispatcher.set_failing(true);
  let relapse = NewRelapse {
    relapse_date:    t0(),
    note:            None,
    trigger_context: None,
    notify_sponsor:  true,
  };
  let relapse = h
    .engine
    .record_relapse(record.sobriety_date_id, relapse, t0())
    .await
    .unwrap();
  assert!(!relapse.sponsor_notified);

  let stats = h.engine.sobriety_stats(record.sobriety_date_id, t0()).await.unwrap();
  assert_eq!(stats.stats.current_streak_days, 0);
}

#[tokio::test]
async fn relapse_before_start_is_invalid_state() {
  let h = harness().await;
  let record = h
    .engine
    .create_sobriety_date(sobriety(Uuid::new_v4(), 10), t0())
    .await
    .unwrap();
  let relapse = NewRelapse {
    relapse_date:    t0() - TimeDelta::days(11),
    note:            None,
    trigger_context: None,
    notify_sponsor:  false,
  };
  let err = h
    .engine
    .record_relapse(record.sobriety_date_id, relapse, t0())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidState(_)));
  assert!(h.store.relapses_for(record.sobriety_date_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn second_active_record_for_substance_conflicts() {
  let h = harness().await;
  let user = Uuid::new_v4();
  h.engine.create_sobriety_date(sobriety(user, 10), t0()).await.unwrap();

  let err = h.engine.create_sobriety_date(sobriety(user, 5), t0()).await.unwrap_err();
  assert!(matches!(err, Error::Conflict(_)));

  let other = NewSobrietyDate { substance_type: "nicotine".into(), ..sobriety(user, 5) };
  assert!(h.engine.create_sobriety_date(other, t0()).await.is_ok());
}

// ─── Sponsorships ────────────────────────────────────────────────────────────

#[tokio::test]
async fn sponsor_links_are_validated() {
  let h = harness().await;
  let user = Uuid::new_v4();
  assert!(matches!(h.engine.link_sponsor(user, user).await, Err(Error::InvalidInput(_))));
  assert!(matches!(h.engine.unlink_sponsor(user).await, Err(Error::NotFound { .. })));

  h.engine.link_sponsor(Uuid::new_v4(), user).await.unwrap();
  h.engine.unlink_sponsor(user).await.unwrap();
}
