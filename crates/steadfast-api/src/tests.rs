//! Router tests driven with `tower::ServiceExt::oneshot`.

use std::{convert::Infallible, sync::Arc};

use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};
use steadfast_core::notify::{Notification, NotificationDispatcher};
use steadfast_engine::{Engine, EngineConfig};
use steadfast_store_sqlite::SqliteStore;
use tower::ServiceExt as _;
use uuid::Uuid;

use crate::api_router;

/// Accepts every notification and drops it.
struct NullDispatcher;

impl NotificationDispatcher for NullDispatcher {
  type Error = Infallible;

  async fn send(&self, _recipient: Uuid, _notification: Notification) -> Result<(), Infallible> {
    Ok(())
  }
}

type TestEngine = Engine<SqliteStore, NullDispatcher>;

async fn setup() -> (Router, Arc<TestEngine>) {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let engine = Arc::new(Engine::new(
    Arc::new(store),
    Arc::new(NullDispatcher),
    EngineConfig::default(),
  ));
  (api_router(Arc::clone(&engine)), engine)
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let builder = Request::builder().method(method).uri(uri);
  let req = match body {
    Some(body) => builder
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap(),
    None => builder.body(Body::empty()).unwrap(),
  };
  let resp = router.clone().oneshot(req).await.unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let json = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, json)
}

fn schedule_body(owner_id: Uuid) -> Value {
  json!({
    "owner_id": owner_id,
    "recurrence": "daily",
    "time_of_day": "09:00",
    "timezone": "Europe/London",
    "questions": ["How are you feeling?", "Any cravings today?"],
  })
}

// ─── Schedules ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_fetch_schedule() {
  let (router, _) = setup().await;
  let owner = Uuid::new_v4();

  let (status, created) = call(&router, "POST", "/schedules", Some(schedule_body(owner))).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(created["time_of_day"], "09:00");
  assert_eq!(created["timezone"], "Europe/London");
  assert_eq!(created["is_active"], true);
  assert_eq!(created["consecutive_misses"], 0);

  let id = created["schedule_id"].as_str().unwrap();
  let (status, fetched) = call(&router, "GET", &format!("/schedules/{id}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(fetched["schedule_id"], created["schedule_id"]);
  assert_eq!(fetched["next_scheduled_at"], created["next_scheduled_at"]);
  assert_eq!(fetched["questions"], created["questions"]);

  let (status, listed) = call(&router, "GET", &format!("/schedules?owner_id={owner}"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_schedule_is_rejected_with_400() {
  let (router, _) = setup().await;
  let owner = Uuid::new_v4();
  let mut body = schedule_body(owner);
  body["recurrence"] = json!("custom");
  body["custom_interval_days"] = json!(400);

  let (status, err) = call(&router, "POST", "/schedules", Some(body)).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(err["error"].as_str().unwrap().contains("invalid configuration"));

  let mut body = schedule_body(owner);
  body["timezone"] = json!("Mars/Olympus_Mons");
  let (status, _) = call(&router, "POST", "/schedules", Some(body)).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (_, listed) = call(&router, "GET", &format!("/schedules?owner_id={owner}"), None).await;
  assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_schedule_is_404() {
  let (router, _) = setup().await;
  let (status, err) = call(&router, "GET", &format!("/schedules/{}", Uuid::new_v4()), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(err["error"].is_string());
}

#[tokio::test]
async fn toggle_schedule_active() {
  let (router, _) = setup().await;
  let (_, created) = call(&router, "POST", "/schedules", Some(schedule_body(Uuid::new_v4()))).await;
  let id = created["schedule_id"].as_str().unwrap();

  let uri = format!("/schedules/{id}/active");
  let (status, off) = call(&router, "POST", &uri, Some(json!({ "active": false }))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(off["is_active"], false);

  let (status, on) = call(&router, "POST", &uri, Some(json!({ "active": true }))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(on["is_active"], true);
}

// ─── Check-ins ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn respond_to_sent_check_in() {
  let (router, engine) = setup().await;
  let (_, created) = call(&router, "POST", "/schedules", Some(schedule_body(Uuid::new_v4()))).await;
  let schedule_id: Uuid = created["schedule_id"].as_str().unwrap().parse().unwrap();

  let schedule = engine.get_schedule(schedule_id).await.unwrap();
  engine.scan(schedule.next_scheduled_at).await.unwrap();

  let (status, instances) =
    call(&router, "GET", &format!("/schedules/{schedule_id}/instances"), None).await;
  assert_eq!(status, StatusCode::OK);
  let instances = instances.as_array().unwrap();
  assert_eq!(instances.len(), 1);
  assert_eq!(instances[0]["status"], "sent");
  let instance_id = instances[0]["instance_id"].as_str().unwrap();

  let uri = format!("/instances/{instance_id}/responses");
  let (status, _) = call(&router, "POST", &uri, Some(json!({ "responses": { "9": "?" } }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let answers = json!({ "responses": { "0": "steady", "1": "none" } });
  let (status, done) = call(&router, "POST", &uri, Some(answers.clone())).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(done["status"], "completed");
  assert_eq!(done["responses"]["1"], "none");

  let (status, _) = call(&router, "POST", &uri, Some(answers)).await;
  assert_eq!(status, StatusCode::CONFLICT);
}

// ─── Sobriety ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sobriety_stats_follow_relapses() {
  let (router, _) = setup().await;
  let user = Uuid::new_v4();
  let start = Utc::now() - TimeDelta::days(45);

  let body = json!({ "user_id": user, "substance_type": "Alcohol", "start_date": start });
  let (status, record) = call(&router, "POST", "/sobriety", Some(body.clone())).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(record["substance_type"], "alcohol");

  let (status, _) = call(&router, "POST", "/sobriety", Some(body)).await;
  assert_eq!(status, StatusCode::CONFLICT);

  let id = record["sobriety_date_id"].as_str().unwrap();
  let (status, stats) = call(&router, "GET", &format!("/sobriety/{id}/stats"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(stats["current_streak_days"], 45);
  assert_eq!(stats["milestones_achieved"], json!(["30_days"]));
  assert_eq!(stats["next_milestone_days"], 60);

  let relapses = format!("/sobriety/{id}/relapses");
  let too_early = json!({ "relapse_date": start - TimeDelta::days(1) });
  let (status, _) = call(&router, "POST", &relapses, Some(too_early)).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

  let relapse = json!({
    "relapse_date": Utc::now() - TimeDelta::days(5),
    "note": "bad night",
    "notify_sponsor": false,
  });
  let (status, logged) = call(&router, "POST", &relapses, Some(relapse)).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(logged["sponsor_notified"], false);

  let (_, stats) = call(&router, "GET", &format!("/sobriety/{id}/stats"), None).await;
  assert_eq!(stats["current_streak_days"], 5);
  assert_eq!(stats["milestones_achieved"], json!([]));
}

// ─── Sponsorships ────────────────────────────────────────────────────────────

#[tokio::test]
async fn link_and_unlink_sponsor() {
  let (router, _) = setup().await;
  let sponsee = Uuid::new_v4();

  let (status, _) = call(
    &router,
    "POST",
    "/sponsorships",
    Some(json!({ "sponsor_id": sponsee, "sponsee_id": sponsee })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, _) = call(
    &router,
    "POST",
    "/sponsorships",
    Some(json!({ "sponsor_id": Uuid::new_v4(), "sponsee_id": sponsee })),
  )
  .await;
  assert_eq!(status, StatusCode::NO_CONTENT);

  let uri = format!("/sponsorships/{sponsee}");
  let (status, _) = call(&router, "DELETE", &uri, None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, _) = call(&router, "DELETE", &uri, None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}
