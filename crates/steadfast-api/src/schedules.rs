//! Handlers for `/schedules` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/schedules?owner_id=<uuid>` | Owner's schedules |
//! | `POST` | `/schedules` | Body: [`NewSchedule`] |
//! | `GET`  | `/schedules/:id` | 404 if not found |
//! | `POST` | `/schedules/:id/active` | Body: `{"active":false}` |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use steadfast_core::{
  notify::{NotificationDispatcher, SponsorDirectory},
  schedule::{CheckInSchedule, NewSchedule},
  store::AccountabilityStore,
};
use steadfast_engine::Engine;
use uuid::Uuid;

use crate::error::ApiError;

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub owner_id: Uuid,
}

/// `GET /schedules?owner_id=<uuid>`
pub async fn list<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<CheckInSchedule>>, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  Ok(Json(engine.schedules_for_owner(params.owner_id).await?))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /schedules`
pub async fn create<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Json(body): Json<NewSchedule>,
) -> Result<impl IntoResponse, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  let schedule = engine.create_schedule(body, Utc::now()).await?;
  Ok((StatusCode::CREATED, Json(schedule)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /schedules/:id`
pub async fn get_one<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<CheckInSchedule>, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  Ok(Json(engine.get_schedule(id).await?))
}

// ─── Enable / disable ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ActiveBody {
  pub active: bool,
}

/// `POST /schedules/:id/active` with body `{"active":true}`
pub async fn set_active<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<ActiveBody>,
) -> Result<Json<CheckInSchedule>, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  Ok(Json(engine.set_schedule_active(id, body.active, Utc::now()).await?))
}
