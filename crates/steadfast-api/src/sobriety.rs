//! Handlers for `/sobriety` endpoints.
//!
//! Streak figures are computed on every request; nothing here is cached.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::Utc;
use steadfast_core::{
  notify::{NotificationDispatcher, SponsorDirectory},
  sobriety::{NewRelapse, NewSobrietyDate},
  store::AccountabilityStore,
  streak::SobrietyStats,
};
use steadfast_engine::Engine;
use uuid::Uuid;

use crate::error::ApiError;

/// `POST /sobriety`. 409 if the user already tracks that substance.
pub async fn create<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Json(body): Json<NewSobrietyDate>,
) -> Result<impl IntoResponse, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  let record = engine.create_sobriety_date(body, Utc::now()).await?;
  Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /sobriety/:id/stats`
pub async fn stats<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<SobrietyStats>, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  Ok(Json(engine.sobriety_stats(id, Utc::now()).await?))
}

/// `POST /sobriety/:id/relapses`
pub async fn relapse<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<NewRelapse>,
) -> Result<impl IntoResponse, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  let relapse = engine.record_relapse(id, body, Utc::now()).await?;
  Ok((StatusCode::CREATED, Json(relapse)))
}
