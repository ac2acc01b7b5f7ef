//! Handlers for `/sponsorships` endpoints.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use serde::Deserialize;
use steadfast_core::{
  notify::{NotificationDispatcher, SponsorDirectory},
  store::AccountabilityStore,
};
use steadfast_engine::Engine;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct LinkBody {
  pub sponsor_id: Uuid,
  pub sponsee_id: Uuid,
}

/// `POST /sponsorships`. Replaces any existing sponsor for the sponsee.
pub async fn link<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Json(body): Json<LinkBody>,
) -> Result<StatusCode, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  engine.link_sponsor(body.sponsor_id, body.sponsee_id).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /sponsorships/:sponsee_id`
pub async fn unlink<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Path(sponsee_id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  engine.unlink_sponsor(sponsee_id).await?;
  Ok(StatusCode::NO_CONTENT)
}
