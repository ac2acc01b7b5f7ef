//! Handlers for check-in instances.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/schedules/:id/instances` | Oldest first |
//! | `POST` | `/instances/:id/responses` | Body: `{"responses":{"0":"..."}}` |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use chrono::Utc;
use serde::Deserialize;
use steadfast_core::{
  instance::{CheckInInstance, Responses},
  notify::{NotificationDispatcher, SponsorDirectory},
  store::AccountabilityStore,
};
use steadfast_engine::Engine;
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /schedules/:id/instances`
pub async fn list<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<CheckInInstance>>, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  Ok(Json(engine.list_instances(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RespondBody {
  /// Answers keyed by question index.
  pub responses: Responses,
}

/// `POST /instances/:id/responses`
///
/// 409 if the check-in is not awaiting an answer or its grace period has
/// elapsed.
pub async fn respond<S, D>(
  State(engine): State<Arc<Engine<S, D>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<RespondBody>,
) -> Result<Json<CheckInInstance>, ApiError>
where
  S: AccountabilityStore + SponsorDirectory,
  D: NotificationDispatcher,
{
  let instance = engine.complete_check_in(id, body.responses, Utc::now()).await?;
  Ok(Json(instance))
}
