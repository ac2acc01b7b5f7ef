//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use steadfast_core::Error;
use tracing::warn;

/// An error returned by an API handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error(transparent)]
  Engine(#[from] Error),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    let Self::Engine(e) = self;
    match e {
      Error::InvalidConfiguration(_) | Error::InvalidInput(_) | Error::Serialization(_) => {
        StatusCode::BAD_REQUEST
      }
      Error::NotFound { .. } => StatusCode::NOT_FOUND,
      Error::Conflict(_) | Error::InvalidTransition { .. } | Error::GracePeriodElapsed(_) => {
        StatusCode::CONFLICT
      }
      Error::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
      Error::TransientIo(_) => StatusCode::SERVICE_UNAVAILABLE,
      Error::OrphanReference { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let message = if status.is_server_error() {
      // Infrastructure details stay in the logs.
      warn!(error = %self, "request failed");
      "temporarily unavailable, please retry".to_owned()
    } else {
      self.to_string()
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
