//! Error types for `steadfast-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::instance::CheckInStatus;

/// Errors surfaced by the calculators and by the engine built on top of them.
///
/// The first four variants are the engine's failure taxonomy. Only
/// [`Error::InvalidConfiguration`] and the input-validation variants are ever
/// shown to an end user; transient failures are retried by the next tick.
#[derive(Debug, Error)]
pub enum Error {
  /// A recurrence rule or schedule setting is malformed. Never clamped.
  #[error("invalid configuration: {0}")]
  InvalidConfiguration(String),

  /// A derived computation was asked to run on data violating its
  /// precondition (e.g. `now` before the effective start).
  #[error("invalid state: {0}")]
  InvalidState(String),

  /// A datastore or dispatcher call failed; safe to retry.
  #[error("transient I/O failure: {0}")]
  TransientIo(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// A record references a parent that no longer exists.
  #[error("{kind} {id} references a missing parent")]
  OrphanReference { kind: &'static str, id: Uuid },

  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("{kind} not found: {id}")]
  NotFound { kind: &'static str, id: Uuid },

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("check-in {id} cannot move from {from} to {to}")]
  InvalidTransition {
    id:   Uuid,
    from: CheckInStatus,
    to:   CheckInStatus,
  },

  #[error("grace period for check-in {0} has elapsed")]
  GracePeriodElapsed(Uuid),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap a collaborator failure as [`Error::TransientIo`].
  pub fn transient<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::TransientIo(Box::new(e))
  }

  /// Whether the next scheduled tick should retry the failed unit of work.
  pub fn is_retryable(&self) -> bool { matches!(self, Self::TransientIo(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
