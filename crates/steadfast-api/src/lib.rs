//! JSON REST API for Steadfast.
//!
//! Exposes an axum [`Router`] over an [`Engine`]. Only user-input operations
//! and pure reads are routed; the scan and miss-detection passes are driven
//! by the server's `tick` command, never by HTTP. Auth, TLS, and transport
//! concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", steadfast_api::api_router(engine.clone()))
//! ```

pub mod checkins;
pub mod error;
pub mod schedules;
pub mod sobriety;
pub mod sponsorships;

use std::sync::Arc;

use axum::{
  Router,
  routing::{delete, get, post},
};
use steadfast_core::{
  notify::{NotificationDispatcher, SponsorDirectory},
  store::AccountabilityStore,
};
use steadfast_engine::Engine;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, D>(engine: Arc<Engine<S, D>>) -> Router<()>
where
  S: AccountabilityStore + SponsorDirectory + 'static,
  D: NotificationDispatcher + 'static,
{
  Router::new()
    // Schedules
    .route("/schedules", get(schedules::list::<S, D>).post(schedules::create::<S, D>))
    .route("/schedules/{id}", get(schedules::get_one::<S, D>))
    .route("/schedules/{id}/active", post(schedules::set_active::<S, D>))
    .route("/schedules/{id}/instances", get(checkins::list::<S, D>))
    // Check-ins
    .route("/instances/{id}/responses", post(checkins::respond::<S, D>))
    // Sobriety
    .route("/sobriety", post(sobriety::create::<S, D>))
    .route("/sobriety/{id}/stats", get(sobriety::stats::<S, D>))
    .route("/sobriety/{id}/relapses", post(sobriety::relapse::<S, D>))
    // Sponsorships
    .route("/sponsorships", post(sponsorships::link::<S, D>))
    .route("/sponsorships/{sponsee_id}", delete(sponsorships::unlink::<S, D>))
    .layer(TraceLayer::new_for_http())
    .with_state(engine)
}

#[cfg(test)]
mod tests;
