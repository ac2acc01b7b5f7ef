//! The Steadfast accountability engine.
//!
//! [`Engine`] ties a store, a sponsor directory and a notification dispatcher
//! together. Its two trigger entry points, [`Engine::scan`] and
//! [`Engine::detect_misses`], are meant to be called on a fixed cadence by an
//! external clock; both are safe to run concurrently with themselves and with
//! each other. Everything else is a user-input operation or a pure read.

mod config;
mod engine;
mod misses;
mod report;
mod scan;

pub use config::EngineConfig;
pub use engine::Engine;
pub use report::{Escalation, MissReport, ScanReport};
pub use steadfast_core::{Error, Result};

#[cfg(test)]
mod tests;
