//! Core types and pure calculators for the Steadfast accountability engine.
//!
//! Nothing here touches HTTP or a database. The crate holds the check-in and
//! sobriety data model, the recurrence and streak calculators, and the
//! collaborator traits the engine is written against.

pub mod error;
pub mod instance;
pub mod notify;
pub mod recurrence;
pub mod schedule;
pub mod sobriety;
pub mod store;
pub mod streak;

pub use error::{Error, Result};

/// Upper bound on the length of any free-text answer or note, in characters.
pub const MAX_TEXT_CHARS: usize = 500;
