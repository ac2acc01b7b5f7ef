//! SQLite backend for the Steadfast accountability store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Conditional updates are plain
//! `UPDATE ... WHERE <expected>` statements; multi-row transitions run inside
//! a single SQLite transaction.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
