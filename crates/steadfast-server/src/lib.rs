//! Server configuration and notification dispatchers for the `steadfast`
//! binary.

pub mod dispatch;


use std::path::PathBuf;

use serde::Deserialize;
use steadfast_engine::EngineConfig;

// ─── Server configuration ─────────────────────────────────────────────────────

/// Top-level configuration, deserialised from `config.toml` layered with
/// `STEADFAST_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:        String,
  #[serde(default = "default_port")]
  pub port:        u16,
  pub store_path:  PathBuf,
  /// Notifications are POSTed here; without it they are only logged.
  #[serde(default)]
  pub webhook_url: Option<String>,
  #[serde(default)]
  pub engine:      EngineConfig,
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 8640 }
