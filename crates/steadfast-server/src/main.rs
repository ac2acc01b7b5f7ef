//! steadfast server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store and either serves the JSON API or runs a single scheduler tick.
//!
//! A typical deployment runs `steadfast serve` as a service and
//! `steadfast tick` from cron every few minutes:
//!
//! ```text
//! */5 * * * * steadfast --config /etc/steadfast.toml tick
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use steadfast_engine::{Engine, EngineConfig};
use steadfast_server::{ServerConfig, dispatch::ConfiguredDispatcher};
use steadfast_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Check-in accountability and streak engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the HTTP API.
  Serve,
  /// Run one due-scan and one miss-detection pass, then exit.
  Tick,
}

type ServerEngine = Engine<SqliteStore, ConfiguredDispatcher>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("STEADFAST")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let engine = build_engine(&server_cfg).await?;

  match cli.command {
    Command::Serve => serve(&server_cfg, engine).await,
    Command::Tick => tick(&engine).await,
  }
}

async fn build_engine(server_cfg: &ServerConfig) -> anyhow::Result<ServerEngine> {
  let engine_cfg: EngineConfig = server_cfg.engine.clone();
  engine_cfg.validate().context("invalid [engine] settings")?;

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let dispatcher = ConfiguredDispatcher::from_config(
    server_cfg.webhook_url.as_deref(),
    engine_cfg.dispatch_timeout(),
  )
  .context("failed to build notification dispatcher")?;
  match &dispatcher {
    ConfiguredDispatcher::Webhook(w) => tracing::info!(url = w.url(), "delivering notifications by webhook"),
    ConfiguredDispatcher::Log(_) => tracing::warn!("no webhook_url configured; notifications are only logged"),
  }

  Ok(Engine::new(Arc::new(store), Arc::new(dispatcher), engine_cfg))
}

async fn serve(server_cfg: &ServerConfig, engine: ServerEngine) -> anyhow::Result<()> {
  let app = steadfast_api::api_router(Arc::new(engine));
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// One scheduler tick. A failed pass is reported through the exit status so
/// cron can surface it; the next tick picks up whatever was left.
async fn tick(engine: &ServerEngine) -> anyhow::Result<()> {
  let scan = engine.scan(Utc::now()).await.context("due scan failed")?;
  tracing::info!(
    created = scan.created.len(),
    sent = scan.sent,
    retried = scan.retried,
    expired = scan.expired,
    orphans = scan.orphans,
    failed = scan.failed,
    deadline_hit = scan.deadline_hit,
    "scan finished"
  );

  let misses = engine
    .detect_misses(Utc::now())
    .await
    .context("miss detection failed")?;
  tracing::info!(
    missed = misses.missed,
    escalations = misses.escalations.len(),
    orphans = misses.orphans,
    failed = misses.failed,
    deadline_hit = misses.deadline_hit,
    "miss detection finished"
  );

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
