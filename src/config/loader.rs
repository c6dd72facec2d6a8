//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{AppConfig, FeedMode};

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    feed = ?config.feed.mode,
    simulation = config.simulation.enabled,
    assets = config.simulation.asset_ids.len(),
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Read the feed API key from the configured environment variable.
pub fn feed_api_key(config: &AppConfig) -> Result<String> {
  std::env::var(&config.feed.api_key_env).with_context(|| {
    format!(
      "Environment variable {} (feed.api_key_env) is not set",
      config.feed.api_key_env
    )
  })
}

fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(!config.hub.name.trim().is_empty(), "hub.name must not be empty");

  // Feed validation
  if config.feed.mode == FeedMode::Supabase {
    anyhow::ensure!(
      !config.feed.url.is_empty(),
      "feed.url is required when feed.mode = \"supabase\""
    );
    anyhow::ensure!(
      !config.feed.api_key_env.is_empty(),
      "feed.api_key_env must name an environment variable"
    );
  }
  anyhow::ensure!(
    config.feed.reconnect_seconds > 0,
    "feed.reconnect_seconds must be positive"
  );
  anyhow::ensure!(
    config.feed.heartbeat_seconds > 0,
    "feed.heartbeat_seconds must be positive"
  );

  // Simulation validation
  let sim = &config.simulation;
  if sim.enabled {
    anyhow::ensure!(
      !sim.asset_ids.is_empty(),
      "simulation.asset_ids must not be empty when simulation is enabled"
    );
    anyhow::ensure!(
      sim.asset_ids.iter().all(|id| !id.trim().is_empty()),
      "simulation.asset_ids must not contain empty ids"
    );
  }
  anyhow::ensure!(
    sim.interval_ms > 0,
    "simulation.interval_ms must be positive"
  );
  anyhow::ensure!(
    sim.base_price.is_finite() && sim.base_price > 0.0,
    "simulation.base_price must be positive, got {}",
    sim.base_price
  );
  anyhow::ensure!(
    sim.max_move_pct.is_finite() && (0.0..100.0).contains(&sim.max_move_pct),
    "simulation.max_move_pct must be in [0, 100), got {}",
    sim.max_move_pct
  );

  // Metrics validation
  if config.metrics.enabled {
    anyhow::ensure!(
      !config.metrics.bind_address.is_empty(),
      "metrics.bind_address must not be empty"
    );
  }

  Ok(())
}
