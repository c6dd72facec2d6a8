//! Configuration Module - TOML-based Hub Configuration
//!
//! Loads and validates configuration from `config.toml`. Secrets are
//! never stored in the file: the feed API key is read from the
//! environment variable named by `feed.api_key_env`.

pub mod loader;

use serde::Deserialize;

/// Top-level hub configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before the hub is built.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  pub hub: HubConfig,
  /// Upstream change feed selection.
  #[serde(default)]
  pub feed: FeedConfig,
  /// Synthetic price stream.
  #[serde(default)]
  pub simulation: SimulationConfig,
  /// Metrics and probes.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Which `ChangeFeed` adapter the binary wires in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
  /// In-process feed; only the simulator produces events.
  #[default]
  Memory,
  /// Hosted Postgres change stream over WebSocket.
  Supabase,
}

/// Change feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
  #[serde(default)]
  pub mode: FeedMode,
  /// Project URL (`https://<ref>.supabase.co`). Required in supabase mode.
  #[serde(default)]
  pub url: String,
  /// Environment variable holding the API key.
  #[serde(default = "default_api_key_env")]
  pub api_key_env: String,
  /// Delay between reconnect attempts.
  #[serde(default = "default_reconnect")]
  pub reconnect_seconds: u64,
  /// Phoenix heartbeat period.
  #[serde(default = "default_heartbeat")]
  pub heartbeat_seconds: u64,
}

impl Default for FeedConfig {
  fn default() -> Self {
    Self {
      mode: FeedMode::default(),
      url: String::new(),
      api_key_env: default_api_key_env(),
      reconnect_seconds: default_reconnect(),
      heartbeat_seconds: default_heartbeat(),
    }
  }
}

/// Synthetic price simulation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub asset_ids: Vec<String>,
  /// Tick period in milliseconds.
  #[serde(default = "default_interval_ms")]
  pub interval_ms: u64,
  /// Starting price of every simulated asset.
  #[serde(default = "default_base_price")]
  pub base_price: f64,
  /// Largest per-tick move in percent.
  #[serde(default = "default_max_move_pct")]
  pub max_move_pct: f64,
  /// Fixed RNG seed for reproducible runs.
  #[serde(default)]
  pub seed: Option<u64>,
}

impl Default for SimulationConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      asset_ids: Vec::new(),
      interval_ms: default_interval_ms(),
      base_price: default_base_price(),
      max_move_pct: default_max_move_pct(),
      seed: None,
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export on `/metrics`.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Probe and metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_api_key_env() -> String {
  "SUPABASE_ANON_KEY".to_string()
}

fn default_reconnect() -> u64 {
  5
}

fn default_heartbeat() -> u64 {
  30
}

fn default_interval_ms() -> u64 {
  5000
}

fn default_base_price() -> f64 {
  100.0
}

fn default_max_move_pct() -> f64 {
  2.0
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}
