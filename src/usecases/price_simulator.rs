//! Price Simulator - Synthetic `asset.price_update` Generator
//!
//! Drives a random walk for a set of assets on a fixed period and
//! broadcasts every step. Meant for demos and tests where no live
//! change feed is available.
//!
//! State machine: Idle -> Running on `start`, Running -> Idle on `stop`,
//! Running -> Running on a repeated `start` (old task replaced).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};

use super::dispatcher::Dispatcher;
use super::HubError;
use crate::domain::{EventKind, EventPayload, PriceUpdate};

/// Default tick period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// Symbol attached to simulated prices.
pub const SIMULATED_SYMBOL: &str = "DEMO";

/// Upper bound (exclusive) of the simulated volume figure.
const MAX_VOLUME: u64 = 1_000_000;

/// Tuning for the random walk.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSettings {
  /// Starting price of every asset.
  pub base_price: f64,
  /// Largest per-tick move in percent (uniform in `[-max, +max]`).
  pub max_move_pct: f64,
  /// Fixed RNG seed for reproducible runs.
  pub seed: Option<u64>,
}

impl Default for SimulationSettings {
  fn default() -> Self {
    Self {
      base_price: 100.0,
      max_move_pct: 2.0,
      seed: None,
    }
  }
}

/// Compute one random-walk step for `asset_id`.
pub fn next_tick<R: Rng>(
  asset_id: &str,
  previous_price: f64,
  max_move_pct: f64,
  rng: &mut R,
) -> PriceUpdate {
  let change_percentage = if max_move_pct > 0.0 {
    rng.random_range(-max_move_pct..=max_move_pct)
  } else {
    0.0
  };
  let price = previous_price * (1.0 + change_percentage / 100.0);
  #[allow(clippy::cast_precision_loss)]
  let volume = rng.random_range(0..MAX_VOLUME) as f64;

  PriceUpdate {
    asset_id: asset_id.to_string(),
    symbol: SIMULATED_SYMBOL.to_string(),
    price,
    previous_price,
    change: price - previous_price,
    change_percentage,
    volume,
    timestamp: Utc::now(),
  }
}

/// A spawned walk plus its cancel flag.
///
/// `cancelled` is set before `abort`; the tick loop checks it before
/// every broadcast.
struct RunningSimulation {
  handle: JoinHandle<()>,
  cancelled: Arc<AtomicBool>,
}

impl RunningSimulation {
  fn cancel(self) {
    self.cancelled.store(true, Ordering::Release);
    self.handle.abort();
  }
}

/// Timer-driven price generator bound to a dispatcher.
pub struct PriceSimulator {
  dispatcher: Dispatcher,
  settings: SimulationSettings,
  task: Mutex<Option<RunningSimulation>>,
}

impl PriceSimulator {
  pub fn new(dispatcher: Dispatcher, settings: SimulationSettings) -> Self {
    Self {
      dispatcher,
      settings,
      task: Mutex::new(None),
    }
  }

  fn task(&self) -> MutexGuard<'_, Option<RunningSimulation>> {
    self.task.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Start (or restart) the simulation on the current tokio runtime.
  ///
  /// The first tick fires one `interval` after the call. A broadcast
  /// already in progress when `stop` runs completes; no new one starts.
  #[instrument(skip(self, asset_ids), fields(assets = asset_ids.len()))]
  pub fn start(&self, asset_ids: Vec<String>, interval: Duration) -> Result<(), HubError> {
    if interval.is_zero() {
      return Err(HubError::InvalidArgument(
        "simulation interval must be positive".to_string(),
      ));
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| HubError::NoRuntime)?;

    let dispatcher = self.dispatcher.clone();
    let settings = self.settings.clone();
    let mut rng = settings
      .seed
      .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

    let mut task = self.task();
    if let Some(previous) = task.take() {
      previous.cancel();
      debug!("Replaced running price simulation");
    }

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let handle = runtime.spawn(async move {
      let mut prices: HashMap<String, f64> = asset_ids
        .iter()
        .map(|id| (id.clone(), settings.base_price))
        .collect();
      let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        for asset_id in &asset_ids {
          if flag.load(Ordering::Acquire) {
            return;
          }
          let previous = prices.get(asset_id).copied().unwrap_or(settings.base_price);
          let update = next_tick(asset_id, previous, settings.max_move_pct, &mut rng);
          prices.insert(asset_id.clone(), update.price);
          dispatcher.broadcast(EventKind::AssetPriceUpdate, EventPayload::Price(update), None);
        }
      }
    });
    *task = Some(RunningSimulation { handle, cancelled });

    info!(interval_ms = interval.as_millis(), "Price simulation started");
    Ok(())
  }

  /// Stop the simulation. No-op when idle.
  pub fn stop(&self) -> bool {
    match self.task().take() {
      Some(running) => {
        running.cancel();
        info!("Price simulation stopped");
        true
      }
      None => false,
    }
  }

  pub fn is_running(&self) -> bool {
    self.task()
      .as_ref()
      .is_some_and(|running| !running.handle.is_finished())
  }
}

impl Drop for PriceSimulator {
  fn drop(&mut self) {
    self.stop();
  }
}
