//! Realtime Hub - Public Subscribe / Broadcast / Teardown API
//!
//! `RealtimeHub` wires the change feed, the channel registry, the
//! dispatcher and the price simulator together. It is constructed once by
//! the composition root and cloned into consumers; clones share state.
//!
//! Upstream handlers deliver to the channel whose subscription produced
//! the change, so the upstream row filter decides which rows reach a
//! channel. `broadcast` without a target applies the routing table to
//! every channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, instrument};

use super::dispatcher::Dispatcher;
use super::normalizer::{self, NormalizedChange};
use super::price_simulator::{PriceSimulator, SimulationSettings, DEFAULT_INTERVAL};
use super::registry::{ChannelRegistry, Listener, ListenerId};
use super::HubError;
use crate::domain::{ChannelKey, EventKind, EventPayload, RawChange, RealtimeMessage};
use crate::ports::{ChangeBinding, ChangeEvent, ChangeFeed, ChangeSpec, HubObserver, RowFilter};

type NormalizeFn = Box<dyn Fn(&RawChange) -> Option<NormalizedChange> + Send + Sync>;

/// One upstream binding of a channel: what to subscribe to and how to
/// turn its rows into events.
pub struct ChangeRoute {
  spec: ChangeSpec,
  /// Entity label used in logs and the dropped-change metric.
  entity: &'static str,
  normalize: NormalizeFn,
}

impl ChangeRoute {
  pub fn new(
    spec: ChangeSpec,
    entity: &'static str,
    normalize: impl Fn(&RawChange) -> Option<NormalizedChange> + Send + Sync + 'static,
  ) -> Self {
    Self {
      spec,
      entity,
      normalize: Box::new(normalize),
    }
  }

  pub const fn spec(&self) -> &ChangeSpec {
    &self.spec
  }
}

struct HubInner {
  feed: Arc<dyn ChangeFeed>,
  registry: Arc<ChannelRegistry>,
  dispatcher: Dispatcher,
  simulator: PriceSimulator,
  observer: Arc<dyn HubObserver>,
}

impl Drop for HubInner {
  fn drop(&mut self) {
    self.simulator.stop();
    self.registry.teardown_all();
  }
}

/// Shared handle to the event hub.
#[derive(Clone)]
pub struct RealtimeHub {
  inner: Arc<HubInner>,
}

impl RealtimeHub {
  pub fn new(
    feed: Arc<dyn ChangeFeed>,
    observer: Arc<dyn HubObserver>,
    simulation: SimulationSettings,
  ) -> Self {
    let registry = Arc::new(ChannelRegistry::new(Arc::clone(&observer)));
    let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&observer));
    let simulator = PriceSimulator::new(dispatcher.clone(), simulation);

    Self {
      inner: Arc::new(HubInner {
        feed,
        registry,
        dispatcher,
        simulator,
        observer,
      }),
    }
  }

  // -- Entity subscriptions --

  /// Portfolio totals and holding changes of one portfolio.
  pub fn subscribe_to_portfolio(
    &self,
    portfolio_id: &str,
    listener: impl Fn(&RealtimeMessage) + Send + Sync + 'static,
  ) -> Result<SubscriptionHandle, HubError> {
    require_id("portfolio id", portfolio_id)?;
    let for_portfolio = portfolio_id.to_string();
    let for_holding = portfolio_id.to_string();

    let routes = vec![
      ChangeRoute::new(
        ChangeSpec::new(
          ChangeEvent::All,
          "portfolios",
          Some(RowFilter::eq("id", portfolio_id)),
        ),
        "portfolio",
        move |change| normalizer::portfolio(&for_portfolio, change),
      ),
      ChangeRoute::new(
        ChangeSpec::new(
          ChangeEvent::All,
          "holdings",
          Some(RowFilter::eq("portfolio_id", portfolio_id)),
        ),
        "holding",
        move |change| normalizer::holding(&for_holding, change),
      ),
    ];
    self.subscribe(&ChannelKey::portfolio(portfolio_id), routes, listener)
  }

  /// Price updates of a set of assets. One channel per distinct id list.
  pub fn subscribe_to_asset_prices(
    &self,
    asset_ids: &[impl AsRef<str>],
    listener: impl Fn(&RealtimeMessage) + Send + Sync + 'static,
  ) -> Result<SubscriptionHandle, HubError> {
    if asset_ids.is_empty() {
      return Err(HubError::InvalidArgument(
        "asset id list must not be empty".to_string(),
      ));
    }
    for id in asset_ids {
      require_id("asset id", id.as_ref())?;
    }

    let routes = vec![ChangeRoute::new(
      ChangeSpec::new(
        ChangeEvent::Update,
        "assets",
        Some(RowFilter::one_of("id", asset_ids)),
      ),
      "asset",
      normalizer::asset_price,
    )];
    self.subscribe(&ChannelKey::assets(asset_ids), routes, listener)
  }

  pub fn subscribe_to_transactions(
    &self,
    user_id: &str,
    listener: impl Fn(&RealtimeMessage) + Send + Sync + 'static,
  ) -> Result<SubscriptionHandle, HubError> {
    require_id("user id", user_id)?;
    let routes = vec![ChangeRoute::new(
      ChangeSpec::new(
        ChangeEvent::All,
        "transactions",
        Some(RowFilter::eq("user_id", user_id)),
      ),
      "transaction",
      normalizer::transaction,
    )];
    self.subscribe(&ChannelKey::transactions(user_id), routes, listener)
  }

  pub fn subscribe_to_notifications(
    &self,
    user_id: &str,
    listener: impl Fn(&RealtimeMessage) + Send + Sync + 'static,
  ) -> Result<SubscriptionHandle, HubError> {
    require_id("user id", user_id)?;
    let routes = vec![ChangeRoute::new(
      ChangeSpec::new(
        ChangeEvent::Insert,
        "notifications",
        Some(RowFilter::eq("user_id", user_id)),
      ),
      "notification",
      normalizer::notification,
    )];
    self.subscribe(&ChannelKey::notifications(user_id), routes, listener)
  }

  pub fn subscribe_to_achievements(
    &self,
    user_id: &str,
    listener: impl Fn(&RealtimeMessage) + Send + Sync + 'static,
  ) -> Result<SubscriptionHandle, HubError> {
    require_id("user id", user_id)?;
    let routes = vec![ChangeRoute::new(
      ChangeSpec::new(
        ChangeEvent::Insert,
        "user_achievements",
        Some(RowFilter::eq("user_id", user_id)),
      ),
      "achievement",
      normalizer::achievement,
    )];
    self.subscribe(&ChannelKey::achievements(user_id), routes, listener)
  }

  /// Register `listener` on `key`, opening the upstream with `routes`
  /// when the channel is not live yet.
  ///
  /// `routes` is ignored for a channel that already has listeners.
  #[instrument(skip(self, key, routes, listener), fields(channel = %key))]
  pub fn subscribe(
    &self,
    key: &ChannelKey,
    routes: Vec<ChangeRoute>,
    listener: impl Fn(&RealtimeMessage) + Send + Sync + 'static,
  ) -> Result<SubscriptionHandle, HubError> {
    let listener: Listener = Arc::new(listener);
    let id = self.inner.registry.subscribe(
      key,
      || {
        let bindings = routes
          .into_iter()
          .map(|route| self.bind(key, route))
          .collect();
        self.inner.feed.open_channel(&key.to_string(), bindings)
      },
      listener,
    )?;

    Ok(SubscriptionHandle {
      registry: Arc::downgrade(&self.inner.registry),
      key: key.clone(),
      id,
      closed: AtomicBool::new(false),
    })
  }

  fn bind(&self, key: &ChannelKey, route: ChangeRoute) -> ChangeBinding {
    let ChangeRoute {
      spec,
      entity,
      normalize,
    } = route;
    let hub: Weak<HubInner> = Arc::downgrade(&self.inner);
    let channel = key.clone();

    ChangeBinding::new(spec, move |change: RawChange| {
      let Some(inner) = hub.upgrade() else {
        return;
      };
      match normalize(&change) {
        Some(event) => {
          inner.dispatcher.broadcast_change_to(&channel, event);
        }
        None => {
          debug!(
            channel = %channel,
            entity,
            table = %change.table,
            event_type = %change.event_type,
            "Dropped change without required fields"
          );
          inner.observer.change_dropped(entity);
        }
      }
    })
  }

  // -- Broadcast --

  /// Deliver an event to every channel the routing table selects.
  pub fn broadcast(&self, kind: EventKind, payload: EventPayload, user_id: Option<&str>) -> usize {
    self.inner.dispatcher.broadcast(kind, payload, user_id)
  }

  /// Deliver an event to the listeners of one channel.
  pub fn broadcast_to(
    &self,
    key: &ChannelKey,
    kind: EventKind,
    payload: EventPayload,
    user_id: Option<&str>,
  ) -> usize {
    self.inner.dispatcher.broadcast_to(key, kind, payload, user_id)
  }

  // -- Price simulation --

  /// Start synthetic price updates for `asset_ids`, replacing any
  /// running simulation. `interval` defaults to 5 seconds.
  pub fn start_price_simulation(
    &self,
    asset_ids: Vec<String>,
    interval: Option<Duration>,
  ) -> Result<(), HubError> {
    self.inner
      .simulator
      .start(asset_ids, interval.unwrap_or(DEFAULT_INTERVAL))
  }

  pub fn stop_price_simulation(&self) -> bool {
    self.inner.simulator.stop()
  }

  pub fn is_simulating(&self) -> bool {
    self.inner.simulator.is_running()
  }

  // -- Lifecycle --

  /// Close `key` regardless of how many listeners it has.
  pub fn unsubscribe_channel(&self, key: &ChannelKey) -> bool {
    self.inner.registry.unsubscribe_channel(key)
  }

  /// Close the channel named `channel` (e.g. `portfolio:123`).
  ///
  /// Returns `Ok(false)` when no such channel is open.
  pub fn unsubscribe_named(&self, channel: &str) -> Result<bool, HubError> {
    let key: ChannelKey = channel.parse()?;
    Ok(self.unsubscribe_channel(&key))
  }

  /// Stop the simulation and close every channel. Returns the number of
  /// channels closed.
  #[instrument(skip(self))]
  pub fn teardown_all(&self) -> usize {
    self.inner.simulator.stop();
    let closed = self.inner.registry.teardown_all();
    info!(closed, "Realtime hub torn down");
    closed
  }

  // -- Introspection --

  pub fn channel_count(&self) -> usize {
    self.inner.registry.channel_count()
  }

  pub fn listener_count(&self, key: &ChannelKey) -> usize {
    self.inner.registry.listener_count(key)
  }

  pub fn has_channel(&self, key: &ChannelKey) -> bool {
    self.inner.registry.has_channel(key)
  }

  pub fn channel_keys(&self) -> Vec<ChannelKey> {
    self.inner.registry.channel_keys()
  }
}

fn require_id(what: &str, value: &str) -> Result<(), HubError> {
  if value.trim().is_empty() {
    return Err(HubError::InvalidArgument(format!("{what} must not be empty")));
  }
  Ok(())
}

/// Registration of one listener. Closing (or dropping) it removes exactly
/// that listener; the channel closes when its last listener goes.
#[must_use = "dropping the handle unsubscribes the listener"]
pub struct SubscriptionHandle {
  registry: Weak<ChannelRegistry>,
  key: ChannelKey,
  id: ListenerId,
  closed: AtomicBool,
}

impl SubscriptionHandle {
  pub const fn channel(&self) -> &ChannelKey {
    &self.key
  }

  /// Remove the listener. Returns `false` if it was already gone.
  pub fn close(&self) -> bool {
    if self.closed.swap(true, Ordering::AcqRel) {
      return false;
    }
    self.registry
      .upgrade()
      .is_some_and(|registry| registry.remove_listener(&self.key, self.id))
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// Keep the listener registered until its channel is closed
  /// explicitly or the hub is torn down.
  pub fn detach(self) {
    self.closed.store(true, Ordering::Release);
  }
}

impl Drop for SubscriptionHandle {
  fn drop(&mut self) {
    self.close();
  }
}

impl std::fmt::Debug for SubscriptionHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SubscriptionHandle")
      .field("channel", &self.key)
      .field("id", &self.id)
      .field("closed", &self.is_closed())
      .finish()
  }
}
