//! Broadcast Dispatcher - Synchronous In-Process Fan-Out
//!
//! Builds a `RealtimeMessage` (timestamped now) and calls every listener
//! whose channel passes the routing predicate. Delivery is direct and
//! synchronous: no queue, no retry. A panicking listener is isolated so
//! the remaining listeners still receive the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use super::normalizer::NormalizedChange;
use super::registry::ChannelRegistry;
use crate::domain::{should_notify, ChannelKey, EventKind, EventPayload, RealtimeMessage};
use crate::ports::HubObserver;

/// Fan-out of normalized events to registry listeners.
#[derive(Clone)]
pub struct Dispatcher {
  registry: Arc<ChannelRegistry>,
  observer: Arc<dyn HubObserver>,
}

impl Dispatcher {
  pub fn new(registry: Arc<ChannelRegistry>, observer: Arc<dyn HubObserver>) -> Self {
    Self { registry, observer }
  }

  /// Deliver an event to every interested listener.
  ///
  /// Returns the number of listener calls that completed. Never fails:
  /// listener panics are logged and counted, not propagated.
  pub fn broadcast(&self, kind: EventKind, payload: EventPayload, user_id: Option<&str>) -> usize {
    let message = RealtimeMessage::now(kind, payload, user_id.map(str::to_string));
    self.deliver(&message)
  }

  /// Broadcast a normalizer result.
  pub fn broadcast_change(&self, change: NormalizedChange) -> usize {
    self.broadcast(change.kind, change.payload, change.user_id.as_deref())
  }

  /// Deliver an event to the listeners of `channel` only.
  ///
  /// The routing predicate still applies, so an event the channel does
  /// not care about is not delivered.
  pub fn broadcast_to(
    &self,
    channel: &ChannelKey,
    kind: EventKind,
    payload: EventPayload,
    user_id: Option<&str>,
  ) -> usize {
    let message = RealtimeMessage::now(kind, payload, user_id.map(str::to_string));
    self.deliver_where(&message, |key| key == channel)
  }

  /// Deliver a normalizer result to the channel whose upstream produced it.
  pub fn broadcast_change_to(&self, channel: &ChannelKey, change: NormalizedChange) -> usize {
    self.broadcast_to(channel, change.kind, change.payload, change.user_id.as_deref())
  }

  /// Deliver an already built message.
  pub fn deliver(&self, message: &RealtimeMessage) -> usize {
    self.deliver_where(message, |_| true)
  }

  fn deliver_where<P>(&self, message: &RealtimeMessage, mut scope: P) -> usize
  where
    P: FnMut(&ChannelKey) -> bool,
  {
    let targets = self.registry.matching_listeners(|key| {
      scope(key) && should_notify(key, message.event, message.user_id.as_deref())
    });

    let mut delivered = 0;
    for (channel, listener) in &targets {
      match catch_unwind(AssertUnwindSafe(|| listener(message))) {
        Ok(()) => delivered += 1,
        Err(_) => {
          error!(
            channel = %channel,
            event = %message.event,
            "Listener panicked during dispatch"
          );
          self.observer.listener_panicked(&channel.to_string());
        }
      }
    }

    debug!(
      event = %message.event,
      targets = targets.len(),
      delivered,
      "Event broadcast"
    );
    self.observer.event_broadcast(message.event, delivered);
    delivered
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{PortfolioUpdate, TransactionUpdate};
  use crate::ports::{FeedError, NoopObserver, UpstreamSubscription};
  use crate::usecases::registry::Listener;
  use std::sync::Mutex;

  struct NullUpstream;

  impl UpstreamSubscription for NullUpstream {
    fn close(&self) {}
  }

  fn null_upstream() -> Result<Box<dyn UpstreamSubscription>, FeedError> {
    Ok(Box::new(NullUpstream))
  }

  fn setup() -> (Arc<ChannelRegistry>, Dispatcher) {
    let observer: Arc<dyn HubObserver> = Arc::new(NoopObserver);
    let registry = Arc::new(ChannelRegistry::new(Arc::clone(&observer)));
    let dispatcher = Dispatcher::new(Arc::clone(&registry), observer);
    (registry, dispatcher)
  }

  fn recorder() -> (Arc<Mutex<Vec<RealtimeMessage>>>, Listener) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener: Listener = Arc::new(move |msg: &RealtimeMessage| {
      sink.lock().unwrap().push(msg.clone());
    });
    (seen, listener)
  }

  fn txn_payload() -> EventPayload {
    EventPayload::Transaction(TransactionUpdate {
      transaction_id: "t1".to_string(),
      status: "pending".to_string(),
      executed_at: None,
      error: None,
    })
  }

  fn portfolio_payload(id: &str) -> EventPayload {
    EventPayload::Portfolio(PortfolioUpdate {
      portfolio_id: id.to_string(),
      total_value: 0.0,
      total_returns: 0.0,
      day_change: 0.0,
      day_change_percentage: 0.0,
    })
  }

  #[test]
  fn test_owner_routing_for_transactions() {
    let (registry, dispatcher) = setup();
    let (seen, listener) = recorder();
    registry
      .subscribe(&ChannelKey::transactions("u1"), null_upstream, listener)
      .unwrap();

    assert_eq!(dispatcher.broadcast(EventKind::TransactionCreated, txn_payload(), Some("u1")), 1);
    assert_eq!(dispatcher.broadcast(EventKind::TransactionCreated, txn_payload(), Some("u2")), 0);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(seen.lock().unwrap()[0].user_id.as_deref(), Some("u1"));
  }

  #[test]
  fn test_price_event_skips_portfolio_channel() {
    let (registry, dispatcher) = setup();
    let (seen, listener) = recorder();
    registry
      .subscribe(&ChannelKey::portfolio("123"), null_upstream, listener)
      .unwrap();

    let delivered = dispatcher.broadcast(
      EventKind::AssetPriceUpdate,
      EventPayload::Custom(serde_json::json!({"assetId": "a1"})),
      None,
    );
    assert_eq!(delivered, 0);
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn test_panicking_listener_is_isolated() {
    let (registry, dispatcher) = setup();
    let key = ChannelKey::portfolio("p1");
    let (seen, good) = recorder();
    let bad: Listener = Arc::new(|_msg: &RealtimeMessage| panic!("listener bug"));

    registry.subscribe(&key, null_upstream, bad).unwrap();
    registry.subscribe(&key, null_upstream, good).unwrap();

    let delivered = dispatcher.broadcast(EventKind::PortfolioUpdate, portfolio_payload("p1"), None);
    assert_eq!(delivered, 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[test]
  fn test_listener_can_unsubscribe_itself_during_dispatch() {
    let (registry, dispatcher) = setup();
    let key = ChannelKey::portfolio("p1");
    let id_slot = Arc::new(Mutex::new(None));

    let reg = Arc::clone(&registry);
    let slot = Arc::clone(&id_slot);
    let k = key.clone();
    let once: Listener = Arc::new(move |_msg: &RealtimeMessage| {
      if let Some(id) = slot.lock().unwrap().take() {
        reg.remove_listener(&k, id);
      }
    });
    let (seen, other) = recorder();

    let id = registry.subscribe(&key, null_upstream, once).unwrap();
    *id_slot.lock().unwrap() = Some(id);
    registry.subscribe(&key, null_upstream, other).unwrap();

    assert_eq!(dispatcher.broadcast(EventKind::PortfolioUpdate, portfolio_payload("p1"), None), 2);
    assert_eq!(registry.listener_count(&key), 1);
    assert_eq!(dispatcher.broadcast(EventKind::PortfolioUpdate, portfolio_payload("p1"), None), 1);
    assert_eq!(seen.lock().unwrap().len(), 2);
  }

  #[test]
  fn test_events_arrive_in_broadcast_order() {
    let (registry, dispatcher) = setup();
    let (seen, listener) = recorder();
    registry
      .subscribe(&ChannelKey::portfolio("p1"), null_upstream, listener)
      .unwrap();

    for id in ["first", "second", "third"] {
      dispatcher.broadcast(EventKind::PortfolioUpdate, portfolio_payload(id), None);
    }

    let order: Vec<String> = seen
      .lock()
      .unwrap()
      .iter()
      .filter_map(|m| m.as_portfolio().map(|p| p.portfolio_id.clone()))
      .collect();
    assert_eq!(order, ["first", "second", "third"]);
  }

  #[test]
  fn test_targeted_broadcast_reaches_one_channel() {
    let (registry, dispatcher) = setup();
    let (seen_p1, l1) = recorder();
    let (seen_p2, l2) = recorder();
    let p1 = ChannelKey::portfolio("P1");
    registry.subscribe(&p1, null_upstream, l1).unwrap();
    registry
      .subscribe(&ChannelKey::portfolio("P2"), null_upstream, l2)
      .unwrap();

    let delivered =
      dispatcher.broadcast_to(&p1, EventKind::PortfolioUpdate, portfolio_payload("P1"), None);

    assert_eq!(delivered, 1);
    assert!(seen_p2.lock().unwrap().is_empty());
    let seen = seen_p1.lock().unwrap();
    assert_eq!(seen[0].as_portfolio().unwrap().portfolio_id, "P1");
  }

  #[test]
  fn test_targeted_broadcast_still_routes() {
    let (registry, dispatcher) = setup();
    let (seen, listener) = recorder();
    let key = ChannelKey::transactions("u1");
    registry.subscribe(&key, null_upstream, listener).unwrap();

    assert_eq!(dispatcher.broadcast_to(&key, EventKind::TransactionCompleted, txn_payload(), Some("u9")), 0);
    assert_eq!(dispatcher.broadcast_to(&key, EventKind::TransactionCompleted, txn_payload(), Some("u1")), 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
  }
}
