//! Channel Registry - One Upstream Subscription per Channel Key
//!
//! Owns the listener sets and the upstream subscription of every live
//! channel. The first `subscribe` for a key establishes the upstream;
//! removing the last listener releases it. All state sits behind one
//! mutex; upstream `close()` always runs after the lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, instrument};

use super::HubError;
use crate::domain::{ChannelKey, RealtimeMessage};
use crate::ports::{FeedError, HubObserver, UpstreamSubscription};

/// Callback receiving normalized events.
pub type Listener = Arc<dyn Fn(&RealtimeMessage) + Send + Sync>;

/// Process-unique listener identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ChannelEntry {
  upstream: Box<dyn UpstreamSubscription>,
  /// Insertion order is delivery order.
  listeners: Vec<(ListenerId, Listener)>,
}

/// Registry of live channels.
pub struct ChannelRegistry {
  channels: Mutex<HashMap<ChannelKey, ChannelEntry>>,
  next_listener_id: AtomicU64,
  observer: Arc<dyn HubObserver>,
}

impl ChannelRegistry {
  pub fn new(observer: Arc<dyn HubObserver>) -> Self {
    Self {
      channels: Mutex::new(HashMap::new()),
      next_listener_id: AtomicU64::new(1),
      observer,
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<ChannelKey, ChannelEntry>> {
    // A listener panic never happens under this lock, so a poisoned
    // map is still consistent.
    self.channels.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn report_size(&self, channels: &HashMap<ChannelKey, ChannelEntry>) {
    let listeners = channels.values().map(|c| c.listeners.len()).sum();
    self.observer.registry_size(channels.len(), listeners);
  }

  /// Add `listener` to `key`, establishing the upstream on first use.
  ///
  /// `establish_upstream` runs at most once per live channel. If it
  /// fails, nothing is registered and the error is returned.
  pub fn subscribe<F>(
    &self,
    key: &ChannelKey,
    establish_upstream: F,
    listener: Listener,
  ) -> Result<ListenerId, HubError>
  where
    F: FnOnce() -> Result<Box<dyn UpstreamSubscription>, FeedError>,
  {
    let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
    let mut channels = self.lock();

    if let Some(entry) = channels.get_mut(key) {
      entry.listeners.push((id, listener));
      debug!(channel = %key, listeners = entry.listeners.len(), "Listener added");
    } else {
      let upstream = establish_upstream()?;
      self.observer.upstream_opened(&key.to_string());
      channels.insert(
        key.clone(),
        ChannelEntry {
          upstream,
          listeners: vec![(id, listener)],
        },
      );
      info!(channel = %key, "Channel opened");
    }

    self.report_size(&channels);
    Ok(id)
  }

  /// Remove one listener. Closes the channel when it was the last one.
  ///
  /// Returns `false` when the key or listener is unknown.
  pub fn remove_listener(&self, key: &ChannelKey, id: ListenerId) -> bool {
    let released = {
      let mut channels = self.lock();
      let Some(entry) = channels.get_mut(key) else {
        return false;
      };
      let before = entry.listeners.len();
      entry.listeners.retain(|(lid, _)| *lid != id);
      if entry.listeners.len() == before {
        return false;
      }

      let released = if entry.listeners.is_empty() {
        channels.remove(key).map(|e| e.upstream)
      } else {
        None
      };
      self.report_size(&channels);
      released
    };

    if let Some(upstream) = released {
      upstream.close();
      info!(channel = %key, "Last listener gone, channel closed");
    }
    true
  }

  /// Close `key` and drop all of its listeners.
  #[instrument(skip(self), fields(channel = %key))]
  pub fn unsubscribe_channel(&self, key: &ChannelKey) -> bool {
    let removed = {
      let mut channels = self.lock();
      let removed = channels.remove(key);
      self.report_size(&channels);
      removed
    };

    match removed {
      Some(entry) => {
        entry.upstream.close();
        info!(dropped_listeners = entry.listeners.len(), "Channel unsubscribed");
        true
      }
      None => false,
    }
  }

  /// Close every channel. Returns how many were open.
  #[instrument(skip(self))]
  pub fn teardown_all(&self) -> usize {
    let drained: Vec<(ChannelKey, ChannelEntry)> = {
      let mut channels = self.lock();
      let drained = channels.drain().collect();
      self.report_size(&channels);
      drained
    };

    for (key, entry) in &drained {
      entry.upstream.close();
      debug!(channel = %key, "Channel closed during teardown");
    }
    if !drained.is_empty() {
      info!(channels = drained.len(), "All channels torn down");
    }
    drained.len()
  }

  /// Snapshot of the listeners of every channel accepted by `predicate`.
  ///
  /// Dispatch iterates this copy, so listeners may (un)subscribe while
  /// being called.
  pub fn matching_listeners<P>(&self, mut predicate: P) -> Vec<(ChannelKey, Listener)>
  where
    P: FnMut(&ChannelKey) -> bool,
  {
    let channels = self.lock();
    channels
      .iter()
      .filter(|(key, _)| predicate(key))
      .flat_map(|(key, entry)| {
        entry
          .listeners
          .iter()
          .map(move |(_, l)| (key.clone(), Arc::clone(l)))
      })
      .collect()
  }

  pub fn channel_count(&self) -> usize {
    self.lock().len()
  }

  pub fn listener_count(&self, key: &ChannelKey) -> usize {
    self.lock().get(key).map_or(0, |e| e.listeners.len())
  }

  pub fn has_channel(&self, key: &ChannelKey) -> bool {
    self.lock().contains_key(key)
  }

  pub fn channel_keys(&self) -> Vec<ChannelKey> {
    self.lock().keys().cloned().collect()
  }
}
