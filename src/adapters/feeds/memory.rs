//! In-Memory Change Feed - Local Upstream for Demos and Tests
//!
//! Implements the `ChangeFeed` port without any network. Changes are
//! injected with `emit` and delivered to every open binding whose spec
//! (operation, table, row filter) matches, emulating upstream filtering.
//! Handlers always run after the feed lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info};

use crate::domain::RawChange;
use crate::ports::{ChangeBinding, ChangeFeed, ChangeHandler, FeedError, UpstreamSubscription};

#[derive(Default)]
struct FeedState {
    channels: HashMap<u64, OpenChannel>,
    next_id: u64,
    opened: usize,
    closed: usize,
    fail_next: Option<String>,
}

struct OpenChannel {
    name: String,
    bindings: Vec<ChangeBinding>,
}

fn lock(state: &Mutex<FeedState>) -> MutexGuard<'_, FeedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local change feed.
#[derive(Default)]
pub struct InMemoryChangeFeed {
    state: Arc<Mutex<FeedState>>,
}

impl InMemoryChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `change` to every matching binding. Returns the number of
    /// handlers called.
    pub fn emit(&self, change: &RawChange) -> usize {
        let handlers: Vec<ChangeHandler> = lock(&self.state)
            .channels
            .values()
            .flat_map(|channel| channel.bindings.iter())
            .filter(|binding| binding.spec.matches(change))
            .map(|binding| Arc::clone(&binding.handler))
            .collect();

        debug!(
            table = %change.table,
            event_type = %change.event_type,
            handlers = handlers.len(),
            "Emitting change"
        );
        for handler in &handlers {
            handler(change.clone());
        }
        handlers.len()
    }

    /// Make the next `open_channel` call fail with `reason`.
    pub fn fail_next_open(&self, reason: &str) {
        lock(&self.state).fail_next = Some(reason.to_string());
    }

    /// Total channels ever opened.
    pub fn opened_count(&self) -> usize {
        lock(&self.state).opened
    }

    /// Total channels closed.
    pub fn closed_count(&self) -> usize {
        lock(&self.state).closed
    }

    /// Names of the channels currently open, sorted.
    pub fn open_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state)
            .channels
            .values()
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }
}

impl ChangeFeed for InMemoryChangeFeed {
    fn open_channel(
        &self,
        name: &str,
        bindings: Vec<ChangeBinding>,
    ) -> Result<Box<dyn UpstreamSubscription>, FeedError> {
        let mut state = lock(&self.state);
        if let Some(reason) = state.fail_next.take() {
            return Err(FeedError::Rejected {
                channel: name.to_string(),
                reason,
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        state.opened += 1;
        state.channels.insert(
            id,
            OpenChannel {
                name: name.to_string(),
                bindings,
            },
        );
        info!(channel = name, "In-memory channel opened");

        Ok(Box::new(MemorySubscription {
            id,
            state: Arc::downgrade(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySubscription {
    id: u64,
    state: Weak<Mutex<FeedState>>,
    closed: AtomicBool,
}

impl UpstreamSubscription for MemorySubscription {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = lock(&state);
        if let Some(channel) = state.channels.remove(&self.id) {
            state.closed += 1;
            debug!(channel = %channel.name, "In-memory channel closed");
        }
    }
}
