//! Supabase Realtime Feed - Hosted Postgres Change Stream
//!
//! Phoenix-channel WebSocket client for the hosted change-data-capture
//! service. Implements the `ChangeFeed` port: `open_channel` records the
//! channel and queues a `phx_join` carrying its `postgres_changes`
//! bindings; `close` queues a `phx_leave`. The connection itself is owned
//! by `run`, which the composition root spawns.
//!
//! Features:
//! - Fire-and-forget joins (queued until the socket is up)
//! - Rejoin of every registered channel after a reconnect
//! - Heartbeat on a fixed period (default 30s)
//! - Auto-reconnect on disconnect (fixed backoff, default 5s)

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use crate::config::FeedConfig;
use crate::domain::{ChangeEventType, RawChange, Row};
use crate::ports::{ChangeBinding, ChangeFeed, ChangeHandler, ChangeSpec, FeedError, UpstreamSubscription};

/// Protocol version sent in the connection URL.
const PROTOCOL_VSN: &str = "1.0.0";

/// Build the realtime WebSocket URL from the project URL.
///
/// `http(s)://` becomes `ws(s)://`; a URL that already uses a WebSocket
/// scheme is kept as is.
pub fn websocket_url(base_url: &str, api_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/realtime/v1/websocket?apikey={api_key}&vsn={PROTOCOL_VSN}")
}

/// Phoenix topic of a hub channel.
pub fn topic_for(channel: &str) -> String {
    format!("realtime:{channel}")
}

#[derive(Serialize)]
struct OutboundFrame<'a, P: Serialize> {
    topic: &'a str,
    event: &'a str,
    payload: P,
    #[serde(rename = "ref")]
    reference: String,
}

#[derive(Serialize)]
struct JoinPayload<'a> {
    config: JoinConfig<'a>,
}

#[derive(Serialize)]
struct JoinConfig<'a> {
    postgres_changes: Vec<PostgresChange<'a>>,
}

#[derive(Serialize)]
struct PostgresChange<'a> {
    event: &'static str,
    schema: &'a str,
    table: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

fn encode<P: Serialize>(topic: &str, event: &str, payload: P, reference: u64) -> String {
    let frame = OutboundFrame {
        topic,
        event,
        payload,
        reference: reference.to_string(),
    };
    // Serializing plain structs of strings cannot fail
    serde_json::to_string(&frame).unwrap_or_default()
}

/// `phx_join` frame subscribing `topic` to the given specs.
pub fn build_join_message(topic: &str, specs: &[ChangeSpec], reference: u64) -> String {
    let postgres_changes = specs
        .iter()
        .map(|spec| PostgresChange {
            event: spec.event.as_str(),
            schema: &spec.schema,
            table: &spec.table,
            filter: spec.filter.as_ref().map(ToString::to_string),
        })
        .collect();
    encode(
        topic,
        "phx_join",
        JoinPayload {
            config: JoinConfig { postgres_changes },
        },
        reference,
    )
}

pub fn build_leave_message(topic: &str, reference: u64) -> String {
    encode(topic, "phx_leave", serde_json::json!({}), reference)
}

pub fn build_heartbeat_message(reference: u64) -> String {
    encode("phoenix", "heartbeat", serde_json::json!({}), reference)
}

/// Inbound frame, any event.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

/// `payload.data` of a `postgres_changes` frame.
#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: String,
    table: String,
    #[serde(default)]
    record: Option<Row>,
    #[serde(default)]
    old_record: Option<Row>,
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A row change for `topic`.
    Change { topic: String, change: RawChange },
    /// Reply to a join/leave/heartbeat.
    Reply { topic: String, ok: bool, detail: Value },
    /// Anything else (system, presence, close).
    Other { topic: String, event: String },
}

/// Decode one text frame. Returns `None` for frames that are not valid
/// Phoenix JSON or carry an unusable change.
pub fn parse_frame(text: &str) -> Option<Inbound> {
    let frame: InboundFrame = serde_json::from_str(text).ok()?;
    match frame.event.as_str() {
        "postgres_changes" => {
            let data: ChangeData = serde_json::from_value(frame.payload.get("data")?.clone()).ok()?;
            let event_type = ChangeEventType::parse(&data.kind)?;
            Some(Inbound::Change {
                topic: frame.topic,
                change: RawChange::new(event_type, data.table, data.old_record, data.record),
            })
        }
        "phx_reply" => {
            let ok = frame.payload.get("status").and_then(Value::as_str) == Some("ok");
            let detail = frame.payload.get("response").cloned().unwrap_or(Value::Null);
            Some(Inbound::Reply {
                topic: frame.topic,
                ok,
                detail,
            })
        }
        _ => Some(Inbound::Other {
            topic: frame.topic,
            event: frame.event,
        }),
    }
}

enum Command {
    Join(String),
    Leave(String),
}

struct RegisteredChannel {
    /// Distinguishes a reopened channel from a stale subscription handle.
    generation: u64,
    bindings: Vec<ChangeBinding>,
}

type Channels = Mutex<HashMap<String, RegisteredChannel>>;

fn lock(channels: &Channels) -> MutexGuard<'_, HashMap<String, RegisteredChannel>> {
    channels.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hosted change feed over a Phoenix WebSocket.
pub struct SupabaseRealtimeFeed {
    ws_url: String,
    reconnect: Duration,
    heartbeat: Duration,
    /// Registered channels by topic.
    channels: Arc<Channels>,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Command>>,
    next_ref: AtomicU64,
    next_generation: AtomicU64,
    connected: AtomicBool,
}

impl SupabaseRealtimeFeed {
    pub fn new(config: &FeedConfig, api_key: &str) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        Self {
            ws_url: websocket_url(&config.url, api_key),
            reconnect: Duration::from_secs(config.reconnect_seconds),
            heartbeat: Duration::from_secs(config.heartbeat_seconds),
            channels: Arc::new(Mutex::new(HashMap::new())),
            commands,
            command_rx: tokio::sync::Mutex::new(command_rx),
            next_ref: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }
    }

    /// Whether the WebSocket session is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn next_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::Relaxed)
    }

    /// Run the connection loop with auto-reconnect until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut commands = self.command_rx.lock().await;
        info!("Connecting to realtime change feed");

        loop {
            let session = self.connect_and_stream(&mut commands, &mut shutdown_rx).await;
            self.connected.store(false, Ordering::Relaxed);
            match session {
                Ok(()) => {
                    info!("Realtime change feed shut down gracefully");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = self.reconnect.as_secs(),
                        "Realtime feed disconnected, reconnecting"
                    );
                    tokio::select! {
                        _ = shutdown_rx.recv() => return Ok(()),
                        () = tokio::time::sleep(self.reconnect) => {},
                    }
                }
            }
        }
    }

    /// Single session: connect, rejoin, stream until error or shutdown.
    async fn connect_and_stream(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .context("Realtime WebSocket connection failed")?;
        let (mut write, mut read) = ws_stream.split();
        self.connected.store(true, Ordering::Relaxed);

        let mut joined: HashSet<String> = HashSet::new();
        for topic in self.rejoin_topics() {
            if let Some(frame) = self.join_frame(&topic) {
                write.send(Message::Text(frame)).await.context("Rejoin failed")?;
                joined.insert(topic);
            }
        }
        info!(channels = joined.len(), "Realtime WebSocket connected");

        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + self.heartbeat, self.heartbeat);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    for topic in joined.drain() {
                        let frame = build_leave_message(&topic, self.next_ref());
                        let _ = write.send(Message::Text(frame)).await;
                    }
                    let _ = write.close().await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    write
                        .send(Message::Text(build_heartbeat_message(self.next_ref())))
                        .await
                        .context("Heartbeat send failed")?;
                }
                command = commands.recv() => {
                    match command {
                        Some(Command::Join(topic)) if !joined.contains(&topic) => {
                            if let Some(frame) = self.join_frame(&topic) {
                                write.send(Message::Text(frame)).await.context("Join send failed")?;
                                joined.insert(topic);
                            }
                        }
                        Some(Command::Join(_)) => {}
                        Some(Command::Leave(topic)) => {
                            if joined.remove(&topic) {
                                let frame = build_leave_message(&topic, self.next_ref());
                                write.send(Message::Text(frame)).await.context("Leave send failed")?;
                            }
                        }
                        None => return Ok(()),
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text),
                        Some(Ok(Message::Close(frame))) => {
                            return Err(anyhow::anyhow!("Realtime WS closed by server: {frame:?}"));
                        }
                        Some(Err(e)) => {
                            return Err(anyhow::anyhow!("Realtime WS error: {e}"));
                        }
                        None => {
                            return Err(anyhow::anyhow!("Realtime WS stream ended"));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Topics of every registered channel, sorted. Joined again on each
    /// new session.
    fn rejoin_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.channels).keys().cloned().collect();
        topics.sort();
        topics
    }

    fn join_frame(&self, topic: &str) -> Option<String> {
        let specs: Vec<ChangeSpec> = lock(&self.channels)
            .get(topic)?
            .bindings
            .iter()
            .map(|b| b.spec.clone())
            .collect();
        Some(build_join_message(topic, &specs, self.next_ref()))
    }

    fn handle_message(&self, text: &str) {
        match parse_frame(text) {
            Some(Inbound::Change { topic, change }) => {
                let handlers: Vec<ChangeHandler> = lock(&self.channels)
                    .get(&topic)
                    .map(|channel| {
                        channel
                            .bindings
                            .iter()
                            .filter(|b| b.spec.table == change.table && b.spec.event.accepts(change.event_type))
                            .map(|b| Arc::clone(&b.handler))
                            .collect()
                    })
                    .unwrap_or_default();
                debug!(topic = %topic, table = %change.table, handlers = handlers.len(), "Change received");
                for handler in &handlers {
                    handler(change.clone());
                }
            }
            Some(Inbound::Reply { topic, ok: false, detail }) => {
                warn!(topic = %topic, detail = %detail, "Realtime feed rejected request");
            }
            Some(Inbound::Reply { .. } | Inbound::Other { .. }) => {}
            None => debug!("Ignoring unparseable realtime frame"),
        }
    }
}

impl ChangeFeed for SupabaseRealtimeFeed {
    fn open_channel(
        &self,
        name: &str,
        bindings: Vec<ChangeBinding>,
    ) -> Result<Box<dyn UpstreamSubscription>, FeedError> {
        let topic = topic_for(name);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        lock(&self.channels).insert(
            topic.clone(),
            RegisteredChannel {
                generation,
                bindings,
            },
        );
        self.commands
            .send(Command::Join(topic.clone()))
            .map_err(|_| FeedError::Closed)?;

        Ok(Box::new(SupabaseSubscription {
            topic,
            generation,
            channels: Arc::downgrade(&self.channels),
            commands: self.commands.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SupabaseSubscription {
    topic: String,
    generation: u64,
    channels: Weak<Channels>,
    commands: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
}

impl UpstreamSubscription for SupabaseSubscription {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(channels) = self.channels.upgrade() else {
            return;
        };
        let removed = {
            let mut channels = lock(&channels);
            match channels.get(&self.topic) {
                Some(channel) if channel.generation == self.generation => {
                    channels.remove(&self.topic).is_some()
                }
                _ => false,
            }
        };
        if removed {
            // The run loop may already be gone at shutdown
            let _ = self.commands.send(Command::Leave(self.topic.clone()));
        }
    }
}
