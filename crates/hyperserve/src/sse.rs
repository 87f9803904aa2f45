//! # SSE hub
//!
//! Registry of live server-sent-event streams keyed by opaque client
//! IDs. Each client owns a bounded event queue with drop-oldest
//! overflow; a per-client writer task serializes events onto the
//! response body and emits a `:ping` keepalive after fifteen seconds of
//! outbound silence. A slow reader never blocks an enqueuer.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

use crate::handler::BoxBody;
use crate::metrics::ServerMetrics;

/// Keepalive interval on outbound silence.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
/// Default per-client queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Optional `event:` field
    pub name: Option<String>,
    /// `data:` payload
    pub data: String,
}

impl SseEvent {
    /// Named event.
    pub fn named(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            data: data.into(),
        }
    }

    /// Serialize to the wire form: optional `event:` line, `data:`
    /// line(s), blank separator. Embedded newlines split into multiple
    /// `data:` lines per the SSE grammar.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.name {
            out.push_str("event: ");
            out.push_str(name);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

struct ClientQueue {
    events: Mutex<VecDeque<SseEvent>>,
    capacity: usize,
    wake: Notify,
}

struct ClientHandle {
    queue: Arc<ClientQueue>,
}

/// The hub: ID → live client queue.
pub struct SseHub {
    clients: RwLock<HashMap<String, ClientHandle>>,
    queue_capacity: usize,
    metrics: Arc<ServerMetrics>,
}

impl std::fmt::Debug for SseHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseHub")
            .field("clients", &self.clients.read().len())
            .finish_non_exhaustive()
    }
}

impl SseHub {
    /// Hub reporting dropped events to the server metrics.
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            metrics,
        }
    }

    /// Number of attached clients.
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether `client_id` has a live stream.
    pub fn knows(&self, client_id: &str) -> bool {
        self.clients.read().contains_key(client_id)
    }

    /// Attach a new stream: assigns an opaque client ID, queues the
    /// `connection` event, and returns the streaming response body.
    /// The entry is removed when the peer disconnects.
    pub fn attach(self: &Arc<Self>) -> (String, BoxBody) {
        let client_id = uuid::Uuid::new_v4().to_string();
        let queue = Arc::new(ClientQueue {
            events: Mutex::new(VecDeque::new()),
            capacity: self.queue_capacity,
            wake: Notify::new(),
        });

        self.clients.write().insert(
            client_id.clone(),
            ClientHandle {
                queue: Arc::clone(&queue),
            },
        );
        debug!(client_id, "sse client attached");

        let connection = SseEvent::named(
            "connection",
            serde_json::json!({"clientId": client_id}).to_string(),
        );
        queue.events.lock().push_back(connection);
        queue.wake.notify_one();

        let (body_tx, body_rx) = mpsc::channel::<Bytes>(8);
        let hub = Arc::clone(self);
        let writer_id = client_id.clone();
        tokio::spawn(async move {
            writer_loop(queue, body_tx).await;
            hub.detach(&writer_id);
        });

        (client_id, ChannelBody { rx: body_rx }.boxed())
    }

    /// Remove a client (idempotent; also called by the writer on
    /// disconnect).
    pub fn detach(&self, client_id: &str) {
        if self.clients.write().remove(client_id).is_some() {
            debug!(client_id, "sse client detached");
        }
    }

    /// Queue an event for `client_id`. Returns false when the client is
    /// unknown (the caller falls back to an inline response). A full
    /// queue discards its oldest event and counts the drop.
    pub fn send_to(&self, client_id: &str, event: SseEvent) -> bool {
        let clients = self.clients.read();
        let Some(client) = clients.get(client_id) else {
            return false;
        };
        let mut events = client.queue.events.lock();
        if events.len() >= client.queue.capacity {
            events.pop_front();
            self.metrics.sse_event_dropped();
            trace!(client_id, "sse queue full; dropped oldest event");
        }
        events.push_back(event);
        client.queue.wake.notify_one();
        true
    }

    /// Drop all clients (server shutdown).
    pub fn close_all(&self) {
        let mut clients = self.clients.write();
        let count = clients.len();
        clients.clear();
        if count > 0 {
            debug!(count, "sse hub closed");
        }
    }
}

/// Per-client writer: drains the queue, emits keepalives on silence,
/// exits when the body receiver is gone (client disconnected).
async fn writer_loop(queue: Arc<ClientQueue>, body_tx: mpsc::Sender<Bytes>) {
    loop {
        let batch: Vec<SseEvent> = {
            let mut events = queue.events.lock();
            events.drain(..).collect()
        };

        if batch.is_empty() {
            tokio::select! {
                () = queue.wake.notified() => continue,
                () = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                    if body_tx.send(Bytes::from_static(b":ping\n\n")).await.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        for event in batch {
            if body_tx.send(Bytes::from(event.encode())).await.is_err() {
                return;
            }
        }
    }
}

/// Response body fed by the writer task's byte channel. Ends when the
/// writer exits (client detached or hub closed).
struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl hyper::body::Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<hyper::body::Frame<Bytes>, Infallible>>> {
        self.rx
            .poll_recv(cx)
            .map(|maybe| maybe.map(|bytes| Ok(hyper::body::Frame::data(bytes))))
    }
}
