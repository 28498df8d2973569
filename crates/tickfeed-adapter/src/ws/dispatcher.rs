/*
[INPUT]:  Decoded stream events and caller-registered handlers
[OUTPUT]: Handler invocations on a dedicated task, in registration order
[POS]:    WebSocket layer - event fan-out decoupled from the read loop
[UPDATE]: When adding event kinds or changing the backpressure policy
*/

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

use crate::error::TickerError;
use crate::types::enums::CloseReason;
use crate::types::models::{OrderUpdate, Tick};

/// Event kinds a handler can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Tick,
    Connect,
    Close,
    Error,
    Reconnect,
    OrderUpdate,
}

/// One event emitted by the streaming client
#[derive(Debug)]
pub enum TickerEvent {
    /// Decoded ticks from one binary frame, in wire order
    Ticks(Vec<Tick>),
    /// A session reached the connected state and replayed its subscriptions
    Connected,
    /// A session ended; the reason decides whether a reconnect follows
    Closed(CloseReason),
    /// A recoverable or terminal error
    Error(TickerError),
    /// A reconnect has been scheduled; `attempt` counts from 1
    Reconnecting { attempt: u32 },
    /// Order lifecycle update pushed by the server
    OrderUpdate(OrderUpdate),
}

impl TickerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TickerEvent::Ticks(_) => EventKind::Tick,
            TickerEvent::Connected => EventKind::Connect,
            TickerEvent::Closed(_) => EventKind::Close,
            TickerEvent::Error(_) => EventKind::Error,
            TickerEvent::Reconnecting { .. } => EventKind::Reconnect,
            TickerEvent::OrderUpdate(_) => EventKind::OrderUpdate,
        }
    }
}

/// Caller-supplied event handler
pub type EventHandler = Arc<dyn Fn(&TickerEvent) + Send + Sync>;

type HandlerTable = Arc<RwLock<HashMap<EventKind, Vec<EventHandler>>>>;

/// Producer half used by the controller worker.
///
/// Backpressure policy: `emit` blocks the worker for at most the configured
/// send timeout when the queue is full, then drops the event and counts it.
/// The bound keeps slow handlers from ever starving liveness detection.
#[derive(Clone)]
pub(crate) struct EventQueue {
    tx: mpsc::Sender<TickerEvent>,
    send_timeout: Duration,
    dropped: Arc<AtomicU64>,
}

impl EventQueue {
    pub async fn emit(&self, event: TickerEvent) {
        match self.tx.send_timeout(event, self.send_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = ?event.kind(),
                    dropped_total = dropped,
                    "dispatch queue full; dropping event"
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!("dispatch task gone; event discarded");
            }
        }
    }
}

/// Routes events to registered handlers on its own task.
pub(crate) struct Dispatcher {
    handlers: HandlerTable,
    dropped: Arc<AtomicU64>,
    queue_tx: mpsc::Sender<TickerEvent>,
    queue_rx: Option<mpsc::Receiver<TickerEvent>>,
    send_timeout: Duration,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(capacity: usize, send_timeout: Duration) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            dropped: Arc::new(AtomicU64::new(0)),
            queue_tx,
            queue_rx: Some(queue_rx),
            send_timeout,
            task: None,
        }
    }

    /// Register a handler; handlers of one kind run in registration order
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        let mut table = self.handlers.write().unwrap();
        table.entry(kind).or_default().push(handler);
    }

    /// Producer handle for the controller worker
    pub fn queue(&self) -> EventQueue {
        EventQueue {
            tx: self.queue_tx.clone(),
            send_timeout: self.send_timeout,
            dropped: self.dropped.clone(),
        }
    }

    /// Events dropped because the queue stayed full past the send timeout
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the dispatch task; requires a running Tokio runtime.
    ///
    /// Idempotent after the first call.
    pub fn start(&mut self) {
        let Some(queue_rx) = self.queue_rx.take() else {
            return;
        };
        let handlers = self.handlers.clone();
        self.task = Some(tokio::spawn(dispatch_loop(queue_rx, handlers)));
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("dropped", &self.dropped_events())
            .field("started", &self.task.is_some())
            .finish()
    }
}

async fn dispatch_loop(mut queue_rx: mpsc::Receiver<TickerEvent>, handlers: HandlerTable) {
    while let Some(event) = queue_rx.recv().await {
        let slot: Vec<EventHandler> = {
            let table = handlers.read().unwrap();
            table.get(&event.kind()).cloned().unwrap_or_default()
        };
        for handler in slot {
            handler(&event);
        }
    }
    debug!("dispatch task stopped");
}
