//! The event bus: backbone state machine plus the dispatcher loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_core::{Event, EventKind};

use crate::error::BackboneError;
use crate::transport::{BackboneMessage, BackboneStream, BackboneTransport};

/// Topic pattern the dispatcher subscribes to.
pub const EVENTS_PATTERN: &str = "pulse:events:*";

/// Backbone topic for one organization's events.
#[must_use]
pub fn organization_topic(organization_id: &str) -> String {
    format!("pulse:events:{organization_id}")
}

/// Initial resubscribe backoff after the subscription dies.
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
/// Backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bus lifecycle state. Transitions are one-directional:
/// `Stopped → Starting → Running → Stopping → Stopped`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusState {
    /// Not started, or fully stopped.
    Stopped,
    /// `start()` in progress.
    Starting,
    /// Dispatcher loop running.
    Running,
    /// `stop()` in progress.
    Stopping,
}

/// Boxed future returned by a listener.
pub type ListenerFuture = BoxFuture<'static, ()>;
/// A registered local callback for one event kind.
pub type Listener = Arc<dyn Fn(Event) -> ListenerFuture + Send + Sync>;

type ListenerMap = HashMap<EventKind, Vec<Listener>>;

/// Bridges local publish/subscribe to the shared store.
pub struct EventBus {
    transport: Arc<dyn BackboneTransport>,
    source: String,
    listeners: Arc<RwLock<ListenerMap>>,
    state: Mutex<BusState>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus over the given transport. `source` identifies this
    /// producing service instance and stamps events built by
    /// [`EventBus::publish_to_organization`].
    pub fn new(transport: Arc<dyn BackboneTransport>, source: impl Into<String>) -> Self {
        Self {
            transport,
            source: source.into(),
            listeners: Arc::new(RwLock::new(HashMap::new())),
            state: Mutex::new(BusState::Stopped),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// This instance's source identity.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BusState {
        *self.state.lock()
    }

    /// Open the backbone subscription and start the dispatcher loop.
    ///
    /// A second `start()` while running is a no-op. On subscribe failure
    /// the bus returns to `Stopped`.
    pub async fn start(&self) -> Result<(), BackboneError> {
        {
            let mut state = self.state.lock();
            match *state {
                BusState::Running | BusState::Starting => return Ok(()),
                BusState::Stopping => return Err(BackboneError::Unavailable),
                BusState::Stopped => *state = BusState::Starting,
            }
        }

        let stream = match self.transport.subscribe(EVENTS_PATTERN).await {
            Ok(stream) => stream,
            Err(err) => {
                *self.state.lock() = BusState::Stopped;
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatch_loop(
            self.transport.clone(),
            stream,
            self.listeners.clone(),
            cancel.clone(),
        ));

        *self.cancel.lock() = Some(cancel);
        *self.task.lock() = Some(task);
        *self.state.lock() = BusState::Running;
        info!(source = %self.source, "event bus started");
        Ok(())
    }

    /// Cancel the dispatcher loop and release the subscription.
    ///
    /// No listener callback fires after `stop()` returns. Idempotent.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if !matches!(*state, BusState::Running | BusState::Starting) {
                return;
            }
            *state = BusState::Stopping;
        }

        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "dispatcher task join failed");
            }
        }

        *self.state.lock() = BusState::Stopped;
        info!(source = %self.source, "event bus stopped");
    }

    /// Register a local callback invoked for every event of `kind`
    /// received from the backbone, including events this process
    /// published (callers self-filter by `source` when needed).
    pub async fn register_listener<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) -> ListenerFuture + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Serialize the event and hand it to the backbone topic derived from
    /// its organization. Returns once handed off, not once delivered.
    pub async fn publish(&self, event: &Event) -> Result<(), BackboneError> {
        if self.state() != BusState::Running {
            return Err(BackboneError::Unavailable);
        }
        let topic = organization_topic(&event.organization_id);
        let payload = serde_json::to_string(event)?;
        self.transport.publish(&topic, payload).await
    }

    /// Construct an [`Event`] stamped with this bus's source and publish it.
    pub async fn publish_to_organization(
        &self,
        organization_id: &str,
        kind: EventKind,
        data: Value,
    ) -> Result<(), BackboneError> {
        let event = Event::new(kind, organization_id, data, self.source.clone());
        self.publish(&event).await
    }
}

/// The single dispatcher loop: receives backbone messages and forwards
/// them to registered listeners. Resubscribes with exponential backoff if
/// the subscription dies; exits only on cancellation.
async fn dispatch_loop(
    transport: Arc<dyn BackboneTransport>,
    mut stream: BackboneStream,
    listeners: Arc<RwLock<ListenerMap>>,
    cancel: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            msg = stream.next() => {
                match msg {
                    Some(msg) => {
                        backoff = INITIAL_BACKOFF;
                        dispatch_message(msg, &listeners).await;
                    }
                    None => {
                        warn!("backbone subscription ended, resubscribing");
                        match resubscribe(&*transport, &cancel, &mut backoff).await {
                            Some(next) => stream = next,
                            None => break,
                        }
                    }
                }
            }
        }
    }
    debug!("dispatcher loop exited");
}

/// Retry the subscription until it succeeds or the loop is cancelled.
async fn resubscribe(
    transport: &dyn BackboneTransport,
    cancel: &CancellationToken,
    backoff: &mut Duration,
) -> Option<BackboneStream> {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(*backoff) => {}
        }
        match transport.subscribe(EVENTS_PATTERN).await {
            Ok(stream) => {
                info!("backbone resubscribed");
                *backoff = INITIAL_BACKOFF;
                return Some(stream);
            }
            Err(err) => {
                warn!(error = %err, backoff_ms = backoff.as_millis(), "resubscribe failed");
                *backoff = (*backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

/// Decode one backbone message and invoke matching listeners in order.
async fn dispatch_message(msg: BackboneMessage, listeners: &RwLock<ListenerMap>) {
    let event: Event = match serde_json::from_str(&msg.payload) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, topic = %msg.topic, "undecodable backbone event dropped");
            return;
        }
    };

    let handlers: Vec<Listener> = {
        let map = listeners.read().await;
        map.get(&event.kind).cloned().unwrap_or_default()
    };

    for handler in handlers {
        handler(event.clone()).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
