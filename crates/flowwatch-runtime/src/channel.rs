//! Push channel manager.
//!
//! Owns the single long-lived connection to the service's push endpoint,
//! decodes each inbound message into a [`FlowRecord`] and fans it out to every
//! registered subscriber, in arrival order. When the connection drops for any
//! reason other than an explicit [`ChannelManager::disconnect`], a fixed-delay
//! reconnect is scheduled and repeated until it succeeds.
//!
//! The connection itself sits behind the [`Connector`] / [`Transport`] seam so
//! the lifecycle can be driven by scripted transports in tests.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use flowwatch_core::error::{FlowwatchError, Result};
use flowwatch_core::models::ConnectionState;
use flowwatch_core::protocol::FlowRecord;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Delay between a connection loss and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

// ── Transport seam ────────────────────────────────────────────────────────────

/// An open push connection.
#[async_trait]
pub trait Transport: Send {
    /// Next text message. `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the connection from our side.
    async fn close(&mut self);
}

/// Opens push connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}

/// Callback invoked once per decoded event.
pub type Handler = Arc<dyn Fn(&FlowRecord) -> Result<()> + Send + Sync>;

// ── Subscription ──────────────────────────────────────────────────────────────

/// Registration of one subscriber. Dropping it unsubscribes.
#[must_use = "the handler is unsubscribed as soon as the Subscription is dropped"]
pub struct Subscription {
    id: u64,
    registry: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop receiving events. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.registry.upgrade() {
            shared.subscribers.lock().remove(&self.id);
            tracing::debug!(subscriber = self.id, "unsubscribed");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ── ChannelManager ────────────────────────────────────────────────────────────

struct Shared {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    state: watch::Sender<ConnectionState>,
    subscribers: Mutex<BTreeMap<u64, Handler>>,
    next_id: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

/// Handle to the background connection task.
struct Worker {
    cancel: CancellationToken,
    retry_now: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Single push connection shared by every subscriber in the process.
pub struct ChannelManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl ChannelManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_reconnect_delay(connector, DEFAULT_RECONNECT_DELAY)
    }

    pub fn with_reconnect_delay(connector: Arc<dyn Connector>, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                reconnect_delay,
                state,
                subscribers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                dispatched: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Ensure exactly one connection exists or is being established.
    ///
    /// Idempotent: while a connection is open or being opened this does
    /// nothing. While a reconnect is pending it cuts the wait short and
    /// retries immediately, without starting a second attempt loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut worker = self.worker.lock();

        if let Some(current) = worker.as_ref() {
            if !current.handle.is_finished() {
                if self.state() == ConnectionState::Disconnected {
                    tracing::debug!("reconnect pending; retrying now");
                    current.retry_now.notify_one();
                }
                return;
            }
        }

        let cancel = CancellationToken::new();
        let retry_now = Arc::new(Notify::new());
        self.shared.set_state(ConnectionState::Connecting);
        let handle = tokio::spawn(run_connection(
            Arc::clone(&self.shared),
            cancel.clone(),
            Arc::clone(&retry_now),
        ));
        *worker = Some(Worker {
            cancel,
            retry_now,
            handle,
        });
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// No reconnect is attempted afterwards until [`connect`](Self::connect)
    /// is called again. Idempotent.
    pub async fn disconnect(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                if e.is_panic() {
                    tracing::error!("push connection task panicked");
                }
            }
            tracing::info!("push channel disconnected");
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    // ── Subscribers ───────────────────────────────────────────────────────

    /// Register `handler` to receive every subsequently decoded event.
    ///
    /// A handler that returns an error or panics is logged and skipped; it
    /// affects neither the other subscribers nor the connection.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&FlowRecord) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().insert(id, Arc::new(handler));
        tracing::debug!(subscriber = id, "subscribed");
        Subscription {
            id,
            registry: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    // ── State ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Events decoded and fanned out so far.
    pub fn dispatched(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Relaxed)
    }

    /// Inbound messages discarded because they could not be decoded.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::debug!(state = %next, "push channel state");
        }
    }

    /// Decode one inbound message and hand it to every subscriber.
    fn dispatch_text(&self, text: &str) {
        let record: FlowRecord = match serde_json::from_str(text) {
            Ok(record) => record,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "discarding undecodable push message");
                return;
            }
        };
        self.dispatch(&record);
    }

    fn dispatch(&self, record: &FlowRecord) {
        // Snapshot so handlers may (un)subscribe without deadlocking and so
        // a concurrent change never corrupts this round of delivery.
        let handlers: Vec<(u64, Handler)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();

        for (id, handler) in handlers {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let e = match e {
                        FlowwatchError::Handler(_) => e,
                        other => FlowwatchError::Handler(other.to_string()),
                    };
                    tracing::warn!(subscriber = id, error = %e, "subscriber failed");
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::warn!(subscriber = id, %reason, "subscriber panicked");
                }
            }
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Deliver messages until the transport ends. Returns `true` when the
    /// loop ended because of cancellation.
    async fn pump(&self, transport: &mut dyn Transport, cancel: &CancellationToken) -> bool {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return true,
                next = transport.recv() => next,
            };
            match next {
                Some(Ok(text)) => self.dispatch_text(&text),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "push connection failed");
                    return false;
                }
                None => {
                    tracing::info!("push connection closed by peer");
                    return false;
                }
            }
        }
    }
}

// ── Connection task ───────────────────────────────────────────────────────────

/// Connect, pump, and reconnect after a fixed delay until cancelled.
async fn run_connection(shared: Arc<Shared>, cancel: CancellationToken, retry_now: Arc<Notify>) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        shared.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = shared.connector.connect() => result,
        };

        match connected {
            Ok(mut transport) => {
                tracing::info!(attempt, "push channel connected");
                attempt = 0;
                shared.set_state(ConnectionState::Connected);
                if shared.pump(&mut *transport, &cancel).await {
                    transport.close().await;
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "push channel connect failed");
            }
        }

        shared.set_state(ConnectionState::Disconnected);
        tracing::debug!(delay_ms = shared.reconnect_delay.as_millis() as u64, "reconnect scheduled");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = retry_now.notified() => {}
            _ = tokio::time::sleep(shared.reconnect_delay) => {}
        }
    }
    shared.set_state(ConnectionState::Disconnected);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
