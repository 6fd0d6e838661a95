//! Socket transport: one connection to one realtime endpoint.
//!
//! LIFECYCLE
//! =========
//! `Idle → Connecting → Open → Closed`. `connect()` is idempotent: an open
//! transport resolves at once and a transport that is already dialing hands
//! every caller the same shared attempt, so at most one socket exists.
//!
//! RECONNECTION
//! ============
//! A failed dial or a close code other than 1000 schedules a reconnect after
//! `base × 1.5^(attempt-1)`. Attempts reset on a successful open. Once the
//! ceiling is reached the transport reports `RetriesExhausted` through the
//! error handler and stays closed.
//!
//! Every socket carries a generation number. `disconnect()` bumps it, so
//! events still queued from the old socket, an in-flight dial and a pending
//! reconnect timer all become no-ops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wire::{ABNORMAL_CLOSURE, Envelope, NORMAL_CLOSURE, Status};

use super::backoff::ReconnectPolicy;
use super::dial::{Connector, Incoming, Outgoing, Socket};
use crate::error::TransportError;

/// Callback for parsed inbound messages.
pub type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;
/// Callback fired each time a socket opens.
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;
/// Callback for transport failures.
pub type ErrorHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;

type PendingConnect = Shared<BoxFuture<'static, Result<(), TransportError>>>;

/// Key under which a message handler is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// Receives every parsed message, in addition to its status route.
    Message,
    /// Receives messages whose dispatch key is this status.
    Status(Status),
}

/// Connection lifecycle phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Cloneable handle to one endpoint connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    label: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    conn: Mutex<Conn>,
    handlers: Mutex<Handlers>,
}

#[derive(Default)]
struct Conn {
    phase: Phase,
    attempts: u32,
    generation: u64,
    pending: Option<PendingConnect>,
    outbound: Option<mpsc::UnboundedSender<Outgoing>>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Handlers {
    routes: HashMap<Route, MessageHandler>,
    on_open: Option<OpenHandler>,
    on_error: Option<ErrorHandler>,
}

impl Transport {
    /// Create a transport for `url`. Nothing is dialed until `connect()` or `send()`.
    #[must_use]
    pub fn new(url: impl Into<String>, connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let url = url.into();
        // The query string carries the auth token; keep it out of logs.
        let label = url.split('?').next().unwrap_or_default().to_owned();
        Self {
            inner: Arc::new(Inner {
                url,
                label,
                connector,
                policy,
                conn: Mutex::new(Conn::default()),
                handlers: Mutex::new(Handlers::default()),
            }),
        }
    }

    /// Endpoint URL without its query string.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.label
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.lock_conn().phase
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Open
    }

    /// Reconnect attempts used since the last successful open.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.lock_conn().attempts
    }

    /// Open the connection, or join the attempt already in flight.
    ///
    /// # Errors
    ///
    /// Returns the dial failure (shared by all joined callers), or
    /// [`TransportError::Cancelled`] when `disconnect()` raced the attempt.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let attempt = {
            let mut conn = self.inner.lock_conn();
            if conn.phase == Phase::Open {
                return Ok(());
            }
            if let Some(pending) = conn.pending.clone() {
                pending
            } else {
                conn.phase = Phase::Connecting;
                let attempt = open(Arc::downgrade(&self.inner), conn.generation)
                    .boxed()
                    .shared();
                conn.pending = Some(attempt.clone());
                attempt
            }
        };
        attempt.await
    }

    /// Serialize and send `message`, connecting first when needed.
    ///
    /// Failures are logged and reported as `false`; this never errors.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(error) => {
                warn!(endpoint = %self.inner.label, error = %error, "ws: failed to serialize message");
                return false;
            }
        };

        if let Some(sent) = self.inner.try_send(&text) {
            return sent;
        }
        if let Err(error) = self.connect().await {
            warn!(endpoint = %self.inner.label, error = %error, "ws: send skipped, connect failed");
            return false;
        }
        self.inner.try_send(&text).unwrap_or_else(|| {
            warn!(endpoint = %self.inner.label, "ws: send skipped, socket closed");
            false
        })
    }

    /// Close the connection with code 1000 and stop all reconnect activity.
    ///
    /// The reader is detached before the close frame goes out, so nothing
    /// from the old socket reaches the handlers afterwards.
    pub fn disconnect(&self) {
        let mut conn = self.inner.lock_conn();
        conn.generation = conn.generation.wrapping_add(1);
        if let Some(timer) = conn.reconnect.take() {
            timer.abort();
        }
        conn.pending = None;
        if let Some(reader) = conn.reader.take() {
            reader.abort();
        }
        if let Some(outbound) = conn.outbound.take() {
            let _ = outbound.send(Outgoing::Close(NORMAL_CLOSURE));
        }
        let previous = std::mem::replace(&mut conn.phase, Phase::Closed);
        conn.attempts = 0;
        drop(conn);
        info!(endpoint = %self.inner.label, ?previous, "ws: disconnected");
    }

    /// Register the handler for `route`, replacing any previous one.
    pub fn add_message_handler(&self, route: Route, handler: impl Fn(&Envelope) + Send + Sync + 'static) {
        self.inner
            .lock_handlers()
            .routes
            .insert(route, Arc::new(handler));
    }

    pub fn remove_message_handler(&self, route: Route) {
        self.inner.lock_handlers().routes.remove(&route);
    }

    pub fn set_open_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.lock_handlers().on_open = Some(Arc::new(handler));
    }

    pub fn set_error_handler(&self, handler: impl Fn(&TransportError) + Send + Sync + 'static) {
        self.inner.lock_handlers().on_error = Some(Arc::new(handler));
    }
}

impl Inner {
    fn lock_conn(&self) -> MutexGuard<'_, Conn> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_conn().generation == generation
    }

    /// `Some(sent)` when the socket is open, `None` otherwise.
    fn try_send(&self, text: &str) -> Option<bool> {
        let conn = self.lock_conn();
        if conn.phase != Phase::Open {
            return None;
        }
        let outbound = conn.outbound.as_ref()?;
        Some(outbound.send(Outgoing::Text(text.to_owned())).is_ok())
    }

    fn opened(self: &Arc<Self>, generation: u64, socket: Socket) -> Result<(), TransportError> {
        let Socket { outbound, inbound } = socket;
        {
            let mut conn = self.lock_conn();
            if conn.generation != generation {
                let _ = outbound.send(Outgoing::Close(NORMAL_CLOSURE));
                return Err(TransportError::Cancelled);
            }
            conn.phase = Phase::Open;
            conn.attempts = 0;
            conn.pending = None;
            conn.outbound = Some(outbound);
            conn.reader = Some(tokio::spawn(read_loop(Arc::downgrade(self), generation, inbound)));
        }

        info!(endpoint = %self.label, "ws: connected");
        let on_open = self.lock_handlers().on_open.clone();
        if let Some(handler) = on_open {
            handler();
        }
        Ok(())
    }

    fn connect_failed(self: &Arc<Self>, generation: u64, error: TransportError) -> Result<(), TransportError> {
        let exhausted = {
            let mut conn = self.lock_conn();
            if conn.generation != generation {
                return Err(TransportError::Cancelled);
            }
            conn.pending = None;
            conn.phase = Phase::Closed;
            self.schedule_reconnect(&mut conn)
        };

        warn!(endpoint = %self.label, error = %error, "ws: connect failed");
        self.emit_error(&error);
        if let Some(terminal) = exhausted {
            self.emit_error(&terminal);
        }
        Err(error)
    }

    fn closed(self: &Arc<Self>, generation: u64, code: u16) {
        let exhausted = {
            let mut conn = self.lock_conn();
            if conn.generation != generation {
                return;
            }
            conn.phase = Phase::Closed;
            conn.outbound = None;
            conn.reader = None;
            if code == NORMAL_CLOSURE {
                info!(endpoint = %self.label, code, "ws: closed");
                None
            } else {
                warn!(endpoint = %self.label, code, "ws: closed abnormally");
                self.schedule_reconnect(&mut conn)
            }
        };
        if let Some(terminal) = exhausted {
            self.emit_error(&terminal);
        }
    }

    /// Arm the reconnect timer. Returns the terminal error once the ceiling is hit.
    fn schedule_reconnect(self: &Arc<Self>, conn: &mut Conn) -> Option<TransportError> {
        if !self.policy.allows(conn.attempts) {
            warn!(endpoint = %self.label, attempts = conn.attempts, "ws: reconnect attempts exhausted");
            return Some(TransportError::RetriesExhausted {
                attempts: conn.attempts,
            });
        }

        conn.attempts += 1;
        let delay = self.policy.delay(conn.attempts);
        let generation = conn.generation;
        let weak = Arc::downgrade(self);
        info!(endpoint = %self.label, attempt = conn.attempts, delay_ms = delay.as_millis(), "ws: reconnect scheduled");

        if let Some(previous) = conn.reconnect.take() {
            previous.abort();
        }
        conn.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut conn = inner.lock_conn();
                if conn.generation != generation {
                    return;
                }
                conn.reconnect = None;
            }
            // Failures re-arm the timer inside `connect_failed`.
            let _ = Transport { inner }.connect().await;
        }));
        None
    }

    fn dispatch(&self, text: &str) {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(endpoint = %self.label, error = %error, "ws: dropping unparseable message");
                return;
            }
        };
        debug!(endpoint = %self.label, status = envelope.status.as_str(), "ws: recv");

        let (any, routed) = {
            let handlers = self.lock_handlers();
            (
                handlers.routes.get(&Route::Message).cloned(),
                handlers.routes.get(&Route::Status(envelope.status)).cloned(),
            )
        };
        if let Some(handler) = any {
            handler(&envelope);
        }
        if let Some(handler) = routed {
            handler(&envelope);
        }
    }

    fn emit_error(&self, error: &TransportError) {
        let on_error = self.lock_handlers().on_error.clone();
        if let Some(handler) = on_error {
            handler(error);
        }
    }
}

async fn open(weak: Weak<Inner>, generation: u64) -> Result<(), TransportError> {
    let (url, label, connector) = {
        let Some(inner) = weak.upgrade() else {
            return Err(TransportError::Cancelled);
        };
        (inner.url.clone(), inner.label.clone(), Arc::clone(&inner.connector))
    };

    debug!(endpoint = %label, "ws: connecting");
    let result = connector.connect(&url).await;

    let Some(inner) = weak.upgrade() else {
        return Err(TransportError::Cancelled);
    };
    match result {
        Ok(socket) => inner.opened(generation, socket),
        Err(error) => inner.connect_failed(generation, error),
    }
}

async fn read_loop(weak: Weak<Inner>, generation: u64, mut inbound: mpsc::UnboundedReceiver<Incoming>) {
    let mut close_code = ABNORMAL_CLOSURE;
    while let Some(event) = inbound.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.is_current(generation) {
            return;
        }
        match event {
            Incoming::Text(text) => inner.dispatch(&text),
            Incoming::Error(message) => inner.emit_error(&TransportError::Socket(message)),
            Incoming::Closed { code } => {
                close_code = code;
                break;
            }
        }
    }
    if let Some(inner) = weak.upgrade() {
        inner.closed(generation, close_code);
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
