//! The session: one TCP connection to the local unit, shared by everyone.
//!
//! A [`Session`] owns the socket, a background read loop, the
//! pending-request table, and the reconnect state machine:
//!
//! ```text
//!   Disconnected ──(connect)──→ Connected ──(connection lost, auto-reconnect)──→ Reconnecting
//!        ↑                        │  ↑                                              │
//!        │                        │  └──────────────(reconnect succeeds)────────────┘
//!        └──(disconnect, or lost without auto-reconnect)──┘
//! ```
//!
//! Transitions are serialized by an async mutex, so a reconnect can never
//! race a deliberate shutdown. Lifecycle events (`Connected`,
//! `Disconnected`) are published while that mutex is held, which keeps
//! them in the same order as the transitions themselves.
//!
//! Requests may be issued from any number of tasks at once. Each claims a
//! sequence slot, writes its frame, and waits on its own channel; the read
//! loop routes responses to the right channel by `(routing id, slot)`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use cinelink_protocol::{Message, Request, RoutingId, Sequence, decode, encode};
use cinelink_transport::{LineConnection, LineReader, LineWriter, TransportError};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::pending::{Claim, PendingTable};
use crate::{EventBus, SessionError, Subscription};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Default per-request (and connect) timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default pause between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;

/// Configuration for session behavior.
///
/// `#[serde(default)]` lets a config file name only the fields it wants to
/// change; everything else falls back to [`Default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Budget for opening the socket, for waiting on a free sequence slot,
    /// and for receiving a complete response, in milliseconds.
    pub timeout_ms: u64,

    /// Reconnect automatically after the connection drops.
    ///
    /// Only takes effect after the first successful connect, so a bad
    /// address fails loudly instead of retrying forever.
    pub auto_reconnect: bool,

    /// Pause between reconnect attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            auto_reconnect: false,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl SessionConfig {
    /// The timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// ConnectionState / SessionEvent
// ---------------------------------------------------------------------------

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket, and no reconnect loop running.
    Disconnected,
    /// Socket open, read loop running, requests accepted.
    Connected,
    /// Connection lost; a reconnect loop is retrying.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// What the session publishes on its [`EventBus`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session (re)entered `Connected`.
    Connected,
    /// The connection was closed or lost.
    Disconnected,
    /// An unsolicited event frame from some device.
    Event(Arc<Message>),
}

impl SessionEvent {
    /// Returns the event frame, if this is one.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Event(message) => Some(message),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct Target {
    host: String,
    port: u16,
}

/// The live socket: writer plus the task reading from it.
struct Link {
    writer: Arc<AsyncMutex<LineWriter>>,
    reader_task: JoinHandle<()>,
    generation: u64,
}

impl Link {
    async fn close(self, abort_reader: bool) {
        if abort_reader {
            self.reader_task.abort();
        }
        if let Err(e) = self.reader_task.await {
            if e.is_panic() {
                tracing::error!(error = %e, "read loop panicked");
            }
        }
        self.writer.lock().await.shutdown().await;
    }
}

struct Reconnect {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    state: ConnectionState,
    target: Option<Target>,
    link: Option<Link>,
    reconnect: Option<Reconnect>,
    reconnect_enabled: bool,
    pending: PendingTable,
    generation: u64,
}

struct Inner {
    config: SessionConfig,
    bus: EventBus<SessionEvent>,
    shared: Mutex<Shared>,
    /// Serializes connect, disconnect, connection loss, and reconnect.
    transition: AsyncMutex<()>,
    /// Signalled whenever a sequence slot is released.
    slot_freed: Notify,
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts a freshly opened connection in place and starts its read loop.
    ///
    /// Only succeeds if the session is still in `from` (and, for a
    /// reconnect, the loop has not been cancelled). Callers hold the
    /// transition lock.
    fn install(
        self: &Arc<Self>,
        conn: LineConnection,
        from: ConnectionState,
        cancel: Option<&CancellationToken>,
    ) -> bool {
        let mut shared = self.shared();
        if shared.state != from || cancel.is_some_and(CancellationToken::is_cancelled) {
            return false;
        }

        let conn_id = conn.id();
        let (reader, writer) = conn.split();
        shared.generation += 1;
        let generation = shared.generation;
        let reader_task = tokio::spawn(read_loop(Arc::downgrade(self), reader, generation));

        shared.link = Some(Link {
            writer: Arc::new(AsyncMutex::new(writer)),
            reader_task,
            generation,
        });
        shared.state = ConnectionState::Connected;
        if from == ConnectionState::Reconnecting {
            shared.reconnect = None;
        }
        tracing::debug!(%conn_id, generation, "connection installed");
        true
    }

    /// Detaches the link and fails every pending request.
    fn teardown(shared: &mut Shared) -> Option<Link> {
        let failed = shared.pending.clear();
        if failed > 0 {
            tracing::debug!(failed, "failing pending requests");
        }
        shared.link.take()
    }

    /// Routes one received frame.
    fn dispatch(&self, line: &str) {
        tracing::trace!(line, "frame received");
        let message = match decode(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed frame");
                return;
            }
        };

        if message.is_event() {
            self.bus.publish(SessionEvent::Event(Arc::new(message)));
            return;
        }

        if !self.shared().pending.deliver(message) {
            tracing::error!(line, "response does not match a pending request");
        }
    }

    /// Handles the read loop ending on its own (EOF or I/O error).
    async fn connection_lost(self: Arc<Self>, generation: u64, reason: String) {
        let _transition = self.transition.lock().await;

        let (link, reconnecting) = {
            let mut shared = self.shared();
            let current = shared.link.as_ref().map(|link| link.generation);
            if shared.state != ConnectionState::Connected || current != Some(generation) {
                // Already handled by a disconnect or an earlier failure.
                return;
            }

            let link = Self::teardown(&mut shared);
            let reconnecting = shared.reconnect_enabled && shared.target.is_some();
            if reconnecting {
                shared.state = ConnectionState::Reconnecting;
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(reconnect_loop(Arc::downgrade(&self), cancel.clone()));
                shared.reconnect = Some(Reconnect { cancel, handle });
            } else {
                shared.state = ConnectionState::Disconnected;
            }
            (link, reconnecting)
        };

        self.slot_freed.notify_waiters();
        if let Some(link) = link {
            link.close(false).await;
        }

        tracing::warn!(reason, reconnecting, "connection lost");
        self.bus.publish(SessionEvent::Disconnected);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(link) = shared.link.take() {
            link.reader_task.abort();
        }
        if let Some(reconnect) = shared.reconnect.take() {
            reconnect.cancel.cancel();
        }
    }
}

/// Reads frames until the socket fails, then hands off to
/// [`Inner::connection_lost`] on a fresh task (it awaits this task's
/// handle, so it cannot run inline).
async fn read_loop(inner: Weak<Inner>, mut reader: LineReader, generation: u64) {
    let reason = loop {
        let line = match reader.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break "connection closed by peer".to_string(),
            Err(e) => break e.to_string(),
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.dispatch(&line);
    };

    if let Some(inner) = inner.upgrade() {
        tokio::spawn(inner.connection_lost(generation, reason));
    }
}

/// Retries the original connect until it succeeds or `cancel` fires.
async fn reconnect_loop(inner: Weak<Inner>, cancel: CancellationToken) {
    let mut attempt: u32 = 0;
    loop {
        let Some(this) = inner.upgrade() else {
            return;
        };
        let Some((host, port)) = this
            .shared()
            .target
            .as_ref()
            .map(|t| (t.host.clone(), t.port))
        else {
            return;
        };
        let timeout = this.config.timeout();
        let delay = this.config.reconnect_delay();
        attempt += 1;

        let connect = async {
            let conn = cinelink_transport::connect(&host, port, timeout).await?;
            let _transition = this.transition.lock().await;
            let installed = this.install(conn, ConnectionState::Reconnecting, Some(&cancel));
            if installed {
                tracing::info!(%host, port, attempt, "reconnected");
                this.bus.publish(SessionEvent::Connected);
            }
            Ok::<bool, TransportError>(installed)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = connect => match result {
                // `false` means a disconnect won the race; either way we are done.
                Ok(_) => return,
                Err(e) => tracing::warn!(%host, port, attempt, error = %e, "reconnect attempt failed"),
            },
        }

        drop(this);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// SlotGuard
// ---------------------------------------------------------------------------

/// Releases a claimed sequence slot when dropped, whatever the outcome of
/// the request (answered, failed, timed out, or the caller went away).
struct SlotGuard {
    inner: Weak<Inner>,
    claim: Claim,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let released = inner.shared().pending.release(&self.claim);
            if released {
                inner.slot_freed.notify_waiters();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A connection to the local unit. Cheap to clone; clones share the same
/// socket, pending table, and event bus.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Session {
    /// Creates a disconnected session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                bus: EventBus::new(),
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    target: None,
                    link: None,
                    reconnect: None,
                    reconnect_enabled: false,
                    pending: PendingTable::default(),
                    generation: 0,
                }),
                transition: AsyncMutex::new(()),
                slot_freed: Notify::new(),
            }),
        }
    }

    /// Returns the session's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.shared().state
    }

    /// Returns `true` while requests can be sent.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the `host:port` the session was last asked to connect to.
    pub fn target(&self) -> Option<(String, u16)> {
        self.inner
            .shared()
            .target
            .as_ref()
            .map(|t| (t.host.clone(), t.port))
    }

    /// The bus carrying lifecycle and device events.
    pub fn bus(&self) -> &EventBus<SessionEvent> {
        &self.inner.bus
    }

    /// Shorthand for `self.bus().subscribe(filter, handler)`.
    pub fn subscribe<F, H>(&self, filter: F, handler: H) -> Subscription
    where
        F: Fn(&SessionEvent) -> bool + Send + Sync + 'static,
        H: FnMut(SessionEvent) + Send + 'static,
    {
        self.inner.bus.subscribe(filter, handler)
    }

    /// Number of sequence slots currently claimed for `routing_id`.
    pub fn in_flight(&self, routing_id: &RoutingId) -> usize {
        self.inner.shared().pending.in_flight(routing_id)
    }

    /// Opens the connection.
    ///
    /// A no-op if already connected. Auto-reconnect stays disarmed for this
    /// first attempt and is armed (per [`SessionConfig::auto_reconnect`])
    /// only once it succeeds.
    ///
    /// # Errors
    /// [`SessionError::Connection`] on any socket failure or timeout;
    /// [`SessionError::Protocol`] if a reconnect loop is already running.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), SessionError> {
        let inner = &self.inner;
        let _transition = inner.transition.lock().await;

        {
            let mut shared = inner.shared();
            match shared.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Reconnecting => {
                    return Err(SessionError::Protocol(
                        "reconnect already in progress".into(),
                    ));
                }
                ConnectionState::Disconnected => {}
            }
            shared.target = Some(Target {
                host: host.to_string(),
                port,
            });
            shared.reconnect_enabled = false;
        }

        let conn = cinelink_transport::connect(host, port, inner.config.timeout())
            .await
            .map_err(|e| {
                tracing::warn!(host, port, error = %e, "connect failed");
                SessionError::from(e)
            })?;

        inner.install(conn, ConnectionState::Disconnected, None);
        inner.shared().reconnect_enabled = inner.config.auto_reconnect;

        tracing::info!(host, port, "connected");
        inner.bus.publish(SessionEvent::Connected);
        Ok(())
    }

    /// Closes the connection and stops any reconnect loop.
    ///
    /// The reconnect loop is cancelled and awaited before the socket is
    /// torn down. Every request still waiting fails with a connection
    /// error. A no-op if already disconnected.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let _transition = inner.transition.lock().await;

        let reconnect = inner.shared().reconnect.take();
        if let Some(reconnect) = reconnect {
            reconnect.cancel.cancel();
            if let Err(e) = reconnect.handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "reconnect loop panicked");
                }
            }
        }

        let link = {
            let mut shared = inner.shared();
            if shared.state == ConnectionState::Disconnected {
                return;
            }
            shared.state = ConnectionState::Disconnected;
            shared.reconnect_enabled = false;
            Inner::teardown(&mut shared)
        };

        inner.slot_freed.notify_waiters();
        if let Some(link) = link {
            link.close(true).await;
        }

        tracing::info!("disconnected");
        inner.bus.publish(SessionEvent::Disconnected);
    }

    /// Sends a request and waits for its complete answer.
    ///
    /// Returns one message, or for a multiline answer the header followed
    /// by exactly as many rows as it declared.
    ///
    /// # Errors
    /// - [`SessionError::Protocol`] if not connected, or a multiline header
    ///   carries no row count.
    /// - [`SessionError::Connection`] if no sequence slot frees up within
    ///   the timeout, the write fails, or the connection drops while waiting.
    /// - [`SessionError::Command`] if the device answers with a non-zero
    ///   status.
    /// - [`SessionError::Timeout`] if the answer is not complete within the
    ///   timeout.
    pub async fn send(&self, request: &Request) -> Result<Vec<Message>, SessionError> {
        let timeout = self.inner.config.timeout();
        let (guard, mut rx, writer) = self.claim(request, Instant::now() + timeout).await?;

        let line = encode(request, Sequence::Slot(guard.claim.slot));
        if let Err(e) = writer.lock().await.write_line(&line).await {
            tracing::warn!(%request, error = %e, "request failed");
            return Err(SessionError::Connection(format!(
                "request '{request}' failed with '{e}'"
            )));
        }
        tracing::debug!(line, "request sent");

        let deadline = Instant::now() + timeout;
        let first = receive(&mut rx, deadline, request).await?;

        if first.is_error() {
            tracing::debug!(%request, status = first.status, "request rejected");
            return Err(SessionError::Command {
                status: first.status,
                message: first.error_message(),
                request: request.to_string(),
            });
        }

        if !first.response_kind().is_multiline() {
            return Ok(vec![first]);
        }

        let count = first.row_count().ok_or_else(|| {
            tracing::error!(%request, "multiline response without a row count");
            SessionError::Protocol(format!("response to '{request}' has no row count"))
        })?;

        let mut rows = Vec::with_capacity(count + 1);
        rows.push(first);
        while rows.len() <= count {
            rows.push(receive(&mut rx, deadline, request).await?);
        }
        drop(guard);
        Ok(rows)
    }

    /// Sends a request and returns only the first message of the answer.
    ///
    /// # Errors
    /// Same as [`send`](Session::send).
    pub async fn send_one(&self, request: &Request) -> Result<Message, SessionError> {
        let mut messages = self.send(request).await?;
        // `send` never returns an empty list.
        Ok(messages.swap_remove(0))
    }

    /// Claims the lowest free slot for the request's routing id, waiting for
    /// one to be released if all ten are busy.
    async fn claim(
        &self,
        request: &Request,
        deadline: Instant,
    ) -> Result<
        (
            SlotGuard,
            mpsc::UnboundedReceiver<Message>,
            Arc<AsyncMutex<LineWriter>>,
        ),
        SessionError,
    > {
        loop {
            // Registered before checking, so a release in between still
            // wakes us.
            let freed = self.inner.slot_freed.notified();
            {
                let mut shared = self.inner.shared();
                let writer = match (&shared.state, shared.link.as_ref()) {
                    (ConnectionState::Connected, Some(link)) => Arc::clone(&link.writer),
                    _ => {
                        tracing::warn!(%request, "not connected to device");
                        return Err(SessionError::Protocol("not connected to device".into()));
                    }
                };
                if let Some((claim, rx)) = shared.pending.claim(&request.routing_id) {
                    let guard = SlotGuard {
                        inner: Arc::downgrade(&self.inner),
                        claim,
                    };
                    return Ok((guard, rx, writer));
                }
            }

            tracing::trace!(routing_id = %request.routing_id, "all sequence slots busy");
            if tokio::time::timeout_at(deadline, freed).await.is_err() {
                return Err(SessionError::Connection(format!(
                    "no free sequence slot for {} in time",
                    request.routing_id
                )));
            }
        }
    }
}

async fn receive(
    rx: &mut mpsc::UnboundedReceiver<Message>,
    deadline: Instant,
    request: &Request,
) -> Result<Message, SessionError> {
    match tokio::time::timeout_at(deadline, rx.recv()).await {
        Ok(Some(message)) => Ok(message),
        Ok(None) => Err(SessionError::Connection(format!(
            "connection lost while waiting for '{request}'"
        ))),
        Err(_) => {
            tracing::warn!(%request, "request timed out");
            Err(SessionError::Timeout {
                request: request.to_string(),
            })
        }
    }
}
