//! An in-process emulator of a control-protocol unit.
//!
//! The emulator listens on a loopback port and answers requests from a
//! table of canned replies, keyed by routing id and command name. Tests
//! drive it from the outside: rewrite the table, push events, stop the
//! listener to simulate a dropped connection, and start it again on the
//! same port.
//!
//! Each client connection is served sequentially, one request at a time,
//! like a real unit. The special `_SLEEP` command waits `fields[0]`
//! seconds before acknowledging, which is how tests keep requests in
//! flight.

mod fixture;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cinelink_protocol::{
    Message, MessageKind, RoutingId, Sequence, decode_request, encode_message, escape_field,
    status,
};
use cinelink_transport::{LineConnection, LineReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

pub use fixture::{Fixture, Reply};

/// A request the emulator received, as decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRequest {
    pub routing_id: String,
    pub zone: u8,
    pub sequence: Sequence,
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Default)]
struct State {
    commands: fixture::CommandTable,
    received: Vec<ReceivedRequest>,
    clients: HashMap<u64, mpsc::UnboundedSender<String>>,
    newline_quirk: bool,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A running (or stopped) emulated unit.
pub struct Emulator {
    state: Arc<Mutex<State>>,
    addr: SocketAddr,
    running: Option<Running>,
}

impl Emulator {
    /// Starts an emulator for `fixture` on an ephemeral loopback port.
    ///
    /// # Errors
    /// Fails if the listener cannot be bound.
    pub async fn start(fixture: Fixture) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(State {
            commands: fixture.build(),
            ..State::default()
        }));
        let mut emulator = Self {
            state,
            addr,
            running: None,
        };
        emulator.serve(listener);
        tracing::debug!(%addr, ?fixture, "emulator started");
        Ok(emulator)
    }

    /// Host to connect to.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Port to connect to. Stable across [`stop`](Self::stop) and
    /// [`restart`](Self::restart).
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns `true` while the listener is up.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Closes the listener and every client connection.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "emulator accept loop failed");
        }
        self.state().clients.clear();
        tracing::debug!(addr = %self.addr, "emulator stopped");
    }

    /// Starts listening again on the same port.
    ///
    /// # Errors
    /// Fails if the port has been taken in the meantime.
    pub async fn restart(&mut self) -> io::Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener);
        tracing::debug!(addr = %self.addr, "emulator restarted");
        Ok(())
    }

    /// Sets (or replaces) the replies for `name` on each of `ids`.
    pub fn register(&self, ids: &[&str], name: &str, replies: Vec<Reply>) {
        fixture::register(&mut self.state().commands, ids, name, replies);
    }

    /// Moves every command registered for `old` over to `new`.
    ///
    /// Renaming an id to something unroutable (e.g. `"03_"`) hides the
    /// device: requests addressed to `old` get "Invalid device".
    pub fn change_id(&self, old: &str, new: &str) {
        let mut state = self.state();
        if let Some(commands) = state.commands.remove(old) {
            state.commands.insert(new.to_string(), commands);
        }
    }

    /// Removes every command registered for `ids`.
    pub fn unregister(&self, ids: &[&str]) {
        let mut state = self.state();
        for id in ids {
            state.commands.remove(*id);
        }
    }

    /// Writes CR/LF inside fields as a backslash followed by the raw
    /// character, the way some firmware does.
    pub fn set_newline_quirk(&self, enabled: bool) {
        self.state().newline_quirk = enabled;
    }

    /// Every request received so far, in arrival order.
    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.state().received.clone()
    }

    /// Forgets the received-request log.
    pub fn clear_received(&self) {
        self.state().received.clear();
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.state().clients.len()
    }

    /// Broadcasts an event as coming from each of `ids`, to every client.
    pub fn send_event(&self, ids: &[&str], status: u16, name: &str, fields: &[&str]) {
        let mut state = self.state();
        let mut lines = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(routing_id) = id.parse::<RoutingId>() else {
                tracing::warn!(id, "cannot send event from unroutable id");
                continue;
            };
            let message = Message {
                routing_id,
                zone: 0,
                sequence: Sequence::Event,
                status,
                name: name.to_string(),
                fields: fields.iter().map(|f| f.to_string()).collect(),
                checksum: 1,
                kind: MessageKind::Event,
            };
            lines.push(render(&message, state.newline_quirk));
        }
        state.clients.retain(|_, tx| {
            lines.iter().all(|line| tx.send(line.clone()).is_ok())
        });
    }

    /// Writes a raw line to every client, bypassing the encoder.
    pub fn send_raw(&self, line: &str) {
        self.state()
            .clients
            .retain(|_, tx| tx.send(line.to_string()).is_ok());
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn serve(&mut self, listener: TcpListener) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(accept_loop(listener, Arc::clone(&self.state), cancel.clone()));
        self.running = Some(Running { cancel, handle });
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

async fn accept_loop(listener: TcpListener, state: Arc<Mutex<State>>, cancel: CancellationToken) {
    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => match LineConnection::from_stream(stream) {
                    Ok(conn) => {
                        let id = conn.id().into_inner();
                        let (reader, mut writer) = conn.split();
                        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                        lock(&state).clients.insert(id, tx.clone());
                        tracing::debug!(id, "emulator client connected");

                        clients.spawn(async move {
                            while let Some(line) = rx.recv().await {
                                tracing::trace!(id, line, "emulator >");
                                if writer.write_line(&line).await.is_err() {
                                    break;
                                }
                            }
                        });
                        clients.spawn(serve_client(id, reader, tx, Arc::clone(&state)));
                    }
                    Err(e) => tracing::warn!(error = %e, "emulator could not set up client"),
                },
                Err(e) => tracing::warn!(error = %e, "emulator accept failed"),
            },
        }
    }
    // Dropping the sockets closes every connection.
    clients.shutdown().await;
}

async fn serve_client(
    id: u64,
    mut reader: LineReader,
    tx: mpsc::UnboundedSender<String>,
    state: Arc<Mutex<State>>,
) {
    loop {
        let line = match reader.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        tracing::trace!(id, line, "emulator <");

        let (replies, delay) = answer(&state, &line);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        for reply in replies {
            if tx.send(reply).is_err() {
                return;
            }
        }
    }
    lock(&state).clients.remove(&id);
    tracing::debug!(id, "emulator client disconnected");
}

/// Works out the reply lines for one request, and how long to stall
/// before sending them.
fn answer(state: &Mutex<State>, line: &str) -> (Vec<String>, Option<Duration>) {
    let mut state = lock(state);
    let quirk = state.newline_quirk;

    let request = match decode_request(line) {
        Ok(request) => request,
        Err(e) => {
            let reply = error_reply(RoutingId::unknown(), 0, Sequence::Slot(0), e.code);
            return (vec![render(&reply, quirk)], None);
        }
    };

    state.received.push(ReceivedRequest {
        routing_id: request.routing_id.to_string(),
        zone: request.zone,
        sequence: request.sequence,
        name: request.name.clone(),
        fields: request.fields.clone(),
    });

    let replies = match state.commands.get(request.routing_id.as_str()) {
        None => Err(status::INVALID_DEVICE),
        Some(commands) => commands
            .get(&request.name)
            .cloned()
            .ok_or(status::INVALID_REQUEST),
    };
    let replies = match replies {
        Ok(replies) => replies,
        Err(code) => {
            let reply = error_reply(request.routing_id, request.zone, request.sequence, code);
            return (vec![render(&reply, quirk)], None);
        }
    };

    let delay = (request.name == "_SLEEP").then(|| {
        let secs = request.fields.first().and_then(|s| s.parse::<f64>().ok());
        Duration::from_secs_f64(secs.unwrap_or(0.0).max(0.0))
    });

    let lines = replies
        .into_iter()
        .map(|reply| {
            let message = Message {
                routing_id: request.routing_id.clone(),
                zone: request.zone,
                sequence: request.sequence,
                status: reply.status,
                name: reply.name,
                fields: reply.fields,
                checksum: 1,
                kind: MessageKind::Response,
            };
            render(&message, quirk)
        })
        .collect();
    (lines, delay)
}

fn error_reply(routing_id: RoutingId, zone: u8, sequence: Sequence, code: u16) -> Message {
    Message {
        routing_id,
        zone,
        sequence,
        status: code,
        name: status::describe(code).to_string(),
        fields: Vec::new(),
        checksum: 1,
        kind: MessageKind::Response,
    }
}

/// Encodes a frame, optionally reproducing the raw-newline firmware quirk.
fn render(message: &Message, newline_quirk: bool) -> String {
    if !newline_quirk {
        return encode_message(message);
    }
    let mut quirky = message.clone();
    let mut out = String::new();
    // Encode without fields, then splice in fields escaped the quirky way.
    quirky.fields.clear();
    let head = encode_message(&quirky);
    let (prefix, checksum) = head.rsplit_once('/').unwrap_or((head.as_str(), ""));
    out.push_str(prefix);
    for field in &message.fields {
        let pieces: Vec<String> = field
            .split_inclusive(['\r', '\n'])
            .map(|piece| match piece.char_indices().last() {
                Some((i, c @ ('\r' | '\n'))) => format!("{}\\{c}", escape_field(&piece[..i])),
                _ => escape_field(piece),
            })
            .collect();
        out.push_str(&pieces.concat());
        out.push(':');
    }
    out.push('/');
    out.push_str(checksum);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(fields: &[&str]) -> Message {
        Message {
            routing_id: RoutingId::local(),
            zone: 0,
            sequence: Sequence::Slot(1),
            status: 0,
            name: "TITLE_NAME".into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            checksum: 1,
            kind: MessageKind::Response,
        }
    }

    #[test]
    fn test_render_plain_matches_encoder() {
        let m = message(&["a\nb"]);
        assert_eq!(render(&m, false), "01/1/000:TITLE_NAME:a\\nb:/1");
    }

    #[test]
    fn test_render_quirk_writes_raw_newline() {
        let m = message(&["a\nb", "c:d"]);
        assert_eq!(render(&m, true), "01/1/000:TITLE_NAME:a\\\nb:c\\:d:/1");
    }

    #[test]
    fn test_answer_unknown_device_and_request() {
        let state = Mutex::new(State {
            commands: Fixture::SingleDevice.build(),
            ..State::default()
        });

        let (lines, _) = answer(&state, "#00000000123B/0/GET_DEVICE_INFO:");
        assert_eq!(lines, vec!["#00000000123B/0/011:Invalid device:/1"]);

        let (lines, _) = answer(&state, "01/2/NOT_A_COMMAND:");
        assert_eq!(lines, vec!["01/2/010:Invalid request:/1"]);

        assert_eq!(lock(&state).received.len(), 2);
    }

    #[test]
    fn test_answer_garbled_request_uses_unknown_id() {
        let state = Mutex::new(State::default());
        let (lines, _) = answer(&state, "garbage");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("??/0/011:"), "got {}", lines[0]);
    }

    #[test]
    fn test_answer_sleep_reports_delay() {
        let state = Mutex::new(State {
            commands: Fixture::SingleDevice.build(),
            ..State::default()
        });
        let (lines, delay) = answer(&state, "01/3/_SLEEP:0.25:");
        assert_eq!(lines, vec!["01/3/000:/1"]);
        assert_eq!(delay, Some(Duration::from_millis(250)));
    }
}
