//! Line-delimited TCP framing.
//!
//! Frames are newline-terminated Latin-1 text. Each byte maps to one
//! character (U+0000..=U+00FF), so decoding never fails; on the way out,
//! characters above U+00FF have no byte and are sent as `?`.
//!
//! One firmware quirk leaks into framing: the unit sometimes writes a
//! backslash followed by a raw LF inside a field. That LF is part of the
//! field, not a separator, so a line ending in an odd number of
//! backslashes is joined with the next one.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::{ConnectionId, TransportError};

/// Longest frame accepted before the reader gives up on the connection.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Resolves `host` and opens a TCP connection to it, failing after
/// `timeout`.
///
/// # Errors
/// [`TransportError::Resolve`] if the name does not resolve,
/// [`TransportError::Timeout`] if the handshake does not complete in
/// time, [`TransportError::ConnectFailed`] for any socket-level failure.
pub async fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<LineConnection, TransportError> {
    let address = crate::resolve_host(host, timeout).await?;
    let stream = tokio::time::timeout(timeout, TcpStream::connect((address.as_str(), port)))
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
        .map_err(TransportError::ConnectFailed)?;

    let conn = LineConnection::from_stream(stream)?;
    tracing::debug!(id = %conn.id, peer = %conn.peer, "connected");
    Ok(conn)
}

/// An open connection, not yet split into its reading and writing halves.
#[derive(Debug)]
pub struct LineConnection {
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
}

impl LineConnection {
    /// Wraps an already-connected stream (client or accepted socket).
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        let peer = stream.peer_addr().map_err(TransportError::ConnectFailed)?;
        // Frames are tiny and latency-sensitive.
        stream.set_nodelay(true).map_err(TransportError::ConnectFailed)?;
        Ok(Self {
            id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            peer,
            stream,
        })
    }

    /// Returns the connection's identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Splits into independently owned halves, so one task can read while
    /// others write.
    pub fn split(self) -> (LineReader, LineWriter) {
        let (read, write) = self.stream.into_split();
        (
            LineReader {
                id: self.id,
                inner: BufReader::new(read),
                buf: Vec::new(),
            },
            LineWriter {
                id: self.id,
                inner: write,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// LineReader
// ---------------------------------------------------------------------------

/// Reading half: yields one frame at a time.
#[derive(Debug)]
pub struct LineReader {
    id: ConnectionId,
    inner: BufReader<OwnedReadHalf>,
    buf: Vec<u8>,
}

impl LineReader {
    /// Returns the connection's identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Reads the next non-empty frame, separator stripped.
    ///
    /// Returns `Ok(None)` when the peer closes the connection. A partial
    /// frame at EOF is discarded.
    ///
    /// # Errors
    /// [`TransportError::ReceiveFailed`] on socket errors,
    /// [`TransportError::FrameTooLong`] when a frame exceeds
    /// [`MAX_FRAME_LEN`].
    pub async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            self.buf.clear();
            loop {
                // Never buffer more than one byte past the limit.
                let remaining = (MAX_FRAME_LEN + 1).saturating_sub(self.buf.len()) as u64;
                let n = (&mut self.inner)
                    .take(remaining)
                    .read_until(b'\n', &mut self.buf)
                    .await
                    .map_err(TransportError::ReceiveFailed)?;
                if n == 0 {
                    if !self.buf.is_empty() {
                        tracing::debug!(id = %self.id, len = self.buf.len(), "discarding partial frame at EOF");
                    }
                    return Ok(None);
                }
                if self.buf.len() > MAX_FRAME_LEN {
                    return Err(TransportError::FrameTooLong(MAX_FRAME_LEN));
                }
                if !ends_with_escaped_newline(&self.buf) {
                    break;
                }
            }

            let frame = strip_separator(&self.buf);
            if frame.is_empty() {
                continue;
            }
            return Ok(Some(decode_latin1(frame)));
        }
    }
}

// ---------------------------------------------------------------------------
// LineWriter
// ---------------------------------------------------------------------------

/// Writing half: sends one frame at a time.
#[derive(Debug)]
pub struct LineWriter {
    id: ConnectionId,
    inner: OwnedWriteHalf,
}

impl LineWriter {
    /// Returns the connection's identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Writes `line` followed by the record separator.
    ///
    /// # Errors
    /// [`TransportError::SendFailed`] if the socket rejects the write.
    pub async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut bytes = encode_latin1(line);
        bytes.push(b'\n');
        self.inner
            .write_all(&bytes)
            .await
            .map_err(TransportError::SendFailed)?;
        self.inner.flush().await.map_err(TransportError::SendFailed)
    }

    /// Shuts down the write direction. Errors are ignored; the socket is
    /// going away either way.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::trace!(id = %self.id, error = %e, "shutdown failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// True when `buf` ends in `\n` preceded by an odd run of backslashes.
fn ends_with_escaped_newline(buf: &[u8]) -> bool {
    match buf.split_last() {
        Some((b'\n', body)) => body.iter().rev().take_while(|&&b| b == b'\\').count() % 2 == 1,
        _ => false,
    }
}

fn strip_separator(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ends_with_escaped_newline() {
        assert!(ends_with_escaped_newline(b"abc\\\n"));
        assert!(!ends_with_escaped_newline(b"abc\\\\\n"));
        assert!(ends_with_escaped_newline(b"abc\\\\\\\n"));
        assert!(!ends_with_escaped_newline(b"abc\n"));
        assert!(!ends_with_escaped_newline(b"abc\\"));
    }

    #[test]
    fn test_strip_separator_handles_crlf() {
        assert_eq!(strip_separator(b"01/1/000:/1\r\n"), b"01/1/000:/1");
        assert_eq!(strip_separator(b"01/1/000:/1\n"), b"01/1/000:/1");
        assert_eq!(strip_separator(b"\n"), b"");
    }

    #[test]
    fn test_latin1_decode_maps_bytes_to_chars() {
        assert_eq!(decode_latin1(&[b'a', 0xe9, 0xff]), "a\u{e9}\u{ff}");
    }

    #[test]
    fn test_latin1_encode_replaces_wide_chars() {
        assert_eq!(encode_latin1("a\u{e9}\u{263a}"), vec![b'a', 0xe9, b'?']);
    }
}
