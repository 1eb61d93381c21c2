//! Transport layer for cinelink.
//!
//! The control protocol runs over a single plain TCP connection carrying
//! newline-terminated Latin-1 frames. This crate owns everything below the
//! frame level:
//!
//! - [`connect`]: open a connection with a timeout.
//! - [`LineConnection`] / [`LineReader`] / [`LineWriter`]: frame I/O on
//!   an open socket, split so reading and writing can live in different
//!   tasks.
//! - [`resolve_host`]: host name → address.
//!
//! It knows nothing about the frame grammar; that lives in
//! `cinelink-protocol`.

mod error;
mod line;
mod resolve;

pub use error::TransportError;
pub use line::{LineConnection, LineReader, LineWriter, MAX_FRAME_LEN, connect};
pub use resolve::resolve_host;

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }
}
