//! Session layer for cinelink.
//!
//! This crate owns the live connection to the local unit:
//!
//! 1. **Session** ([`Session`]): connect, disconnect, auto-reconnect, and
//!    the background read loop.
//! 2. **Request correlation**: up to ten in-flight requests per routing
//!    id, matched to their responses by `(routing id, sequence)`.
//! 3. **Event bus** ([`EventBus`]): fan-out of lifecycle and device events
//!    to any number of subscribers without blocking the read loop.
//!
//! # How it fits in the stack
//!
//! ```text
//! Directory Layer (above)  ← issues requests, reconciles devices from events
//!     ↕
//! Session Layer (this crate)  ← owns the socket and the pending-request table
//!     ↕
//! Protocol / Transport (below)  ← frames, lines, bytes
//! ```

mod bus;
mod error;
mod pending;
mod session;

pub use bus::{EventBus, Subscription};
pub use error::SessionError;
pub use session::{
    ConnectionState, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_TIMEOUT_MS, Session, SessionConfig,
    SessionEvent,
};
