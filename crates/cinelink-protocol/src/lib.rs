//! Wire protocol for cinelink.
//!
//! This crate defines the "language" spoken over the control connection:
//!
//! - **Types** ([`RoutingId`], [`Sequence`], [`Message`], [`Request`]):
//!   the structures a frame decodes into.
//! - **Codec** ([`decode`], [`encode`], ...): the line grammar, escaping
//!   included.
//! - **Commands** ([`Command`], [`ResponseKind`]): the closed set of
//!   requests and the name → kind registry for incoming frames.
//! - **Status** ([`status`]): the fixed table of status codes.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw lines) and session
//! (request correlation). It never touches a socket; it only turns lines
//! into messages and requests into lines.
//!
//! ```text
//! Transport (lines) → Protocol (Message) → Session (pending requests, events)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod command;
mod error;
pub mod status;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{decode, decode_request, encode, encode_message, escape_field};
pub use command::{Command, ResponseKind};
pub use error::ParseError;
pub use types::{
    MAX_SEQUENCE_SLOTS, Message, MessageKind, Request, RoutingId, SERIAL_NUMBER_LEN,
    Sequence, normalize_serial_number,
};
