//! Core protocol types: routing ids, sequence numbers, and messages.
//!
//! Every frame on the wire starts with the same two segments: *who* the
//! frame is about (the routing id) and *which* outstanding request it
//! belongs to (the sequence). Responses and events then carry a status,
//! a name, a list of fields, and a trailing checksum.
//!
//! ```text
//! 01.02/3/000:DEVICE_POWER_STATE:1:1:/89
//! ^^ ^^ ^ ^^^ ^^^^^^^^^^^^^^^^^^ ^^^  ^^
//! id zone  status     name     fields checksum
//!       seq
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::command::{Command, ResponseKind};
use crate::{ParseError, status};

// ---------------------------------------------------------------------------
// Serial numbers
// ---------------------------------------------------------------------------

/// Number of hex digits in a normalized serial number.
pub const SERIAL_NUMBER_LEN: usize = 12;

/// Normalizes a serial number to its canonical 12-digit uppercase form.
///
/// The unit reports serial numbers inconsistently: sometimes with a
/// leading `#`, sometimes longer than 12 digits, sometimes with fewer
/// leading zeros. All of these collapse to the same key.
///
/// ```rust
/// use cinelink_protocol::normalize_serial_number;
///
/// assert_eq!(normalize_serial_number("#123a"), "00000000123A");
/// assert_eq!(normalize_serial_number("0000000000000123A"), "00000000123A");
/// ```
pub fn normalize_serial_number(raw: &str) -> String {
    let trimmed = raw.trim_matches('#');
    let skip = trimmed.chars().count().saturating_sub(SERIAL_NUMBER_LEN);
    let tail: String = trimmed.chars().skip(skip).collect();
    format!("{:0>width$}", tail.to_uppercase(), width = SERIAL_NUMBER_LEN)
}

// ---------------------------------------------------------------------------
// RoutingId
// ---------------------------------------------------------------------------

/// The wire-level address of a logical device.
///
/// Three shapes exist:
///
/// - `"01"`: the directly-connected (local) unit.
/// - `"02"`..`"09"`: an operator-assigned slot number ("cpdid").
/// - `"#00000000123A"`: a serial-number address, valid for any unit.
///
/// Incoming frames may also carry `"??"`, which the unit uses when it
/// answers a request whose own routing id it could not parse.
///
/// Stored as the exact wire text, so the newtype is cheap to compare and
/// hash (it keys the pending-request table).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingId(String);

impl RoutingId {
    /// Wire marker addressing the directly-connected unit.
    pub const LOCAL: &'static str = "01";

    /// Wire marker for an unparseable routing id.
    pub const UNKNOWN: &'static str = "??";

    /// The routing id of the directly-connected unit.
    pub fn local() -> Self {
        Self(Self::LOCAL.to_string())
    }

    /// The routing id the unit uses in replies to garbled requests.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    /// Builds a serial-number routing id (`#` + 12 uppercase hex digits).
    pub fn serial(serial_number: &str) -> Self {
        Self(format!("#{}", normalize_serial_number(serial_number)))
    }

    /// Builds a cpdid routing id.
    ///
    /// Returns `None` for anything that is not two digits, and for `"00"`,
    /// which the unit reports when no slot is assigned.
    pub fn cpdid(cpdid: &str) -> Option<Self> {
        let bytes = cpdid.as_bytes();
        if bytes.len() == 2 && bytes.iter().all(u8::is_ascii_digit) && cpdid != "00" {
            Some(Self(cpdid.to_string()))
        } else {
            None
        }
    }

    /// Returns the wire text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the local marker `"01"`.
    pub fn is_local(&self) -> bool {
        self.0 == Self::LOCAL
    }

    /// Returns `true` for a two-digit slot id (including `"01"`).
    pub fn is_cpdid(&self) -> bool {
        self.0.len() == 2 && self.0.bytes().all(|b| b.is_ascii_digit())
    }

    /// Returns `true` for a `#`-prefixed serial-number id.
    pub fn is_serial(&self) -> bool {
        self.0.starts_with('#')
    }

    /// Returns `true` for the `"??"` marker.
    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses a bare routing id (no zone, no trailing `/`).
impl FromStr for RoutingId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match scan_routing_id(s) {
            Some(len) if len == s.len() => Ok(Self(s.to_string())),
            _ => Err(ParseError::new(status::INVALID_DEVICE, s)),
        }
    }
}

/// Returns the byte length of the routing id at the start of `s`, if any.
///
/// Accepts two digits, `??`, or `#` followed by one or more ASCII
/// alphanumerics. Used by both [`RoutingId::from_str`] and the frame
/// decoder.
pub(crate) fn scan_routing_id(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    match bytes {
        [a, b, ..] if a.is_ascii_digit() && b.is_ascii_digit() => Some(2),
        [b'?', b'?', ..] => Some(2),
        [b'#', rest @ ..] => {
            let len = rest.iter().take_while(|b| b.is_ascii_alphanumeric()).count();
            (len > 0).then_some(len + 1)
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

/// Number of request slots per routing id. Sequence digits run `0..=9`.
pub const MAX_SEQUENCE_SLOTS: u8 = 10;

/// The sequence segment of a frame.
///
/// Requests and their responses share a slot number `0..=9`; unsolicited
/// events carry `!` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sequence {
    /// `!`: an unsolicited event.
    Event,
    /// A request slot, `0..=9`.
    Slot(u8),
}

impl Sequence {
    /// Returns the slot number, or `-1` for events.
    pub fn value(self) -> i8 {
        match self {
            Self::Event => -1,
            Self::Slot(n) => n as i8,
        }
    }

    /// Returns the slot number if this is not an event.
    pub fn slot(self) -> Option<u8> {
        match self {
            Self::Event => None,
            Self::Slot(n) => Some(n),
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => f.write_str("!"),
            Self::Slot(n) => write!(f, "{n}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Whether a decoded frame is a request, a correlated response, or an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Outgoing command (no status, no checksum).
    Request,
    /// Reply correlated to a pending request by `(routing_id, sequence)`.
    Response,
    /// Unsolicited notification (`!` sequence).
    Event,
}

/// A decoded wire frame.
///
/// Produced by [`decode`](crate::decode) for incoming responses and events,
/// and by [`decode_request`](crate::decode_request) on the serving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Device the frame is about.
    pub routing_id: RoutingId,

    /// Zone from the optional `.NN` suffix; `0` when absent.
    pub zone: u8,

    /// Request slot, or `Event` for unsolicited frames.
    pub sequence: Sequence,

    /// Three-digit status; `0` is success. Always `0` for requests.
    pub status: u16,

    /// Command or response name; may be empty (bare acknowledgement).
    pub name: String,

    /// Unescaped fields, in wire order.
    pub fields: Vec<String>,

    /// Trailing checksum. Parsed but never verified against the content.
    pub checksum: u64,

    /// Request, response, or event.
    pub kind: MessageKind,
}

impl Message {
    /// Returns `true` for unsolicited events.
    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }

    /// Returns `true` when the status is non-zero.
    pub fn is_error(&self) -> bool {
        self.status != status::SUCCESS
    }

    /// Returns the status-table message for this frame's status.
    pub fn error_message(&self) -> &'static str {
        status::describe(self.status)
    }

    /// Looks up the response kind registered for this frame's name.
    pub fn response_kind(&self) -> ResponseKind {
        ResponseKind::from_name(&self.name)
    }

    /// Number of detail rows that follow a multiline header.
    ///
    /// Returns `None` when this frame is not a multiline header, or when
    /// the header's first field is not a number.
    pub fn row_count(&self) -> Option<usize> {
        if !self.response_kind().is_multiline() {
            return None;
        }
        self.fields.first()?.trim().parse().ok()
    }

    /// Returns field `index`, or an empty string when it is absent.
    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An outgoing command, before a sequence slot has been assigned.
///
/// The session picks the slot at send time, so a `Request` carries
/// everything except the sequence. Serialize with
/// [`encode`](crate::encode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Device to address.
    pub routing_id: RoutingId,

    /// Zone suffix; `0` omits it.
    pub zone: u8,

    /// Command name.
    pub name: String,

    /// Raw (unescaped) field values.
    pub fields: Vec<String>,
}

impl Request {
    /// Creates a request for one of the known commands.
    pub fn new(routing_id: RoutingId, command: Command) -> Self {
        Self::named(routing_id, command.name())
    }

    /// Creates a request with an arbitrary command name.
    ///
    /// Useful for firmware commands not covered by [`Command`].
    pub fn named(routing_id: RoutingId, name: impl Into<String>) -> Self {
        Self {
            routing_id,
            zone: 0,
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Sets the zone suffix.
    pub fn with_zone(mut self, zone: u8) -> Self {
        self.zone = zone;
        self
    }

    /// Appends one field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Replaces all fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.routing_id)?;
        if self.zone != 0 {
            write!(f, ".{:02}", self.zone)?;
        }
        write!(f, " {}", self.name)?;
        if !self.fields.is_empty() {
            write!(f, " {:?}", self.fields)?;
        }
        Ok(())
    }
}
