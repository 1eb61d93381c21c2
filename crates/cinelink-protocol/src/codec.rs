//! Frame decoding and encoding.
//!
//! The grammar is applied strictly left to right, one segment at a time:
//!
//! ```text
//! ROUTING_ID[.ZONE] / SEQ / [STATUS:] NAME : FIELD : FIELD : ... / [CHECKSUM]
//! ```
//!
//! Status and checksum appear only on responses and events, so there are
//! two entry points: [`decode`] for incoming traffic and [`decode_request`]
//! for the serving side (the emulator, or anything that listens like a
//! unit). Each failed segment maps to its own status code so a rejected
//! frame says *where* it went wrong.
//!
//! # Escaping
//!
//! | wire      | value                          |
//! |-----------|--------------------------------|
//! | `\dNNN`   | character with decimal code NNN |
//! | `\r` `\n` `\t` | CR, LF, TAB               |
//! | `\/` `\\` `\:` | `/`, `\`, `:`             |
//! | `\` + raw CR/LF | that CR/LF (firmware quirk) |
//!
//! Encoding applies the inverse table and additionally writes characters
//! 192..=254 as `\dNNN`.

use crate::types::scan_routing_id;
use crate::{Message, MessageKind, ParseError, Request, RoutingId, Sequence, status};

/// Decodes an incoming response or event frame.
///
/// The record separator must already be stripped; a trailing CR/LF is
/// tolerated.
///
/// # Errors
/// Returns a [`ParseError`] whose code names the first segment that did
/// not match the grammar.
pub fn decode(line: &str) -> Result<Message, ParseError> {
    Decoder::new(line).run(false)
}

/// Decodes a request frame (no status segment, no checksum).
///
/// # Errors
/// Same as [`decode`].
pub fn decode_request(line: &str) -> Result<Message, ParseError> {
    Decoder::new(line).run(true)
}

/// Serializes a request using the given sequence slot.
///
/// Every field, including the last, is colon-terminated. Requests carry
/// no status and no checksum.
///
/// ```rust
/// use cinelink_protocol::{encode, Command, Request, RoutingId, Sequence};
///
/// let req = Request::new(RoutingId::local(), Command::EnableEvents).with_field("#00000000123B");
/// assert_eq!(encode(&req, Sequence::Slot(2)), "01/2/ENABLE_EVENTS:#00000000123B:");
/// ```
pub fn encode(request: &Request, sequence: Sequence) -> String {
    let mut out = address(&request.routing_id, request.zone);
    out.push('/');
    out.push_str(&sequence.to_string());
    out.push('/');
    out.push_str(&request.name);
    out.push(':');
    push_fields(&mut out, &request.fields);
    out
}

/// Serializes a response or event frame.
///
/// This is the unit's side of the conversation; the client never sends
/// these. An empty name with no fields produces a bare acknowledgement
/// (`01/0/000:/1`).
pub fn encode_message(message: &Message) -> String {
    let mut out = address(&message.routing_id, message.zone);
    out.push('/');
    out.push_str(&message.sequence.to_string());
    out.push('/');
    out.push_str(&format!("{:03}:", message.status));
    if !message.name.is_empty() {
        out.push_str(&message.name);
        out.push(':');
    }
    push_fields(&mut out, &message.fields);
    out.push('/');
    out.push_str(&message.checksum.to_string());
    out
}

/// Escapes one field value for the wire.
pub fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            ':' => out.push_str("\\:"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\u{c0}'..='\u{fe}' => out.push_str(&format!("\\d{:03}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

fn address(routing_id: &RoutingId, zone: u8) -> String {
    if zone == 0 {
        routing_id.to_string()
    } else {
        format!("{routing_id}.{zone:02}")
    }
}

fn push_fields(out: &mut String, fields: &[String]) {
    for field in fields {
        out.push_str(&escape_field(field));
        out.push(':');
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Cursor over one frame. `pos` is a byte offset into `line`.
struct Decoder<'a> {
    line: &'a str,
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            line: line.trim_end_matches(['\r', '\n']),
            pos: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    fn fail(&self, code: u16) -> ParseError {
        ParseError::new(code, self.line)
    }

    fn run(mut self, is_request: bool) -> Result<Message, ParseError> {
        let (routing_id, zone) = self.routing_id()?;
        let sequence = self.sequence()?;
        let status = if is_request { status::SUCCESS } else { self.status()? };
        let name = self.name()?;
        let fields = self.fields()?;
        let checksum = if is_request { 0 } else { self.checksum()? };

        let kind = match (is_request, sequence) {
            (true, _) => MessageKind::Request,
            (false, Sequence::Event) => MessageKind::Event,
            (false, Sequence::Slot(_)) => MessageKind::Response,
        };

        Ok(Message {
            routing_id,
            zone,
            sequence,
            status,
            name,
            fields,
            checksum,
            kind,
        })
    }

    fn routing_id(&mut self) -> Result<(RoutingId, u8), ParseError> {
        let rest = self.rest();
        let len = scan_routing_id(rest).ok_or_else(|| self.fail(status::INVALID_DEVICE))?;
        let id = &rest[..len];
        let mut after = &rest[len..];

        let mut zone = 0;
        if let Some(tail) = after.strip_prefix('.') {
            let digits = tail.get(..2).filter(|d| d.bytes().all(|b| b.is_ascii_digit()));
            let digits = digits.ok_or_else(|| self.fail(status::INVALID_DEVICE))?;
            zone = digits
                .parse()
                .map_err(|_| self.fail(status::INVALID_DEVICE))?;
            after = &tail[2..];
        }

        if !after.starts_with('/') {
            return Err(self.fail(status::INVALID_DEVICE));
        }

        let routing_id = id.parse()?;
        self.pos = self.line.len() - after.len() + 1;
        Ok((routing_id, zone))
    }

    fn sequence(&mut self) -> Result<Sequence, ParseError> {
        let sequence = match self.rest().as_bytes() {
            [b'!', b'/', ..] => Sequence::Event,
            [d, b'/', ..] if d.is_ascii_digit() => Sequence::Slot(d - b'0'),
            _ => return Err(self.fail(status::INVALID_SEQUENCE_NUMBER)),
        };
        self.pos += 2;
        Ok(sequence)
    }

    fn status(&mut self) -> Result<u16, ParseError> {
        let code = match self.rest().as_bytes() {
            [a, b, c, b':', ..]
                if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() =>
            {
                u16::from(a - b'0') * 100 + u16::from(b - b'0') * 10 + u16::from(c - b'0')
            }
            _ => return Err(self.fail(status::UNDETERMINED_ERROR)),
        };
        self.pos += 4;
        Ok(code)
    }

    /// A bare `/` means an empty name (the fields loop then sees the `/`
    /// and ends immediately). Otherwise the name runs up to the first `:`.
    fn name(&mut self) -> Result<String, ParseError> {
        let rest = self.rest();
        if rest.starts_with('/') {
            return Ok(String::new());
        }
        match rest.find(':') {
            Some(end) if end > 0 => {
                self.pos += end + 1;
                Ok(rest[..end].to_string())
            }
            _ => Err(self.fail(status::INVALID_REQUEST)),
        }
    }

    /// Reads colon-terminated fields up to the closing `/`, leaving `pos`
    /// just past it (or at the end of the line if it is missing).
    fn fields(&mut self) -> Result<Vec<String>, ParseError> {
        let rest = self.rest();
        let mut fields = Vec::new();
        let mut field = String::new();
        let mut chars = rest.char_indices();
        let mut consumed = rest.len();

        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    match escaped {
                        'd' => {
                            let code: String = chars.by_ref().take(3).map(|(_, d)| d).collect();
                            let value = (code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()))
                                .then(|| code.parse::<u32>().ok())
                                .flatten()
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.fail(status::INVALID_PARAMETER))?;
                            field.push(value);
                        }
                        'r' | '\r' => field.push('\r'),
                        'n' | '\n' => field.push('\n'),
                        't' => field.push('\t'),
                        '/' | '\\' | ':' => field.push(escaped),
                        // Unknown escapes are dropped, as the unit does.
                        _ => {}
                    }
                }
                '/' => {
                    consumed = i + 1;
                    break;
                }
                ':' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }

        if !field.is_empty() {
            return Err(self.fail(status::INVALID_PARAMETER));
        }

        self.pos += consumed;
        Ok(fields)
    }

    fn checksum(&mut self) -> Result<u64, ParseError> {
        let rest = self.rest();
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return Err(self.fail(status::CHECKSUM_ERROR));
        }
        rest.parse().map_err(|_| self.fail(status::CHECKSUM_ERROR))
    }
}
