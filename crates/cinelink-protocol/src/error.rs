//! Error types for the protocol layer.
//!
//! Decoding a frame is the only fallible operation in this crate, so there
//! is a single error type. It carries the offending line verbatim: when a
//! frame is rejected, the raw text is what you want to see in the logs.

use crate::status;

/// A wire frame that does not follow the grammar.
///
/// `code` is one of the constants in [`status`](crate::status) and names
/// the grammar rule that failed (bad routing id, bad sequence, unterminated
/// field, ...). The read loop logs these and keeps going; one bad frame
/// never tears down the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} for message '{line}'", reason_of(.code))]
pub struct ParseError {
    /// Status code identifying the failed rule.
    pub code: u16,

    /// The frame as received (record separator already stripped).
    pub line: String,
}

impl ParseError {
    /// Creates a parse error for `line` with the given status code.
    pub fn new(code: u16, line: impl Into<String>) -> Self {
        Self {
            code,
            line: line.into(),
        }
    }

    /// Returns the human-readable reason from the status table.
    pub fn reason(&self) -> &'static str {
        status::describe(self.code)
    }
}

fn reason_of(code: &u16) -> &'static str {
    status::describe(*code)
}
