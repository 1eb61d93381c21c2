//! Error types for the session layer.

use cinelink_transport::TransportError;

/// Errors surfaced by [`Session`](crate::Session) operations.
///
/// Low-level socket failures of every flavour (refused, reset, timed out,
/// unresolvable) are folded into [`Connection`](SessionError::Connection)
/// so callers see one consistent error regardless of the OS error behind it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The connection could not be opened, was lost, or no sequence slot
    /// freed up in time.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request was issued in the wrong state (not connected), or the
    /// device broke multiline framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device answered with a non-zero status.
    #[error("request '{request}' failed: {message} (status {status})")]
    Command {
        /// Status code from the response.
        status: u16,
        /// Message from the fixed status table.
        message: &'static str,
        /// The request, for context.
        request: String,
    },

    /// No (complete) response arrived within the timeout.
    #[error("request '{request}' timed out")]
    Timeout {
        /// The request, for context.
        request: String,
    },
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        Self::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_generalizes_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: SessionError = TransportError::ConnectFailed(io).into();
        assert!(matches!(err, SessionError::Connection(ref m) if m.contains("refused")));
    }

    #[test]
    fn test_command_error_display() {
        let err = SessionError::Command {
            status: 1,
            message: "Device unavailable",
            request: "#00000000123B GET_DEVICE_INFO".into(),
        };
        assert_eq!(
            err.to_string(),
            "request '#00000000123B GET_DEVICE_INFO' failed: Device unavailable (status 1)"
        );
    }
}
