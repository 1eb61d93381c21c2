//! Error types for the directory layer.

use cinelink_protocol::{RoutingId, status};
use cinelink_session::SessionError;

/// Errors that can occur during directory and device operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The request reached the session layer and failed there.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The device is disabled (removed from the system, or never enabled).
    /// No request was sent.
    #[error("device {0} is unavailable")]
    DeviceUnavailable(RoutingId),

    /// Reconciliation found a system that cannot exist (no devices at all,
    /// or no local device).
    #[error("directory is inconsistent: {0}")]
    Consistency(String),

    /// The device answered, but not with what the request asks for.
    #[error("unexpected response to '{request}': {reason}")]
    InvalidResponse { request: String, reason: String },
}

impl DirectoryError {
    /// Returns the protocol status code behind this error, if there is one.
    ///
    /// A disabled device reports "Device unavailable" (status 1), the same
    /// code the unit itself would use.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::DeviceUnavailable(_) => Some(status::DEVICE_UNAVAILABLE),
            Self::Session(SessionError::Command { status, .. }) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_unavailable_reports_status_one() {
        let err = DirectoryError::DeviceUnavailable(RoutingId::serial("123B"));
        assert_eq!(err.status(), Some(1));
        assert_eq!(err.to_string(), "device #00000000123B is unavailable");
    }

    #[test]
    fn test_session_command_error_keeps_status() {
        let err: DirectoryError = SessionError::Command {
            status: 11,
            message: "Invalid device",
            request: "03 GET_DEVICE_INFO".into(),
        }
        .into();
        assert_eq!(err.status(), Some(11));
        assert!(err.to_string().contains("Invalid device"));
    }
}
