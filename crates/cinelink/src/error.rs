//! Unified error type for cinelink.

use cinelink_directory::DirectoryError;
use cinelink_session::SessionError;

/// Top-level error returned by the `cinelink` facade.
///
/// Transport and parse failures never reach the facade on their own: the
/// session folds them into [`SessionError`], so the facade only carries the
/// layers it talks to directly.
#[derive(Debug, thiserror::Error)]
pub enum CinelinkError {
    /// A session-level error (connection, protocol, command, timeout).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A directory-level error (device unavailable, inconsistent system).
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The controller configuration cannot be used as given.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CinelinkError {
    /// Returns the protocol status code behind this error, if there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Session(SessionError::Command { status, .. }) => Some(*status),
            Self::Directory(e) => e.status(),
            _ => None,
        }
    }
}
