use std::time::Duration;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host name could not be turned into an address.
    #[error("failed to resolve host {0}")]
    Resolve(String),

    /// Opening the TCP connection failed (refused, unreachable, ...).
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Opening the TCP connection did not finish in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// A frame exceeded the maximum line length without a separator.
    #[error("frame exceeds {0} bytes")]
    FrameTooLong(usize),
}
