//! Status codes carried in the three-digit status segment of a response.
//!
//! A response whose status is non-zero is a protocol-level error. The same
//! codes double as parse-failure reasons: when a frame cannot be decoded,
//! the [`ParseError`](crate::ParseError) records which grammar rule failed
//! using the code the unit itself would have answered with.

/// The request completed.
pub const SUCCESS: u16 = 0;
/// The addressed device is not reachable through the local unit.
pub const DEVICE_UNAVAILABLE: u16 = 1;
/// The addressed device is busy with another request.
pub const DEVICE_BUSY: u16 = 2;
/// The addressed device is in standby and cannot serve the request.
pub const DEVICE_IN_STANDBY: u16 = 3;
/// Unknown command name, or a malformed name segment.
pub const INVALID_REQUEST: u16 = 10;
/// Malformed or unknown routing id.
pub const INVALID_DEVICE: u16 = 11;
/// Sequence segment is not a digit or `!`.
pub const INVALID_SEQUENCE_NUMBER: u16 = 12;
/// Unterminated or badly escaped field.
pub const INVALID_PARAMETER: u16 = 13;
/// Trailing checksum is missing or non-numeric.
pub const CHECKSUM_ERROR: u16 = 14;
/// The request is not permitted on this connection.
pub const RESTRICTED_ACCESS: u16 = 15;
/// Catch-all, also used for a malformed status segment.
pub const UNDETERMINED_ERROR: u16 = 17;

/// Returns the human-readable message for a status code.
///
/// Codes outside the fixed table map to `"Unknown error"`.
pub fn describe(code: u16) -> &'static str {
    match code {
        SUCCESS => "Success",
        DEVICE_UNAVAILABLE => "Device unavailable",
        DEVICE_BUSY => "Device busy",
        DEVICE_IN_STANDBY => "Device in standby",
        INVALID_REQUEST => "Invalid request",
        INVALID_DEVICE => "Invalid device",
        INVALID_SEQUENCE_NUMBER => "Invalid sequence number",
        INVALID_PARAMETER => "Invalid parameter",
        CHECKSUM_ERROR => "Checksum error",
        RESTRICTED_ACCESS => "Restricted access",
        UNDETERMINED_ERROR => "Undetermined error",
        _ => "Unknown error",
    }
}
