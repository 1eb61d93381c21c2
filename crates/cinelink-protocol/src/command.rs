//! The closed command set and the response-kind registry.
//!
//! Outgoing commands are a fixed enum; there is no way to invent new ones
//! at runtime (use [`Request::named`](crate::Request::named) for firmware
//! commands outside this list). Incoming frames are classified by name
//! through a static lookup table built once on first use.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A request the client knows how to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    // -- Identity and system --
    GetDeviceInfo,
    GetSystemVersion,
    GetNumZones,
    GetZoneCapabilities,
    GetDeviceTypeName,
    GetFriendlyName,
    GetFriendlySystemName,
    GetSystemPairingInfo,
    GetAvailableDevices,
    GetAvailableDevicesBySerialNumber,

    // -- Live state --
    GetDevicePowerState,
    GetSystemReadinessState,
    GetPlayStatus,
    GetUiState,
    GetPlayingTitleName,
    GetHighlightedSelection,
    GetContentDetails,
    GetMovieLocation,
    GetMovieMediaType,
    GetVideoColor,
    GetVideoMode,
    GetScreenMask,
    GetScreenMask2,
    GetCinemascapeMode,
    GetCinemascapeMask,

    // -- Event relay --
    EnableEvents,

    // -- Transport and navigation --
    LeaveStandby,
    EnterStandby,
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    Replay,
    ScanForward,
    ScanReverse,
    Select,
    Up,
    Down,
    Left,
    Right,
    Cancel,
    GoMovieCovers,
    KaleidescapeMenuToggle,
}

impl Command {
    /// Returns the wire name of the command.
    pub fn name(self) -> &'static str {
        match self {
            Self::GetDeviceInfo => "GET_DEVICE_INFO",
            Self::GetSystemVersion => "GET_SYSTEM_VERSION",
            Self::GetNumZones => "GET_NUM_ZONES",
            Self::GetZoneCapabilities => "GET_ZONE_CAPABILITIES",
            Self::GetDeviceTypeName => "GET_DEVICE_TYPE_NAME",
            Self::GetFriendlyName => "GET_FRIENDLY_NAME",
            Self::GetFriendlySystemName => "GET_FRIENDLY_SYSTEM_NAME",
            Self::GetSystemPairingInfo => "GET_SYSTEM_PAIRING_INFO",
            Self::GetAvailableDevices => "GET_AVAILABLE_DEVICES",
            Self::GetAvailableDevicesBySerialNumber => {
                "GET_AVAILABLE_DEVICES_BY_SERIAL_NUMBER"
            }
            Self::GetDevicePowerState => "GET_DEVICE_POWER_STATE",
            Self::GetSystemReadinessState => "GET_SYSTEM_READINESS_STATE",
            Self::GetPlayStatus => "GET_PLAY_STATUS",
            Self::GetUiState => "GET_UI_STATE",
            Self::GetPlayingTitleName => "GET_PLAYING_TITLE_NAME",
            Self::GetHighlightedSelection => "GET_HIGHLIGHTED_SELECTION",
            Self::GetContentDetails => "GET_CONTENT_DETAILS",
            Self::GetMovieLocation => "GET_MOVIE_LOCATION",
            Self::GetMovieMediaType => "GET_MOVIE_MEDIA_TYPE",
            Self::GetVideoColor => "GET_VIDEO_COLOR",
            Self::GetVideoMode => "GET_VIDEO_MODE",
            Self::GetScreenMask => "GET_SCREEN_MASK",
            Self::GetScreenMask2 => "GET_SCREEN_MASK2",
            Self::GetCinemascapeMode => "GET_CINEMASCAPE_MODE",
            Self::GetCinemascapeMask => "GET_CINEMASCAPE_MASK",
            Self::EnableEvents => "ENABLE_EVENTS",
            Self::LeaveStandby => "LEAVE_STANDBY",
            Self::EnterStandby => "ENTER_STANDBY",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Stop => "STOP",
            Self::Next => "NEXT",
            Self::Previous => "PREVIOUS",
            Self::Replay => "REPLAY",
            Self::ScanForward => "SCAN_FORWARD",
            Self::ScanReverse => "SCAN_REVERSE",
            Self::Select => "SELECT",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Cancel => "CANCEL",
            Self::GoMovieCovers => "GO_MOVIE_COVERS",
            Self::KaleidescapeMenuToggle => "KALEIDESCAPE_MENU_TOGGLE",
        }
    }
}

// ---------------------------------------------------------------------------
// ResponseKind
// ---------------------------------------------------------------------------

/// Classification of an incoming frame by its name.
///
/// Names outside the table map to [`ResponseKind::Unregistered`]; callers
/// handle those generically using the raw fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Empty name: bare acknowledgement of a command.
    Ack,
    SystemPairingInfo,
    AvailableDevices,
    AvailableDevicesBySerialNumber,
    SystemVersion,
    DeviceInfo,
    ZoneCapabilities,
    NumZones,
    DeviceTypeName,
    DevicePowerState,
    SystemReadinessState,
    PlayStatus,
    FriendlySystemName,
    FriendlyName,
    UiState,
    TitleName,
    HighlightedSelection,
    /// Multiline header: first field is the number of
    /// [`ContentDetails`](ResponseKind::ContentDetails) rows that follow.
    ContentDetailsOverview,
    ContentDetails,
    MovieLocation,
    MovieMediaType,
    VideoColor,
    VideoMode,
    ScreenMask,
    ScreenMask2,
    CinemascapeMode,
    CinemascapeMask,
    /// Any name not in the table.
    Unregistered,
}

/// Name → kind table. Built on first lookup.
static REGISTRY: LazyLock<HashMap<&'static str, ResponseKind>> = LazyLock::new(|| {
    use ResponseKind::*;
    HashMap::from([
        ("", Ack),
        ("SYSTEM_PAIRING_INFO", SystemPairingInfo),
        ("AVAILABLE_DEVICES", AvailableDevices),
        ("AVAILABLE_DEVICES_BY_SERIAL_NUMBER", AvailableDevicesBySerialNumber),
        ("SYSTEM_VERSION", SystemVersion),
        ("DEVICE_INFO", DeviceInfo),
        ("ZONE_CAPABILITIES", ZoneCapabilities),
        ("NUM_ZONES", NumZones),
        ("DEVICE_TYPE_NAME", DeviceTypeName),
        ("DEVICE_POWER_STATE", DevicePowerState),
        ("SYSTEM_READINESS_STATE", SystemReadinessState),
        ("PLAY_STATUS", PlayStatus),
        ("FRIENDLY_SYSTEM_NAME", FriendlySystemName),
        ("FRIENDLY_NAME", FriendlyName),
        ("UI_STATE", UiState),
        ("TITLE_NAME", TitleName),
        ("HIGHLIGHTED_SELECTION", HighlightedSelection),
        ("CONTENT_DETAILS_OVERVIEW", ContentDetailsOverview),
        ("CONTENT_DETAILS", ContentDetails),
        ("MOVIE_LOCATION", MovieLocation),
        ("MOVIE_MEDIA_TYPE", MovieMediaType),
        ("VIDEO_COLOR", VideoColor),
        ("VIDEO_MODE", VideoMode),
        ("SCREEN_MASK", ScreenMask),
        ("SCREEN_MASK2", ScreenMask2),
        ("CINEMASCAPE_MODE", CinemascapeMode),
        ("CINEMASCAPE_MASK", CinemascapeMask),
    ])
});

impl ResponseKind {
    /// Looks up the kind for a wire name.
    pub fn from_name(name: &str) -> Self {
        REGISTRY.get(name).copied().unwrap_or(Self::Unregistered)
    }

    /// Returns `true` if a frame of this kind opens a multi-row response.
    pub fn is_multiline(self) -> bool {
        matches!(self, Self::ContentDetailsOverview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_matches_serde_name() {
        // The serde rename and the wire name agree for plain commands.
        let json = serde_json::to_string(&Command::EnableEvents).unwrap();
        assert_eq!(json, format!("\"{}\"", Command::EnableEvents.name()));
    }

    #[test]
    fn test_response_kind_from_name_known() {
        assert_eq!(ResponseKind::from_name(""), ResponseKind::Ack);
        assert_eq!(
            ResponseKind::from_name("AVAILABLE_DEVICES_BY_SERIAL_NUMBER"),
            ResponseKind::AvailableDevicesBySerialNumber
        );
        assert_eq!(ResponseKind::from_name("DEVICE_INFO"), ResponseKind::DeviceInfo);
    }

    #[test]
    fn test_response_kind_from_name_unknown_is_unregistered() {
        assert_eq!(ResponseKind::from_name("NOT_A_THING"), ResponseKind::Unregistered);
        assert_eq!(ResponseKind::from_name("device_info"), ResponseKind::Unregistered);
    }

    #[test]
    fn test_response_kind_only_overview_is_multiline() {
        assert!(ResponseKind::ContentDetailsOverview.is_multiline());
        assert!(!ResponseKind::ContentDetails.is_multiline());
        assert!(!ResponseKind::Ack.is_multiline());
    }
}
