//! Device state projections and the device lifecycle.
//!
//! Only the fields the directory itself needs are projected here: who a
//! device is ([`Identity`]) and whether it is awake ([`Power`]). Everything
//! else stays in raw [`DeviceEvent`](crate::DeviceEvent)s for consumers.

use std::collections::BTreeMap;

use cinelink_protocol::normalize_serial_number;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Where a device sits in the directory.
///
/// ```text
/// Active ──(serial number disappears)──→ Deleted
///   ↑                                      │
///   └──────(serial number reappears)───────┘
/// ```
///
/// A deleted device is kept, not dropped, so subscriptions made on its
/// handle survive a round trip through `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted,
}

impl Lifecycle {
    /// Returns `true` if moving to `target` is a valid transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        self != target
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Power
// ---------------------------------------------------------------------------

/// `DEVICE_POWER_STATE` field 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    #[default]
    Standby,
    On,
}

impl PowerState {
    /// Maps the wire value (`0` standby, `1` on). Anything else is `None`.
    pub fn from_field(field: &str) -> Option<Self> {
        match field.trim().parse::<u8>().ok()? {
            0 => Some(Self::Standby),
            1 => Some(Self::On),
            _ => None,
        }
    }
}

/// `SYSTEM_READINESS_STATE` field 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    Ready,
    BecomingReady,
    #[default]
    Idle,
}

impl ReadinessState {
    /// Maps the wire value (`0` ready, `1` becoming ready, `2` idle).
    pub fn from_field(field: &str) -> Option<Self> {
        match field.trim().parse::<u8>().ok()? {
            0 => Some(Self::Ready),
            1 => Some(Self::BecomingReady),
            2 => Some(Self::Idle),
            _ => None,
        }
    }
}

/// Power and readiness of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Power {
    pub state: PowerState,
    pub readiness: ReadinessState,
}

impl Power {
    /// What a disabled device reports: standby and idle.
    pub fn quiescent() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Who a device is, as reported by `DEVICE_INFO` and friends.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    /// Normalized 12-digit serial number; empty until first refreshed.
    pub serial_number: String,
    /// Two-digit slot number, when one is assigned.
    pub cpdid: Option<String>,
    pub ip_address: String,
    /// Control protocol version the unit speaks.
    pub protocol: u32,
    pub software_version: String,
    pub type_name: String,
    pub friendly_name: String,
    pub movie_zones: u8,
    pub music_zones: u8,
}

/// Parses the cpdid field of `DEVICE_INFO`; `"00"` and blanks mean none.
pub(crate) fn parse_cpdid(field: &str) -> Option<String> {
    let field = field.trim();
    match field {
        "" | "00" => None,
        _ => Some(field.to_string()),
    }
}

/// Lenient numeric field: `"01"` → 1, garbage → 0.
pub(crate) fn parse_count(field: &str) -> u8 {
    field.trim().parse().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// Answer to `GET_SYSTEM_PAIRING_INFO`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemPairing {
    pub paired: bool,
    /// Lower-cased system id of the paired system.
    pub system_id: String,
    pub friendly_name: String,
    /// `(encore, premier)` serial-number pairs, normalized.
    pub peers: Vec<(String, String)>,
}

impl SystemPairing {
    pub(crate) fn from_fields(fields: &[String]) -> Self {
        let field = |i: usize| fields.get(i).map(String::as_str).unwrap_or("");
        let paired = !field(0).is_empty();
        if !paired {
            return Self::default();
        }
        let peers = fields
            .get(3..)
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|pair| {
                (
                    normalize_serial_number(&pair[0]),
                    normalize_serial_number(&pair[1]),
                )
            })
            .collect();
        Self {
            paired,
            system_id: field(1).to_lowercase(),
            friendly_name: field(2).to_string(),
            peers,
        }
    }
}

/// Answer to `GET_CONTENT_DETAILS`: the overview row plus every detail
/// row, keyed by detail name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentDetails {
    pub handle: String,
    pub table: String,
    pub details: BTreeMap<String, String>,
}

impl ContentDetails {
    /// Shorthand for the `Title` detail.
    pub fn title(&self) -> &str {
        self.details.get("Title").map(String::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_from_field() {
        assert_eq!(PowerState::from_field("0"), Some(PowerState::Standby));
        assert_eq!(PowerState::from_field("1"), Some(PowerState::On));
        assert_eq!(PowerState::from_field("7"), None);
        assert_eq!(PowerState::from_field("x"), None);
    }

    #[test]
    fn test_readiness_state_from_field() {
        assert_eq!(ReadinessState::from_field("0"), Some(ReadinessState::Ready));
        assert_eq!(ReadinessState::from_field("1"), Some(ReadinessState::BecomingReady));
        assert_eq!(ReadinessState::from_field("2"), Some(ReadinessState::Idle));
    }

    #[test]
    fn test_power_quiescent_is_standby_idle() {
        let power = Power::quiescent();
        assert_eq!(power.state, PowerState::Standby);
        assert_eq!(power.readiness, ReadinessState::Idle);
    }

    #[test]
    fn test_parse_cpdid_unassigned() {
        assert_eq!(parse_cpdid("00"), None);
        assert_eq!(parse_cpdid(""), None);
        assert_eq!(parse_cpdid("03"), Some("03".to_string()));
    }

    #[test]
    fn test_system_pairing_from_fields() {
        let fields: Vec<String> = ["1", "ABC", "Den", "#123a", "123b"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pairing = SystemPairing::from_fields(&fields);
        assert!(pairing.paired);
        assert_eq!(pairing.system_id, "abc");
        assert_eq!(pairing.peers, vec![("00000000123A".into(), "00000000123B".into())]);
    }

    #[test]
    fn test_system_pairing_unpaired() {
        let pairing = SystemPairing::from_fields(&["".to_string()]);
        assert_eq!(pairing, SystemPairing::default());
    }

    #[test]
    fn test_power_serializes_snake_case() {
        let power = Power {
            state: PowerState::On,
            readiness: ReadinessState::BecomingReady,
        };
        let json = serde_json::to_string(&power).unwrap();
        assert_eq!(json, r#"{"state":"on","readiness":"becoming_ready"}"#);
    }

    #[test]
    fn test_lifecycle_transitions_and_display() {
        assert!(Lifecycle::Active.can_transition_to(Lifecycle::Deleted));
        assert!(!Lifecycle::Deleted.can_transition_to(Lifecycle::Deleted));
        assert_eq!(Lifecycle::Deleted.to_string(), "deleted");
    }
}
