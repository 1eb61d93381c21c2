//! Events published by devices and by the directory.

use cinelink_protocol::{Message, ResponseKind, normalize_serial_number};

use crate::ReconcileOutcome;
use crate::state::{PowerState, ReadinessState, parse_cpdid};

/// A decoded event frame, as seen by one device.
///
/// Kinds the directory has no projection for arrive as
/// [`Unregistered`](DeviceEvent::Unregistered) with the raw fields, so
/// consumers can handle firmware additions without a new release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    PowerState(PowerState),
    ReadinessState(ReadinessState),
    FriendlyName(String),
    /// Normalized serial numbers of every unit in the system.
    AvailableSerialNumbers(Vec<String>),
    /// Assigned cpdids.
    AvailableDevices(Vec<String>),
    DeviceInfo {
        serial_number: String,
        cpdid: Option<String>,
        ip_address: String,
    },
    Unregistered {
        name: String,
        fields: Vec<String>,
    },
}

impl DeviceEvent {
    /// Decodes an event frame.
    pub fn from_message(message: &Message) -> Self {
        let raw = || Self::Unregistered {
            name: message.name.clone(),
            fields: message.fields.clone(),
        };
        if message.is_error() {
            return raw();
        }

        match message.response_kind() {
            ResponseKind::DevicePowerState => PowerState::from_field(message.field(0))
                .map(Self::PowerState)
                .unwrap_or_else(raw),
            ResponseKind::SystemReadinessState => ReadinessState::from_field(message.field(0))
                .map(Self::ReadinessState)
                .unwrap_or_else(raw),
            ResponseKind::FriendlyName => Self::FriendlyName(message.field(0).to_string()),
            ResponseKind::AvailableDevicesBySerialNumber => Self::AvailableSerialNumbers(
                message
                    .fields
                    .iter()
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| normalize_serial_number(s))
                    .collect(),
            ),
            ResponseKind::AvailableDevices => Self::AvailableDevices(message.fields.clone()),
            ResponseKind::DeviceInfo => Self::DeviceInfo {
                serial_number: normalize_serial_number(message.field(1)),
                cpdid: parse_cpdid(message.field(2)),
                ip_address: message.field(3).to_string(),
            },
            _ => raw(),
        }
    }
}

/// What the directory tells its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// The session (re)connected; after a reconnect the directory has
    /// already re-reconciled by the time this is published.
    Connected,
    /// The session lost or closed its connection.
    Disconnected,
    /// Membership or addressing changed.
    Updated(ReconcileOutcome),
}

#[cfg(test)]
mod tests {
    use cinelink_protocol::decode;

    use super::*;

    #[test]
    fn test_from_message_power_state() {
        let m = decode("03/!/000:DEVICE_POWER_STATE:1:1:/89").unwrap();
        assert_eq!(DeviceEvent::from_message(&m), DeviceEvent::PowerState(PowerState::On));
    }

    #[test]
    fn test_from_message_serial_numbers_are_normalized() {
        let m = decode("02/!/000:AVAILABLE_DEVICES_BY_SERIAL_NUMBER:#123a:00000000123B:/1").unwrap();
        assert_eq!(
            DeviceEvent::from_message(&m),
            DeviceEvent::AvailableSerialNumbers(vec![
                "00000000123A".to_string(),
                "00000000123B".to_string()
            ])
        );
    }

    #[test]
    fn test_from_message_device_info_without_cpdid() {
        let m = decode("01/!/000:DEVICE_INFO::00000000123A:00:192.168.0.1:/1").unwrap();
        assert_eq!(
            DeviceEvent::from_message(&m),
            DeviceEvent::DeviceInfo {
                serial_number: "00000000123A".into(),
                cpdid: None,
                ip_address: "192.168.0.1".into(),
            }
        );
    }

    #[test]
    fn test_from_message_unprojected_kind_is_unregistered() {
        let m = decode("01/!/000:PLAY_STATUS:2:1:/1").unwrap();
        assert_eq!(
            DeviceEvent::from_message(&m),
            DeviceEvent::Unregistered {
                name: "PLAY_STATUS".into(),
                fields: vec!["2".into(), "1".into()],
            }
        );
    }

    #[test]
    fn test_from_message_bad_power_value_is_unregistered() {
        let m = decode("01/!/000:DEVICE_POWER_STATE:9:/1").unwrap();
        assert!(matches!(DeviceEvent::from_message(&m), DeviceEvent::Unregistered { .. }));
    }
}
