//! One logical unit behind the local connection.
//!
//! A [`Device`] is a cheap, cloneable handle. The directory hands out
//! clones of the same handle for as long as the unit exists, including
//! while it sits in the deleted set, so anything subscribed on it keeps
//! working when the unit comes back.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cinelink_protocol::{Command, Message, Request, ResponseKind, RoutingId, normalize_serial_number};
use cinelink_session::{EventBus, Session, Subscription};

use crate::error::DirectoryError;
use crate::event::DeviceEvent;
use crate::state::{
    ContentDetails, Identity, Lifecycle, Power, PowerState, ReadinessState, SystemPairing,
    parse_count, parse_cpdid,
};

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct DeviceState {
    identity: Identity,
    power: Power,
    enabled: bool,
    lifecycle: Lifecycle,
}

struct DeviceInner {
    session: Session,
    is_local: bool,
    bus: EventBus<DeviceEvent>,
    state: Mutex<DeviceState>,
}

impl DeviceInner {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Handle to one unit in the system.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("Device")
            .field("routing_id", &Self::preferred_id(&state.identity, self.inner.is_local))
            .field("serial_number", &state.identity.serial_number)
            .field("is_local", &self.inner.is_local)
            .field("enabled", &state.enabled)
            .field("lifecycle", &state.lifecycle)
            .finish()
    }
}

impl Device {
    /// The directly-connected unit. Its serial number is learned on the
    /// first identity refresh.
    pub(crate) fn local(session: Session) -> Self {
        Self::build(session, true, String::new())
    }

    /// A peer known only by its serial number so far.
    pub(crate) fn peer(session: Session, serial_number: &str) -> Self {
        Self::build(session, false, normalize_serial_number(serial_number))
    }

    fn build(session: Session, is_local: bool, serial_number: String) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                session,
                is_local,
                bus: EventBus::new(),
                state: Mutex::new(DeviceState {
                    identity: Identity {
                        serial_number,
                        ..Identity::default()
                    },
                    power: Power::quiescent(),
                    enabled: true,
                    lifecycle: Lifecycle::Active,
                }),
            }),
        }
    }

    // -- Accessors -----------------------------------------------------------

    /// The id commands are addressed to: the cpdid when one is assigned,
    /// otherwise the serial number (or `01` for a local unit whose serial
    /// number is not known yet).
    pub fn routing_id(&self) -> RoutingId {
        Self::preferred_id(&self.inner.state().identity, self.inner.is_local)
    }

    fn preferred_id(identity: &Identity, is_local: bool) -> RoutingId {
        if let Some(id) = identity.cpdid.as_deref().and_then(RoutingId::cpdid) {
            return id;
        }
        if !identity.serial_number.is_empty() {
            return RoutingId::serial(&identity.serial_number);
        }
        if is_local {
            RoutingId::local()
        } else {
            RoutingId::unknown()
        }
    }

    /// Returns `true` if an event frame addressed to `id` belongs to this
    /// device. The local unit also answers to `01`. Serial ids match after
    /// normalization, so `#123b` and `#00000000123B` are the same unit.
    pub fn answers_to(&self, id: &RoutingId) -> bool {
        if self.inner.is_local && id.is_local() {
            return true;
        }
        let state = self.inner.state();
        let identity = &state.identity;
        if identity.cpdid.as_deref() == Some(id.as_str()) {
            return true;
        }
        id.is_serial()
            && !identity.serial_number.is_empty()
            && normalize_serial_number(&id.as_str()[1..]) == identity.serial_number
    }

    /// Normalized serial number; empty until the first refresh.
    pub fn serial_number(&self) -> String {
        self.inner.state().identity.serial_number.clone()
    }

    /// Two-digit slot number, if the unit has one.
    pub fn cpdid(&self) -> Option<String> {
        self.inner.state().identity.cpdid.clone()
    }

    /// Snapshot of everything known about who this unit is.
    pub fn identity(&self) -> Identity {
        self.inner.state().identity.clone()
    }

    /// Last known power and readiness.
    pub fn power(&self) -> Power {
        self.inner.state().power
    }

    /// Whether this is the unit the connection terminates at.
    pub fn is_local(&self) -> bool {
        self.inner.is_local
    }

    /// Disabled devices refuse commands and ignore events.
    pub fn is_enabled(&self) -> bool {
        self.inner.state().enabled
    }

    /// Whether the unit is currently in the system or in the deleted set.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state().lifecycle
    }

    /// Returns `true` if both handles refer to the same device instance.
    pub fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // -- Events --------------------------------------------------------------

    /// The bus this device republishes its decoded events on.
    pub fn bus(&self) -> &EventBus<DeviceEvent> {
        &self.inner.bus
    }

    /// Shorthand for `self.bus().subscribe(filter, handler)`.
    pub fn subscribe<F, H>(&self, filter: F, handler: H) -> Subscription
    where
        F: Fn(&DeviceEvent) -> bool + Send + Sync + 'static,
        H: FnMut(DeviceEvent) + Send + 'static,
    {
        self.inner.bus.subscribe(filter, handler)
    }

    /// Applies an event frame to the device's state and republishes it.
    ///
    /// Dropped without effect while the device is disabled.
    pub(crate) fn handle_event(&self, message: &Message) {
        let event = DeviceEvent::from_message(message);
        {
            let mut state = self.inner.state();
            if !state.enabled {
                return;
            }
            match &event {
                DeviceEvent::PowerState(power) => state.power.state = *power,
                DeviceEvent::ReadinessState(readiness) => state.power.readiness = *readiness,
                DeviceEvent::FriendlyName(name) => state.identity.friendly_name = name.clone(),
                _ => {}
            }
        }
        tracing::trace!(routing_id = %message.routing_id, name = %message.name, "device event");
        self.inner.bus.publish(event);
    }

    // -- Enable / disable ----------------------------------------------------

    /// Freezes the device at standby/idle and stops event delivery.
    ///
    /// Returns `false` (and changes nothing) for the local device, or if
    /// the device was already disabled.
    pub fn disable(&self) -> bool {
        if self.inner.is_local {
            return false;
        }
        let mut state = self.inner.state();
        if !state.enabled {
            return false;
        }
        state.enabled = false;
        state.power = Power::quiescent();
        tracing::debug!(serial_number = %state.identity.serial_number, "device disabled");
        true
    }

    /// Resumes event delivery. Returns `false` if already enabled.
    pub fn enable(&self) -> bool {
        let mut state = self.inner.state();
        if state.enabled {
            return false;
        }
        state.enabled = true;
        tracing::debug!(serial_number = %state.identity.serial_number, "device enabled");
        true
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: Lifecycle) {
        let mut state = self.inner.state();
        if state.lifecycle.can_transition_to(lifecycle) {
            state.lifecycle = lifecycle;
        }
    }

    fn ensure_enabled(&self) -> Result<(), DirectoryError> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(DirectoryError::DeviceUnavailable(self.routing_id()))
        }
    }

    // -- Refresh -------------------------------------------------------------

    /// Re-reads who the device is.
    ///
    /// `DEVICE_INFO` goes to the serial-number id once that is known, so a
    /// reassigned cpdid is picked up; the remaining queries use the
    /// (possibly new) preferred id.
    pub async fn refresh_identity(&self) -> Result<(), DirectoryError> {
        self.ensure_enabled()?;

        let serial = self.serial_number();
        let info_id = if serial.is_empty() {
            self.routing_id()
        } else {
            RoutingId::serial(&serial)
        };
        let info = self.query(Request::new(info_id, Command::GetDeviceInfo)).await?;
        {
            let mut state = self.inner.state();
            let identity = &mut state.identity;
            if !info.field(1).trim().is_empty() {
                identity.serial_number = normalize_serial_number(info.field(1));
            }
            identity.cpdid = parse_cpdid(info.field(2));
            identity.ip_address = info.field(3).to_string();
        }

        let id = self.routing_id();
        let (version, type_name, zones) = tokio::try_join!(
            self.query(Request::new(id.clone(), Command::GetSystemVersion)),
            self.query(Request::new(id.clone(), Command::GetDeviceTypeName)),
            self.query(Request::new(id.clone(), Command::GetNumZones)),
        )?;

        let movie_zones = {
            let mut state = self.inner.state();
            let identity = &mut state.identity;
            identity.protocol = version.field(0).trim().parse().unwrap_or(0);
            identity.software_version = version.field(1).to_string();
            identity.type_name = type_name.field(0).to_string();
            identity.movie_zones = parse_count(zones.field(0));
            identity.music_zones = parse_count(zones.field(1));
            identity.movie_zones
        };

        if movie_zones > 0 {
            let name = self.query(Request::new(id, Command::GetFriendlyName)).await?;
            self.inner.state().identity.friendly_name = name.field(0).to_string();
        }

        tracing::debug!(
            serial_number = %self.serial_number(),
            routing_id = %self.routing_id(),
            "identity refreshed"
        );
        Ok(())
    }

    /// Re-reads power and readiness.
    pub async fn refresh_state(&self) -> Result<(), DirectoryError> {
        self.ensure_enabled()?;
        let id = self.routing_id();
        let (power, readiness) = tokio::try_join!(
            self.query(Request::new(id.clone(), Command::GetDevicePowerState)),
            self.query(Request::new(id, Command::GetSystemReadinessState)),
        )?;
        let mut state = self.inner.state();
        if let Some(value) = PowerState::from_field(power.field(0)) {
            state.power.state = value;
        }
        if let Some(value) = ReadinessState::from_field(readiness.field(0)) {
            state.power.readiness = value;
        }
        Ok(())
    }

    /// Identity first, then live state.
    pub async fn refresh(&self) -> Result<(), DirectoryError> {
        self.refresh_identity().await?;
        self.refresh_state().await
    }

    // -- Queries -------------------------------------------------------------

    /// Serial numbers of every unit in the system, normalized.
    pub async fn available_serial_numbers(&self) -> Result<Vec<String>, DirectoryError> {
        let message = self
            .expect_kind(
                Command::GetAvailableDevicesBySerialNumber,
                ResponseKind::AvailableDevicesBySerialNumber,
            )
            .await?;
        Ok(message
            .fields
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| normalize_serial_number(s))
            .collect())
    }

    /// Cpdids assigned in the system.
    pub async fn available_devices(&self) -> Result<Vec<String>, DirectoryError> {
        let message = self
            .expect_kind(Command::GetAvailableDevices, ResponseKind::AvailableDevices)
            .await?;
        Ok(message.fields)
    }

    pub async fn system_pairing_info(&self) -> Result<SystemPairing, DirectoryError> {
        let message = self
            .expect_kind(Command::GetSystemPairingInfo, ResponseKind::SystemPairingInfo)
            .await?;
        Ok(SystemPairing::from_fields(&message.fields))
    }

    pub async fn friendly_system_name(&self) -> Result<String, DirectoryError> {
        let message = self
            .expect_kind(Command::GetFriendlySystemName, ResponseKind::FriendlySystemName)
            .await?;
        Ok(message.field(0).to_string())
    }

    /// Details of one title. `passcode` may be empty.
    pub async fn content_details(
        &self,
        handle: &str,
        passcode: &str,
    ) -> Result<ContentDetails, DirectoryError> {
        let request = Request::new(self.routing_id(), Command::GetContentDetails)
            .with_fields([handle, passcode]);
        let rows = self.send(request.clone()).await?;

        let Some((overview, details)) = rows.split_first() else {
            return Err(invalid(&request, "empty response"));
        };
        if overview.response_kind() != ResponseKind::ContentDetailsOverview {
            return Err(invalid(&request, &format!("got '{}'", overview.name)));
        }
        Ok(ContentDetails {
            handle: overview.field(1).to_string(),
            table: overview.field(2).to_string(),
            details: details
                .iter()
                .map(|row| (row.field(1).to_string(), row.field(2).to_string()))
                .collect(),
        })
    }

    // -- Commands ------------------------------------------------------------

    /// Asks this (local) unit to relay events from `peer`.
    pub async fn enable_events(&self, peer: &RoutingId) -> Result<(), DirectoryError> {
        let request =
            Request::new(self.routing_id(), Command::EnableEvents).with_field(peer.as_str());
        self.query(request).await.map(|_| ())
    }

    /// Sends any command to this device and waits for its acknowledgement.
    pub async fn command(&self, command: Command) -> Result<(), DirectoryError> {
        self.query(Request::new(self.routing_id(), command))
            .await
            .map(|_| ())
    }

    /// Wakes the unit.
    pub async fn leave_standby(&self) -> Result<(), DirectoryError> {
        self.command(Command::LeaveStandby).await
    }

    /// Puts the unit into standby.
    pub async fn enter_standby(&self) -> Result<(), DirectoryError> {
        self.command(Command::EnterStandby).await
    }

    /// Transport control: play.
    pub async fn play(&self) -> Result<(), DirectoryError> {
        self.command(Command::Play).await
    }

    /// Transport control: pause.
    pub async fn pause(&self) -> Result<(), DirectoryError> {
        self.command(Command::Pause).await
    }

    /// Transport control: stop.
    pub async fn stop(&self) -> Result<(), DirectoryError> {
        self.command(Command::Stop).await
    }

    /// Skips to the next chapter or track.
    pub async fn next(&self) -> Result<(), DirectoryError> {
        self.command(Command::Next).await
    }

    /// Skips to the previous chapter or track.
    pub async fn previous(&self) -> Result<(), DirectoryError> {
        self.command(Command::Previous).await
    }

    /// Jumps back a few seconds.
    pub async fn replay(&self) -> Result<(), DirectoryError> {
        self.command(Command::Replay).await
    }

    /// Fast-forwards; repeat to go faster.
    pub async fn scan_forward(&self) -> Result<(), DirectoryError> {
        self.command(Command::ScanForward).await
    }

    /// Rewinds; repeat to go faster.
    pub async fn scan_reverse(&self) -> Result<(), DirectoryError> {
        self.command(Command::ScanReverse).await
    }

    /// Remote-control key: select.
    pub async fn select(&self) -> Result<(), DirectoryError> {
        self.command(Command::Select).await
    }

    /// Remote-control arrow keys.
    pub async fn up(&self) -> Result<(), DirectoryError> {
        self.command(Command::Up).await
    }

    /// See [`up`](Self::up).
    pub async fn down(&self) -> Result<(), DirectoryError> {
        self.command(Command::Down).await
    }

    /// See [`up`](Self::up).
    pub async fn left(&self) -> Result<(), DirectoryError> {
        self.command(Command::Left).await
    }

    /// See [`up`](Self::up).
    pub async fn right(&self) -> Result<(), DirectoryError> {
        self.command(Command::Right).await
    }

    /// Remote-control key: cancel / back.
    pub async fn cancel(&self) -> Result<(), DirectoryError> {
        self.command(Command::Cancel).await
    }

    /// Opens the movie covers view.
    pub async fn go_movie_covers(&self) -> Result<(), DirectoryError> {
        self.command(Command::GoMovieCovers).await
    }

    /// Toggles the on-screen menu.
    pub async fn menu_toggle(&self) -> Result<(), DirectoryError> {
        self.command(Command::KaleidescapeMenuToggle).await
    }

    // -- Plumbing ------------------------------------------------------------

    async fn send(&self, request: Request) -> Result<Vec<Message>, DirectoryError> {
        self.ensure_enabled()?;
        Ok(self.inner.session.send(&request).await?)
    }

    async fn query(&self, request: Request) -> Result<Message, DirectoryError> {
        self.ensure_enabled()?;
        Ok(self.inner.session.send_one(&request).await?)
    }

    async fn expect_kind(
        &self,
        command: Command,
        kind: ResponseKind,
    ) -> Result<Message, DirectoryError> {
        let request = Request::new(self.routing_id(), command);
        let message = self.query(request.clone()).await?;
        if message.response_kind() != kind {
            return Err(invalid(&request, &format!("got '{}'", message.name)));
        }
        Ok(message)
    }
}

fn invalid(request: &Request, reason: &str) -> DirectoryError {
    DirectoryError::InvalidResponse {
        request: request.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use cinelink_protocol::decode;
    use cinelink_session::SessionConfig;

    use super::*;

    fn session() -> Session {
        Session::new(SessionConfig::default())
    }

    #[test]
    fn test_routing_id_prefers_cpdid() {
        let device = Device::peer(session(), "123b");
        assert_eq!(device.routing_id().as_str(), "#00000000123B");

        device.inner.state().identity.cpdid = Some("03".into());
        assert_eq!(device.routing_id().as_str(), "03");
    }

    #[test]
    fn test_routing_id_local_before_refresh() {
        let device = Device::local(session());
        assert_eq!(device.routing_id(), RoutingId::local());
        assert!(device.answers_to(&RoutingId::local()));
    }

    #[test]
    fn test_answers_to_any_current_id() {
        let device = Device::peer(session(), "123B");
        device.inner.state().identity.cpdid = Some("03".into());
        assert!(device.answers_to(&RoutingId::serial("123B")));
        assert!(device.answers_to(&"03".parse().unwrap()));
        assert!(!device.answers_to(&RoutingId::local()));
        assert!(!device.answers_to(&RoutingId::serial("123A")));
    }

    #[test]
    fn test_answers_to_unnormalized_serial_id() {
        let device = Device::peer(session(), "123B");
        let id: RoutingId = "#123b".parse().unwrap();
        assert!(device.answers_to(&id));

        let event = decode("#0000123b/!/000:FRIENDLY_NAME:Den:/1").unwrap();
        assert!(device.answers_to(&event.routing_id));
        assert!(!device.answers_to(&"#123a".parse().unwrap()));
    }

    #[test]
    fn test_disable_local_device_is_refused() {
        let device = Device::local(session());
        assert!(!device.disable());
        assert!(device.is_enabled());
    }

    #[test]
    fn test_disable_resets_power_to_quiescent() {
        let device = Device::peer(session(), "123B");
        device.inner.state().power = Power {
            state: PowerState::On,
            readiness: ReadinessState::Ready,
        };
        assert!(device.disable());
        assert!(!device.disable());
        assert_eq!(device.power(), Power::quiescent());
        assert!(device.enable());
        assert!(device.is_enabled());
    }

    #[tokio::test]
    async fn test_command_on_disabled_device_fails_fast() {
        let device = Device::peer(session(), "123B");
        device.disable();
        let err = device.play().await.unwrap_err();
        assert_eq!(err, DirectoryError::DeviceUnavailable(RoutingId::serial("123B")));
    }

    #[tokio::test]
    async fn test_handle_event_updates_power_and_publishes() {
        let device = Device::peer(session(), "123B");
        let (_sub, mut rx) = device.bus().channel(|_| true);

        let m = decode("#00000000123B/!/000:DEVICE_POWER_STATE:1:1:/1").unwrap();
        device.handle_event(&m);

        assert_eq!(device.power().state, PowerState::On);
        assert_eq!(rx.recv().await, Some(DeviceEvent::PowerState(PowerState::On)));
    }

    #[tokio::test]
    async fn test_handle_event_ignored_while_disabled() {
        let device = Device::peer(session(), "123B");
        let (_sub, mut rx) = device.bus().channel(|_| true);
        device.disable();

        let m = decode("#00000000123B/!/000:DEVICE_POWER_STATE:1:1:/1").unwrap();
        device.handle_event(&m);

        assert_eq!(device.power().state, PowerState::Standby);
        assert!(rx.try_recv().is_err());
    }
}
