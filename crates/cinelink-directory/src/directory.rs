//! The device directory: which units exist and how to reach them.
//!
//! ```text
//!             bootstrap()
//!                 │
//!   refresh local device ──→ reconcile(None)
//!                                 │
//!     ┌───────────────────────────┴───────────────────────────┐
//!     │ 1. serial list (given, or fetched from the local unit) │
//!     │ 2. membership: add / delete / restore                  │
//!     │ 3. refresh every enabled peer concurrently             │
//!     │ 4. ENABLE_EVENTS on the local unit for each peer       │
//!     └────────────────────────────────────────────────────────┘
//! ```
//!
//! After [`attach`](DeviceDirectory::attach) the directory also listens to
//! the session: event frames are routed to the device they belong to, a
//! serial-number broadcast re-runs reconciliation with the broadcast list,
//! and a reconnect re-runs it from scratch so the relays are re-armed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use cinelink_protocol::{Message, ResponseKind, RoutingId, normalize_serial_number};
use cinelink_session::{EventBus, Session, SessionEvent, Subscription};
use futures_util::FutureExt;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::device::Device;
use crate::error::DirectoryError;
use crate::event::DirectoryEvent;
use crate::state::Lifecycle;

/// What one reconciliation changed. Entries are serial numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Seen for the first time.
    pub added: Vec<String>,
    /// Gone from the system; now disabled and in the deleted set.
    pub removed: Vec<String>,
    /// Back from the deleted set.
    pub restored: Vec<String>,
    /// Still present, but reachable under a different routing id.
    pub readdressed: Vec<String>,
}

impl ReconcileOutcome {
    /// Returns `true` if membership or addressing changed.
    pub fn is_changed(&self) -> bool {
        !(self.added.is_empty()
            && self.removed.is_empty()
            && self.restored.is_empty()
            && self.readdressed.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Members {
    /// Set once bootstrap has completed.
    loaded: bool,
    /// The connection dropped since the last reconciliation.
    stale: bool,
    local: Option<Device>,
    /// Local device first, then peers in discovery order.
    active: Vec<Device>,
    deleted: Vec<Device>,
}

struct DirectoryInner {
    session: Session,
    bus: EventBus<DirectoryEvent>,
    members: Mutex<Members>,
    /// Serializes bootstrap and reconciliation.
    reconcile: AsyncMutex<()>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl DirectoryInner {
    fn members(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands an event frame to the active device it is addressed to.
    fn route(&self, message: &Message) {
        let target = self
            .members()
            .active
            .iter()
            .find(|d| d.answers_to(&message.routing_id))
            .cloned();
        match target {
            Some(device) => device.handle_event(message),
            None => tracing::trace!(
                routing_id = %message.routing_id,
                name = %message.name,
                "event for unknown device dropped"
            ),
        }
    }
}

impl Drop for DirectoryInner {
    fn drop(&mut self) {
        for subscription in self.subscriptions().drain(..) {
            subscription.unsubscribe();
        }
    }
}

fn is_serial_broadcast(message: &Message) -> bool {
    !message.is_error() && message.response_kind() == ResponseKind::AvailableDevicesBySerialNumber
}

// ---------------------------------------------------------------------------
// DeviceDirectory
// ---------------------------------------------------------------------------

/// Tracks every unit behind one session. Cheap to clone.
#[derive(Clone)]
pub struct DeviceDirectory {
    inner: Arc<DirectoryInner>,
}

impl std::fmt::Debug for DeviceDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members = self.inner.members();
        f.debug_struct("DeviceDirectory")
            .field("loaded", &members.loaded)
            .field("active", &members.active.len())
            .field("deleted", &members.deleted.len())
            .finish()
    }
}

impl DeviceDirectory {
    /// Creates an empty directory over `session`. Nothing is sent until
    /// [`bootstrap`](Self::bootstrap).
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(DirectoryInner {
                session,
                bus: EventBus::new(),
                members: Mutex::new(Members::default()),
                reconcile: AsyncMutex::new(()),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Starts listening to the session. Idempotent.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(&self) {
        let mut subscriptions = self.inner.subscriptions();
        if !subscriptions.is_empty() {
            return;
        }

        let weak: Weak<DirectoryInner> = Arc::downgrade(&self.inner);
        subscriptions.push(self.inner.session.subscribe(
            |event| event.message().is_some(),
            move |event| {
                if let (Some(inner), Some(message)) = (weak.upgrade(), event.message()) {
                    inner.route(message);
                }
            },
        ));

        let weak: Weak<DirectoryInner> = Arc::downgrade(&self.inner);
        subscriptions.push(self.inner.session.bus().subscribe_async(
            |event| match event {
                SessionEvent::Connected | SessionEvent::Disconnected => true,
                SessionEvent::Event(message) => is_serial_broadcast(message),
            },
            move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        DeviceDirectory { inner }.on_session_event(event).await;
                    }
                }
                .boxed()
            },
        ));
    }

    /// Stops listening to the session.
    pub fn detach(&self) {
        for subscription in self.inner.subscriptions().drain(..) {
            subscription.unsubscribe();
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    // -- Events --------------------------------------------------------------

    pub fn bus(&self) -> &EventBus<DirectoryEvent> {
        &self.inner.bus
    }

    /// Shorthand for `self.bus().subscribe(filter, handler)`.
    pub fn subscribe<F, H>(&self, filter: F, handler: H) -> Subscription
    where
        F: Fn(&DirectoryEvent) -> bool + Send + Sync + 'static,
        H: FnMut(DirectoryEvent) + Send + 'static,
    {
        self.inner.bus.subscribe(filter, handler)
    }

    async fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                let stale = {
                    let mut members = self.inner.members();
                    std::mem::replace(&mut members.stale, false) && members.loaded
                };
                if stale {
                    tracing::info!("reconnected, reconciling devices");
                    self.reconcile_and_publish(None).await;
                }
                self.inner.bus.publish(DirectoryEvent::Connected);
            }
            SessionEvent::Disconnected => {
                self.inner.members().stale = true;
                self.inner.bus.publish(DirectoryEvent::Disconnected);
            }
            SessionEvent::Event(message) => {
                if !self.is_loaded() {
                    return;
                }
                tracing::debug!(fields = ?message.fields, "serial number broadcast");
                self.reconcile_and_publish(Some(message.fields.clone())).await;
            }
        }
    }

    async fn reconcile_and_publish(&self, latest: Option<Vec<String>>) {
        match self.reconcile(latest).await {
            Ok(outcome) if outcome.is_changed() => {
                self.inner.bus.publish(DirectoryEvent::Updated(outcome));
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "reconcile failed"),
        }
    }

    // -- Bootstrap / reconcile -----------------------------------------------

    /// Builds the local device, refreshes it, then reconciles the rest.
    ///
    /// May be called again after a failure; the local device instance is
    /// reused.
    pub async fn bootstrap(&self) -> Result<ReconcileOutcome, DirectoryError> {
        let _guard = self.inner.reconcile.lock().await;

        let local = {
            let mut members = self.inner.members();
            match &members.local {
                Some(local) => local.clone(),
                None => {
                    let local = Device::local(self.inner.session.clone());
                    members.local = Some(local.clone());
                    members.active.insert(0, local.clone());
                    local
                }
            }
        };

        local.refresh().await?;
        tracing::info!(
            serial_number = %local.serial_number(),
            routing_id = %local.routing_id(),
            "local device identified"
        );

        let outcome = self.reconcile_locked(None).await?;
        {
            let mut members = self.inner.members();
            members.loaded = true;
            members.stale = false;
        }
        Ok(outcome)
    }

    /// Brings membership in line with `latest` (or, if `None`, with the
    /// list the local unit reports).
    ///
    /// # Errors
    /// [`DirectoryError::Consistency`] if the directory has not been
    /// bootstrapped, or the list is empty.
    pub async fn reconcile(
        &self,
        latest: Option<Vec<String>>,
    ) -> Result<ReconcileOutcome, DirectoryError> {
        let _guard = self.inner.reconcile.lock().await;
        if !self.is_loaded() {
            return Err(DirectoryError::Consistency(
                "directory has not been bootstrapped".into(),
            ));
        }
        self.reconcile_locked(latest).await
    }

    async fn reconcile_locked(
        &self,
        latest: Option<Vec<String>>,
    ) -> Result<ReconcileOutcome, DirectoryError> {
        let local = self
            .local_device()
            .ok_or_else(|| DirectoryError::Consistency("no local device".into()))?;

        let latest = match latest {
            Some(latest) => latest,
            None => local.available_serial_numbers().await?,
        };
        let mut seen = HashSet::new();
        let latest: Vec<String> = latest
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| normalize_serial_number(s))
            .filter(|s| seen.insert(s.clone()))
            .collect();
        if latest.is_empty() {
            tracing::error!("device list is empty");
            return Err(DirectoryError::Consistency(
                "no devices in the system".into(),
            ));
        }

        let mut outcome = self.apply_membership(&local, &latest);

        let peers: Vec<Device> = self
            .devices()
            .into_iter()
            .filter(|d| !d.is_local() && d.is_enabled())
            .collect();

        let refreshed = join_all(peers.iter().map(|device| async move {
            let before = device.routing_id();
            (before, device.refresh().await)
        }))
        .await;

        for (device, (before, result)) in peers.iter().zip(refreshed) {
            let serial = device.serial_number();
            match result {
                Ok(()) => {
                    let fresh = outcome.added.contains(&serial) || outcome.restored.contains(&serial);
                    let after = device.routing_id();
                    if !fresh && after != before {
                        tracing::info!(serial_number = %serial, %before, %after, "device readdressed");
                        outcome.readdressed.push(serial);
                    }
                }
                Err(e) => {
                    tracing::warn!(serial_number = %serial, error = %e, "device refresh failed");
                }
            }
        }

        let relays = join_all(
            peers
                .iter()
                .filter(|d| d.is_enabled())
                .map(|device| {
                    let local = &local;
                    async move {
                        let peer = device.routing_id();
                        if let Err(e) = local.enable_events(&peer).await {
                            tracing::warn!(routing_id = %peer, error = %e, "enable events failed");
                        }
                    }
                }),
        );
        relays.await;

        if outcome.is_changed() {
            tracing::info!(
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                restored = outcome.restored.len(),
                readdressed = outcome.readdressed.len(),
                "devices reconciled"
            );
        }
        Ok(outcome)
    }

    /// Applies the add / delete / restore rules to the member lists.
    fn apply_membership(&self, local: &Device, latest: &[String]) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let local_serial = local.serial_number();
        let mut members = self.inner.members();

        let (keep, gone): (Vec<Device>, Vec<Device>) = std::mem::take(&mut members.active)
            .into_iter()
            .partition(|d| d.is_local() || latest.contains(&d.serial_number()));
        members.active = keep;
        for device in gone {
            device.disable();
            device.set_lifecycle(Lifecycle::Deleted);
            tracing::info!(serial_number = %device.serial_number(), "device removed");
            outcome.removed.push(device.serial_number());
            members.deleted.push(device);
        }

        for serial in latest {
            if *serial == local_serial
                || members.active.iter().any(|d| d.serial_number() == *serial)
            {
                continue;
            }
            if let Some(pos) = members
                .deleted
                .iter()
                .position(|d| d.serial_number() == *serial)
            {
                let device = members.deleted.remove(pos);
                device.set_lifecycle(Lifecycle::Active);
                device.enable();
                tracing::info!(serial_number = %serial, "device restored");
                members.active.push(device);
                outcome.restored.push(serial.clone());
            } else {
                let device = Device::peer(self.inner.session.clone(), serial);
                tracing::info!(serial_number = %serial, "device added");
                members.active.push(device);
                outcome.added.push(serial.clone());
            }
        }
        outcome
    }

    // -- Accessors -----------------------------------------------------------

    /// Returns `true` once bootstrap has completed.
    pub fn is_loaded(&self) -> bool {
        self.inner.members().loaded
    }

    /// Active devices, local first.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.members().active.clone()
    }

    /// Devices whose serial number disappeared from the system.
    pub fn deleted_devices(&self) -> Vec<Device> {
        self.inner.members().deleted.clone()
    }

    pub fn local_device(&self) -> Option<Device> {
        self.inner.members().local.clone()
    }

    /// The active device answering to `id`.
    pub fn device(&self, id: &RoutingId) -> Option<Device> {
        self.inner
            .members()
            .active
            .iter()
            .find(|d| d.answers_to(id))
            .cloned()
    }

    /// Looks a device up by serial number, active or deleted.
    pub fn device_by_serial(&self, serial_number: &str) -> Option<Device> {
        let serial = normalize_serial_number(serial_number);
        let members = self.inner.members();
        members
            .active
            .iter()
            .chain(members.deleted.iter())
            .find(|d| d.serial_number() == serial)
            .cloned()
    }
}
