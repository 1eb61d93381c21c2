//! `Controller` builder and lifecycle.
//!
//! This is the entry point for talking to a system. It ties the layers
//! together: transport → protocol → session → directory.

use std::sync::Arc;

use cinelink_directory::{Device, DeviceDirectory, DirectoryError, DirectoryEvent};
use cinelink_session::{ConnectionState, Session, SessionConfig, Subscription};
use serde::{Deserialize, Serialize};

use crate::CinelinkError;

/// TCP port the control protocol listens on.
pub const DEFAULT_PORT: u16 = 10000;

/// Where to connect and how the session behaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Host name or address of the local unit.
    pub host: String,

    pub port: u16,

    /// Timeout and reconnect policy.
    pub session: SessionConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            session: SessionConfig::default(),
        }
    }
}

/// Builder for a [`Controller`].
///
/// # Example
///
/// ```rust,no_run
/// use cinelink::prelude::*;
///
/// # async fn run() -> Result<(), CinelinkError> {
/// let controller = Controller::builder()
///     .host("theater.local")
///     .auto_reconnect(true)
///     .build();
/// controller.connect().await?;
/// for device in controller.devices().await? {
///     println!("{} {}", device.routing_id(), device.identity().friendly_name);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ControllerBuilder {
    config: ControllerConfig,
}

impl ControllerBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host name or address of the local unit.
    pub fn host(mut self, host: &str) -> Self {
        self.config.host = host.to_string();
        self
    }

    /// TCP port; defaults to [`DEFAULT_PORT`].
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Per-request and connect timeout, in milliseconds.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.session.timeout_ms = timeout_ms;
        self
    }

    /// Reconnect in the background after the connection drops.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.session.auto_reconnect = enabled;
        self
    }

    /// Pause between reconnect attempts, in milliseconds.
    pub fn reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.session.reconnect_delay_ms = delay_ms;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the controller. Does not connect.
    pub fn build(self) -> Controller {
        Controller::new(self.config)
    }
}

struct ControllerInner {
    config: ControllerConfig,
    session: Session,
    directory: DeviceDirectory,
}

/// A connection to one system and the directory of its units.
///
/// Cheap to clone; clones share the session and the directory.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("state", &self.state())
            .finish()
    }
}

impl Controller {
    /// Creates a new builder.
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    /// Creates a controller. Does not connect.
    pub fn new(config: ControllerConfig) -> Self {
        let session = Session::new(config.session.clone());
        let directory = DeviceDirectory::new(session.clone());
        Self {
            inner: Arc::new(ControllerInner {
                config,
                session,
                directory,
            }),
        }
    }

    /// The configuration this controller was built with.
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// The underlying session, for raw requests and events.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// The device directory fed by this controller's session.
    pub fn directory(&self) -> &DeviceDirectory {
        &self.inner.directory
    }

    // -- Connection lifecycle ------------------------------------------------

    /// Connects to the configured host and starts tracking devices.
    ///
    /// Devices are not queried until the first call to
    /// [`devices`](Self::devices).
    ///
    /// # Errors
    /// [`CinelinkError::InvalidConfig`] without a host; otherwise whatever
    /// [`Session::connect`] reports.
    pub async fn connect(&self) -> Result<(), CinelinkError> {
        let config = &self.inner.config;
        if config.host.trim().is_empty() {
            return Err(CinelinkError::InvalidConfig("host is not set".into()));
        }

        self.inner.directory.attach();
        self.inner
            .session
            .connect(config.host.trim(), config.port)
            .await?;
        tracing::info!(host = %config.host, port = config.port, "controller connected");
        Ok(())
    }

    /// Closes the connection and stops reconnecting.
    pub async fn disconnect(&self) {
        self.inner.session.disconnect().await;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.session.state()
    }

    /// `true` once the session is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// `true` while a dropped connection is being re-established.
    pub fn is_reconnecting(&self) -> bool {
        self.state() == ConnectionState::Reconnecting
    }

    // -- Devices -------------------------------------------------------------

    /// Active devices, local first. Bootstraps the directory on first use.
    pub async fn devices(&self) -> Result<Vec<Device>, CinelinkError> {
        self.ensure_loaded().await?;
        Ok(self.inner.directory.devices())
    }

    /// The directly-connected unit. Bootstraps the directory on first use.
    pub async fn local_device(&self) -> Result<Device, CinelinkError> {
        self.ensure_loaded().await?;
        self.inner
            .directory
            .local_device()
            .ok_or_else(|| DirectoryError::Consistency("no local device".into()).into())
    }

    async fn ensure_loaded(&self) -> Result<(), CinelinkError> {
        if !self.inner.directory.is_loaded() {
            self.inner.directory.bootstrap().await?;
        }
        Ok(())
    }

    /// Subscribes to connection and membership changes.
    pub fn subscribe<F, H>(&self, filter: F, handler: H) -> Subscription
    where
        F: Fn(&DirectoryEvent) -> bool + Send + Sync + 'static,
        H: FnMut(DirectoryEvent) + Send + 'static,
    {
        self.inner.directory.subscribe(filter, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_config_default_port() {
        let config = ControllerConfig::default();
        assert_eq!(config.port, 10000);
        assert!(config.host.is_empty());
        assert!(!config.session.auto_reconnect);
    }

    #[test]
    fn test_controller_config_partial_json() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"host": "theater.local", "session": {"auto_reconnect": true}}"#)
                .unwrap();
        assert_eq!(config.host, "theater.local");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.session.auto_reconnect);
        assert_eq!(config.session.timeout_ms, cinelink_session::DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_builder_sets_session_policy() {
        let controller = Controller::builder()
            .host("10.0.0.5")
            .port(10001)
            .timeout_ms(750)
            .auto_reconnect(true)
            .reconnect_delay_ms(50)
            .build();
        let config = controller.config();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 10001);
        assert_eq!(config.session.timeout_ms, 750);
        assert!(config.session.auto_reconnect);
        assert_eq!(config.session.reconnect_delay_ms, 50);
        assert_eq!(controller.session().config(), &config.session);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_without_host_is_invalid_config() {
        let controller = Controller::builder().build();
        let err = controller.connect().await.unwrap_err();
        assert!(matches!(err, CinelinkError::InvalidConfig(_)));
    }
}
