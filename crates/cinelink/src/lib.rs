//! # Cinelink
//!
//! Client for home-theater systems that speak a line-delimited TCP
//! control protocol.
//!
//! One connection to the local unit reaches every unit in the system: the
//! local unit relays requests to its peers and their events back. Cinelink
//! keeps that connection alive, correlates requests with responses, and
//! tracks which units exist and how to address them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cinelink::prelude::*;
//!
//! # async fn run() -> Result<(), CinelinkError> {
//! cinelink::init_tracing("cinelink=info");
//!
//! let controller = Controller::builder().host("192.168.1.20").build();
//! controller.connect().await?;
//!
//! let local = controller.local_device().await?;
//! local.leave_standby().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! | Crate | Role |
//! |-------|------|
//! | `cinelink-transport` | TCP connect, line framing |
//! | `cinelink-protocol` | frame grammar, commands, status codes |
//! | `cinelink-session` | request correlation, reconnect, event bus |
//! | `cinelink-directory` | device membership and routing ids |

mod controller;
mod error;
mod telemetry;

pub use controller::{Controller, ControllerBuilder, ControllerConfig, DEFAULT_PORT};
pub use error::CinelinkError;
pub use telemetry::init_tracing;

pub use cinelink_directory as directory;
pub use cinelink_protocol as protocol;
pub use cinelink_session as session;
pub use cinelink_transport as transport;

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::{CinelinkError, Controller, ControllerBuilder, ControllerConfig};
    pub use cinelink_directory::{
        Device, DeviceDirectory, DeviceEvent, DirectoryError, DirectoryEvent, PowerState,
        ReadinessState,
    };
    pub use cinelink_protocol::{Command, Message, Request, RoutingId};
    pub use cinelink_session::{ConnectionState, Session, SessionConfig, SessionError};
}
