//! Device directory for cinelink.
//!
//! One connection reaches a whole system: the local unit answers directly
//! and relays requests and events for its peers. This crate keeps track of
//! those units.
//!
//! # Key types
//!
//! - [`DeviceDirectory`]: bootstrap, reconciliation, and event routing
//! - [`Device`]: a handle to one unit (queries, commands, its own event bus)
//! - [`DeviceEvent`]: decoded event frames, one variant per known kind
//! - [`DirectoryEvent`]: lifecycle and membership notifications
//!
//! # How it fits in the stack
//!
//! ```text
//! Directory Layer (this crate)  ← membership, routing ids, device state
//!     ↕
//! Session Layer (below)  ← requests, responses, raw events
//! ```

mod device;
mod directory;
mod error;
mod event;
mod state;

pub use device::Device;
pub use directory::{DeviceDirectory, ReconcileOutcome};
pub use error::DirectoryError;
pub use event::{DeviceEvent, DirectoryEvent};
pub use state::{
    ContentDetails, Identity, Lifecycle, Power, PowerState, ReadinessState, SystemPairing,
};
