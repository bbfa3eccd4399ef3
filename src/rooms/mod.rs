//! Server-side room model

pub mod presence;
pub mod registry;

pub use presence::{PresenceTracker, RosterView};
pub use registry::{Outbox, RegistryStatsSnapshot, RoomRegistry};
