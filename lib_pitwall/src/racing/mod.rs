//! # Racing Domain Module
//!
//! The vocabulary shared by every other part of the crate: the topics a client
//! can subscribe to, the telemetry records parsed out of upstream snapshots,
//! the immutable `RaceEvent` produced by the detector, and the JSON messages
//! exchanged with connected clients.

/// Named categories of streamed data.
pub mod topic;
/// Per-record views over upstream telemetry JSON.
pub mod records;
/// Synthesized race events.
pub mod events;
/// Inbound and outbound client messages.
pub mod messages;

pub use events::{EventKind, RaceEvent};
pub use messages::{ClientMessage, ServerMessage};
pub use records::{DriverInfo, LapRecord, PitRecord, PositionRecord};
pub use topic::Topic;

/// Identifier of one competition session (an OpenF1 `session_key`, or `latest`).
pub type SessionId = String;

/// A racing number, the stable key for a driver within a session.
pub type DriverNumber = u32;
