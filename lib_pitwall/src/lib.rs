//! # lib_pitwall
//!
//! Live race event detection and topic streaming. Snapshots of race telemetry
//! are polled per `(topic, session)`, diffed against the last observed state to
//! synthesize overtakes, lead changes, fastest laps and pit stops, and fanned
//! out to every connection scoped to that session.
//!
//! Modules are gated by folder-level cargo features:
//! - `racing`: records, topics, race events and wire messages.
//! - `core`: the engine itself (state, detector, bus, subscriptions, scheduler).
//! - `retrieve`: the retrying HTTP `ApiClient`.
//! - `ingestors`: upstream telemetry sources built on `retrieve`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "racing")]
pub mod racing;

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "ingestors")]
pub mod ingestors;

#[cfg(feature = "core")]
pub use crate::core::{EngineConfig, LiveEngine};
#[cfg(feature = "racing")]
pub use racing::{EventKind, RaceEvent, Topic};
