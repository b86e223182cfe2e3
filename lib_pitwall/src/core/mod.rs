//! # Core Engine Module
//!
//! This module forms the heart of the live timing engine. It aggregates every
//! component involved in turning periodic telemetry snapshots into streamed
//! payloads and synthesized race events.
//!
//! ## Core Components:
//!
//! - **`session_state`**: Per-session memory of the last ranking, personal best
//!   laps, pit stops already reported and a bounded ranking history.
//! - **`detector`**: Diffs each snapshot against the session state and produces
//!   overtakes, lead changes, fastest laps and pit stops.
//! - **`event_bus`**: Routes each event to the handlers registered for its kind,
//!   isolating handler failures.
//! - **`subscriptions`**: Which connection listens to which topic, and the one
//!   session each connection is scoped to.
//! - **`hub`** and **`dispatcher`**: The in-process connection registry and the
//!   affinity-filtered fan-out on top of it.
//! - **`scheduler`**: One self-terminating polling task per `(topic, session)`.
//! - **`history`**: Bounded per-session memory of published events.
//! - **`engine`**: The coordinator that owns all of the above.
//!
//! Every shared structure sits behind a `std::sync::Mutex` whose guard is never
//! held across an `.await`, so each critical section runs to completion before
//! another task can observe it.

#![forbid(unsafe_code)]

/// Per-session mutable state.
pub mod session_state;
/// Snapshot diffing and event synthesis.
pub mod detector;
/// Kind-keyed event routing.
pub mod event_bus;
/// Topic membership and session affinity bookkeeping.
pub mod subscriptions;
/// In-process connection registry.
pub mod hub;
/// Affinity-filtered fan-out.
pub mod dispatcher;
/// Upstream telemetry source contract.
pub mod source;
/// Per-(topic, session) polling tasks.
pub mod scheduler;
/// Bounded per-session event history.
pub mod history;
/// The top-level coordinator.
pub mod engine;

// --- Public API Re-exports ---
pub use detector::{EventDetector, PitStopPolicy, Snapshot};
pub use dispatcher::{DispatchReport, EventsTopicForwarder, FanoutDispatcher};
pub use engine::{EngineConfig, LiveEngine, SessionClearance};
pub use event_bus::{handler_fn, EventBus, EventHandler, HandlerId};
pub use history::EventHistory;
pub use hub::{ConnectionHub, DeliveryError, Transport};
pub use scheduler::{SchedulerConfig, TopicScheduler};
pub use session_state::{SessionState, SessionStore};
pub use source::{SourceError, TelemetrySource};
pub use subscriptions::{ConnectionId, SubscriptionRegistry};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
