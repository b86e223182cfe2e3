//! # Race Events
//!
//! The immutable records synthesized by the event detector and carried by the
//! event bus. A `RaceEvent` is never mutated after construction; consumers
//! receive shared `Arc<RaceEvent>` handles.

use super::{DriverNumber, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The closed set of event kinds. The serialized name doubles as the outbound
/// message type on the `events` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Overtake,
    LeadChange,
    FastestLap,
    PitStop,
    WeatherChange,
    Incident,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 6] = [
        EventKind::Overtake,
        EventKind::LeadChange,
        EventKind::FastestLap,
        EventKind::PitStop,
        EventKind::WeatherChange,
        EventKind::Incident,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Overtake => "overtake",
            EventKind::LeadChange => "lead_change",
            EventKind::FastestLap => "fastest_lap",
            EventKind::PitStop => "pit_stop",
            EventKind::WeatherChange => "weather_change",
            EventKind::Incident => "incident",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Race Event
///
/// A higher-level fact derived from consecutive telemetry snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    /// The subject of the event (the overtaking driver, the new leader, ...).
    pub driver_number: DriverNumber,
    /// The driver affected, e.g. the one overtaken.
    pub target_driver_number: Option<DriverNumber>,
    pub position_gained: Option<i64>,
    pub lap_number: Option<u32>,
    /// Free-form context for display.
    pub data: Map<String, Value>,
    /// Rendered human-readable summary.
    pub message: String,
}

impl RaceEvent {
    /// Starts an event with only the mandatory fields set.
    pub fn new(
        kind: EventKind,
        session_id: &str,
        driver_number: DriverNumber,
        message: String,
    ) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            driver_number,
            target_driver_number: None,
            position_gained: None,
            lap_number: None,
            data: Map::new(),
            message,
        }
    }

    pub fn with_target(mut self, target: DriverNumber) -> Self {
        self.target_driver_number = Some(target);
        self
    }

    pub fn with_position_gained(mut self, gained: i64) -> Self {
        self.position_gained = Some(gained);
        self
    }

    pub fn with_lap(mut self, lap: Option<u32>) -> Self {
        self.lap_number = lap;
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}
