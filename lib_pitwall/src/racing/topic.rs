use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// # Topic
///
/// A named category of streamed data. Every topic except `Events` is backed by
/// an upstream feed and gets its own polling task per session; `Events` is fed
/// by the event bus instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Current running order.
    Ranking,
    /// Latest lap times.
    LapTimes,
    /// Pit stop records.
    PitStops,
    /// Track and air conditions.
    Weather,
    /// Driver roster.
    Drivers,
    /// Synthesized race events.
    Events,
}

impl Topic {
    /// All topics, in declaration order.
    pub const ALL: [Topic; 6] = [
        Topic::Ranking,
        Topic::LapTimes,
        Topic::PitStops,
        Topic::Weather,
        Topic::Drivers,
        Topic::Events,
    ];

    /// The wire name, also used as the outbound message type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Ranking => "ranking",
            Topic::LapTimes => "lap_times",
            Topic::PitStops => "pit_stops",
            Topic::Weather => "weather",
            Topic::Drivers => "drivers",
            Topic::Events => "events",
        }
    }

    /// Whether this topic is driven by an upstream polling loop.
    pub fn is_polled(&self) -> bool {
        !matches!(self, Topic::Events)
    }

    /// Whether snapshots of this topic are routed through the event detector.
    pub fn feeds_detector(&self) -> bool {
        matches!(self, Topic::Ranking | Topic::LapTimes | Topic::PitStops)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown topic '{}'", s))
    }
}
