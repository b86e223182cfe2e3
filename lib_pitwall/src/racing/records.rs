//! Typed views over single upstream telemetry records.
//!
//! Snapshots travel through the engine as `serde_json::Value` arrays so that the
//! fan-out dispatcher can forward exactly what upstream returned. Components
//! that need structure parse one record at a time with [`parse_records`], which
//! drops records that do not deserialize instead of failing the whole batch.

use super::DriverNumber;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One car's place in the running order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub driver_number: DriverNumber,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub date: Option<String>,
}

/// One completed lap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapRecord {
    pub driver_number: DriverNumber,
    #[serde(default)]
    pub lap_number: Option<u32>,
    /// Lap time in seconds; absent for out-laps and incomplete laps.
    #[serde(default)]
    pub lap_duration: Option<f64>,
}

/// One pit stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitRecord {
    pub driver_number: DriverNumber,
    #[serde(default)]
    pub lap_number: Option<u32>,
    /// Pit lane time in seconds.
    #[serde(default)]
    pub pit_duration: Option<f64>,
}

/// One entry of the driver roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub driver_number: DriverNumber,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub broadcast_name: Option<String>,
    #[serde(default)]
    pub name_acronym: Option<String>,
    #[serde(default)]
    pub team_name: Option<String>,
}

impl DriverInfo {
    /// Best available human-readable name.
    pub fn display_name(&self) -> String {
        self.full_name
            .as_deref()
            .or(self.broadcast_name.as_deref())
            .or(self.name_acronym.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", self.driver_number))
    }
}

/// Parses every record that deserializes as `T`, silently skipping the rest.
pub fn parse_records<T: DeserializeOwned>(records: &[Value]) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| T::deserialize(record).ok())
        .collect()
}

/// Builds a driver number → display name map from a roster snapshot.
pub fn roster_names(roster: &[Value]) -> HashMap<DriverNumber, String> {
    parse_records::<DriverInfo>(roster)
        .into_iter()
        .map(|d| (d.driver_number, d.display_name()))
        .collect()
}
