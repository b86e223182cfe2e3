//! # OpenF1 Polling Source
//!
//! A [`TelemetrySource`] backed by the public OpenF1 REST API. Every fetch is a
//! single `GET /<feed>?session_key=<id>` through the retrying `ApiClient`.
//!
//! ## Normalization:
//! OpenF1 returns the whole history of a feed on every call. Before the
//! snapshot enters the engine it is reduced to what a "current" snapshot means
//! for each topic:
//! - **ranking**: the latest position record per driver (by `date`).
//! - **lap_times**: the latest timed lap per driver (by `lap_number`).
//! - **weather**: the latest sample.
//! - **drivers**, **pit_stops**: passed through unchanged.
//!
//! A `404` ("No results found") is treated as an empty tick, not an error.

use crate::core::source::{SourceError, TelemetrySource};
use crate::racing::Topic;
use crate::retrieve::ky_http::ApiClient;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenF1Config {
    pub base_url: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl Default for OpenF1Config {
    fn default() -> Self {
        Self {
            base_url: "https://api.openf1.org/v1".to_string(),
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

pub struct OpenF1Source {
    client: ApiClient,
}

impl OpenF1Source {
    pub fn new(config: &OpenF1Config) -> anyhow::Result<Self> {
        let client = ApiClient::new(&config.base_url, config.request_timeout, config.max_retries)?;
        log::info!("OpenF1 source using {}", client.base_url());
        Ok(Self { client })
    }

    fn endpoint(topic: Topic) -> Option<&'static str> {
        match topic {
            Topic::Ranking => Some("position"),
            Topic::LapTimes => Some("laps"),
            Topic::PitStops => Some("pit"),
            Topic::Weather => Some("weather"),
            Topic::Drivers => Some("drivers"),
            Topic::Events => None,
        }
    }
}

#[async_trait]
impl TelemetrySource for OpenF1Source {
    async fn fetch(&self, topic: Topic, session_id: &str) -> Result<Option<Vec<Value>>, SourceError> {
        let path = Self::endpoint(topic).ok_or(SourceError::Unsupported(topic))?;

        let response = self
            .client
            .get_json::<Vec<Value>>(path, &[("session_key", session_id)])
            .await
            .map_err(|e| {
                let is_decode = e.downcast_ref::<reqwest::Error>().is_some_and(reqwest::Error::is_decode);
                if is_decode {
                    SourceError::Decode { topic, reason: format!("{:#}", e) }
                } else {
                    SourceError::Transport { topic, reason: format!("{:#}", e) }
                }
            })?;

        if !response.success {
            if response.status == 404 {
                return Ok(None);
            }
            return Err(SourceError::Status {
                topic,
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            });
        }

        let records = response.data.unwrap_or_default();
        log::trace!("OpenF1 {} for session {}: {} raw records", path, session_id, records.len());
        Ok(Some(normalize(topic, records)))
    }
}

/// Reduces a full feed history to the current snapshot for `topic`.
pub fn normalize(topic: Topic, records: Vec<Value>) -> Vec<Value> {
    match topic {
        Topic::Ranking => latest_per_driver(records, record_date),
        Topic::LapTimes => latest_per_driver(
            records
                .into_iter()
                .filter(|r| r.get("lap_duration").is_some_and(Value::is_number))
                .collect(),
            |r| r.get("lap_number").and_then(Value::as_u64),
        ),
        Topic::Weather => records
            .into_iter()
            .filter_map(|r| record_date(&r).map(|d| (d, r)))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, r)| vec![r])
            .unwrap_or_default(),
        Topic::PitStops | Topic::Drivers | Topic::Events => records,
    }
}

fn record_date(record: &Value) -> Option<DateTime<FixedOffset>> {
    record
        .get("date")
        .and_then(Value::as_str)
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
}

fn latest_per_driver<K: PartialOrd>(records: Vec<Value>, order: impl Fn(&Value) -> Option<K>) -> Vec<Value> {
    let mut latest: BTreeMap<u64, (K, Value)> = BTreeMap::new();
    for record in records {
        let Some(driver) = record.get("driver_number").and_then(Value::as_u64) else { continue };
        let Some(key) = order(&record) else { continue };
        let newer = latest.get(&driver).map_or(true, |(current, _)| key > *current);
        if newer {
            latest.insert(driver, (key, record));
        }
    }
    latest.into_values().map(|(_, record)| record).collect()
}
