use super::{RaceEvent, SessionId, Topic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A request sent by a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { topic: Topic, session_id: SessionId },
    Unsubscribe { topic: Topic },
}

/// A message pushed to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerMessage {
    pub r#type: String,
    pub payload: Value,
}

impl ServerMessage {
    /// Normal snapshot push: `{topic} {data, timestamp}`.
    pub fn snapshot(topic: Topic, data: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            r#type: topic.as_str().to_string(),
            payload: json!({ "data": data, "timestamp": timestamp }),
        }
    }

    /// Emitted in place of a snapshot when a poll iteration fails.
    pub fn stream_error(topic: Topic, error: &str) -> Self {
        Self {
            r#type: "stream_error".to_string(),
            payload: json!({ "topic": topic, "error": error }),
        }
    }

    /// `<event-kind> {...RaceEvent}` push on the events topic.
    pub fn event(event: &RaceEvent) -> Self {
        Self {
            r#type: event.kind.as_str().to_string(),
            payload: serde_json::to_value(event).unwrap_or(Value::Null),
        }
    }

    pub fn subscribed(topic: Topic, session_id: &str) -> Self {
        Self {
            r#type: "subscribed".to_string(),
            payload: json!({ "topic": topic, "session_id": session_id }),
        }
    }

    pub fn unsubscribed(topic: Topic) -> Self {
        Self {
            r#type: "unsubscribed".to_string(),
            payload: json!({ "topic": topic }),
        }
    }

    pub fn error(error: &str) -> Self {
        Self {
            r#type: "error".to_string(),
            payload: json!({ "error": error }),
        }
    }
}
