use crate::racing::Topic;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error while fetching {topic}: {reason}")]
    Transport { topic: Topic, reason: String },

    #[error("upstream answered {status} for {topic}: {body}")]
    Status { topic: Topic, status: u16, body: String },

    #[error("could not decode {topic} response: {reason}")]
    Decode { topic: Topic, reason: String },

    #[error("topic {0} has no upstream feed")]
    Unsupported(Topic),
}

/// The upstream telemetry provider.
///
/// `Ok(None)` and `Ok(Some(vec![]))` both mean "nothing to push this tick";
/// an `Err` is a failed tick that the scheduler reports and retries.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self, topic: Topic, session_id: &str) -> Result<Option<Vec<Value>>, SourceError>;
}
