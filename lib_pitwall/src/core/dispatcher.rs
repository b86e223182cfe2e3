//! # Fan-out Dispatcher
//!
//! Delivers one payload to every connection subscribed to a topic *and* scoped
//! to the payload's session. The message is built once and shared through an
//! `Arc`; each connection is then sent to independently, so a failing client
//! only loses its own copy.
//!
//! The target list is snapshotted up front and membership is re-checked right
//! before each send, because earlier sends may have yielded and let clients
//! unsubscribe in between.

use super::event_bus::EventHandler;
use super::hub::Transport;
use super::subscriptions::SubscriptionRegistry;
use crate::racing::{RaceEvent, ServerMessage, Topic};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct FanoutDispatcher {
    subscriptions: Arc<SubscriptionRegistry>,
    transport: Arc<dyn Transport>,
}

impl FanoutDispatcher {
    pub fn new(subscriptions: Arc<SubscriptionRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self { subscriptions, transport }
    }

    /// Pushes a snapshot as `{topic} {data, timestamp}`.
    pub async fn dispatch(&self, topic: Topic, session_id: &str, payload: Value) -> DispatchReport {
        let message = ServerMessage::snapshot(topic, payload, Utc::now());
        self.dispatch_message(topic, session_id, message).await
    }

    /// Pushes an already-built message to the members of `topic` scoped to `session_id`.
    pub async fn dispatch_message(&self, topic: Topic, session_id: &str, message: ServerMessage) -> DispatchReport {
        let message = Arc::new(message);
        let mut report = DispatchReport::default();

        for connection in self.subscriptions.targets(topic, session_id) {
            if !self.subscriptions.is_member(connection, topic, session_id) {
                continue;
            }
            match self.transport.send(connection, Arc::clone(&message)).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!("Dropping {} message for connection {}: {}", message.r#type, connection, e);
                }
            }
        }
        report
    }
}

/// Bus handler that relays every event to the `events` topic of its session.
pub struct EventsTopicForwarder {
    dispatcher: Arc<FanoutDispatcher>,
}

impl EventsTopicForwarder {
    pub fn new(dispatcher: Arc<FanoutDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl EventHandler for EventsTopicForwarder {
    fn name(&self) -> &str {
        "events-topic"
    }

    async fn handle(&self, event: Arc<RaceEvent>) -> anyhow::Result<()> {
        self.dispatcher
            .dispatch_message(Topic::Events, &event.session_id, ServerMessage::event(&event))
            .await;
        Ok(())
    }
}
