//! # Live Engine
//!
//! The top-level coordinator. It owns every component of the engine, wires the
//! event bus to the history sink and to the `events` topic, and is the only
//! object the transport layer talks to.
//!
//! ## Responsibilities:
//! - Translate client requests into subscription changes and lazily start the
//!   matching polling task.
//! - Operator `clear_session`: forget the session's detector state and history
//!   and evict every connection scoped to it, which drains its polling tasks.
//! - Periodically evict sessions that have seen no detection pass for longer
//!   than the configured idle TTL.

use super::detector::{EventDetector, PitStopPolicy};
use super::dispatcher::{EventsTopicForwarder, FanoutDispatcher};
use super::event_bus::EventBus;
use super::history::EventHistory;
use super::hub::Transport;
use super::lock;
use super::scheduler::{SchedulerConfig, TopicScheduler};
use super::source::TelemetrySource;
use super::subscriptions::{ConnectionId, SubscriptionRegistry};
use crate::racing::{ClientMessage, RaceEvent, ServerMessage, SessionId, Topic};
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tokio::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub pit_stop_policy: PitStopPolicy,
    /// Events retained per session for the history endpoint.
    pub event_history_capacity: usize,
    /// Sessions with no detection pass for this long are evicted.
    pub idle_session_ttl: Duration,
    pub idle_sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            pit_stop_policy: PitStopPolicy::default(),
            event_history_capacity: 500,
            idle_session_ttl: Duration::from_secs(3600),
            idle_sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Result of an operator `clear_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionClearance {
    pub session_id: SessionId,
    /// Whether detector state existed for the session.
    pub cleared: bool,
    pub evicted_connections: Vec<ConnectionId>,
}

pub struct LiveEngine {
    config: EngineConfig,
    subscriptions: Arc<SubscriptionRegistry>,
    detector: Arc<EventDetector>,
    bus: Arc<EventBus>,
    scheduler: Arc<TopicScheduler>,
    history: Arc<EventHistory>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl LiveEngine {
    pub fn new(config: EngineConfig, source: Arc<dyn TelemetrySource>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let detector = Arc::new(EventDetector::new(config.pit_stop_policy));
        let bus = Arc::new(EventBus::new());
        let dispatcher = Arc::new(FanoutDispatcher::new(Arc::clone(&subscriptions), transport));
        let history = Arc::new(EventHistory::new(config.event_history_capacity));
        let scheduler = Arc::new(TopicScheduler::new(
            source,
            Arc::clone(&detector),
            Arc::clone(&bus),
            Arc::clone(&dispatcher),
            Arc::clone(&subscriptions),
            config.scheduler.clone(),
        ));

        bus.subscribe_all(history.clone());
        bus.subscribe_all(Arc::new(EventsTopicForwarder::new(Arc::clone(&dispatcher))));

        Arc::new(Self {
            config,
            subscriptions,
            detector,
            bus,
            scheduler,
            history,
            sweeper: Mutex::new(None),
        })
    }

    /// Subscribes `connection` and starts polling for the key if needed.
    pub fn subscribe(&self, connection: ConnectionId, topic: Topic, session_id: &str) -> ServerMessage {
        self.subscriptions.subscribe(connection, topic, session_id);
        self.scheduler.ensure_running(topic, session_id);
        log::info!("Connection {} subscribed to {} for session {}", connection, topic, session_id);
        ServerMessage::subscribed(topic, session_id)
    }

    pub fn unsubscribe(&self, connection: ConnectionId, topic: Topic) -> ServerMessage {
        self.subscriptions.unsubscribe(connection, topic);
        log::info!("Connection {} unsubscribed from {}", connection, topic);
        ServerMessage::unsubscribed(topic)
    }

    pub fn on_disconnect(&self, connection: ConnectionId) {
        self.subscriptions.on_disconnect(connection);
        log::info!("Connection {} dropped all subscriptions", connection);
    }

    /// Parses one inbound text frame and applies it, returning the reply.
    pub fn handle_client_message(&self, connection: ConnectionId, text: &str) -> ServerMessage {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Subscribe { topic, session_id }) => self.subscribe(connection, topic, &session_id),
            Ok(ClientMessage::Unsubscribe { topic }) => self.unsubscribe(connection, topic),
            Err(e) => {
                log::debug!("Connection {} sent an invalid message: {}", connection, e);
                ServerMessage::error(&format!("invalid message: {}", e))
            }
        }
    }

    /// Forgets a session and detaches every connection scoped to it.
    pub fn clear_session(&self, session_id: &str) -> SessionClearance {
        let cleared = self.detector.clear_session(session_id);
        self.history.clear(session_id);
        let evicted_connections = self.subscriptions.evict_session(session_id);
        log::warn!(
            "Session {} cleared (state: {}, connections evicted: {})",
            session_id,
            cleared,
            evicted_connections.len()
        );
        SessionClearance {
            session_id: session_id.to_string(),
            cleared,
            evicted_connections,
        }
    }

    /// Evicts idle sessions now. Returns their ids.
    pub fn sweep_idle(&self) -> Vec<SessionId> {
        let evicted = self.detector.evict_idle(self.config.idle_session_ttl);
        for session_id in &evicted {
            self.history.clear(session_id);
            log::info!("Session {} evicted after {:?} idle", session_id, self.config.idle_session_ttl);
        }
        evicted
    }

    /// Spawns the periodic idle sweep. Calling it twice keeps a single sweeper.
    pub fn start_idle_sweeper(self: &Arc<Self>) {
        let mut sweeper = lock(&self.sweeper);
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.idle_sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                engine.sweep_idle();
            }
        }));
    }

    /// Stops the sweeper and every polling task.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            handle.abort();
        }
        self.scheduler.shutdown();
        log::info!("Live engine shut down");
    }

    pub fn recent_events(&self, session_id: &str) -> Vec<RaceEvent> {
        self.history.recent(session_id)
    }

    pub fn detector(&self) -> &Arc<EventDetector> {
        &self.detector
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<TopicScheduler> {
        &self.scheduler
    }
}
