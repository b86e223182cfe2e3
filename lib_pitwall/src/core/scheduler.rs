//! # Topic Scheduler
//!
//! Owns one self-scheduling polling task per `(topic, session)` pair.
//!
//! ## Lifecycle:
//! - **absent → running**: `ensure_running` spawns a task when none is
//!   registered for the key (or the registered one already finished).
//! - **running**: each iteration fetches a snapshot, routes detector topics
//!   through the [`EventDetector`] and publishes the resulting events, then
//!   hands the raw payload to the fan-out dispatcher and sleeps for the
//!   topic's interval.
//! - **draining → absent**: the subscriber check at the top of every iteration
//!   finds nobody left, removes the task entry and returns. No cancellation
//!   signal is involved.
//!
//! The subscriber check and the removal happen under the task-table lock, the
//! same lock `ensure_running` takes. A concurrent subscribe therefore either
//! finds the old task still registered (and that task will see the new
//! subscriber on its check) or finds the key absent and spawns a fresh task.
//!
//! A failed iteration sends `stream_error` to the current subscribers and
//! backs off; the loop itself never dies on an error.

use super::detector::{EventDetector, Snapshot};
use super::dispatcher::FanoutDispatcher;
use super::event_bus::EventBus;
use super::lock;
use super::source::{SourceError, TelemetrySource};
use super::subscriptions::SubscriptionRegistry;
use crate::racing::records::parse_records;
use crate::racing::{DriverNumber, PositionRecord, ServerMessage, SessionId, Topic};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Poll cadence per topic and the retry delay after a failed iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub ranking_interval: Duration,
    pub weather_interval: Duration,
    pub default_interval: Duration,
    pub error_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ranking_interval: Duration::from_secs(1),
            weather_interval: Duration::from_secs(30),
            default_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    pub fn interval_for(&self, topic: Topic) -> Duration {
        match topic {
            Topic::Ranking => self.ranking_interval,
            Topic::Weather => self.weather_interval,
            _ => self.default_interval,
        }
    }
}

type TaskKey = (Topic, SessionId);

pub struct TopicScheduler {
    source: Arc<dyn TelemetrySource>,
    detector: Arc<EventDetector>,
    bus: Arc<EventBus>,
    dispatcher: Arc<FanoutDispatcher>,
    subscriptions: Arc<SubscriptionRegistry>,
    config: SchedulerConfig,
    tasks: Mutex<HashMap<TaskKey, JoinHandle<()>>>,
}

impl TopicScheduler {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        detector: Arc<EventDetector>,
        bus: Arc<EventBus>,
        dispatcher: Arc<FanoutDispatcher>,
        subscriptions: Arc<SubscriptionRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            detector,
            bus,
            dispatcher,
            subscriptions,
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts the polling task for `(topic, session_id)` unless one is running.
    /// Returns `true` when a new task was spawned.
    pub fn ensure_running(self: &Arc<Self>, topic: Topic, session_id: &str) -> bool {
        if !topic.is_polled() {
            return false;
        }

        let key = (topic, session_id.to_string());
        let mut tasks = lock(&self.tasks);
        if tasks.get(&key).is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let this = Arc::clone(self);
        let session = key.1.clone();
        // The new task blocks on the table lock until its handle is inserted.
        let handle = tokio::spawn(async move { this.run(topic, session).await });
        tasks.insert(key, handle);
        log::info!("Polling task started for {} / {}", topic, session_id);
        true
    }

    pub fn is_running(&self, topic: Topic, session_id: &str) -> bool {
        lock(&self.tasks)
            .get(&(topic, session_id.to_string()))
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Keys of all registered tasks, sorted.
    pub fn active_tasks(&self) -> Vec<(Topic, SessionId)> {
        let mut keys: Vec<TaskKey> = lock(&self.tasks).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Aborts every task. Used at process shutdown.
    pub fn shutdown(&self) {
        for ((topic, session), handle) in lock(&self.tasks).drain() {
            handle.abort();
            log::debug!("Polling task aborted for {} / {}", topic, session);
        }
    }

    async fn run(self: Arc<Self>, topic: Topic, session_id: SessionId) {
        while self.keep_running(topic, &session_id) {
            let pause = match self.poll_once(topic, &session_id).await {
                Ok(()) => self.config.interval_for(topic),
                Err(e) => {
                    log::warn!("Polling {} / {} failed: {}. Retrying in {:?}", topic, session_id, e, self.config.error_backoff);
                    self.dispatcher
                        .dispatch_message(topic, &session_id, ServerMessage::stream_error(topic, &e.to_string()))
                        .await;
                    self.config.error_backoff
                }
            };
            tokio::time::sleep(pause).await;
        }
        log::info!("Polling task for {} / {} finished: no subscribers left", topic, session_id);
    }

    /// Checks for subscribers; when there are none, deregisters the task.
    fn keep_running(&self, topic: Topic, session_id: &str) -> bool {
        let mut tasks = lock(&self.tasks);
        if self.subscriptions.subscriber_count(topic, session_id) > 0 {
            return true;
        }
        tasks.remove(&(topic, session_id.to_string()));
        false
    }

    async fn poll_once(&self, topic: Topic, session_id: &str) -> Result<(), SourceError> {
        let records = match self.source.fetch(topic, session_id).await? {
            Some(records) if !records.is_empty() => records,
            _ => {
                log::debug!("No {} data for session {} this tick", topic, session_id);
                return Ok(());
            }
        };

        if topic.feeds_detector() {
            let events = match topic {
                Topic::Ranking => {
                    let roster = self.roster_for(session_id, &records).await?;
                    self.detector.detect(session_id, Snapshot::Ranking { positions: &records, roster: &roster })
                }
                Topic::LapTimes => self.detector.detect(session_id, Snapshot::LapTimes(&records)),
                Topic::PitStops => self.detector.detect(session_id, Snapshot::PitStops(&records)),
                _ => Vec::new(),
            };
            for event in events {
                self.bus.publish(event).await;
            }
        }

        self.dispatcher.dispatch(topic, session_id, Value::Array(records)).await;
        Ok(())
    }

    /// Fetches the roster only while some ranked driver has no cached name.
    async fn roster_for(&self, session_id: &str, positions: &[Value]) -> Result<Vec<Value>, SourceError> {
        let ranked: Vec<DriverNumber> = parse_records::<PositionRecord>(positions)
            .into_iter()
            .map(|r| r.driver_number)
            .collect();
        let all_named = self
            .detector
            .inspect(session_id, |state| ranked.iter().all(|d| state.driver_names.contains_key(d)))
            .unwrap_or(false);
        if all_named {
            return Ok(Vec::new());
        }
        Ok(self.source.fetch(Topic::Drivers, session_id).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detector::PitStopPolicy;
    use crate::core::hub::ConnectionHub;
    use crate::racing::{EventKind, RaceEvent};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted responses per topic, repeating the last one.
    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<HashMap<Topic, VecDeque<Result<Option<Vec<Value>>, String>>>>,
        fetches: Mutex<HashMap<Topic, usize>>,
    }

    impl ScriptedSource {
        fn push(&self, topic: Topic, response: Result<Option<Vec<Value>>, String>) {
            self.script.lock().unwrap().entry(topic).or_default().push_back(response);
        }

        fn fetches(&self, topic: Topic) -> usize {
            self.fetches.lock().unwrap().get(&topic).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        async fn fetch(&self, topic: Topic, _session_id: &str) -> Result<Option<Vec<Value>>, SourceError> {
            *self.fetches.lock().unwrap().entry(topic).or_default() += 1;
            let mut script = self.script.lock().unwrap();
            let queue = script.entry(topic).or_default();
            let response = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            match response.unwrap_or(Ok(None)) {
                Ok(records) => Ok(records),
                Err(reason) => Err(SourceError::Transport { topic, reason }),
            }
        }
    }

    struct Harness {
        source: Arc<ScriptedSource>,
        hub: Arc<ConnectionHub>,
        subscriptions: Arc<SubscriptionRegistry>,
        bus: Arc<EventBus>,
        scheduler: Arc<TopicScheduler>,
    }

    fn harness() -> Harness {
        let source = Arc::new(ScriptedSource::default());
        let hub = Arc::new(ConnectionHub::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let bus = Arc::new(EventBus::new());
        let dispatcher = Arc::new(FanoutDispatcher::new(subscriptions.clone(), hub.clone()));
        let scheduler = Arc::new(TopicScheduler::new(
            source.clone(),
            Arc::new(EventDetector::new(PitStopPolicy::default())),
            bus.clone(),
            dispatcher,
            subscriptions.clone(),
            SchedulerConfig::default(),
        ));
        Harness { source, hub, subscriptions, bus, scheduler }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_fetching_after_last_unsubscribe() {
        let h = harness();
        h.source.push(Topic::Weather, Ok(Some(vec![json!({"rainfall": 0})])));
        let (conn, mut rx) = h.hub.add_client();

        h.subscriptions.subscribe(conn, Topic::Weather, "s1");
        assert!(h.scheduler.ensure_running(Topic::Weather, "s1"));
        assert!(!h.scheduler.ensure_running(Topic::Weather, "s1"));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.source.fetches(Topic::Weather), 3);
        assert_eq!(rx.recv().await.unwrap().r#type, "weather");

        h.subscriptions.unsubscribe(conn, Topic::Weather);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!h.scheduler.is_running(Topic::Weather, "s1"));
        let after_drain = h.source.fetches(Topic::Weather);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.source.fetches(Topic::Weather), after_drain);

        h.subscriptions.subscribe(conn, Topic::Weather, "s1");
        assert!(h.scheduler.ensure_running(Topic::Weather, "s1"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.source.fetches(Topic::Weather), after_drain + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_emit_stream_error_and_keep_polling() {
        let h = harness();
        h.source.push(Topic::PitStops, Err("connection reset".into()));
        h.source.push(Topic::PitStops, Ok(Some(vec![json!({"driver_number": 4, "lap_number": 20})])));
        let (conn, mut rx) = h.hub.add_client();
        h.subscriptions.subscribe(conn, Topic::PitStops, "s1");
        h.scheduler.ensure_running(Topic::PitStops, "s1");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.r#type, "stream_error");
        assert_eq!(first.payload["topic"], "pit_stops");
        assert!(first.payload["error"].as_str().unwrap().contains("connection reset"));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.r#type, "pit_stops");
        assert!(h.scheduler.is_running(Topic::PitStops, "s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn ranking_ticks_publish_detected_events() {
        let h = harness();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        h.bus.subscribe(
            EventKind::Overtake,
            crate::core::event_bus::handler_fn("count", move |_: &RaceEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        h.source.push(Topic::Drivers, Ok(Some(vec![json!({"driver_number": 1, "name_acronym": "VER"})])));
        h.source.push(Topic::Ranking, Ok(Some(vec![json!({"driver_number": 1, "position": 1}), json!({"driver_number": 2, "position": 2})])));
        h.source.push(Topic::Ranking, Ok(Some(vec![json!({"driver_number": 1, "position": 2}), json!({"driver_number": 2, "position": 1})])));

        let (conn, _rx) = h.hub.add_client();
        h.subscriptions.subscribe(conn, Topic::Ranking, "s1");
        h.scheduler.ensure_running(Topic::Ranking, "s1");
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(h.source.fetches(Topic::Drivers), h.source.fetches(Topic::Ranking));
    }

    #[tokio::test(start_paused = true)]
    async fn roster_is_refetched_only_for_unnamed_drivers() {
        let h = harness();
        h.source.push(
            Topic::Drivers,
            Ok(Some(vec![
                json!({"driver_number": 1, "name_acronym": "VER"}),
                json!({"driver_number": 16, "name_acronym": "LEC"}),
            ])),
        );
        h.source.push(Topic::Ranking, Ok(Some(vec![json!({"driver_number": 1, "position": 1}), json!({"driver_number": 16, "position": 2})])));
        h.source.push(Topic::Ranking, Ok(Some(vec![json!({"driver_number": 1, "position": 1}), json!({"driver_number": 16, "position": 2})])));
        h.source.push(Topic::Ranking, Ok(Some(vec![json!({"driver_number": 1, "position": 1}), json!({"driver_number": 16, "position": 2})])));
        h.source.push(Topic::Ranking, Ok(Some(vec![json!({"driver_number": 1, "position": 1}), json!({"driver_number": 44, "position": 2})])));

        let (conn, _rx) = h.hub.add_client();
        h.subscriptions.subscribe(conn, Topic::Ranking, "s1");
        h.scheduler.ensure_running(Topic::Ranking, "s1");

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.source.fetches(Topic::Ranking), 3);
        assert_eq!(h.source.fetches(Topic::Drivers), 1);

        // #44 is not in the cached roster
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.source.fetches(Topic::Drivers), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_results_are_not_pushed() {
        let h = harness();
        h.source.push(Topic::LapTimes, Ok(Some(Vec::new())));
        let (conn, mut rx) = h.hub.add_client();
        h.subscriptions.subscribe(conn, Topic::LapTimes, "s1");
        h.scheduler.ensure_running(Topic::LapTimes, "s1");

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(h.source.fetches(Topic::LapTimes), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_topic_is_never_polled() {
        let h = harness();
        h.subscriptions.subscribe(1, Topic::Events, "s1");
        assert!(!h.scheduler.ensure_running(Topic::Events, "s1"));
        assert!(h.scheduler.active_tasks().is_empty());
    }
}
