//! Bounded in-memory record of published events, per session.

use super::event_bus::EventHandler;
use super::lock;
use crate::racing::{RaceEvent, SessionId};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub struct EventHistory {
    sessions: Mutex<HashMap<SessionId, VecDeque<Arc<RaceEvent>>>>,
    capacity: usize,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, event: Arc<RaceEvent>) {
        let mut sessions = lock(&self.sessions);
        let events = sessions.entry(event.session_id.clone()).or_default();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Retained events of a session, oldest first.
    pub fn recent(&self, session_id: &str) -> Vec<RaceEvent> {
        lock(&self.sessions)
            .get(session_id)
            .map(|events| events.iter().map(|e| RaceEvent::clone(e)).collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, session_id: &str) -> bool {
        lock(&self.sessions).remove(session_id).is_some()
    }
}

#[async_trait]
impl EventHandler for EventHistory {
    fn name(&self) -> &str {
        "history"
    }

    async fn handle(&self, event: Arc<RaceEvent>) -> anyhow::Result<()> {
        self.record(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::racing::EventKind;

    #[test]
    fn keeps_the_newest_events_per_session() {
        let history = EventHistory::new(2);
        for driver in [1, 2, 3] {
            history.record(Arc::new(RaceEvent::new(EventKind::PitStop, "a", driver, String::new())));
        }
        history.record(Arc::new(RaceEvent::new(EventKind::PitStop, "b", 9, String::new())));

        let drivers: Vec<_> = history.recent("a").iter().map(|e| e.driver_number).collect();
        assert_eq!(drivers, vec![2, 3]);
        assert_eq!(history.recent("b").len(), 1);
        assert!(history.clear("a"));
        assert!(history.recent("a").is_empty());
    }
}
