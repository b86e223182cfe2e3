//! # Subscription Registry
//!
//! Bookkeeping of topic membership and session affinity.
//!
//! A connection can be a member of several topics at once but is scoped to a
//! single session: every `subscribe` overwrites the connection's affinity, for
//! all of its topics. Downstream consumers rely on that single-affinity rule,
//! so it is kept as is.

use super::lock;
use crate::racing::{SessionId, Topic};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Opaque handle of one client connection.
pub type ConnectionId = usize;

#[derive(Debug, Default)]
struct Subscriptions {
    members: HashMap<Topic, BTreeSet<ConnectionId>>,
    affinity: HashMap<ConnectionId, SessionId>,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Subscriptions>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `connection` to `topic` and scopes it to `session_id`.
    pub fn subscribe(&self, connection: ConnectionId, topic: Topic, session_id: &str) {
        let mut subs = lock(&self.inner);
        subs.members.entry(topic).or_default().insert(connection);
        if let Some(previous) = subs.affinity.insert(connection, session_id.to_string()) {
            if previous != session_id {
                log::debug!(
                    "Connection {} moved from session {} to {}",
                    connection, previous, session_id
                );
            }
        }
    }

    /// Removes `connection` from one topic. The affinity is kept.
    pub fn unsubscribe(&self, connection: ConnectionId, topic: Topic) -> bool {
        let mut subs = lock(&self.inner);
        let removed = subs
            .members
            .get_mut(&topic)
            .is_some_and(|members| members.remove(&connection));
        if subs.members.get(&topic).is_some_and(BTreeSet::is_empty) {
            subs.members.remove(&topic);
        }
        removed
    }

    /// Removes `connection` from every topic and forgets its affinity.
    pub fn on_disconnect(&self, connection: ConnectionId) {
        let mut subs = lock(&self.inner);
        subs.members.retain(|_, members| {
            members.remove(&connection);
            !members.is_empty()
        });
        subs.affinity.remove(&connection);
    }

    /// Drops every connection scoped to `session_id`. Returns the evicted handles.
    pub fn evict_session(&self, session_id: &str) -> Vec<ConnectionId> {
        let mut subs = lock(&self.inner);
        let evicted: Vec<ConnectionId> = subs
            .affinity
            .iter()
            .filter(|(_, session)| session.as_str() == session_id)
            .map(|(conn, _)| *conn)
            .collect();
        for conn in &evicted {
            subs.affinity.remove(conn);
        }
        subs.members.retain(|_, members| {
            members.retain(|conn| !evicted.contains(conn));
            !members.is_empty()
        });
        evicted
    }

    /// Members of `topic` currently scoped to `session_id`, in handle order.
    pub fn targets(&self, topic: Topic, session_id: &str) -> Vec<ConnectionId> {
        let subs = lock(&self.inner);
        subs.members
            .get(&topic)
            .map(|members| {
                members
                    .iter()
                    .filter(|conn| subs.affinity.get(*conn).is_some_and(|s| s == session_id))
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: Topic, session_id: &str) -> usize {
        self.targets(topic, session_id).len()
    }

    pub fn is_member(&self, connection: ConnectionId, topic: Topic, session_id: &str) -> bool {
        let subs = lock(&self.inner);
        subs.members.get(&topic).is_some_and(|m| m.contains(&connection))
            && subs.affinity.get(&connection).is_some_and(|s| s == session_id)
    }

    pub fn affinity(&self, connection: ConnectionId) -> Option<SessionId> {
        lock(&self.inner).affinity.get(&connection).cloned()
    }

    /// Topics `connection` is a member of.
    pub fn topics_of(&self, connection: ConnectionId) -> Vec<Topic> {
        let subs = lock(&self.inner);
        let mut topics: Vec<Topic> = subs
            .members
            .iter()
            .filter(|(_, members)| members.contains(&connection))
            .map(|(topic, _)| *topic)
            .collect();
        topics.sort();
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_subscribe_wins_affinity_for_all_topics() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(1, Topic::Ranking, "a");
        registry.subscribe(1, Topic::Weather, "b");

        assert_eq!(registry.affinity(1).as_deref(), Some("b"));
        assert_eq!(registry.subscriber_count(Topic::Ranking, "a"), 0);
        assert_eq!(registry.subscriber_count(Topic::Ranking, "b"), 1);
        assert_eq!(registry.topics_of(1), vec![Topic::Ranking, Topic::Weather]);
    }

    #[test]
    fn unsubscribe_touches_one_topic_only() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(1, Topic::Ranking, "a");
        registry.subscribe(1, Topic::LapTimes, "a");

        assert!(registry.unsubscribe(1, Topic::Ranking));
        assert!(!registry.unsubscribe(1, Topic::Ranking));
        assert!(!registry.is_member(1, Topic::Ranking, "a"));
        assert!(registry.is_member(1, Topic::LapTimes, "a"));
    }

    #[test]
    fn disconnect_removes_everything() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(1, Topic::Ranking, "a");
        registry.subscribe(1, Topic::Events, "a");
        registry.subscribe(2, Topic::Ranking, "a");

        registry.on_disconnect(1);
        assert!(registry.topics_of(1).is_empty());
        assert_eq!(registry.affinity(1), None);
        assert_eq!(registry.targets(Topic::Ranking, "a"), vec![2]);
    }

    #[test]
    fn evict_session_only_hits_that_session() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe(1, Topic::Ranking, "a");
        registry.subscribe(2, Topic::Ranking, "b");
        registry.subscribe(3, Topic::Weather, "a");

        let mut evicted = registry.evict_session("a");
        evicted.sort();
        assert_eq!(evicted, vec![1, 3]);
        assert_eq!(registry.targets(Topic::Ranking, "b"), vec![2]);
        assert_eq!(registry.subscriber_count(Topic::Weather, "a"), 0);
    }
}
