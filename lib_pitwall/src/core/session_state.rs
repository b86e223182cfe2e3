//! # Session State Store
//!
//! Everything the detector remembers about a session between two snapshots.
//! States are created lazily on first use and live until they are cleared by
//! an operator or evicted by the idle sweep.

use crate::racing::{DriverNumber, SessionId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::time::{Duration, Instant};

/// Number of ranking snapshots retained per session.
pub const RANKING_HISTORY_LIMIT: usize = 100;

/// Driver number → position.
pub type Ranking = BTreeMap<DriverNumber, u32>;

/// One entry of the ranking history.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingSnapshot {
    pub timestamp: DateTime<Utc>,
    pub ranking: Ranking,
}

#[derive(Debug)]
pub struct SessionState {
    /// `None` until the first ranking snapshot has been seen.
    pub last_ranking: Option<Ranking>,
    /// Only ever replaced by a strictly smaller lap time.
    pub best_lap_by_driver: HashMap<DriverNumber, f64>,
    pub pitted_drivers: HashSet<DriverNumber>,
    /// `(driver, lap)` pairs already reported, for the every-stop policy.
    pub seen_stops: HashSet<(DriverNumber, Option<u32>)>,
    pub ranking_history: VecDeque<RankingSnapshot>,
    /// Roster cache used to render event messages.
    pub driver_names: HashMap<DriverNumber, String>,
    last_activity: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            last_ranking: None,
            best_lap_by_driver: HashMap::new(),
            pitted_drivers: HashSet::new(),
            seen_stops: HashSet::new(),
            ranking_history: VecDeque::with_capacity(RANKING_HISTORY_LIMIT),
            driver_names: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    /// Marks the session as active now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Appends a ranking to the history, evicting the oldest entries beyond the limit.
    pub fn push_history(&mut self, timestamp: DateTime<Utc>, ranking: Ranking) {
        self.ranking_history.push_back(RankingSnapshot { timestamp, ranking });
        while self.ranking_history.len() > RANKING_HISTORY_LIMIT {
            self.ranking_history.pop_front();
        }
    }

    /// Fastest lap across all drivers seen so far.
    pub fn session_best(&self) -> Option<f64> {
        self.best_lap_by_driver.values().copied().reduce(f64::min)
    }

    pub fn name_of(&self, driver: DriverNumber) -> String {
        self.driver_names
            .get(&driver)
            .cloned()
            .unwrap_or_else(|| format!("#{}", driver))
    }
}

/// All live session states, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<SessionId, SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state for `session_id`, creating an empty one if needed.
    pub fn get_or_create(&mut self, session_id: &str) -> &mut SessionState {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionState::new)
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionState> {
        self.sessions.get(session_id)
    }

    /// Drops a session's state. Returns whether anything was removed.
    pub fn clear(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Drops every session that has not been touched for at least `max_idle`.
    pub fn evict_idle(&mut self, max_idle: Duration) -> Vec<SessionId> {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, state)| state.idle_for() >= max_idle)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.sessions.remove(id);
        }
        stale
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
