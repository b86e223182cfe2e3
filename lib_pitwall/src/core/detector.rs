//! # Event Detector
//!
//! Turns raw telemetry snapshots into `RaceEvent`s by diffing them against the
//! session state kept in a [`SessionStore`].
//!
//! ## Rules:
//! - **Ranking**: the first snapshot of a session only establishes a baseline.
//!   Afterwards every driver that moved forward produces one OVERTAKE per rival
//!   that was ahead before and is now level or behind, and a change of the P1
//!   driver produces a LEAD_CHANGE. Each ranking is appended to the bounded
//!   history and replaces the previous one.
//! - **Lap times**: a lap strictly faster than the best lap of *any* driver so
//!   far is a FASTEST_LAP. Personal bests are tracked independently.
//! - **Pit stops**: under [`PitStopPolicy::FirstPerDriver`] a driver is reported
//!   once per session, whatever happens later. [`PitStopPolicy::EveryStop`]
//!   reports each distinct `(driver, lap)` stop instead.
//!
//! Records that fail to parse or lack the field a rule needs are skipped one by
//! one. `detect` never fails and never performs I/O.

use super::lock;
use super::session_state::{Ranking, SessionState, SessionStore};
use crate::racing::records::{parse_records, roster_names};
use crate::racing::{DriverNumber, EventKind, LapRecord, PitRecord, PositionRecord, RaceEvent, SessionId};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Mutex;
use tokio::time::Duration;

/// How repeated pit stops of the same driver are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitStopPolicy {
    /// Only the first stop of each driver is ever reported.
    #[default]
    FirstPerDriver,
    /// Every stop on a distinct lap is reported.
    EveryStop,
}

/// One snapshot, tagged with its shape.
#[derive(Debug, Clone, Copy)]
pub enum Snapshot<'a> {
    Ranking {
        positions: &'a [Value],
        roster: &'a [Value],
    },
    LapTimes(&'a [Value]),
    PitStops(&'a [Value]),
}

pub struct EventDetector {
    store: Mutex<SessionStore>,
    pit_policy: PitStopPolicy,
}

impl EventDetector {
    pub fn new(pit_policy: PitStopPolicy) -> Self {
        Self {
            store: Mutex::new(SessionStore::new()),
            pit_policy,
        }
    }

    /// Diffs `snapshot` against the state of `session_id` and updates it.
    ///
    /// Events of one call form an unordered set.
    pub fn detect(&self, session_id: &str, snapshot: Snapshot<'_>) -> Vec<RaceEvent> {
        let mut store = lock(&self.store);
        let state = store.get_or_create(session_id);
        state.touch();

        let events = match snapshot {
            Snapshot::Ranking { positions, roster } => detect_ranking(session_id, state, positions, roster),
            Snapshot::LapTimes(laps) => detect_fastest_laps(session_id, state, laps),
            Snapshot::PitStops(stops) => detect_pit_stops(session_id, state, stops, self.pit_policy),
        };

        if !events.is_empty() {
            log::debug!("Session {}: detected {} event(s)", session_id, events.len());
        }
        events
    }

    /// Forgets everything about a session.
    pub fn clear_session(&self, session_id: &str) -> bool {
        lock(&self.store).clear(session_id)
    }

    /// Forgets every session idle for at least `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        lock(&self.store).evict_idle(max_idle)
    }

    /// Runs `f` against a session's state, if it exists.
    pub fn inspect<R>(&self, session_id: &str, f: impl FnOnce(&SessionState) -> R) -> Option<R> {
        lock(&self.store).get(session_id).map(f)
    }

    pub fn session_count(&self) -> usize {
        lock(&self.store).len()
    }
}

fn detect_ranking(
    session_id: &str,
    state: &mut SessionState,
    positions: &[Value],
    roster: &[Value],
) -> Vec<RaceEvent> {
    state.driver_names.extend(roster_names(roster));

    let current: Ranking = parse_records::<PositionRecord>(positions)
        .into_iter()
        .filter_map(|r| r.position.map(|p| (r.driver_number, p)))
        .collect();

    let Some(last) = state.last_ranking.take() else {
        log::debug!("Session {}: ranking baseline with {} drivers", session_id, current.len());
        state.push_history(Utc::now(), current.clone());
        state.last_ranking = Some(current);
        return Vec::new();
    };

    let mut events = overtakes(session_id, state, &last, &current);
    if let Some(event) = lead_change(session_id, state, &last, &current) {
        events.push(event);
    }

    state.push_history(Utc::now(), current.clone());
    state.last_ranking = Some(current);
    events
}

fn overtakes(session_id: &str, state: &SessionState, last: &Ranking, current: &Ranking) -> Vec<RaceEvent> {
    let mut events = Vec::new();

    for (&driver, &new_pos) in current {
        let Some(&old_pos) = last.get(&driver) else { continue };
        if new_pos >= old_pos {
            continue;
        }

        for (&rival, &rival_old) in last {
            if rival == driver || rival_old >= old_pos {
                continue;
            }
            let Some(&rival_new) = current.get(&rival) else { continue };
            if rival_new < new_pos {
                continue;
            }

            let name = state.name_of(driver);
            let rival_name = state.name_of(rival);
            events.push(
                RaceEvent::new(
                    EventKind::Overtake,
                    session_id,
                    driver,
                    format!("{} overtakes {}! Now P{}", name, rival_name, new_pos),
                )
                .with_target(rival)
                .with_position_gained(i64::from(old_pos) - i64::from(new_pos))
                .with_data("driver_name", name)
                .with_data("target_name", rival_name)
                .with_data("previous_position", old_pos)
                .with_data("new_position", new_pos),
            );
        }
    }
    events
}

fn leader(ranking: &Ranking) -> Option<DriverNumber> {
    ranking.iter().find(|(_, pos)| **pos == 1).map(|(driver, _)| *driver)
}

fn lead_change(session_id: &str, state: &SessionState, last: &Ranking, current: &Ranking) -> Option<RaceEvent> {
    let new_leader = leader(current)?;
    let old_leader = leader(last)?;
    if new_leader == old_leader {
        return None;
    }

    let name = state.name_of(new_leader);
    let old_name = state.name_of(old_leader);
    Some(
        RaceEvent::new(
            EventKind::LeadChange,
            session_id,
            new_leader,
            format!("{} takes the lead from {}!", name, old_name),
        )
        .with_target(old_leader)
        .with_data("new_leader", name)
        .with_data("previous_leader", old_name),
    )
}

fn detect_fastest_laps(session_id: &str, state: &mut SessionState, laps: &[Value]) -> Vec<RaceEvent> {
    let mut events = Vec::new();

    for lap in parse_records::<LapRecord>(laps) {
        let Some(time) = lap.lap_duration.filter(|t| t.is_finite() && *t > 0.0) else {
            continue;
        };

        let previous_best = state.session_best();
        if previous_best.map_or(true, |best| time < best) {
            let name = state.name_of(lap.driver_number);
            events.push(
                RaceEvent::new(
                    EventKind::FastestLap,
                    session_id,
                    lap.driver_number,
                    format!("{} sets the fastest lap: {:.3}s", name, time),
                )
                .with_lap(lap.lap_number)
                .with_data("driver_name", name)
                .with_data("lap_time", time)
                .with_data("previous_best", previous_best.map_or(Value::Null, Value::from)),
            );
        }

        let personal = state.best_lap_by_driver.entry(lap.driver_number).or_insert(time);
        if time < *personal {
            *personal = time;
        }
    }
    events
}

fn detect_pit_stops(
    session_id: &str,
    state: &mut SessionState,
    stops: &[Value],
    policy: PitStopPolicy,
) -> Vec<RaceEvent> {
    let mut events = Vec::new();

    for stop in parse_records::<PitRecord>(stops) {
        let driver = stop.driver_number;
        let is_new = match policy {
            PitStopPolicy::FirstPerDriver => state.pitted_drivers.insert(driver),
            PitStopPolicy::EveryStop => {
                state.pitted_drivers.insert(driver);
                state.seen_stops.insert((driver, stop.lap_number))
            }
        };
        if !is_new {
            continue;
        }

        let name = state.name_of(driver);
        let message = match (stop.lap_number, stop.pit_duration) {
            (Some(lap), Some(duration)) => format!("{} pits on lap {} ({:.1}s)", name, lap, duration),
            (Some(lap), None) => format!("{} pits on lap {}", name, lap),
            (None, _) => format!("{} makes a pit stop", name),
        };
        events.push(
            RaceEvent::new(EventKind::PitStop, session_id, driver, message)
                .with_lap(stop.lap_number)
                .with_data("driver_name", name)
                .with_data("pit_duration", stop.pit_duration.map_or(Value::Null, Value::from)),
        );
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session_state::RANKING_HISTORY_LIMIT;
    use serde_json::json;

    fn ranking(entries: &[(u32, u32)]) -> Vec<Value> {
        entries
            .iter()
            .map(|(driver, pos)| json!({"driver_number": driver, "position": pos}))
            .collect()
    }

    fn feed_ranking(detector: &EventDetector, session: &str, entries: &[(u32, u32)]) -> Vec<RaceEvent> {
        detector.detect(session, Snapshot::Ranking { positions: &ranking(entries), roster: &[] })
    }

    fn of_kind(events: &[RaceEvent], kind: EventKind) -> Vec<&RaceEvent> {
        events.iter().filter(|e| e.kind == kind).collect()
    }

    #[test]
    fn cold_start_only_sets_baseline() {
        let detector = EventDetector::new(PitStopPolicy::default());
        let events = feed_ranking(&detector, "s1", &[(1, 2), (44, 1), (16, 3)]);
        assert!(events.is_empty());
        let baseline = detector.inspect("s1", |s| s.last_ranking.clone()).flatten().unwrap();
        assert_eq!(baseline[&44], 1);
        assert_eq!(baseline.len(), 3);
    }

    #[test]
    fn swapped_pair_yields_one_overtake() {
        let detector = EventDetector::new(PitStopPolicy::default());
        feed_ranking(&detector, "s1", &[(1, 1), (2, 2)]);
        let events = feed_ranking(&detector, "s1", &[(1, 2), (2, 1)]);

        let overtakes = of_kind(&events, EventKind::Overtake);
        assert_eq!(overtakes.len(), 1);
        assert_eq!(overtakes[0].driver_number, 2);
        assert_eq!(overtakes[0].target_driver_number, Some(1));
        assert_eq!(overtakes[0].position_gained, Some(1));
        assert_eq!(overtakes[0].message, "#2 overtakes #1! Now P1");
    }

    #[test]
    fn overtake_message_uses_roster_names() {
        let detector = EventDetector::new(PitStopPolicy::default());
        let roster = vec![
            json!({"driver_number": 1, "full_name": "Max VERSTAPPEN"}),
            json!({"driver_number": 4, "full_name": "Lando NORRIS"}),
        ];
        detector.detect("s1", Snapshot::Ranking { positions: &ranking(&[(1, 3), (4, 4)]), roster: &roster });
        let events = detector.detect("s1", Snapshot::Ranking { positions: &ranking(&[(1, 4), (4, 3)]), roster: &roster });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Lando NORRIS overtakes Max VERSTAPPEN! Now P3");
    }

    #[test]
    fn multi_place_gain_emits_one_event_per_passed_rival() {
        let detector = EventDetector::new(PitStopPolicy::default());
        feed_ranking(&detector, "s1", &[(10, 1), (20, 2), (30, 3), (40, 4)]);
        let events = feed_ranking(&detector, "s1", &[(40, 2), (10, 1), (20, 3), (30, 4)]);

        let mut passed: Vec<_> = of_kind(&events, EventKind::Overtake)
            .iter()
            .map(|e| (e.driver_number, e.target_driver_number.unwrap(), e.position_gained.unwrap()))
            .collect();
        passed.sort();
        assert_eq!(passed, vec![(40, 20, 2), (40, 30, 2)]);
        assert!(of_kind(&events, EventKind::LeadChange).is_empty());
    }

    #[test]
    fn reordering_behind_the_leader_is_not_a_lead_change() {
        let detector = EventDetector::new(PitStopPolicy::default());
        feed_ranking(&detector, "s1", &[(1, 1), (2, 2), (3, 3)]);
        let events = feed_ranking(&detector, "s1", &[(1, 1), (3, 2), (2, 3)]);
        assert!(of_kind(&events, EventKind::LeadChange).is_empty());
        assert_eq!(of_kind(&events, EventKind::Overtake).len(), 1);
    }

    #[test]
    fn new_p1_is_a_lead_change() {
        let detector = EventDetector::new(PitStopPolicy::default());
        feed_ranking(&detector, "s1", &[(1, 1), (2, 2)]);
        let events = feed_ranking(&detector, "s1", &[(1, 2), (2, 1)]);
        let leads = of_kind(&events, EventKind::LeadChange);
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].driver_number, 2);
        assert_eq!(leads[0].target_driver_number, Some(1));
    }

    #[test]
    fn records_without_position_are_dropped() {
        let detector = EventDetector::new(PitStopPolicy::default());
        feed_ranking(&detector, "s1", &[(1, 1), (2, 2)]);
        let positions = vec![
            json!({"driver_number": 1, "position": 2}),
            json!({"driver_number": 2}),
            json!({"position": 1}),
            json!(null),
        ];
        let events = detector.detect("s1", Snapshot::Ranking { positions: &positions, roster: &[] });
        assert!(events.is_empty());
        let last = detector.inspect("s1", |s| s.last_ranking.clone()).flatten().unwrap();
        assert_eq!(last.len(), 1);
    }

    #[test]
    fn sessions_do_not_share_state() {
        let detector = EventDetector::new(PitStopPolicy::default());
        feed_ranking(&detector, "a", &[(1, 1), (2, 2)]);
        let events = feed_ranking(&detector, "b", &[(1, 2), (2, 1)]);
        assert!(events.is_empty());
        assert_eq!(detector.session_count(), 2);
    }

    #[test]
    fn ranking_history_is_bounded_fifo() {
        let detector = EventDetector::new(PitStopPolicy::default());
        for i in 0..150u32 {
            feed_ranking(&detector, "s1", &[(1, 1), (2, 2), (99, 3 + i)]);
        }
        let (len, oldest, newest) = detector
            .inspect("s1", |s| {
                (
                    s.ranking_history.len(),
                    s.ranking_history.front().map(|h| h.ranking[&99]),
                    s.ranking_history.back().map(|h| h.ranking[&99]),
                )
            })
            .unwrap();
        assert_eq!(len, RANKING_HISTORY_LIMIT);
        assert_eq!(oldest, Some(3 + 50));
        assert_eq!(newest, Some(3 + 149));
    }

    #[test]
    fn fastest_lap_only_on_strict_improvement() {
        let detector = EventDetector::new(PitStopPolicy::default());
        let mut per_input = Vec::new();
        for time in [90.0, 89.5, 89.8] {
            let laps = vec![json!({"driver_number": 7, "lap_number": 3, "lap_duration": time})];
            per_input.push(detector.detect("s1", Snapshot::LapTimes(&laps)));
        }
        assert_eq!(per_input[0].len(), 1);
        assert_eq!(per_input[0][0].data["previous_best"], Value::Null);
        assert_eq!(per_input[1].len(), 1);
        assert_eq!(per_input[1][0].data["previous_best"], json!(90.0));
        assert!(per_input[2].is_empty());
    }

    #[test]
    fn fastest_lap_compares_against_all_drivers() {
        let detector = EventDetector::new(PitStopPolicy::default());
        let laps = vec![
            json!({"driver_number": 1, "lap_duration": 80.0}),
            json!({"driver_number": 2, "lap_duration": 81.0}),
        ];
        let events = detector.detect("s1", Snapshot::LapTimes(&laps));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].driver_number, 1);

        // Driver 2 improves personally but stays slower than driver 1.
        let laps = vec![json!({"driver_number": 2, "lap_duration": 80.5})];
        assert!(detector.detect("s1", Snapshot::LapTimes(&laps)).is_empty());
        let best = detector.inspect("s1", |s| s.best_lap_by_driver[&2]).unwrap();
        assert_eq!(best, 80.5);
    }

    #[test]
    fn laps_without_duration_are_skipped() {
        let detector = EventDetector::new(PitStopPolicy::default());
        let laps = vec![
            json!({"driver_number": 1, "lap_duration": null}),
            json!({"driver_number": 1}),
            json!({"lap_duration": 70.0}),
        ];
        assert!(detector.detect("s1", Snapshot::LapTimes(&laps)).is_empty());
    }

    #[test]
    fn second_pit_stop_of_a_driver_is_not_reported() {
        let detector = EventDetector::new(PitStopPolicy::FirstPerDriver);
        let stops = vec![
            json!({"driver_number": 44, "lap_number": 12, "pit_duration": 22.4}),
            json!({"driver_number": 44, "lap_number": 31, "pit_duration": 23.1}),
        ];
        let events = detector.detect("s1", Snapshot::PitStops(&stops));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].lap_number, Some(12));
        assert_eq!(events[0].message, "#44 pits on lap 12 (22.4s)");

        // Re-polling the same feed reports nothing new.
        assert!(detector.detect("s1", Snapshot::PitStops(&stops)).is_empty());
    }

    #[test]
    fn every_stop_policy_reports_distinct_laps_once() {
        let detector = EventDetector::new(PitStopPolicy::EveryStop);
        let stops = vec![
            json!({"driver_number": 44, "lap_number": 12, "pit_duration": 22.4}),
            json!({"driver_number": 44, "lap_number": 31}),
        ];
        assert_eq!(detector.detect("s1", Snapshot::PitStops(&stops)).len(), 2);
        assert!(detector.detect("s1", Snapshot::PitStops(&stops)).is_empty());
    }

    #[test]
    fn clear_session_resets_to_cold_start() {
        let detector = EventDetector::new(PitStopPolicy::default());
        feed_ranking(&detector, "s1", &[(1, 1), (2, 2)]);
        assert!(detector.clear_session("s1"));
        assert!(feed_ranking(&detector, "s1", &[(1, 2), (2, 1)]).is_empty());
    }
}
