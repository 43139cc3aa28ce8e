//! # Lap-Completion Decision Logic
//!
//! Decides, from a fresh snapshot, whether a crossing is newsworthy and to
//! whom. Emission is interest-filtered and directional: a car of interest
//! publishes its own laps, and also hears about the laps of whoever is
//! chasing it — which keeps event volume proportional to the number of
//! subscribed cars, not the size of the field.

use std::collections::HashSet;

use crate::core::events::{LapCompleted, RaceEvent};
use crate::leaderboard::{CarPosition, RaceView};

/// Class ranks at or above this prefer the in-class neighbor when choosing
/// which "car ahead" a lap event reports.
const CLASS_FIGHT_RANK: u32 = 5;

/// Evaluates one crossing. Returns at most one event:
///
/// - the crossing car is itself of interest → its own lap, with the ahead
///   car chosen in-class for a top-class-rank fight, overall otherwise;
/// - the car ahead of it (overall or in-class) is of interest → the lap is
///   reported for that followed relationship;
/// - nobody relevant → nothing.
pub fn evaluate(
    track: &str,
    view: &RaceView,
    car: &str,
    targets: &HashSet<String>,
) -> Option<RaceEvent> {
    let entry = view.find(car)?;

    if targets.contains(car) {
        let ahead = if entry
            .class_position
            .is_some_and(|rank| rank <= CLASS_FIGHT_RANK)
        {
            view.ahead_in_class(entry)
        } else {
            view.ahead_overall(entry)
        };
        return Some(lap_event(track, view, entry, ahead));
    }

    for ahead in [view.ahead_overall(entry), view.ahead_in_class(entry)]
        .into_iter()
        .flatten()
    {
        if targets.contains(&ahead.car) {
            return Some(lap_event(track, view, entry, Some(ahead)));
        }
    }
    None
}

/// The one-shot announcement for a car that just became of interest. No
/// comparison baseline exists yet, so the gap is `-` and no ahead car is
/// named. Returns `None` when the car is not on the leaderboard.
pub fn synthetic(track: &str, view: &RaceView, car: &str) -> Option<RaceEvent> {
    let entry = view.find(car)?;
    Some(RaceEvent::LapCompleted(LapCompleted {
        track: track.to_string(),
        car: entry.car.clone(),
        laps: entry.laps,
        position: entry.position,
        class_position: entry.class_position,
        ahead: None,
        gap: "-".to_string(),
        last_lap_secs: entry.last_lap_secs,
        flag: view.flag,
    }))
}

fn lap_event(
    track: &str,
    view: &RaceView,
    entry: &CarPosition,
    ahead: Option<&CarPosition>,
) -> RaceEvent {
    RaceEvent::LapCompleted(LapCompleted {
        track: track.to_string(),
        car: entry.car.clone(),
        laps: entry.laps,
        position: entry.position,
        class_position: entry.class_position,
        ahead: ahead.map(|a| a.car.clone()),
        gap: view.gap_to_ahead(entry, ahead),
        last_lap_secs: entry.last_lap_secs,
        flag: view.flag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaderboard::RaceOrder;
    use chrono::{Duration, Utc};

    fn view_of(cars: &[(&str, Option<&str>, i32, i64)]) -> RaceView {
        let now = Utc::now();
        let mut order = RaceOrder::new();
        for (car, class, laps, ago) in cars {
            order.add_entrant(car, &format!("Driver {}", car), *class);
            order.update_position(car, 0, *laps, Some(now - Duration::seconds(*ago)));
        }
        order.build_snapshot()
    }

    fn targets(cars: &[&str]) -> HashSet<String> {
        cars.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn own_lap_of_interest_car_is_published() {
        let view = view_of(&[("1", None, 5, 12), ("2", None, 5, 10)]);
        let event = evaluate("vir", &view, "2", &targets(&["2"])).unwrap();
        match event {
            RaceEvent::LapCompleted(lap) => {
                assert_eq!(lap.car, "2");
                assert_eq!(lap.position, 2);
                assert_eq!(lap.ahead.as_deref(), Some("1"));
                assert_eq!(lap.gap, "2s");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn chaser_of_an_interest_car_triggers_followed_emission() {
        // Car 1 (of interest) leads; car 2 is catching it. Car 2's crossing
        // is newsworthy to car 1's subscribers.
        let view = view_of(&[("1", None, 5, 12), ("2", None, 5, 10)]);
        let event = evaluate("vir", &view, "2", &targets(&["1"])).unwrap();
        match event {
            RaceEvent::LapCompleted(lap) => {
                assert_eq!(lap.car, "2", "attributed to the crossing car");
                assert_eq!(lap.ahead.as_deref(), Some("1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn uninteresting_neighborhood_stays_silent() {
        let view = view_of(&[("1", None, 5, 12), ("2", None, 5, 10), ("3", None, 5, 8)]);
        assert!(evaluate("vir", &view, "3", &targets(&["1"])).is_none());
        assert!(evaluate("vir", &view, "2", &targets(&[])).is_none());
    }

    #[test]
    fn top_class_rank_prefers_in_class_ahead() {
        // Car 3 runs third overall but second in GT3; its class fight is
        // with car 1, not the GT4 car directly ahead.
        let view = view_of(&[
            ("1", Some("GT3"), 6, 30),
            ("2", Some("GT4"), 6, 20),
            ("3", Some("GT3"), 6, 10),
        ]);
        let event = evaluate("vir", &view, "3", &targets(&["3"])).unwrap();
        match event {
            RaceEvent::LapCompleted(lap) => {
                assert_eq!(lap.class_position, Some(2));
                assert_eq!(lap.ahead.as_deref(), Some("1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn in_class_ahead_of_interest_also_triggers() {
        // The car of interest is ahead in class but not ahead overall.
        let view = view_of(&[
            ("1", Some("GT3"), 6, 30),
            ("2", Some("GT4"), 6, 20),
            ("3", Some("GT3"), 6, 10),
        ]);
        let event = evaluate("vir", &view, "3", &targets(&["1"])).unwrap();
        match event {
            RaceEvent::LapCompleted(lap) => assert_eq!(lap.ahead.as_deref(), Some("1")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn synthetic_announcement_has_no_baseline() {
        let view = view_of(&[("1", None, 5, 12), ("2", None, 5, 10)]);
        match synthetic("vir", &view, "2").unwrap() {
            RaceEvent::LapCompleted(lap) => {
                assert_eq!(lap.car, "2");
                assert_eq!(lap.gap, "-");
                assert_eq!(lap.ahead, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(synthetic("vir", &view, "99").is_none());
    }
}
