//! # Leaderboard Engine
//!
//! The mutable register of race entrants (`RaceOrder`) and the immutable
//! ranked snapshot built from it (`RaceView`, see [`view`]).
//!
//! Ownership discipline: a `RaceOrder` belongs to exactly one feed task and
//! is only ever mutated there. Every other component reads race state through
//! a `RaceView` snapshot, which is safe to share across tasks once built.

pub mod view;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use view::{CarPosition, RaceView};

/// Race-control state. Providers ship this as free-form strings; everything
/// downstream works with the closed set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Green,
    Yellow,
    Red,
    Black,
    #[default]
    Unknown,
}

impl Flag {
    /// Normalizes a provider flag string. Accepts the bare color as well as
    /// the `"<color> flag"` variants some feeds use.
    pub fn parse(raw: &str) -> Flag {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.strip_suffix(" flag").unwrap_or(&normalized) {
            "green" => Flag::Green,
            "yellow" => Flag::Yellow,
            "red" => Flag::Red,
            "black" => Flag::Black,
            _ => Flag::Unknown,
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Flag::Green => "green",
            Flag::Yellow => "yellow",
            Flag::Red => "red",
            Flag::Black => "black",
            Flag::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// One car/team tracked in a race. Owned exclusively by the [`RaceOrder`]
/// that registered it.
#[derive(Debug, Clone)]
pub struct Entrant {
    /// Car number, the stable identity key within a race.
    pub car: String,
    /// Display name as announced by the provider.
    pub name: String,
    /// Class identifier, absent for unclassed entries.
    pub class_id: Option<String>,
    /// Laps completed. Signed: at least one provider encodes penalties as
    /// negative lap counts.
    pub laps: i32,
    /// Elapsed time of the most recent completed lap, in seconds.
    pub last_lap_secs: f64,
    /// Timestamp of the most recent lap-completion crossing. Absent until
    /// the car crosses the line once.
    pub last_crossing: Option<DateTime<Utc>>,
    /// Lap number on which the fastest lap was set.
    pub fastest_lap_no: u32,
    /// Fastest lap time, in seconds.
    pub fastest_lap_secs: f64,
}

impl Entrant {
    fn new(car: &str, name: &str, class_id: Option<&str>) -> Self {
        Self {
            car: car.to_string(),
            name: name.to_string(),
            class_id: class_id.map(str::to_string),
            laps: 0,
            last_lap_secs: 0.0,
            last_crossing: None,
            fastest_lap_no: 0,
            fastest_lap_secs: 0.0,
        }
    }
}

/// The mutable race register: entrants keyed by car number, class display
/// names, and the current race-control flag.
#[derive(Debug, Default)]
pub struct RaceOrder {
    entrants: HashMap<String, Entrant>,
    classes: HashMap<String, String>,
    flag: Flag,
}

impl RaceOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entrant, or refreshes name/class when the provider
    /// re-announces a known car.
    pub fn add_entrant(&mut self, car: &str, name: &str, class_id: Option<&str>) {
        self.entrants
            .entry(car.to_string())
            .and_modify(|e| {
                e.name = name.to_string();
                e.class_id = class_id.map(str::to_string);
            })
            .or_insert_with(|| Entrant::new(car, name, class_id));
    }

    pub fn add_class(&mut self, class_id: &str, name: &str) {
        self.classes.insert(class_id.to_string(), name.to_string());
    }

    pub fn class_name(&self, class_id: &str) -> Option<&str> {
        self.classes.get(class_id).map(String::as_str)
    }

    pub fn entrant(&self, car: &str) -> Option<&Entrant> {
        self.entrants.get(car)
    }

    pub fn flag(&self) -> Flag {
        self.flag
    }

    pub fn set_flag(&mut self, flag: Flag) {
        self.flag = flag;
    }

    /// Applies a coarse position/lap update. The provider may reference cars
    /// it has not announced yet; an unknown car number is a tolerated no-op.
    ///
    /// The raw provider position is accepted but not stored: overall order is
    /// always recomputed from lap counts and crossing times when a snapshot
    /// is built, which keeps ranking consistent across providers that report
    /// positions on different cadences.
    pub fn update_position(
        &mut self,
        car: &str,
        _raw_position: u32,
        laps: i32,
        timestamp: Option<DateTime<Utc>>,
    ) {
        match self.entrants.get_mut(car) {
            Some(entrant) => {
                entrant.laps = laps;
                if let Some(ts) = timestamp {
                    entrant.last_crossing = Some(ts);
                }
            }
            None => log::debug!("position update for unknown car {}, skipping", car),
        }
    }

    /// Records a lap-completion crossing timestamp on its own, for providers
    /// that deliver timestamps as a separate record.
    pub fn update_crossing(&mut self, car: &str, timestamp: DateTime<Utc>) {
        match self.entrants.get_mut(car) {
            Some(entrant) => entrant.last_crossing = Some(timestamp),
            None => log::debug!("crossing update for unknown car {}, skipping", car),
        }
    }

    pub fn update_last_lap(&mut self, car: &str, secs: f64) {
        match self.entrants.get_mut(car) {
            Some(entrant) => entrant.last_lap_secs = secs,
            None => log::debug!("last-lap update for unknown car {}, skipping", car),
        }
    }

    pub fn update_fastest_lap(&mut self, car: &str, lap_no: u32, secs: f64) {
        match self.entrants.get_mut(car) {
            Some(entrant) => {
                entrant.fastest_lap_no = lap_no;
                entrant.fastest_lap_secs = secs;
            }
            None => log::debug!("fastest-lap update for unknown car {}, skipping", car),
        }
    }

    /// Builds the immutable ranked snapshot of the current field.
    ///
    /// Ranking rules:
    /// 1. Two entrants with zero laps compare by car number, giving a
    ///    deterministic pre-race grid.
    /// 2. More laps completed ranks ahead.
    /// 3. On equal laps, the earlier last-crossing ranks ahead (it reached
    ///    that lap count sooner).
    /// 4. An entrant with a crossing timestamp ranks ahead of one without;
    ///    two timestamp-less entrants fall back to car-number order. This is
    ///    a total order, unlike the fixed asymmetric result earlier versions
    ///    of this comparator returned for the missing-timestamp case.
    pub fn build_snapshot(&self) -> RaceView {
        let mut ordered: Vec<&Entrant> = self.entrants.values().collect();
        ordered.sort_by(|a, b| Self::compare(a, b));
        view::build(&ordered, self.flag, Utc::now())
    }

    fn compare(a: &Entrant, b: &Entrant) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        if a.laps == 0 && b.laps == 0 {
            return a.car.cmp(&b.car);
        }
        match b.laps.cmp(&a.laps) {
            Ordering::Equal => match (a.last_crossing, b.last_crossing) {
                (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.car.cmp(&b.car)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.car.cmp(&b.car),
            },
            other => other,
        }
    }
}
