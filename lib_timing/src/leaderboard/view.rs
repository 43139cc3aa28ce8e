//! # Ranked Race Snapshot
//!
//! `RaceView` is the only form of leaderboard state that leaves the
//! ingestion path. It is built from a single consistent read of the
//! register, never mutates afterwards, and can be shared freely across
//! tasks (typically behind an `Arc`).

use chrono::{DateTime, Utc};

use super::{Entrant, Flag};

/// Crossings older than this make a laps-ahead gap read as a pit stop
/// rather than on-track separation.
const PIT_GAP_SECS: i64 = 300;

/// One ranked entry in a snapshot. Carries copies of the entrant figures
/// needed to format a gap, so a view stays readable after the register
/// moves on.
#[derive(Debug, Clone)]
pub struct CarPosition {
    pub car: String,
    pub class_id: Option<String>,
    /// Overall rank, 1-based.
    pub position: u32,
    /// Rank within class, 1-based. `None` for unclassed cars.
    pub class_position: Option<u32>,
    /// Index of the entry immediately ahead overall. `None` for the leader.
    pub ahead: Option<usize>,
    pub laps: i32,
    pub last_lap_secs: f64,
    pub last_crossing: Option<DateTime<Utc>>,
}

/// Immutable, fully-ranked view of the field at one instant.
#[derive(Debug, Clone)]
pub struct RaceView {
    positions: Vec<CarPosition>,
    pub flag: Flag,
    /// Wall-clock instant the snapshot was taken. Gap rendering measures
    /// crossing staleness against this, not against a moving "now".
    pub built_at: DateTime<Utc>,
}

/// Assembles a view from an already-ordered field. Overall ranks are the
/// 1-based positions in `ordered`; class ranks come from one pass with a
/// per-class running counter.
pub(crate) fn build(ordered: &[&Entrant], flag: Flag, built_at: DateTime<Utc>) -> RaceView {
    let mut class_counters: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
    let mut positions = Vec::with_capacity(ordered.len());

    for (index, entrant) in ordered.iter().enumerate() {
        let class_position = entrant.class_id.as_deref().map(|class_id| {
            let counter = class_counters.entry(class_id).or_insert(0);
            *counter += 1;
            *counter
        });

        positions.push(CarPosition {
            car: entrant.car.clone(),
            class_id: entrant.class_id.clone(),
            position: (index + 1) as u32,
            class_position,
            ahead: index.checked_sub(1),
            laps: entrant.laps,
            last_lap_secs: entrant.last_lap_secs,
            last_crossing: entrant.last_crossing,
        });
    }

    RaceView {
        positions,
        flag,
        built_at,
    }
}

impl RaceView {
    pub fn positions(&self) -> &[CarPosition] {
        &self.positions
    }

    pub fn find(&self, car: &str) -> Option<&CarPosition> {
        self.positions.iter().find(|p| p.car == car)
    }

    /// The entry immediately ahead overall, via the back-reference.
    pub fn ahead_overall(&self, entry: &CarPosition) -> Option<&CarPosition> {
        entry.ahead.map(|index| &self.positions[index])
    }

    /// The nearest entry ahead in the same class, walking back-references
    /// and skipping entries whose class differs. Unclassed cars have no
    /// in-class neighbor.
    pub fn ahead_in_class(&self, entry: &CarPosition) -> Option<&CarPosition> {
        let class_id = entry.class_id.as_deref()?;
        let mut cursor = entry.ahead;
        while let Some(index) = cursor {
            let candidate = &self.positions[index];
            if candidate.class_id.as_deref() == Some(class_id) {
                return Some(candidate);
            }
            cursor = candidate.ahead;
        }
        None
    }

    /// Renders the human-readable gap from `entry` to the car ahead of it.
    ///
    /// No car ahead yields `-`. A laps-ahead gap renders as `"N L"`, with a
    /// `(p)` qualifier when either crossing is older than five minutes at
    /// snapshot time: a long silence between same-lap-count crossings means
    /// one of the cars is sitting in the pits. A same-lap gap renders the
    /// crossing-time difference in seconds, or `-` when a crossing is
    /// unknown.
    pub fn gap_to_ahead(&self, entry: &CarPosition, ahead: Option<&CarPosition>) -> String {
        let Some(ahead) = ahead else {
            return "-".to_string();
        };

        let laps_ahead = ahead.laps.saturating_sub(entry.laps);
        if laps_ahead >= 1 {
            if self.crossing_is_stale(ahead) || self.crossing_is_stale(entry) {
                return format!("{} L(p)", laps_ahead);
            }
            return format!("{} L", laps_ahead);
        }

        match (entry.last_crossing, ahead.last_crossing) {
            (Some(mine), Some(theirs)) => {
                let gap_secs = (mine - theirs).num_milliseconds() as f64 / 1000.0;
                format_gap_secs(gap_secs.max(0.0))
            }
            _ => "-".to_string(),
        }
    }

    /// Pace-projected live gap in seconds, covering the stretch between two
    /// discrete crossings. Lap deficits are valued at the chasing car's last
    /// lap pace. This is an estimate for display, not a timing contract.
    pub fn estimated_gap_secs(&self, entry: &CarPosition, ahead: &CarPosition) -> Option<f64> {
        let mine = entry.last_crossing?;
        let theirs = ahead.last_crossing?;
        let crossing_gap = (mine - theirs).num_milliseconds() as f64 / 1000.0;

        let laps_ahead = ahead.laps.saturating_sub(entry.laps);
        if laps_ahead <= 0 {
            return Some(crossing_gap.max(0.0));
        }
        if entry.last_lap_secs <= 0.0 {
            return None;
        }
        Some((laps_ahead as f64 * entry.last_lap_secs + crossing_gap).max(0.0))
    }

    fn crossing_is_stale(&self, entry: &CarPosition) -> bool {
        match entry.last_crossing {
            Some(crossing) => (self.built_at - crossing).num_seconds() > PIT_GAP_SECS,
            None => false,
        }
    }
}

/// Seconds under a minute render as `"<n>s"` (whole seconds stay integral,
/// anything else keeps one decimal); a minute or more renders as `"m:ss"`.
fn format_gap_secs(secs: f64) -> String {
    if secs < 60.0 {
        if (secs - secs.trunc()).abs() < 1e-9 {
            format!("{}s", secs as i64)
        } else {
            format!("{:.1}s", secs)
        }
    } else {
        let minutes = (secs / 60.0) as i64;
        let remainder = (secs - minutes as f64 * 60.0).round() as i64;
        format!("{}:{:02}", minutes, remainder)
    }
}
