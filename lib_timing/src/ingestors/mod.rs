//! # Feed Ingestors
//!
//! Per-provider parsers that turn raw feed records into leaderboard
//! mutations, plus the state one live connection owns. Two providers are
//! supported: the line-oriented `rmonitor` wire protocol and the
//! `racehero` structured-payload API. Both drive the same [`RaceContext`],
//! so lap-completion decisions and flag handling behave identically
//! regardless of where the data came from.

pub mod laps;
pub mod racehero;
pub mod rmonitor;

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::bus::EventBus;
use crate::core::events::RaceEvent;
use crate::leaderboard::{Flag, RaceOrder};

/// State owned by one live feed connection: the race register, the last
/// observed flag (to suppress duplicate status events), and the set of cars
/// whose lap completions this connection publishes.
///
/// A context lives inside a single feed task; nothing here needs a lock.
pub struct RaceContext {
    track: String,
    order: RaceOrder,
    last_flag: Option<Flag>,
    targets: HashSet<String>,
    bus: Arc<EventBus>,
}

impl RaceContext {
    pub fn new(track: &str, bus: Arc<EventBus>, cars: impl IntoIterator<Item = String>) -> Self {
        Self {
            track: track.to_string(),
            order: RaceOrder::new(),
            last_flag: None,
            targets: cars.into_iter().collect(),
            bus,
        }
    }

    pub fn track(&self) -> &str {
        &self.track
    }

    pub fn order(&self) -> &RaceOrder {
        &self.order
    }

    pub fn order_mut(&mut self) -> &mut RaceOrder {
        &mut self.order
    }

    pub fn is_target(&self, car: &str) -> bool {
        self.targets.contains(car)
    }

    /// Marks a car as "of interest". Returns false when it already was.
    pub fn add_target(&mut self, car: &str) -> bool {
        self.targets.insert(car.to_string())
    }

    /// Applies a flag observation. The register always tracks the latest
    /// value; a `RaceStatusChanged` event goes out only on a change.
    pub fn apply_flag(&mut self, flag: Flag) {
        self.order.set_flag(flag);
        if self.last_flag == Some(flag) {
            return;
        }
        self.last_flag = Some(flag);
        log::info!("track {} flag now {}", self.track, flag);
        self.bus.emit(RaceEvent::RaceStatusChanged {
            track: self.track.clone(),
            flag,
        });
    }

    /// Runs the lap-completion decision logic for a car that just crossed,
    /// against a snapshot taken now.
    pub fn lap_completed(&mut self, car: &str) {
        let view = self.order.build_snapshot();
        if let Some(event) = laps::evaluate(&self.track, &view, car, &self.targets) {
            self.bus.emit(event);
        }
    }

    /// Publishes the one synthetic lap event a newly-interesting car gets,
    /// from its current snapshot state. Callers are expected to have waited
    /// out the settling delay first.
    pub fn announce_target(&mut self, car: &str) {
        let view = self.order.build_snapshot();
        match laps::synthetic(&self.track, &view, car) {
            Some(event) => self.bus.emit(event),
            None => log::debug!(
                "car {} not on the {} leaderboard yet, no announcement",
                car,
                self.track
            ),
        }
    }
}
