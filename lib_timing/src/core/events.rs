//! # Race Event Model
//!
//! The closed set of events the pipeline publishes on the bus. Every event
//! carries the track identifier it belongs to and only the data relevant to
//! its kind; events are immutable once constructed and serialize to JSON for
//! downstream consumers.

use serde::Serialize;
use serde_json::Value;

use crate::leaderboard::Flag;

/// Discriminant for [`RaceEvent`], used as the bus registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RaceStatusChanged,
    LapCompleted,
    CarConnected,
    RaceDisconnected,
    CarTelemetry,
    DriverMessage,
}

/// Payload of a lap-completion event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LapCompleted {
    pub track: String,
    pub car: String,
    pub laps: i32,
    /// Overall rank at the crossing, 1-based.
    pub position: u32,
    /// Rank within class, absent for unclassed cars.
    pub class_position: Option<u32>,
    /// Car number of the relevant car ahead, when one exists.
    pub ahead: Option<String>,
    /// Human-readable gap to `ahead`, `-` when no baseline exists.
    pub gap: String,
    pub last_lap_secs: f64,
    pub flag: Flag,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaceEvent {
    RaceStatusChanged { track: String, flag: Flag },
    LapCompleted(LapCompleted),
    CarConnected { track: String, car: String },
    RaceDisconnected { track: String },
    CarTelemetry { track: String, car: String, payload: Value },
    DriverMessage { track: String, car: String, text: String },
}

impl RaceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RaceEvent::RaceStatusChanged { .. } => EventKind::RaceStatusChanged,
            RaceEvent::LapCompleted(_) => EventKind::LapCompleted,
            RaceEvent::CarConnected { .. } => EventKind::CarConnected,
            RaceEvent::RaceDisconnected { .. } => EventKind::RaceDisconnected,
            RaceEvent::CarTelemetry { .. } => EventKind::CarTelemetry,
            RaceEvent::DriverMessage { .. } => EventKind::DriverMessage,
        }
    }

    pub fn track(&self) -> &str {
        match self {
            RaceEvent::RaceStatusChanged { track, .. }
            | RaceEvent::CarConnected { track, .. }
            | RaceEvent::RaceDisconnected { track }
            | RaceEvent::CarTelemetry { track, .. }
            | RaceEvent::DriverMessage { track, .. } => track,
            RaceEvent::LapCompleted(lap) => &lap.track,
        }
    }
}
