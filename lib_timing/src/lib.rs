//! # lib_timing
//!
//! Race-state ingestion and distribution: live timing feeds in, a ranked
//! leaderboard in the middle, targeted events and car↔pit relays out.

// Declare the modules to re-export
pub mod configs;
pub mod core;
pub mod ingestors;
pub mod leaderboard;
pub mod utils;

// Re-export the working surface
pub use configs::{ConfigError, TimingConfig};
pub use core::bus::{EventBus, EventFilter, SubscriptionId};
pub use core::events::{EventKind, LapCompleted, RaceEvent};
pub use core::relay::{
    PitCommand, RelayDirection, RelayError, RelayMessage, RelayRouter,
};
pub use core::supervisor::{ConnectError, Provider, RaceConnectRequest, RaceSupervisor};
pub use ingestors::racehero::{RaceHeroParser, RaceHeroPayload};
pub use ingestors::rmonitor::RMonitorParser;
pub use ingestors::RaceContext;
pub use leaderboard::{CarPosition, Entrant, Flag, RaceOrder, RaceView};
