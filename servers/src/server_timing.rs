//! # Timing Gateway
//!
//! The production entry point for the race-timing pipeline. It wires the
//! core services together — event bus, relay router, connection supervisor
//! — connects the feeds listed in its configuration, and runs until told
//! to stop.
//!
//! The outer service surface (gRPC endpoints, authentication, persistence)
//! lives in collaborating services; this binary owns ingestion and
//! distribution only. Every event it publishes is also logged as one JSON
//! line, which doubles as a poor man's tap on the bus during incident
//! debugging.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;

use lib_timing::{
    EventBus, EventKind, RaceConnectRequest, RaceSupervisor, RelayRouter, TimingConfig,
};

#[derive(Parser, Debug)]
#[command(name = "server_timing", about = "Race timing ingestion gateway")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "TIMING_CONFIG")]
    config: Option<PathBuf>,
}

/// Full gateway configuration: the pipeline tunables plus the races to
/// connect at startup.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerConfig {
    #[serde(flatten)]
    timing: TimingConfig,
    races: Vec<RaceConnectRequest>,
}

impl ServerConfig {
    fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref())?;
    log::info!(
        "timing gateway starting with {} configured race(s)",
        config.races.len()
    );

    let bus = Arc::new(EventBus::new());

    // The router must outlive the supervisor: it closes a track's bindings
    // when that race disconnects.
    let _relay = RelayRouter::new(Arc::clone(&bus), config.timing.relay_queue_capacity);

    // Tap every published event into the log as JSON.
    bus.register(
        &[
            EventKind::RaceStatusChanged,
            EventKind::LapCompleted,
            EventKind::CarConnected,
            EventKind::RaceDisconnected,
        ],
        None,
        |event| match serde_json::to_string(event.as_ref()) {
            Ok(json) => log::info!("event {}", json),
            Err(error) => log::warn!("unserializable event: {}", error),
        },
    );

    let supervisor = RaceSupervisor::new(Arc::clone(&bus), config.timing.clone());
    for race in config.races {
        let label = format!("{}/{:?}", race.track, race.provider);
        match supervisor.connect(race) {
            Ok(()) => log::info!("connected {}", label),
            Err(error) => log::error!("skipping {}: {}", label, error),
        }
    }

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown requested, tearing down race pipelines");
    supervisor.shutdown().await;
    Ok(())
}
