//! # Feed Replay Runner
//!
//! Drives a captured rmonitor feed file through a full parser pipeline and
//! prints every event the pipeline publishes, followed by the final
//! standings. Useful for eyeballing parser behavior against real captures
//! without a live timing connection.
//!
//! ```text
//! cargo run --bin test_feed_replay -- --file capture.rmon --car 181 --car 74
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use lib_timing::{EventBus, EventKind, RMonitorParser, RaceContext};

#[derive(Parser, Debug)]
#[command(name = "test_feed_replay", about = "Replay an rmonitor capture file")]
struct Args {
    /// Capture file, one wire record per line.
    #[arg(long)]
    file: PathBuf,

    /// Track identifier used in emitted events.
    #[arg(long, default_value = "replay")]
    track: String,

    /// Cars of interest; repeat for multiple.
    #[arg(long = "car")]
    cars: Vec<String>,

    /// Pause between records, to approximate live pacing.
    #[arg(long, default_value_t = 10)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.file)?;

    let bus = Arc::new(EventBus::new());
    bus.register(
        &[
            EventKind::RaceStatusChanged,
            EventKind::LapCompleted,
            EventKind::CarConnected,
            EventKind::RaceDisconnected,
        ],
        None,
        |event| match serde_json::to_string(event.as_ref()) {
            Ok(json) => println!("EVENT {}", json),
            Err(error) => eprintln!("unserializable event: {}", error),
        },
    );

    let ctx = RaceContext::new(&args.track, Arc::clone(&bus), args.cars.clone());
    let mut parser = RMonitorParser::new(ctx);

    let mut records = 0usize;
    for line in raw.lines() {
        parser.handle_line(line);
        records += 1;
        if args.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
        }
    }

    // Let the bus consumers drain before printing the summary.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let view = parser.context().order().build_snapshot();
    println!("\nReplayed {} records. Final standings ({}):", records, view.flag);
    for entry in view.positions() {
        let ahead = view.ahead_overall(entry);
        println!(
            "  P{:<3} car {:<6} laps {:<4} gap {}",
            entry.position,
            entry.car,
            entry.laps,
            view.gap_to_ahead(entry, ahead)
        );
    }
    Ok(())
}
